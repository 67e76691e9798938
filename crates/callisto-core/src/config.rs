//! Kernel configuration.

/// Capacity for the broadcast event channel.
/// 256 events is plenty for normal notebook traffic; subscribers that fall
/// behind lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for a [`crate::Kernel`].
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Capacity of the broadcast event channel.
    pub channel_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}
