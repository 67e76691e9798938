//! Cancellation controller.
//!
//! One cancellation epoch is current at any time. Cancelling signals the
//! current epoch's token and installs a fresh epoch in the same critical
//! section, so work already holding the old token observes the signal while
//! work started afterwards is unaffected. The lock is only ever held across
//! the swap, never across an await, which keeps cancellation independent of
//! whatever evaluation is in flight.

use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// A generation of cancellation state.
#[derive(Debug, Clone)]
pub struct CancellationEpoch {
    /// Token observed by work started under this epoch.
    pub token: CancellationToken,
    /// Monotonically increasing generation counter.
    pub generation: u64,
}

/// Owns the current cancellation epoch.
#[derive(Debug)]
pub struct CancellationController {
    current: Mutex<CancellationEpoch>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(CancellationEpoch {
                token: CancellationToken::new(),
                generation: 0,
            }),
        }
    }

    /// Snapshot of the current epoch. Cloned tokens share cancellation
    /// state with the original.
    pub fn current_epoch(&self) -> CancellationEpoch {
        self.lock().clone()
    }

    /// Signal the current epoch's token and rotate to a fresh epoch.
    /// Returns the generation that was cancelled.
    pub fn cancel_and_rotate(&self) -> u64 {
        let mut current = self.lock();
        let cancelled = current.generation;
        current.token.cancel();
        *current = CancellationEpoch {
            token: CancellationToken::new(),
            generation: cancelled + 1,
        };
        cancelled
    }

    /// Generation of the current epoch.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancellationEpoch> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}
