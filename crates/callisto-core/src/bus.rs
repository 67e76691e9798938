//! Command bus.
//!
//! Submissions flow through a bounded mpsc queue and are dispatched to the
//! kernel one at a time, in arrival order; events flow out through the
//! kernel's broadcast channel. Cancellation bypasses the queue entirely —
//! it must reach the in-flight token without waiting on the evaluation —
//! and completion requests are spawned so they can run concurrently with
//! an evaluation. Dispatch is a single match on the command enum, resolved
//! once at this boundary.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::LanguageBackend;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::protocol::KernelCommand;

/// Capacity of the inbound submission queue. Producers that outrun
/// evaluation block here rather than piling up unboundedly.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Handle for feeding commands to a running kernel.
pub struct CommandBus<B: LanguageBackend> {
    kernel: Arc<Kernel<B>>,
    tx: mpsc::Sender<KernelCommand>,
}

impl<B: LanguageBackend> Clone for CommandBus<B> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<B: LanguageBackend> CommandBus<B> {
    /// Spawn the submission worker for `kernel` and return the sending
    /// handle. The worker exits when every handle is dropped.
    pub fn start(kernel: Arc<Kernel<B>>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let worker_kernel = kernel.clone();
        let worker = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                dispatch(&worker_kernel, command).await;
            }
            tracing::debug!("command bus drained, worker exiting");
        });
        (Self { kernel, tx }, worker)
    }

    /// Route a command.
    ///
    /// Submissions are enqueued in arrival order and processed one at a
    /// time. `CancelCurrentCommand` is handled inline so it never queues
    /// behind the submission it is meant to interrupt. Completion requests
    /// are spawned; they read a consistent state snapshot and may overlap
    /// an in-flight evaluation.
    pub async fn send(&self, command: KernelCommand) -> Result<()> {
        match command {
            KernelCommand::SubmitCode { .. } => self
                .tx
                .send(command)
                .await
                .map_err(|_| Error::ChannelClosed),
            KernelCommand::RequestCompletion {
                code,
                cursor_position,
            } => {
                let kernel = self.kernel.clone();
                tokio::spawn(async move {
                    kernel.complete(&code, cursor_position).await;
                });
                Ok(())
            }
            KernelCommand::CancelCurrentCommand => {
                self.kernel.cancel_current();
                Ok(())
            }
        }
    }
}

/// Route one command directly to the kernel operation it names.
pub async fn dispatch<B: LanguageBackend>(kernel: &Kernel<B>, command: KernelCommand) {
    match command {
        KernelCommand::SubmitCode {
            code,
            submission_type,
        } => {
            kernel.submit(&code, submission_type).await;
        }
        KernelCommand::RequestCompletion {
            code,
            cursor_position,
        } => {
            kernel.complete(&code, cursor_position).await;
        }
        KernelCommand::CancelCurrentCommand => kernel.cancel_current(),
    }
}
