//! The kernel: submission sequencing and the evaluation state machine.
//!
//! One kernel owns one session. Submissions are processed strictly one at a
//! time; each threads the prior session state through the language backend
//! to produce the next state. Every observable outcome is published as a
//! [`KernelEvent`] on the broadcast channel, in fixed causal order per
//! submission: receipt, completeness classification, then at most one
//! result event.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, broadcast};
use uuid::Uuid;

use crate::backend::LanguageBackend;
use crate::cancel::CancellationController;
use crate::complete::CompletionEngine;
use crate::config::KernelConfig;
use crate::error::Error;
use crate::format::{DefaultFormatter, ValueFormatter};
use crate::protocol::{CompletionItem, KernelEvent, SubmissionKind};

/// An incremental script-execution kernel over a language backend.
pub struct Kernel<B: LanguageBackend> {
    backend: Arc<B>,
    /// Committed session state; replaced wholesale on successful
    /// submissions, read-shared with concurrent completion requests.
    state: RwLock<Option<B::State>>,
    cancellation: CancellationController,
    completion: CompletionEngine<B>,
    formatter: Box<dyn ValueFormatter>,
    tx: broadcast::Sender<KernelEvent>,
    /// Serializes submissions: one evaluation stream per session.
    sequencer: Mutex<()>,
}

impl<B: LanguageBackend> Kernel<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, KernelConfig::default())
    }

    pub fn with_config(backend: B, config: KernelConfig) -> Self {
        let (tx, _rx) = broadcast::channel(config.channel_capacity);
        Self {
            backend: Arc::new(backend),
            state: RwLock::new(None),
            cancellation: CancellationController::new(),
            completion: CompletionEngine::new(),
            formatter: Box::new(DefaultFormatter),
            tx,
            sequencer: Mutex::new(()),
        }
    }

    /// Replace the value formatter.
    pub fn with_formatter(mut self, formatter: impl ValueFormatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// Subscribe to the event stream. Replay-free: only events published
    /// after this call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.tx.subscribe()
    }

    /// Whether any submission has been committed.
    pub async fn has_session(&self) -> bool {
        self.state.read().await.is_some()
    }

    fn publish(&self, event: KernelEvent) {
        tracing::debug!(?event, "publishing kernel event");
        // Send failures just mean nobody is subscribed right now.
        let _ = self.tx.send(event);
    }

    /// Submit code for evaluation or diagnosis. Returns the submission id
    /// stamped on every event this submission causes.
    ///
    /// Evaluation faults never surface as errors here; they are converted
    /// to [`KernelEvent::CommandFailed`] at this boundary.
    pub async fn submit(&self, code: &str, kind: SubmissionKind) -> Uuid {
        let _serial = self.sequencer.lock().await;

        let submission_id = Uuid::new_v4();
        self.publish(KernelEvent::CodeSubmissionReceived {
            submission_id,
            code: code.to_string(),
        });

        // Syntax-only classification; informs the front-end but only
        // Diagnose stops here.
        if self.backend.is_complete_submission(code) {
            self.publish(KernelEvent::CompleteCodeSubmissionReceived { submission_id });
        } else {
            self.publish(KernelEvent::IncompleteCodeSubmissionReceived { submission_id });
        }

        if kind == SubmissionKind::Diagnose {
            return submission_id;
        }

        let epoch = self.cancellation.current_epoch();
        if epoch.token.is_cancelled() {
            self.publish(KernelEvent::CommandFailed {
                submission_id: Some(submission_id),
                message: Error::Cancelled.to_string(),
            });
            return submission_id;
        }

        let prior = self.state.read().await.clone();
        tracing::debug!(%submission_id, generation = epoch.generation, "evaluating submission");

        match self.backend.run(code, prior.as_ref(), epoch.token).await {
            Ok(new_state) => {
                let value = self
                    .backend
                    .has_return_value(&new_state)
                    .then(|| self.backend.return_value(&new_state))
                    .flatten();

                *self.state.write().await = Some(new_state);

                if let Some(value) = value {
                    let formatted_values = self.formatter.format(&value);
                    self.publish(KernelEvent::ReturnValueProduced {
                        submission_id,
                        value,
                        formatted_values,
                    });
                }
            }
            Err(err) => {
                // Compile faults join diagnostics one per line; runtime
                // faults pass through raw; cancellation keeps its own
                // message. The pre-submission state stays committed.
                self.publish(KernelEvent::CommandFailed {
                    submission_id: Some(submission_id),
                    message: err.to_string(),
                });
            }
        }

        submission_id
    }

    /// Cancel the in-flight submission, if any, and rotate the
    /// cancellation epoch so later submissions are unaffected.
    pub fn cancel_current(&self) {
        let generation = self.cancellation.cancel_and_rotate();
        tracing::info!(generation, "cancelled current command");
        self.publish(KernelEvent::CurrentCommandCancelled);
    }

    /// Completions for a not-yet-submitted fragment, consistent with the
    /// committed session state. Never mutates the session.
    pub async fn complete(&self, fragment: &str, cursor_position: usize) -> Vec<CompletionItem> {
        let state = self.state.read().await;
        let items = self
            .completion
            .complete(&self.backend, state.as_ref(), fragment, cursor_position);
        drop(state);

        self.publish(KernelEvent::CompletionRequestCompleted {
            items: items.clone(),
        });
        items
    }

    /// Drop the session; the next submission starts from a fresh state.
    pub async fn reset(&self) {
        let _serial = self.sequencer.lock().await;
        *self.state.write().await = None;
        tracing::info!("session reset");
        self.publish(KernelEvent::SessionReset);
    }
}
