//! Command and event types for the kernel bus.
//!
//! Commands flow in from a notebook front-end, events flow out to the
//! display layer. Both are serde `type`-tagged unions so any transport can
//! carry them as JSON without caring about the kernel internals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// How a submission should be treated once its completeness is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    /// Classify, then evaluate against the session state.
    #[default]
    Run,
    /// Classify only; never evaluate, never touch the session.
    Diagnose,
}

/// Commands accepted by the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelCommand {
    /// Submit code for evaluation or syntactic diagnosis.
    SubmitCode {
        /// Source text of the submission.
        code: String,
        /// Run or diagnose. Defaults to run.
        #[serde(default)]
        submission_type: SubmissionKind,
    },

    /// Request completions for a not-yet-submitted fragment.
    RequestCompletion {
        /// The fragment being edited.
        code: String,
        /// Byte offset of the cursor within the fragment.
        cursor_position: usize,
    },

    /// Cancel whatever submission is currently in flight.
    CancelCurrentCommand,
}

/// Events published by the kernel.
///
/// Per submission the order is fixed: receipt, completeness classification,
/// then at most one result event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    /// A submission arrived.
    CodeSubmissionReceived {
        submission_id: Uuid,
        code: String,
    },

    /// The submission parses as a complete unit.
    CompleteCodeSubmissionReceived {
        submission_id: Uuid,
    },

    /// The submission is syntactically unfinished.
    IncompleteCodeSubmissionReceived {
        submission_id: Uuid,
    },

    /// Evaluation succeeded and the final expression produced a value.
    ReturnValueProduced {
        submission_id: Uuid,
        value: Value,
        formatted_values: Vec<FormattedValue>,
    },

    /// Evaluation failed: compile fault, runtime fault, or cancellation.
    CommandFailed {
        submission_id: Option<Uuid>,
        message: String,
    },

    /// Terminal event of a completion request, with the final ordered list.
    CompletionRequestCompleted {
        items: Vec<CompletionItem>,
    },

    /// Acknowledgment that the current command was cancelled and the
    /// cancellation epoch rotated.
    CurrentCommandCancelled,

    /// The session state was dropped; the next submission starts fresh.
    SessionReset,
}

/// A rendered representation of a return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedValue {
    pub mime_type: String,
    pub value: String,
}

impl FormattedValue {
    pub fn new(mime_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            value: value.into(),
        }
    }
}

/// Kind of a completion candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionItemKind {
    Variable,
    Function,
    Module,
    Keyword,
}

/// A candidate offered at a cursor position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionItem {
    /// Text shown in the completion list.
    pub display_text: String,
    /// Text inserted on acceptance; defaults to the display text.
    pub insert_text: Option<String>,
    pub kind: CompletionItemKind,
    /// Signature or type information, merged from symbol recommendations.
    pub detail: Option<String>,
}

impl CompletionItem {
    pub fn new(display_text: impl Into<String>, kind: CompletionItemKind) -> Self {
        Self {
            display_text: display_text.into(),
            insert_text: None,
            kind,
            detail: None,
        }
    }
}

/// A recommended symbol at a position, carrying richer metadata than the
/// raw completion list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDetail {
    pub name: String,
    pub kind: CompletionItemKind,
    /// Human-readable signature, e.g. `min(a, b) -> int`.
    pub detail: String,
}
