//! Error types for callisto-core.

use std::fmt;

use thiserror::Error;

/// Result type for callisto-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the kernel.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Submission failed to compile. Carries every diagnostic the parser
    /// produced; rendered one per line.
    #[error("{}", join_diagnostics(diagnostics))]
    Compilation {
        diagnostics: Vec<Diagnostic>,
    },

    /// Submission compiled but faulted while executing. The message is the
    /// raw fault text, nothing synthesized around it.
    #[error("{0}")]
    Runtime(String),

    /// Submission was cancelled before or during evaluation.
    #[error("command cancelled")]
    Cancelled,

    /// The command queue was closed before the command could be enqueued.
    #[error("command channel closed")]
    ChannelClosed,
}

impl Error {
    /// True for the cancellation variant, which is surfaced differently
    /// from ordinary faults.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// A single compile-time diagnostic with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    /// 1-indexed line within the submission.
    pub line: usize,
    /// 1-indexed column within the line.
    pub column: usize,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}): {}", self.line, self.column, self.message)
    }
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
