//! Incremental script-execution kernel for interactive notebooks.
//!
//! This crate provides:
//! - Command/event bus with broadcast fan-out
//! - Submission sequencing with syntactic completeness classification
//! - Evaluation state machine threading session state across submissions
//! - Epoch-based cooperative cancellation
//! - Completion engine over a cached analysis workspace

pub mod backend;
pub mod bus;
pub mod cancel;
pub mod complete;
pub mod config;
pub mod error;
pub mod format;
pub mod kernel;
pub mod protocol;
pub mod value;

pub use backend::{LanguageBackend, ScriptBackend, ScriptState, ScriptWorkspace};
pub use bus::{CommandBus, dispatch};
pub use cancel::{CancellationController, CancellationEpoch};
pub use complete::CompletionEngine;
pub use config::KernelConfig;
pub use error::{Diagnostic, Error, Result};
pub use format::{DefaultFormatter, JsonFormatter, PlainTextFormatter, ValueFormatter};
pub use kernel::Kernel;
pub use protocol::{
    CompletionItem, CompletionItemKind, FormattedValue, KernelCommand, KernelEvent,
    SubmissionKind, SymbolDetail,
};
pub use value::Value;
