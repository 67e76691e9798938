//! Language backend seam.
//!
//! The kernel treats the host language engine as an opaque capability:
//! evaluate code against a prior state and return a new state or a set of
//! diagnostics. Everything the kernel needs to know about a state is
//! exposed as an explicit method here — including whether the last
//! submission produced a return value — so no component ever reaches into
//! engine internals.

mod script;

pub use script::{ScriptBackend, ScriptState, ScriptWorkspace};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::{CompletionItem, SymbolDetail};
use crate::value::Value;

/// An opaque language engine driven by the kernel.
#[async_trait]
pub trait LanguageBackend: Send + Sync + 'static {
    /// Immutable-from-outside snapshot of the evaluation environment.
    /// Replaced wholesale after each successful submission.
    type State: Clone + Send + Sync + 'static;

    /// Analysis workspace used by the completion engine. Cached by the
    /// kernel and rebuilt when the state's reference set changes size.
    type Workspace: Send + Sync + 'static;

    /// Evaluate `code` against `prior`, producing the next state.
    ///
    /// Implementations must check `token` before doing any work and at
    /// safe yield points while running; on cancellation they return
    /// [`crate::Error::Cancelled`] and discard partial results.
    async fn run(
        &self,
        code: &str,
        prior: Option<&Self::State>,
        token: CancellationToken,
    ) -> Result<Self::State>;

    /// Syntax-only completeness check. No evaluation, no side effects.
    fn is_complete_submission(&self, code: &str) -> bool;

    /// Whether the state's last submission ended in an expression value.
    fn has_return_value(&self, state: &Self::State) -> bool;

    /// The last submission's expression value, if any.
    fn return_value(&self, state: &Self::State) -> Option<Value>;

    /// Source text committed into the session so far, used as the base of
    /// the hypothetical completion document.
    fn source_text<'a>(&self, state: &'a Self::State) -> &'a str;

    /// Cardinality of the state's compiled-unit reference set. The
    /// completion cache treats a change in this count as staleness.
    fn reference_count(&self, state: Option<&Self::State>) -> usize;

    /// Build an analysis workspace for the given state.
    fn build_workspace(&self, state: Option<&Self::State>) -> Self::Workspace;

    /// Raw completion candidates at `offset` within `text`.
    fn completions_at(
        &self,
        workspace: &Self::Workspace,
        text: &str,
        offset: usize,
    ) -> Vec<CompletionItem>;

    /// Recommended symbols at `offset`, carrying signature metadata to be
    /// merged onto matching raw candidates.
    fn symbols_at(
        &self,
        workspace: &Self::Workspace,
        text: &str,
        offset: usize,
    ) -> Vec<SymbolDetail>;
}
