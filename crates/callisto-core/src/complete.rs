//! Completion engine.
//!
//! Builds a hypothetical document from the committed session source plus the
//! fragment being edited, and serves candidates from a cached analysis
//! workspace. The session itself is never touched; the document is dropped
//! when the request completes.

use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashSet;

use crate::backend::LanguageBackend;
use crate::protocol::CompletionItem;

struct CachedWorkspace<W> {
    workspace: W,
    /// Reference-set cardinality the workspace was built against. A change
    /// in count marks the cache stale; content changes at equal count are
    /// deliberately not detected.
    reference_count: usize,
}

/// Serves completion requests against a state snapshot.
pub struct CompletionEngine<B: LanguageBackend> {
    cache: Mutex<Option<CachedWorkspace<B::Workspace>>>,
}

impl<B: LanguageBackend> CompletionEngine<B> {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }

    /// Compute the ordered candidate list for `fragment` at
    /// `cursor_position`, against the given committed state (if any).
    pub fn complete(
        &self,
        backend: &B,
        state: Option<&B::State>,
        fragment: &str,
        cursor_position: usize,
    ) -> Vec<CompletionItem> {
        let base = state.map(|s| backend.source_text(s)).unwrap_or_default();
        let document = if base.is_empty() {
            fragment.to_string()
        } else {
            format!("{}\n{}", base, fragment)
        };

        // Locate the fragment inside the merged document; the cursor is
        // relative to the fragment, the workspace wants an absolute offset.
        let fragment_start = document
            .rfind(fragment)
            .unwrap_or_else(|| document.len().saturating_sub(fragment.len()));
        let offset = (fragment_start + cursor_position).min(document.len());

        // Rebuild-then-use under one lock acquisition so concurrent
        // requests never observe a half-built workspace.
        let reference_count = backend.reference_count(state);
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stale = cache
            .as_ref()
            .is_none_or(|cached| cached.reference_count != reference_count);
        if stale {
            tracing::debug!(reference_count, "rebuilding completion workspace");
            *cache = Some(CachedWorkspace {
                workspace: backend.build_workspace(state),
                reference_count,
            });
        }
        let Some(cached) = cache.as_ref() else {
            return Vec::new();
        };

        let mut items = backend.completions_at(&cached.workspace, &document, offset);
        let symbols = backend.symbols_at(&cached.workspace, &document, offset);

        // Each logical symbol contributes exactly one enrichment record.
        let mut seen = FxHashSet::default();
        for symbol in symbols {
            if !seen.insert((symbol.name.clone(), symbol.kind)) {
                continue;
            }
            if let Some(item) = items
                .iter_mut()
                .find(|i| i.display_text == symbol.name && i.kind == symbol.kind)
                && item.detail.is_none()
            {
                item.detail = Some(symbol.detail);
            }
        }

        items
    }
}

impl<B: LanguageBackend> Default for CompletionEngine<B> {
    fn default() -> Self {
        Self::new()
    }
}
