//! Integration tests for the kernel event pipeline.
//!
//! Drives the public API end to end: submission sequencing, state
//! threading across cells, cancellation, and completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use callisto_core::{
    CompletionItem, Error, Kernel, KernelEvent, LanguageBackend, ScriptBackend, ScriptState,
    ScriptWorkspace, SubmissionKind, SymbolDetail, Value,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// Wraps the script backend; evaluation of `block()` parks until the
/// cancellation token fires, which lets tests cancel a genuinely in-flight
/// submission. `entered` is signalled once the blocked evaluation holds
/// its token, so tests only cancel work that has actually started.
struct BlockingBackend {
    inner: ScriptBackend,
    entered: Arc<tokio::sync::Notify>,
}

impl BlockingBackend {
    fn new() -> (Self, Arc<tokio::sync::Notify>) {
        let entered = Arc::new(tokio::sync::Notify::new());
        (
            Self {
                inner: ScriptBackend::new(),
                entered: entered.clone(),
            },
            entered,
        )
    }
}

#[async_trait]
impl LanguageBackend for BlockingBackend {
    type State = ScriptState;
    type Workspace = ScriptWorkspace;

    async fn run(
        &self,
        code: &str,
        prior: Option<&ScriptState>,
        token: CancellationToken,
    ) -> callisto_core::Result<ScriptState> {
        if code.trim() == "block()" {
            self.entered.notify_one();
            token.cancelled().await;
            return Err(Error::Cancelled);
        }
        self.inner.run(code, prior, token).await
    }

    fn is_complete_submission(&self, code: &str) -> bool {
        self.inner.is_complete_submission(code)
    }

    fn has_return_value(&self, state: &ScriptState) -> bool {
        self.inner.has_return_value(state)
    }

    fn return_value(&self, state: &ScriptState) -> Option<Value> {
        self.inner.return_value(state)
    }

    fn source_text<'a>(&self, state: &'a ScriptState) -> &'a str {
        self.inner.source_text(state)
    }

    fn reference_count(&self, state: Option<&ScriptState>) -> usize {
        self.inner.reference_count(state)
    }

    fn build_workspace(&self, state: Option<&ScriptState>) -> ScriptWorkspace {
        self.inner.build_workspace(state)
    }

    fn completions_at(
        &self,
        workspace: &ScriptWorkspace,
        text: &str,
        offset: usize,
    ) -> Vec<CompletionItem> {
        self.inner.completions_at(workspace, text, offset)
    }

    fn symbols_at(
        &self,
        workspace: &ScriptWorkspace,
        text: &str,
        offset: usize,
    ) -> Vec<SymbolDetail> {
        self.inner.symbols_at(workspace, text, offset)
    }
}

async fn next_event(rx: &mut broadcast::Receiver<KernelEvent>) -> KernelEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event should arrive")
        .expect("channel should stay open")
}

fn drain(rx: &mut broadcast::Receiver<KernelEvent>) -> Vec<KernelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// Event ordering
// =============================================================================

#[tokio::test]
async fn fresh_session_event_order_for_simple_expression() {
    let kernel = Kernel::new(ScriptBackend::new());
    let mut rx = kernel.subscribe();

    let id = kernel.submit("1+3", SubmissionKind::Run).await;

    match next_event(&mut rx).await {
        KernelEvent::CodeSubmissionReceived { submission_id, code } => {
            assert_eq!(submission_id, id);
            assert_eq!(code, "1+3");
        }
        other => panic!("expected receipt first, got {:?}", other),
    }
    match next_event(&mut rx).await {
        KernelEvent::CompleteCodeSubmissionReceived { submission_id } => {
            assert_eq!(submission_id, id);
        }
        other => panic!("expected classification second, got {:?}", other),
    }
    match next_event(&mut rx).await {
        KernelEvent::ReturnValueProduced {
            submission_id,
            value,
            formatted_values,
        } => {
            assert_eq!(submission_id, id);
            assert_eq!(value, Value::Int(4));
            assert_eq!(formatted_values[0].mime_type, "text/plain");
            assert_eq!(formatted_values[0].value, "4");
        }
        other => panic!("expected return value third, got {:?}", other),
    }
}

#[tokio::test]
async fn statement_submission_produces_no_return_value() {
    let kernel = Kernel::new(ScriptBackend::new());
    let mut rx = kernel.subscribe();

    kernel.submit("let x = 1;", SubmissionKind::Run).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2, "receipt and classification only");
}

// =============================================================================
// State threading
// =============================================================================

#[tokio::test]
async fn later_submissions_see_earlier_bindings() {
    let kernel = Kernel::new(ScriptBackend::new());
    kernel.submit("let base = 40;", SubmissionKind::Run).await;

    let mut rx = kernel.subscribe();
    kernel.submit("base + 2", SubmissionKind::Run).await;

    let events = drain(&mut rx);
    match events.last() {
        Some(KernelEvent::ReturnValueProduced { value, .. }) => {
            assert_eq!(*value, Value::Int(42));
        }
        other => panic!("expected return value, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_submission_does_not_roll_back_or_corrupt_state() {
    let kernel = Kernel::new(ScriptBackend::new());
    kernel.submit("let a = 5;", SubmissionKind::Run).await;

    // A runtime fault: `a` stays bound, the new binding never commits.
    kernel
        .submit("let b = 1 / 0;", SubmissionKind::Run)
        .await;

    let mut rx = kernel.subscribe();
    kernel.submit("a", SubmissionKind::Run).await;
    let events = drain(&mut rx);
    match events.last() {
        Some(KernelEvent::ReturnValueProduced { value, .. }) => {
            assert_eq!(*value, Value::Int(5));
        }
        other => panic!("expected return value, got {:?}", other),
    }

    let mut rx = kernel.subscribe();
    kernel.submit("b", SubmissionKind::Run).await;
    let events = drain(&mut rx);
    match events.last() {
        Some(KernelEvent::CommandFailed { message, .. }) => {
            assert!(message.contains("unknown variable `b`"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

// =============================================================================
// Completeness classification and diagnose mode
// =============================================================================

#[tokio::test]
async fn incomplete_code_is_classified_but_still_runs() {
    let kernel = Kernel::new(ScriptBackend::new());
    let mut rx = kernel.subscribe();

    kernel.submit("let x = (1 +", SubmissionKind::Run).await;

    let events = drain(&mut rx);
    assert!(matches!(
        events[1],
        KernelEvent::IncompleteCodeSubmissionReceived { .. }
    ));
    assert!(
        matches!(events[2], KernelEvent::CommandFailed { .. }),
        "run kind still attempts evaluation"
    );
}

#[tokio::test]
async fn diagnose_never_evaluates() {
    let kernel = Kernel::new(ScriptBackend::new());
    let mut rx = kernel.subscribe();

    // Valid, invalid, and incomplete code: diagnose stops at
    // classification every time.
    for code in ["1+1", "1/0", "let x = ("] {
        kernel.submit(code, SubmissionKind::Diagnose).await;
    }

    let events = drain(&mut rx);
    assert_eq!(events.len(), 6);
    assert!(!events.iter().any(|e| matches!(
        e,
        KernelEvent::ReturnValueProduced { .. } | KernelEvent::CommandFailed { .. }
    )));
    assert!(!kernel.has_session().await);
}

#[tokio::test]
async fn compile_fault_joins_diagnostics_per_line() {
    let kernel = Kernel::new(ScriptBackend::new());
    let mut rx = kernel.subscribe();

    kernel.submit("use nope;\nuse nada;", SubmissionKind::Run).await;

    let events = drain(&mut rx);
    match events.last() {
        Some(KernelEvent::CommandFailed { message, .. }) => {
            let lines: Vec<&str> = message.lines().collect();
            assert_eq!(lines.len(), 2);
            assert!(lines[0].contains("unknown module `nope`"));
            assert!(lines[1].contains("unknown module `nada`"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancelling_in_flight_submission_fails_it_and_spares_the_next() {
    let (backend, entered) = BlockingBackend::new();
    let kernel = Arc::new(Kernel::new(backend));
    let mut rx = kernel.subscribe();

    let submitter = {
        let kernel = kernel.clone();
        tokio::spawn(async move { kernel.submit("block()", SubmissionKind::Run).await })
    };

    // Wait until the submission holds its cancellation token.
    timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("evaluation should start");
    // Consume receipt + classification.
    loop {
        if matches!(
            next_event(&mut rx).await,
            KernelEvent::CompleteCodeSubmissionReceived { .. }
        ) {
            break;
        }
    }

    kernel.cancel_current();

    let mut saw_cancel_ack = false;
    let mut saw_cancel_failure = false;
    for _ in 0..2 {
        match next_event(&mut rx).await {
            KernelEvent::CurrentCommandCancelled => saw_cancel_ack = true,
            KernelEvent::CommandFailed { message, .. } => {
                assert_eq!(message, "command cancelled");
                saw_cancel_failure = true;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(saw_cancel_ack);
    assert!(saw_cancel_failure);

    submitter.await.unwrap();

    // The stale signal does not leak into later work.
    kernel.submit("2+2", SubmissionKind::Run).await;
    let events = drain(&mut rx);
    match events.last() {
        Some(KernelEvent::ReturnValueProduced { value, .. }) => {
            assert_eq!(*value, Value::Int(4));
        }
        other => panic!("expected return value, got {:?}", other),
    }
}

#[tokio::test]
async fn cancelled_submission_commits_nothing() {
    let (backend, entered) = BlockingBackend::new();
    let kernel = Arc::new(Kernel::new(backend));
    kernel.submit("let kept = 1;", SubmissionKind::Run).await;

    let submitter = {
        let kernel = kernel.clone();
        tokio::spawn(async move { kernel.submit("block()", SubmissionKind::Run).await })
    };
    timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("evaluation should start");
    kernel.cancel_current();
    submitter.await.unwrap();

    let mut rx = kernel.subscribe();
    kernel.submit("kept", SubmissionKind::Run).await;
    let events = drain(&mut rx);
    match events.last() {
        Some(KernelEvent::ReturnValueProduced { value, .. }) => {
            assert_eq!(*value, Value::Int(1));
        }
        other => panic!("expected return value, got {:?}", other),
    }
}

// =============================================================================
// Completion
// =============================================================================

#[tokio::test]
async fn completion_sees_symbols_from_committed_submissions() {
    let kernel = Kernel::new(ScriptBackend::new());
    kernel
        .submit("let velocity = 12;", SubmissionKind::Run)
        .await;

    let items = kernel.complete("vel", 3).await;
    assert!(items.iter().any(|i| i.display_text == "velocity"));
}

#[tokio::test]
async fn completion_is_side_effect_free() {
    let kernel = Kernel::new(ScriptBackend::new());
    kernel.submit("let n = 6;", SubmissionKind::Run).await;

    // Hammer completion between evaluations; results stay identical.
    let first = kernel.complete("n *", 3).await;
    let mut rx = kernel.subscribe();
    kernel.submit("n * 7", SubmissionKind::Run).await;
    let events = drain(&mut rx);
    match events.last() {
        Some(KernelEvent::ReturnValueProduced { value, .. }) => {
            assert_eq!(*value, Value::Int(42));
        }
        other => panic!("expected return value, got {:?}", other),
    }

    let second = kernel.complete("n *", 3).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn completion_emits_single_terminal_event() {
    let kernel = Kernel::new(ScriptBackend::new());
    let mut rx = kernel.subscribe();

    kernel.complete("le", 2).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        KernelEvent::CompletionRequestCompleted { items } => {
            let len = items
                .iter()
                .find(|i| i.display_text == "len")
                .expect("builtin should be offered");
            assert_eq!(len.detail.as_deref(), Some("len(value) -> int"));
        }
        other => panic!("expected completion event, got {:?}", other),
    }
}

#[tokio::test]
async fn completion_runs_while_evaluation_is_in_flight() {
    let (backend, entered) = BlockingBackend::new();
    let kernel = Arc::new(Kernel::new(backend));
    kernel.submit("let snap = 3;", SubmissionKind::Run).await;

    let submitter = {
        let kernel = kernel.clone();
        tokio::spawn(async move { kernel.submit("block()", SubmissionKind::Run).await })
    };
    timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("evaluation should start");

    // The snapshot is the committed state, not the half-run submission.
    let items = timeout(Duration::from_secs(5), kernel.complete("sna", 3))
        .await
        .expect("completion must not wait for the evaluation");
    assert!(items.iter().any(|i| i.display_text == "snap"));

    kernel.cancel_current();
    submitter.await.unwrap();
}

// =============================================================================
// Formatting
// =============================================================================

#[tokio::test]
async fn formatted_values_are_stable_across_identical_submissions() {
    let kernel = Kernel::new(ScriptBackend::new());
    let mut rx = kernel.subscribe();

    kernel.submit("\"hi\" + \"!\"", SubmissionKind::Run).await;
    kernel.submit("\"hi\" + \"!\"", SubmissionKind::Run).await;

    let formatted: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            KernelEvent::ReturnValueProduced { formatted_values, .. } => Some(formatted_values),
            _ => None,
        })
        .collect();
    assert_eq!(formatted.len(), 2);
    assert_eq!(formatted[0], formatted[1]);
    assert_eq!(formatted[0][0].value, "hi!");
    assert_eq!(formatted[0][1].value, "\"hi!\"");
}
