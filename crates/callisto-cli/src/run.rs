//! Run command implementation for the callisto CLI.
//!
//! Feeds `// %%`-delimited cells through a kernel in order and prints the
//! resulting event stream as JSON lines.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use callisto_core::{Kernel, KernelEvent, ScriptBackend, SubmissionKind};

/// Cell separator in percent-format scripts.
const CELL_MARKER: &str = "// %%";

/// Submit every cell of `script_path`, printing events as they arrive.
/// Returns the number of failed submissions.
pub async fn execute(script_path: &str, diagnose_only: bool) -> anyhow::Result<usize> {
    let source = std::fs::read_to_string(script_path)
        .with_context(|| format!("failed to read script: {}", script_path))?;

    let cells = split_cells(&source);
    if cells.is_empty() {
        println!("No cells found in script.");
        println!("Cells are blocks of code separated by `{}` lines.", CELL_MARKER);
        return Ok(0);
    }

    let kernel = Kernel::new(ScriptBackend::new());
    let mut rx = kernel.subscribe();

    let failures = Arc::new(AtomicUsize::new(0));
    let printer_failures = failures.clone();
    let printer = tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if matches!(event, KernelEvent::CommandFailed { .. }) {
                        printer_failures.fetch_add(1, Ordering::SeqCst);
                    }
                    match serde_json::to_string(&event) {
                        Ok(json) => println!("{}", json),
                        Err(e) => tracing::error!("failed to serialize event: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("event stream lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let kind = if diagnose_only {
        SubmissionKind::Diagnose
    } else {
        SubmissionKind::Run
    };

    for cell in &cells {
        kernel.submit(cell, kind).await;
    }

    // Dropping the kernel closes the broadcast channel and lets the
    // printer drain the remaining events.
    drop(kernel);
    printer.await?;

    Ok(failures.load(Ordering::SeqCst))
}

/// Split a percent-format script into cells.
fn split_cells(source: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = Vec::new();
    for line in source.lines() {
        if line.trim_start().starts_with(CELL_MARKER) {
            push_cell(&mut cells, &mut current);
        } else {
            current.push(line);
        }
    }
    push_cell(&mut cells, &mut current);
    cells
}

fn push_cell(cells: &mut Vec<String>, current: &mut Vec<&str>) {
    let cell = current.join("\n");
    if !cell.trim().is_empty() {
        cells.push(cell);
    }
    current.clear();
}
