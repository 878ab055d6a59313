//! Text rendering for instance progress.

use crate::models::{CloseOutcome, Digest, Progress, Step, StepStatus};

const PENDING: char = '○';
const READY: char = '◇';
const IN_PROGRESS: char = '◐';
const CLOSED: char = '●';

/// Get the status symbol for a step status.
fn status_symbol(status: StepStatus) -> char {
    match status {
        StepStatus::Pending => PENDING,
        StepStatus::Ready => READY,
        StepStatus::InProgress => IN_PROGRESS,
        StepStatus::Closed => CLOSED,
    }
}

/// Render an instance's steps with status symbols and a progress header.
///
/// Example output:
/// ```text
/// mol-3f2a9c01b4 (molecule, active) 1/3
/// ├── ● load: Load context
/// ├── ◐ implement: Implement gt-42
/// └── ○ verify: Verify
/// ```
pub fn render_progress(progress: &Progress) -> String {
    let mut output = format!(
        "{} ({}, {}) {}/{}\n",
        progress.instance.id,
        progress.instance.kind.as_str(),
        progress.instance.status.as_str(),
        progress.closed,
        progress.total
    );
    for (i, step) in progress.steps.iter().enumerate() {
        let is_last = i == progress.steps.len() - 1;
        render_step(&mut output, step, is_last);
    }
    output
}

fn render_step(output: &mut String, step: &Step, is_last: bool) {
    let branch = if is_last { "└── " } else { "├── " };
    output.push_str(branch);
    output.push(status_symbol(step.status));
    output.push(' ');
    output.push_str(&step.ref_id);
    output.push_str(": ");
    output.push_str(&step.title);
    output.push('\n');
}

/// One-line summary of a close, naming what comes next.
pub fn render_close(outcome: &CloseOutcome) -> String {
    let mut line = format!("Closed {}: {}", outcome.closed.id, outcome.closed.title);
    if let Some(ref next) = outcome.activated {
        line.push_str(&format!("\nNow working: {} {}", next.id, next.title));
    } else if let Some(ref next) = outcome.ready {
        line.push_str(&format!("\nReady: {} {}", next.id, next.title));
    } else if outcome.instance_complete {
        line.push_str(&format!("\n{} complete", outcome.closed.instance_id));
    }
    line
}

pub fn render_digest(digest: &Digest) -> String {
    format!(
        "Digest {} for {} ({}/{} steps closed)\n{}",
        digest.id,
        digest.instance_id,
        digest.closed_count(),
        digest.steps.len(),
        digest.summary
    )
}
