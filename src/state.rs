//! Download state machine.
//!
//! Every status change goes through [`transition`], which checks the move is
//! legal and returns the [`TaskPatch`] that persists it together with its side
//! effects (retry bookkeeping, pause reason, admission time, final size).
//!
//! ```text
//!   Pending ──admit──▶ Running ──complete──▶ Success
//!      ▲  │              │  │ ──fatal────▶ ErrorFatal
//!      │  └─deny─┐       │  └─transient──▶ PausedRetry ─(max exceeded)─▶ ErrorFatal
//!      │         ▼       │                     │
//!      ├── PausedNetwork ◀┘ deny               │
//!      │         │ restored                    │
//!      ◀─────────┘◀──────── backoff elapsed ───┘
//!      ◀─── demote (cap lowered) ── Running
//!
//!   any non-terminal ──cancel──▶ Cancelled
//! ```

use crate::config::RetryConfig;
use crate::error::DownloadError;
use crate::retry;
use crate::types::{DownloadTask, PauseReason, Status, TaskPatch};

/// Something that happened to a task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskEvent {
    /// Scheduler admitted the task (policy allowed, slot free)
    Admit,
    /// Transport reported full completion with the final size
    Complete {
        /// Final size in bytes
        final_bytes: i64,
    },
    /// Transport reported a failure worth retrying
    TransientFailure {
        /// What went wrong
        reason: String,
    },
    /// Transport reported a failure that must not be retried
    FatalFailure {
        /// What went wrong
        reason: String,
    },
    /// Policy does not allow the active network
    NetworkDenied(PauseReason),
    /// Policy allows the network again
    NetworkRestored,
    /// Retry backoff elapsed
    BackoffElapsed,
    /// Concurrency maximum lowered below the running count
    Demote,
    /// Caller cancelled the task
    Cancel,
}

impl TaskEvent {
    /// Short name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Admit => "admit",
            TaskEvent::Complete { .. } => "complete",
            TaskEvent::TransientFailure { .. } => "transient_failure",
            TaskEvent::FatalFailure { .. } => "fatal_failure",
            TaskEvent::NetworkDenied(_) => "network_denied",
            TaskEvent::NetworkRestored => "network_restored",
            TaskEvent::BackoffElapsed => "backoff_elapsed",
            TaskEvent::Demote => "demote",
            TaskEvent::Cancel => "cancel",
        }
    }
}

/// Inputs a transition needs besides the task and event
#[derive(Clone, Copy, Debug)]
pub struct TransitionContext<'a> {
    /// Current time in milliseconds
    pub now: i64,
    /// Retry limits and backoff
    pub retry: &'a RetryConfig,
}

/// Target status for `event` applied in `from`, if the move is legal
///
/// `retry_count` is the task's count before the event; it decides whether a
/// transient failure still earns a retry.
pub fn next_status(
    from: Status,
    event: &TaskEvent,
    retry_count: u32,
    max_attempts: u32,
) -> Option<Status> {
    use Status::*;

    if from.is_terminal() {
        return None;
    }

    match (from, event) {
        (_, TaskEvent::Cancel) => Some(Cancelled),
        (Pending, TaskEvent::Admit) => Some(Running),
        (Pending | Running, TaskEvent::NetworkDenied(_)) => Some(PausedNetwork),
        (Running, TaskEvent::Complete { .. }) => Some(Success),
        (Running, TaskEvent::FatalFailure { .. }) => Some(ErrorFatal),
        // A late report from a worker that already failed once lands in PausedRetry
        (Running | PausedRetry, TaskEvent::TransientFailure { .. }) => {
            if retry_count.saturating_add(1) > max_attempts {
                Some(ErrorFatal)
            } else {
                Some(PausedRetry)
            }
        }
        (Running, TaskEvent::Demote) => Some(Pending),
        (PausedRetry, TaskEvent::BackoffElapsed) => Some(Pending),
        (PausedNetwork, TaskEvent::NetworkRestored) => Some(Pending),
        _ => None,
    }
}

/// Validate `event` against `task` and build the patch that persists it
pub fn transition(
    task: &DownloadTask,
    event: &TaskEvent,
    ctx: TransitionContext<'_>,
) -> Result<TaskPatch, DownloadError> {
    let to = next_status(task.status, event, task.retry_count, ctx.retry.max_attempts).ok_or(
        DownloadError::InvalidTransition {
            id: task.id,
            from: task.status,
            event: event.name(),
        },
    )?;

    let mut patch = TaskPatch::status(to);

    // Leaving PausedNetwork clears the displayed reason
    if task.status == Status::PausedNetwork && to != Status::PausedNetwork {
        patch.pause_reason = Some(None);
    }

    match event {
        TaskEvent::Admit => {
            patch.started_at = Some(Some(ctx.now));
        }
        TaskEvent::Complete { final_bytes } => {
            patch.current_bytes = Some(*final_bytes);
            patch.total_bytes = Some(*final_bytes);
        }
        TaskEvent::TransientFailure { reason } => {
            let attempt = task.retry_count.saturating_add(1);
            patch.retry_count = Some(attempt);
            if to == Status::ErrorFatal {
                patch.error_message = Some(Some(format!(
                    "retries exhausted after {} attempts: {reason}",
                    task.retry_count
                )));
            } else {
                let delay = retry::retry_delay(ctx.retry, attempt);
                patch.backoff_ms = Some(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
            }
        }
        TaskEvent::FatalFailure { reason } => {
            patch.error_message = Some(Some(reason.clone()));
        }
        TaskEvent::NetworkDenied(reason) => {
            patch.pause_reason = Some(Some(*reason));
        }
        TaskEvent::Demote => {
            patch.started_at = Some(None);
        }
        TaskEvent::NetworkRestored | TaskEvent::BackoffElapsed | TaskEvent::Cancel => {}
    }

    Ok(patch)
}

/// Whether a `PausedRetry` task has waited out its backoff at `now`
pub fn backoff_elapsed(task: &DownloadTask, now: i64) -> bool {
    task.status == Status::PausedRetry && now.saturating_sub(task.last_modified) >= task.backoff_ms
}
