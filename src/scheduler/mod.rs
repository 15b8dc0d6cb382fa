//! Scheduling pass planner.
//!
//! A pass looks at every task in the store and decides which ones change
//! state. Planning is pure: [`plan_pass`] takes the snapshot, the network
//! facts and the concurrency maximum, and returns the updates to persist
//! together with the snapshot as it will look afterwards. The engine applies
//! the updates and hands the resulting snapshot to the notification
//! aggregator, so the store is read once per pass.
//!
//! Steps, in order:
//! 1. `Running` tasks the policy no longer allows move to `PausedNetwork`.
//! 2. `PausedRetry` tasks whose backoff elapsed move to `Pending`.
//! 3. `PausedNetwork` tasks the policy allows again move to `Pending`.
//! 4. If more tasks are `Running` than allowed (the maximum was lowered),
//!    the most recently started ones are demoted to `Pending`.
//! 5. `Pending` tasks are considered in creation order while a slot is free:
//!    allowed ones are admitted, denied ones move to `PausedNetwork`.
//!
//! Releasing paused tasks before admission lets them start in the same pass.

use crate::policy::{NetworkFacts, evaluate};
use crate::state::{self, TaskEvent, TransitionContext};
use crate::types::{DownloadId, DownloadTask, Status, TaskPatch};
use std::cmp::Reverse;

/// One store update decided by a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedUpdate {
    /// Task to update
    pub id: DownloadId,
    /// Status the task must still have for the update to apply
    pub expected_status: Status,
    /// Event that caused the update; None for attribute refreshes
    pub event: Option<TaskEvent>,
    /// Columns to write
    pub patch: TaskPatch,
}

impl PlannedUpdate {
    /// Status after the update
    pub fn new_status(&self) -> Status {
        self.patch.status.unwrap_or(self.expected_status)
    }
}

/// Result of planning a pass
#[derive(Clone, Debug, Default)]
pub struct PassPlan {
    /// Updates to persist, in decision order
    pub updates: Vec<PlannedUpdate>,
    /// Snapshot with every update applied, in creation order
    pub snapshot: Vec<DownloadTask>,
}

impl PassPlan {
    /// Ids admitted to `Running` by this pass
    pub fn admitted(&self) -> impl Iterator<Item = DownloadId> + '_ {
        self.updates
            .iter()
            .filter(|u| u.event == Some(TaskEvent::Admit))
            .map(|u| u.id)
    }

    /// Number of tasks `Running` after the pass
    pub fn running_count(&self) -> usize {
        count_running(&self.snapshot)
    }
}

fn count_running(tasks: &[DownloadTask]) -> usize {
    tasks.iter().filter(|t| t.status == Status::Running).count()
}

/// Timestamp a record gets when mutated at `now`; strictly increasing per record
pub fn next_modified(previous: i64, now: i64) -> i64 {
    now.max(previous.saturating_add(1))
}

struct Planner<'a> {
    tasks: Vec<DownloadTask>,
    updates: Vec<PlannedUpdate>,
    ctx: TransitionContext<'a>,
}

impl Planner<'_> {
    fn fire(&mut self, index: usize, event: TaskEvent) {
        let task = &mut self.tasks[index];
        match state::transition(task, &event, self.ctx) {
            Ok(patch) => {
                let expected_status = task.status;
                patch.apply_to(task);
                task.last_modified = next_modified(task.last_modified, self.ctx.now);
                self.updates.push(PlannedUpdate {
                    id: task.id,
                    expected_status,
                    event: Some(event),
                    patch,
                });
            }
            Err(e) => {
                tracing::warn!(download_id = task.id.0, error = %e, "Pass skipped illegal transition");
            }
        }
    }

    fn refresh(&mut self, index: usize, patch: TaskPatch) {
        let task = &mut self.tasks[index];
        patch.apply_to(task);
        task.last_modified = next_modified(task.last_modified, self.ctx.now);
        self.updates.push(PlannedUpdate {
            id: task.id,
            expected_status: task.status,
            event: None,
            patch,
        });
    }

    fn indices_with(&self, status: Status) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == status)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Plan one scheduling pass over `snapshot`
///
/// `max_concurrent` is the cap on `Running` tasks after the pass; it always
/// holds when the snapshot is the full task set.
pub fn plan_pass(
    mut snapshot: Vec<DownloadTask>,
    facts: &NetworkFacts,
    max_concurrent: usize,
    ctx: TransitionContext<'_>,
) -> PassPlan {
    snapshot.sort_by_key(|t| (t.created_at, t.id));

    let mut planner = Planner {
        tasks: snapshot,
        updates: Vec::new(),
        ctx,
    };

    // 1. Running tasks whose network went away
    for i in planner.indices_with(Status::Running) {
        if let Some(reason) = evaluate(&planner.tasks[i], facts).pause_reason() {
            planner.fire(i, TaskEvent::NetworkDenied(reason));
        }
    }

    // 2. Retry backoff
    for i in planner.indices_with(Status::PausedRetry) {
        if state::backoff_elapsed(&planner.tasks[i], ctx.now) {
            planner.fire(i, TaskEvent::BackoffElapsed);
        }
    }

    // 3. Network waits
    for i in planner.indices_with(Status::PausedNetwork) {
        match evaluate(&planner.tasks[i], facts).pause_reason() {
            None => planner.fire(i, TaskEvent::NetworkRestored),
            Some(reason) if planner.tasks[i].pause_reason != Some(reason) => {
                planner.refresh(
                    i,
                    TaskPatch {
                        pause_reason: Some(Some(reason)),
                        ..Default::default()
                    },
                );
            }
            Some(_) => {}
        }
    }

    // 4. Enforce the cap after a configuration change
    let mut running = planner.indices_with(Status::Running);
    if running.len() > max_concurrent {
        running.sort_by_key(|&i| {
            let t = &planner.tasks[i];
            Reverse((t.started_at.unwrap_or(i64::MIN), t.id))
        });
        let excess = running.len() - max_concurrent;
        for &i in running.iter().take(excess) {
            tracing::info!(
                download_id = planner.tasks[i].id.0,
                max_concurrent,
                "Demoting running download above concurrency limit"
            );
            planner.fire(i, TaskEvent::Demote);
        }
    }

    // 5. FIFO admission
    let mut running_count = count_running(&planner.tasks);
    for i in planner.indices_with(Status::Pending) {
        if running_count >= max_concurrent {
            break;
        }
        match evaluate(&planner.tasks[i], facts).pause_reason() {
            None => {
                planner.fire(i, TaskEvent::Admit);
                running_count += 1;
            }
            Some(reason) => planner.fire(i, TaskEvent::NetworkDenied(reason)),
        }
    }

    PassPlan {
        updates: planner.updates,
        snapshot: planner.tasks,
    }
}
