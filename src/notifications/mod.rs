//! Notification aggregation.
//!
//! After every scheduling pass the snapshot is turned into the set of
//! notifications that should be on screen:
//! - one ongoing progress notification per owner, coalescing all of the
//!   owner's active downloads ([`NotificationGroup`])
//! - one completion notice per finished download that asked for it
//!
//! [`aggregate`] computes that set as a pure function of the snapshot.
//! [`Notifier`] remembers what was last posted and only talks to the facade
//! when content actually changed, so re-running a pass over an unchanged
//! snapshot is invisible.

mod aggregate;

pub use aggregate::{NotificationGroup, aggregate, group_active, progress_text};

use crate::facade::SystemFacade;
use crate::types::{BroadcastKind, DownloadId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Stable identity of a posted notification
///
/// Posting again under the same id replaces the previous content.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationId {
    /// Coalesced progress of one owner's active downloads
    Active {
        /// Owning caller
        owner: String,
    },
    /// Completion notice of a single download
    Completed {
        /// Download concerned
        id: DownloadId,
    },
}

/// Progress bar state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBar {
    /// Bytes so far
    pub current: i64,
    /// Total bytes, negative when unknown
    pub total: i64,
    /// Total unknown; show an indeterminate bar
    pub indeterminate: bool,
}

/// Broadcast fired when the user interacts with a notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Broadcast kind
    pub kind: BroadcastKind,
    /// Download the broadcast refers to
    pub id: DownloadId,
}

/// Everything displayed by one notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    /// First line
    pub title: String,
    /// Second line
    pub text: String,
    /// Progress bar, hidden when None
    pub progress: Option<ProgressBar>,
    /// Short trailing info, e.g. "42%"
    pub info: String,
    /// Ongoing notifications cannot be swiped away
    pub ongoing: bool,
    /// Timestamp shown on completion notices
    pub when: Option<i64>,
    /// Fired on tap
    pub content_action: NotificationAction,
    /// Fired when the user clears the notification
    pub delete_action: Option<NotificationAction>,
}

/// Notifications that should be displayed, keyed by id
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationPlan {
    /// Content per notification id, ordered for deterministic posting
    pub notifications: BTreeMap<NotificationId, NotificationContent>,
}

impl NotificationPlan {
    /// Number of notifications in the plan
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Whether nothing should be displayed
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    /// Content for `id`, if planned
    pub fn get(&self, id: &NotificationId) -> Option<&NotificationContent> {
        self.notifications.get(id)
    }
}

/// Counts of facade calls made by one [`Notifier::sync`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Notifications posted (new or changed)
    pub posted: usize,
    /// Notifications left as they were
    pub unchanged: usize,
    /// Notifications removed because they are no longer planned
    pub cancelled: usize,
}

/// Keeps displayed notifications in line with the latest plan
#[derive(Debug, Default)]
pub struct Notifier {
    displayed: HashMap<NotificationId, NotificationContent>,
}

impl Notifier {
    /// Create a notifier that believes nothing is displayed
    pub fn new() -> Self {
        Self::default()
    }

    /// Post changed notifications and cancel the ones no longer planned
    pub fn sync(&mut self, plan: &NotificationPlan, facade: &dyn SystemFacade) -> SyncStats {
        let mut stats = SyncStats::default();

        for (id, content) in &plan.notifications {
            if self.displayed.get(id) == Some(content) {
                stats.unchanged += 1;
                continue;
            }
            facade.post_notification(id, content);
            self.displayed.insert(id.clone(), content.clone());
            stats.posted += 1;
        }

        let stale: Vec<NotificationId> = self
            .displayed
            .keys()
            .filter(|id| !plan.notifications.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            facade.cancel_notification(&id);
            self.displayed.remove(&id);
            stats.cancelled += 1;
        }

        if stats.posted > 0 || stats.cancelled > 0 {
            tracing::debug!(
                posted = stats.posted,
                cancelled = stats.cancelled,
                unchanged = stats.unchanged,
                "Notifications synchronized"
            );
        }

        stats
    }

    /// Remove one notification immediately
    pub fn cancel(&mut self, id: &NotificationId, facade: &dyn SystemFacade) {
        if self.displayed.remove(id).is_some() {
            facade.cancel_notification(id);
        }
    }

    /// Remove everything that was posted
    pub fn cancel_all(&mut self, facade: &dyn SystemFacade) {
        self.displayed.clear();
        facade.cancel_all_notifications();
    }

    /// Content currently believed to be displayed under `id`
    pub fn displayed(&self, id: &NotificationId) -> Option<&NotificationContent> {
        self.displayed.get(id)
    }
}
