//! Snapshot to notification plan.

use super::{
    NotificationAction, NotificationContent, NotificationId, NotificationPlan, ProgressBar,
};
use crate::config::NotificationConfig;
use crate::types::{
    BroadcastKind, DestinationKind, DownloadId, DownloadTask, PauseReason, Status, UNKNOWN_SIZE,
    Visibility,
};
use std::collections::BTreeMap;

/// Number of titles a group keeps for display
const MAX_GROUP_TITLES: usize = 2;

/// Active downloads of one owner, coalesced into one notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationGroup {
    /// Owning caller (grouping key)
    pub owner: String,
    /// First member, used as the target of the tap action
    pub first_id: DownloadId,
    /// Bytes received across members
    pub current_bytes: i64,
    /// Total bytes across members, [`UNKNOWN_SIZE`] if any member is unknown
    /// or the sum overflows
    pub total_bytes: i64,
    /// Up to two member titles, placeholder substituted for empty ones
    pub titles: Vec<String>,
    /// Number of members
    pub title_count: usize,
    /// Reason of the first member waiting for a network
    pub pause_reason: Option<PauseReason>,
}

impl NotificationGroup {
    fn new(owner: &str, first_id: DownloadId) -> Self {
        Self {
            owner: owner.to_string(),
            first_id,
            current_bytes: 0,
            total_bytes: 0,
            titles: Vec::with_capacity(MAX_GROUP_TITLES),
            title_count: 0,
            pause_reason: None,
        }
    }

    fn add(&mut self, title: String, current_bytes: i64, total_bytes: i64) {
        self.current_bytes = self.current_bytes.saturating_add(current_bytes.max(0));
        self.total_bytes = if total_bytes < 0 || self.total_bytes < 0 {
            UNKNOWN_SIZE
        } else {
            self.total_bytes
                .checked_add(total_bytes)
                .unwrap_or(UNKNOWN_SIZE)
        };
        if self.titles.len() < MAX_GROUP_TITLES {
            self.titles.push(title);
        }
        self.title_count += 1;
    }

    /// Whether any member waits for an allowed network
    pub fn paused_for_network(&self) -> bool {
        self.pause_reason.is_some()
    }
}

fn display_title(task: &DownloadTask, strings: &NotificationConfig) -> String {
    if task.title.is_empty() {
        strings.unknown_title.clone()
    } else {
        task.title.clone()
    }
}

fn is_active_and_visible(task: &DownloadTask) -> bool {
    task.status.is_active() && task.visibility != Visibility::Hidden
}

fn is_complete_and_visible(task: &DownloadTask) -> bool {
    task.status.is_terminal()
        && task.visibility == Visibility::VisibleNotifyCompleted
        && !task.acknowledged
}

/// Group active, visible downloads by owner
///
/// Groups come back ordered by owner; members are added in snapshot order.
pub fn group_active(
    snapshot: &[DownloadTask],
    strings: &NotificationConfig,
) -> Vec<NotificationGroup> {
    let mut groups: BTreeMap<&str, NotificationGroup> = BTreeMap::new();

    for task in snapshot.iter().filter(|t| is_active_and_visible(t)) {
        let group = groups
            .entry(task.owner.as_str())
            .or_insert_with(|| NotificationGroup::new(&task.owner, task.id));
        group.add(
            display_title(task, strings),
            task.current_bytes,
            task.total_bytes,
        );
        if task.status == Status::PausedNetwork && group.pause_reason.is_none() {
            group.pause_reason = Some(task.pause_reason.unwrap_or(PauseReason::NoConnectivity));
        }
    }

    groups.into_values().collect()
}

/// Percentage text for a progress notification; empty when the total is unknown
pub fn progress_text(total_bytes: i64, current_bytes: i64) -> String {
    if total_bytes <= 0 {
        return String::new();
    }
    let percent = i128::from(current_bytes.max(0)) * 100 / i128::from(total_bytes);
    format!("{percent}%")
}

fn pause_text(reason: PauseReason, strings: &NotificationConfig) -> String {
    match reason {
        PauseReason::NoConnectivity => strings.paused_no_connectivity.clone(),
        PauseReason::ExceedsMobileLimit => strings.paused_exceeds_mobile_limit.clone(),
        PauseReason::WaitingForWifi => strings.paused_waiting_for_wifi.clone(),
        PauseReason::RoamingRestricted => strings.paused_roaming.clone(),
    }
}

fn active_content(group: &NotificationGroup, strings: &NotificationConfig) -> NotificationContent {
    let first_title = group.titles.first().cloned().unwrap_or_default();

    let (title, mut text) = if group.title_count > 1 {
        let template = if group.paused_for_network() {
            &strings.files_waiting
        } else {
            &strings.files_downloading
        };
        (
            template.replace("{count}", &group.title_count.to_string()),
            strings.files_downloading_text.replace("{title}", &first_title),
        )
    } else {
        (first_title, String::new())
    };

    let (progress, info) = match group.pause_reason {
        Some(reason) => {
            text = pause_text(reason, strings);
            (None, String::new())
        }
        None => (
            Some(ProgressBar {
                current: group.current_bytes,
                total: group.total_bytes,
                indeterminate: group.total_bytes < 0,
            }),
            progress_text(group.total_bytes, group.current_bytes),
        ),
    };

    NotificationContent {
        title,
        text,
        progress,
        info,
        ongoing: true,
        when: None,
        content_action: NotificationAction {
            kind: BroadcastKind::ShowList,
            id: group.first_id,
        },
        delete_action: None,
    }
}

fn completed_content(task: &DownloadTask, strings: &NotificationConfig) -> NotificationContent {
    let (caption, tap) = match task.status {
        Status::Success if task.destination_kind == DestinationKind::External => {
            (&strings.download_complete, BroadcastKind::OpenResult)
        }
        Status::Success => (&strings.download_complete, BroadcastKind::ShowList),
        Status::Cancelled => (&strings.download_cancelled, BroadcastKind::ShowList),
        _ => (&strings.download_failed, BroadcastKind::ShowList),
    };

    NotificationContent {
        title: display_title(task, strings),
        text: caption.clone(),
        progress: None,
        info: String::new(),
        ongoing: false,
        when: Some(task.last_modified),
        content_action: NotificationAction {
            kind: tap,
            id: task.id,
        },
        delete_action: Some(NotificationAction {
            kind: BroadcastKind::Dismiss,
            id: task.id,
        }),
    }
}

/// Build the notifications that should be displayed for `snapshot`
pub fn aggregate(snapshot: &[DownloadTask], strings: &NotificationConfig) -> NotificationPlan {
    let mut notifications = BTreeMap::new();

    for group in group_active(snapshot, strings) {
        let content = active_content(&group, strings);
        notifications.insert(NotificationId::Active { owner: group.owner }, content);
    }

    for task in snapshot.iter().filter(|t| is_complete_and_visible(t)) {
        notifications.insert(
            NotificationId::Completed { id: task.id },
            completed_content(task, strings),
        );
    }

    NotificationPlan { notifications }
}
