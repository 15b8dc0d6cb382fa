//! Core types for download-orchestrator

use serde::{Deserialize, Serialize};

/// Sentinel used in byte counters when the size of a transfer is unknown
pub const UNKNOWN_SIZE: i64 = -1;

/// Unique identifier for a download
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub i64);

impl DownloadId {
    /// Create a new DownloadId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for DownloadId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<DownloadId> for i64 {
    fn from(id: DownloadId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for DownloadId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DownloadId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for DownloadId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DownloadId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DownloadId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Download status
///
/// The closed set of states a task moves through. Legal moves between them
/// live in [`crate::state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting for a concurrency slot
    Pending,
    /// A transport worker is moving bytes
    Running,
    /// Waiting for a network the policy allows
    PausedNetwork,
    /// Backing off after a transient failure
    PausedRetry,
    /// Completed (terminal)
    Success,
    /// Failed without further retries (terminal)
    ErrorFatal,
    /// Cancelled by the caller (terminal)
    Cancelled,
}

impl Status {
    /// Every status, in storage-code order
    pub const ALL: [Status; 7] = [
        Status::Pending,
        Status::Running,
        Status::PausedNetwork,
        Status::PausedRetry,
        Status::Success,
        Status::ErrorFatal,
        Status::Cancelled,
    ];

    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Pending,
            1 => Status::Running,
            2 => Status::PausedNetwork,
            3 => Status::PausedRetry,
            4 => Status::Success,
            5 => Status::ErrorFatal,
            6 => Status::Cancelled,
            _ => Status::ErrorFatal, // Default to ErrorFatal for unknown status
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Running => 1,
            Status::PausedNetwork => 2,
            Status::PausedRetry => 3,
            Status::Success => 4,
            Status::ErrorFatal => 5,
            Status::Cancelled => 6,
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::ErrorFatal | Status::Cancelled)
    }

    /// Statuses shown in the ongoing progress notification
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Status::Pending | Status::Running | Status::PausedNetwork
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::PausedNetwork => "paused_network",
            Status::PausedRetry => "paused_retry",
            Status::Success => "success",
            Status::ErrorFatal => "error_fatal",
            Status::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a download shows up in notifications
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Never shown
    Hidden,
    /// Shown while active, dropped once finished
    #[default]
    VisibleWhileActive,
    /// Shown while active, then a completion notice is posted
    VisibleNotifyCompleted,
}

impl Visibility {
    /// Convert integer code to Visibility
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Visibility::Hidden,
            2 => Visibility::VisibleNotifyCompleted,
            _ => Visibility::VisibleWhileActive,
        }
    }

    /// Convert Visibility to integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            Visibility::Hidden => 0,
            Visibility::VisibleWhileActive => 1,
            Visibility::VisibleNotifyCompleted => 2,
        }
    }
}

/// Where the downloaded file is stored
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// Private storage owned by the requesting caller
    #[default]
    Internal,
    /// Shared storage other applications can open
    External,
}

impl DestinationKind {
    /// Convert integer code to DestinationKind
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => DestinationKind::External,
            _ => DestinationKind::Internal,
        }
    }

    /// Convert DestinationKind to integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            DestinationKind::Internal => 0,
            DestinationKind::External => 1,
        }
    }
}

/// Type of the currently active network
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Wi-Fi
    Wifi,
    /// Cellular data (metered)
    Mobile,
    /// Wired
    Ethernet,
    /// Anything else the host reports
    Other,
}

impl NetworkType {
    /// Cellular networks are subject to the mobile byte ceilings
    pub fn is_mobile(&self) -> bool {
        matches!(self, NetworkType::Mobile)
    }
}

/// Why a task sits in [`Status::PausedNetwork`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// No active network
    NoConnectivity,
    /// Larger than the hard mobile ceiling
    ExceedsMobileLimit,
    /// Larger than the recommended mobile ceiling
    WaitingForWifi,
    /// Mobile network is roaming and the task is not allowed to use it
    RoamingRestricted,
}

impl PauseReason {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::NoConnectivity => "no_connectivity",
            PauseReason::ExceedsMobileLimit => "exceeds_mobile_limit",
            PauseReason::WaitingForWifi => "waiting_for_wifi",
            PauseReason::RoamingRestricted => "roaming_restricted",
        }
    }

    /// Parse the storage representation (unknown values yield None)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "no_connectivity" => Some(PauseReason::NoConnectivity),
            "exceeds_mobile_limit" => Some(PauseReason::ExceedsMobileLimit),
            "waiting_for_wifi" => Some(PauseReason::WaitingForWifi),
            "roaming_restricted" => Some(PauseReason::RoamingRestricted),
            _ => None,
        }
    }
}

/// Event kinds emitted through [`crate::facade::SystemFacade::emit_broadcast`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BroadcastKind {
    /// Open the completed, externally stored result
    OpenResult,
    /// Show the download list (tap on an aggregated or ambiguous notification)
    ShowList,
    /// A terminal notification was cleared by the user
    Dismiss,
    /// The task reached a terminal state
    DownloadComplete,
}

/// One persisted download and its scheduling state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Stable id, never reused
    pub id: DownloadId,
    /// Opaque resource identifier
    pub source_uri: String,
    /// Target storage location
    pub destination: String,
    /// Kind of storage the destination lives in
    pub destination_kind: DestinationKind,
    /// Current state
    pub status: Status,
    /// Bytes transferred so far
    pub current_bytes: i64,
    /// Total size, or [`UNKNOWN_SIZE`]
    pub total_bytes: i64,
    /// Requesting caller, used for notification grouping
    pub owner: String,
    /// Display title (may be empty)
    pub title: String,
    /// Display description
    pub description: String,
    /// Notification visibility
    pub visibility: Visibility,
    /// Milliseconds timestamp of the last persisted mutation
    pub last_modified: i64,
    /// Milliseconds timestamp of creation
    pub created_at: i64,
    /// Milliseconds timestamp of the most recent admission to Running
    pub started_at: Option<i64>,
    /// Transient failures since the last terminal failure
    pub retry_count: u32,
    /// Backoff to wait in PausedRetry, measured from `last_modified`
    pub backoff_ms: i64,
    /// Why the task is waiting for a network
    pub pause_reason: Option<PauseReason>,
    /// Failure description for ErrorFatal
    pub error_message: Option<String>,
    /// Caller chose to ignore the recommended mobile ceiling
    pub bypass_recommended_limit: bool,
    /// Caller allows roaming/metered use
    pub allow_metered: bool,
    /// A terminal notice was dismissed by the user
    pub acknowledged: bool,
}

impl DownloadTask {
    /// Whether the total size is known
    pub fn size_known(&self) -> bool {
        self.total_bytes >= 0
    }

    /// Size used for policy decisions: total when known, else bytes so far
    pub fn effective_size(&self) -> u64 {
        let size = if self.size_known() {
            self.total_bytes
        } else {
            self.current_bytes
        };
        size.max(0) as u64
    }
}

/// New download to be inserted into the store
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewDownload {
    /// Opaque resource identifier
    pub source_uri: String,
    /// Target storage location
    pub destination: String,
    /// Kind of storage the destination lives in
    #[serde(default)]
    pub destination_kind: DestinationKind,
    /// Requesting caller
    pub owner: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Display description
    #[serde(default)]
    pub description: String,
    /// Notification visibility
    #[serde(default)]
    pub visibility: Visibility,
    /// Size if already known
    #[serde(default)]
    pub total_bytes: Option<u64>,
    /// Ignore the recommended mobile ceiling
    #[serde(default)]
    pub bypass_recommended_limit: bool,
    /// Allow roaming/metered use
    #[serde(default)]
    pub allow_metered: bool,
}

impl NewDownload {
    /// Create a request with default visibility and flags
    pub fn new(
        source_uri: impl Into<String>,
        destination: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            source_uri: source_uri.into(),
            destination: destination.into(),
            owner: owner.into(),
            ..Default::default()
        }
    }
}

/// Partial update of a download record
///
/// `None` leaves a column untouched. Nullable columns use a nested option:
/// `Some(None)` clears them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskPatch {
    /// New status
    pub status: Option<Status>,
    /// New byte count
    pub current_bytes: Option<i64>,
    /// New total size
    pub total_bytes: Option<i64>,
    /// New retry count
    pub retry_count: Option<u32>,
    /// New retry backoff
    pub backoff_ms: Option<i64>,
    /// Set or clear the pause reason
    pub pause_reason: Option<Option<PauseReason>>,
    /// Set or clear the error message
    pub error_message: Option<Option<String>>,
    /// Set or clear the admission timestamp
    pub started_at: Option<Option<i64>>,
    /// Caller opted out of the recommended mobile ceiling
    pub bypass_recommended_limit: Option<bool>,
    /// Caller allows roaming/metered use
    pub allow_metered: Option<bool>,
    /// Terminal notice dismissed
    pub acknowledged: Option<bool>,
}

impl TaskPatch {
    /// Patch that only changes the status
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to an in-memory record
    ///
    /// Used to build the post-pass snapshot without re-reading the store.
    pub fn apply_to(&self, task: &mut DownloadTask) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(current) = self.current_bytes {
            task.current_bytes = current;
        }
        if let Some(total) = self.total_bytes {
            task.total_bytes = total;
        }
        if let Some(retry_count) = self.retry_count {
            task.retry_count = retry_count;
        }
        if let Some(backoff_ms) = self.backoff_ms {
            task.backoff_ms = backoff_ms;
        }
        if let Some(reason) = self.pause_reason {
            task.pause_reason = reason;
        }
        if let Some(message) = &self.error_message {
            task.error_message = message.clone();
        }
        if let Some(started_at) = self.started_at {
            task.started_at = started_at;
        }
        if let Some(bypass) = self.bypass_recommended_limit {
            task.bypass_recommended_limit = bypass;
        }
        if let Some(allow) = self.allow_metered {
            task.allow_metered = allow;
        }
        if let Some(acknowledged) = self.acknowledged {
            task.acknowledged = acknowledged;
        }
    }
}
