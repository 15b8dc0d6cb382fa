//! Configuration types for download-orchestrator

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Scheduling behavior (concurrency, pass cadence)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrent downloads (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Interval between timer-driven scheduling passes (default: 5 seconds)
    ///
    /// Progress reports, submissions and cancellations trigger passes on their
    /// own; the timer only guarantees retry backoffs are noticed.
    #[serde(default = "default_pass_interval", with = "duration_serde")]
    pub pass_interval: Duration,

    /// Capacity of the facade's event channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            pass_interval: default_pass_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts before a task fails (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 30 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 1 hour)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Mobile data byte ceilings
///
/// Both ceilings apply only while the active network is mobile.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Hard ceiling: larger downloads never run over mobile (None = no limit)
    #[serde(default)]
    pub max_bytes_over_mobile: Option<u64>,

    /// Recommended ceiling: larger downloads wait for Wi-Fi unless the caller
    /// opted to bypass it (None = no recommendation)
    #[serde(default)]
    pub recommended_max_bytes_over_mobile: Option<u64>,
}

/// Display strings used by the notification aggregator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Title substituted when a download has none
    #[serde(default = "default_unknown_title")]
    pub unknown_title: String,

    /// Title of a group with several downloads; `{count}` is replaced
    #[serde(default = "default_files_downloading")]
    pub files_downloading: String,

    /// Title of a group with several downloads, one of them paused; `{count}` is replaced
    #[serde(default = "default_files_waiting")]
    pub files_waiting: String,

    /// Text of a group with several downloads; `{title}` is the first title
    #[serde(default = "default_files_downloading_text")]
    pub files_downloading_text: String,

    /// Shown when there is no active network
    #[serde(default = "default_paused_no_connectivity")]
    pub paused_no_connectivity: String,

    /// Shown when a download is above the hard mobile ceiling
    #[serde(default = "default_paused_exceeds_mobile_limit")]
    pub paused_exceeds_mobile_limit: String,

    /// Shown when a download waits for Wi-Fi because of its size
    #[serde(default = "default_paused_waiting_for_wifi")]
    pub paused_waiting_for_wifi: String,

    /// Shown when roaming blocks a download
    #[serde(default = "default_paused_roaming")]
    pub paused_roaming: String,

    /// Caption of a successful completion notice
    #[serde(default = "default_download_complete")]
    pub download_complete: String,

    /// Caption of a failed completion notice
    #[serde(default = "default_download_failed")]
    pub download_failed: String,

    /// Caption of a cancelled completion notice
    #[serde(default = "default_download_cancelled")]
    pub download_cancelled: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            unknown_title: default_unknown_title(),
            files_downloading: default_files_downloading(),
            files_waiting: default_files_waiting(),
            files_downloading_text: default_files_downloading_text(),
            paused_no_connectivity: default_paused_no_connectivity(),
            paused_exceeds_mobile_limit: default_paused_exceeds_mobile_limit(),
            paused_waiting_for_wifi: default_paused_waiting_for_wifi(),
            paused_roaming: default_paused_roaming(),
            download_complete: default_download_complete(),
            download_failed: default_download_failed(),
            download_cancelled: default_download_cancelled(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./downloads.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for DownloadEngine
///
/// Fields are organized into logical sub-configs:
/// - [`engine`](EngineConfig): concurrency and pass cadence
/// - [`retry`](RetryConfig): transient failure backoff
/// - [`network`](NetworkConfig): mobile byte ceilings
/// - [`notifications`](NotificationConfig): display strings
/// - [`persistence`](PersistenceConfig): database location
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduling behavior
    #[serde(default)]
    pub engine: EngineConfig,

    /// Retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Mobile data ceilings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Notification strings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Longest backoff the engine accepts (30 days)
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

impl Config {
    /// Reject configurations the engine cannot run with
    ///
    /// Invalid values never reach the task level; they are reported here as
    /// [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        validate_max_concurrent(self.engine.max_concurrent_downloads)?;
        validate_mobile_limits(
            self.network.max_bytes_over_mobile,
            self.network.recommended_max_bytes_over_mobile,
        )?;

        if self.engine.pass_interval.is_zero() {
            return Err(Error::config("pass_interval", "must be greater than zero"));
        }
        if self.engine.event_buffer == 0 {
            return Err(Error::config("event_buffer", "must be at least 1"));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier",
                format!("must be >= 1.0, got {multiplier}"),
            ));
        }
        if self.retry.max_delay > MAX_RETRY_DELAY {
            return Err(Error::config(
                "max_delay",
                format!("must be at most {} seconds", MAX_RETRY_DELAY.as_secs()),
            ));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(Error::config(
                "max_delay",
                "must not be shorter than initial_delay",
            ));
        }

        Ok(())
    }
}

/// Validate a concurrency maximum
pub(crate) fn validate_max_concurrent(max: usize) -> Result<()> {
    if max == 0 {
        return Err(Error::config(
            "max_concurrent_downloads",
            "must be at least 1",
        ));
    }
    Ok(())
}

/// Validate a pair of mobile ceilings
pub(crate) fn validate_mobile_limits(hard: Option<u64>, recommended: Option<u64>) -> Result<()> {
    if hard == Some(0) {
        return Err(Error::config(
            "max_bytes_over_mobile",
            "must be greater than zero (use None for no limit)",
        ));
    }
    if recommended == Some(0) {
        return Err(Error::config(
            "recommended_max_bytes_over_mobile",
            "must be greater than zero (use None for no recommendation)",
        ));
    }
    if let (Some(hard), Some(recommended)) = (hard, recommended)
        && recommended > hard
    {
        return Err(Error::config(
            "recommended_max_bytes_over_mobile",
            format!("{recommended} exceeds the hard ceiling of {hard}"),
        ));
    }
    Ok(())
}

// Default value functions
fn default_max_concurrent() -> usize {
    3
}

fn default_pass_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_event_buffer() -> usize {
    1000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("downloads.db")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_unknown_title() -> String {
    "<Untitled>".to_string()
}

fn default_files_downloading() -> String {
    "{count} files downloading".to_string()
}

fn default_files_waiting() -> String {
    "{count} files waiting".to_string()
}

fn default_files_downloading_text() -> String {
    "{title} and more".to_string()
}

fn default_paused_no_connectivity() -> String {
    "Waiting for network connection".to_string()
}

fn default_paused_exceeds_mobile_limit() -> String {
    "Too large for mobile data, waiting for Wi-Fi".to_string()
}

fn default_paused_waiting_for_wifi() -> String {
    "Queued, waiting for Wi-Fi".to_string()
}

fn default_paused_roaming() -> String {
    "Paused while roaming".to_string()
}

fn default_download_complete() -> String {
    "Download complete".to_string()
}

fn default_download_failed() -> String {
    "Download unsuccessful".to_string()
}

fn default_download_cancelled() -> String {
    "Download cancelled".to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
