//! Network admission policy.
//!
//! [`evaluate`] decides whether a download may use the current network. It is
//! a pure function of the task and a [`NetworkFacts`] snapshot: the scheduler
//! captures the facts once per pass and acts on the verdict itself.

use crate::facade::SystemFacade;
use crate::types::{DownloadTask, NetworkType, PauseReason};
use serde::{Deserialize, Serialize};

/// Network conditions captured at the start of a pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFacts {
    /// Active network (None = offline)
    pub active: Option<NetworkType>,
    /// Whether the mobile network is roaming
    pub roaming: bool,
    /// Hard mobile ceiling in bytes
    pub max_bytes_over_mobile: Option<u64>,
    /// Recommended mobile ceiling in bytes
    pub recommended_max_bytes_over_mobile: Option<u64>,
}

impl NetworkFacts {
    /// Read the current facts from the facade
    pub fn capture(facade: &dyn SystemFacade) -> Self {
        let limits = facade.mobile_limits();
        Self {
            active: facade.active_network_type(),
            roaming: facade.is_roaming(),
            max_bytes_over_mobile: limits.hard,
            recommended_max_bytes_over_mobile: limits.recommended,
        }
    }
}

/// Why a download may not use the current network
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// There is no active network
    NoConnectivity,
    /// The download is larger than the hard mobile ceiling
    ExceedsMobileLimit,
    /// Roaming and the download is not allowed to use metered roaming data
    RoamingRestricted,
}

/// Outcome of [`evaluate`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    /// The download may run
    Allow,
    /// The download may not run on this network
    Deny(DenyReason),
    /// The download exceeds the recommended mobile ceiling; wait for Wi-Fi
    RequireWifi,
}

impl Verdict {
    /// Whether the download may run
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// Reason to record when the verdict keeps a download waiting
    pub fn pause_reason(&self) -> Option<PauseReason> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny(DenyReason::NoConnectivity) => Some(PauseReason::NoConnectivity),
            Verdict::Deny(DenyReason::ExceedsMobileLimit) => Some(PauseReason::ExceedsMobileLimit),
            Verdict::Deny(DenyReason::RoamingRestricted) => Some(PauseReason::RoamingRestricted),
            Verdict::RequireWifi => Some(PauseReason::WaitingForWifi),
        }
    }
}

/// Decide whether `task` may run under `facts`
///
/// Rules are applied in order, first match wins:
/// 1. offline: `Deny(NoConnectivity)`
/// 2. not mobile: `Allow`
/// 3. size above the hard ceiling: `Deny(ExceedsMobileLimit)`
/// 4. size above the recommended ceiling: `RequireWifi`, unless the task
///    bypasses the recommendation
/// 5. roaming: `Deny(RoamingRestricted)`, unless the task allows metered use
/// 6. `Allow`
///
/// Size is the total when known, otherwise the bytes received so far.
pub fn evaluate(task: &DownloadTask, facts: &NetworkFacts) -> Verdict {
    let Some(network) = facts.active else {
        return Verdict::Deny(DenyReason::NoConnectivity);
    };

    if !network.is_mobile() {
        return Verdict::Allow;
    }

    let size = task.effective_size();

    if let Some(hard) = facts.max_bytes_over_mobile
        && size > hard
    {
        return Verdict::Deny(DenyReason::ExceedsMobileLimit);
    }

    if let Some(recommended) = facts.recommended_max_bytes_over_mobile
        && size > recommended
        && !task.bypass_recommended_limit
    {
        return Verdict::RequireWifi;
    }

    if facts.roaming && !task.allow_metered {
        return Verdict::Deny(DenyReason::RoamingRestricted);
    }

    Verdict::Allow
}
