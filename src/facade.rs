//! Boundary between the engine and its host environment.
//!
//! Everything the engine needs from the outside world (time, network facts,
//! limits, notification display, broadcast delivery) goes through
//! [`SystemFacade`]. Tests substitute a deterministic double; hosts either
//! implement the trait themselves or drive [`LocalSystemFacade`].

use crate::config::{Config, validate_max_concurrent, validate_mobile_limits};
use crate::error::Result;
use crate::notifications::{NotificationContent, NotificationId};
use crate::types::{BroadcastKind, DownloadId, NetworkType};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// Services the engine consumes from its host
///
/// Implementations must be cheap to call: the scheduler queries them on
/// every pass and never expects them to block on I/O.
pub trait SystemFacade: Send + Sync {
    /// Current time in milliseconds
    fn current_time_millis(&self) -> i64;

    /// Type of the active network, or None when offline
    fn active_network_type(&self) -> Option<NetworkType>;

    /// Whether the mobile network is roaming
    fn is_roaming(&self) -> bool;

    /// Hard ceiling for downloads over mobile (None = no limit)
    fn max_bytes_over_mobile(&self) -> Option<u64>;

    /// Recommended ceiling for downloads over mobile (None = no recommendation)
    fn recommended_max_bytes_over_mobile(&self) -> Option<u64>;

    /// Hard and recommended ceilings read together
    ///
    /// Implementations whose ceilings can change at runtime should override
    /// this so the pair comes from a single update.
    fn mobile_limits(&self) -> MobileLimits {
        MobileLimits {
            hard: self.max_bytes_over_mobile(),
            recommended: self.recommended_max_bytes_over_mobile(),
        }
    }

    /// Maximum number of downloads running at once
    fn max_concurrent_downloads(&self) -> usize;

    /// Show or replace the notification with this id
    fn post_notification(&self, id: &NotificationId, content: &NotificationContent);

    /// Remove the notification with this id
    fn cancel_notification(&self, id: &NotificationId);

    /// Remove every notification
    fn cancel_all_notifications(&self);

    /// Deliver an event about a download to observers
    fn emit_broadcast(&self, kind: BroadcastKind, id: DownloadId);
}

/// Mobile byte ceilings as one consistent pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MobileLimits {
    /// Hard ceiling (None = no limit)
    pub hard: Option<u64>,
    /// Recommended ceiling (None = no recommendation)
    pub recommended: Option<u64>,
}

/// Output of [`LocalSystemFacade`], delivered to subscribers
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FacadeEvent {
    /// A notification was posted or replaced
    NotificationPosted {
        /// Notification id
        id: NotificationId,
        /// Full content
        content: NotificationContent,
    },
    /// A notification was removed
    NotificationCancelled {
        /// Notification id
        id: NotificationId,
    },
    /// All notifications were removed
    AllNotificationsCancelled,
    /// A broadcast about a download
    Broadcast {
        /// Event kind
        kind: BroadcastKind,
        /// Download concerned
        id: DownloadId,
    },
}

// Network type encoding for the atomic slot; 0 means offline
const NET_NONE: u8 = 0;
const NET_WIFI: u8 = 1;
const NET_MOBILE: u8 = 2;
const NET_ETHERNET: u8 = 3;
const NET_OTHER: u8 = 4;

fn encode_network(network: Option<NetworkType>) -> u8 {
    match network {
        None => NET_NONE,
        Some(NetworkType::Wifi) => NET_WIFI,
        Some(NetworkType::Mobile) => NET_MOBILE,
        Some(NetworkType::Ethernet) => NET_ETHERNET,
        Some(NetworkType::Other) => NET_OTHER,
    }
}

fn decode_network(code: u8) -> Option<NetworkType> {
    match code {
        NET_WIFI => Some(NetworkType::Wifi),
        NET_MOBILE => Some(NetworkType::Mobile),
        NET_ETHERNET => Some(NetworkType::Ethernet),
        NET_OTHER => Some(NetworkType::Other),
        _ => None,
    }
}

/// Host-driven facade
///
/// Network facts and limits are pushed in by the host (the operating system
/// integration lives outside this crate). Notifications and broadcasts are
/// published on a channel obtained with [`LocalSystemFacade::subscribe`].
///
/// The two byte ceilings share one lock: a reader never sees a new hard
/// ceiling paired with an old recommended one.
pub struct LocalSystemFacade {
    network: AtomicU8,
    roaming: AtomicBool,
    mobile_limits: RwLock<MobileLimits>,
    max_concurrent_downloads: AtomicUsize,
    event_tx: broadcast::Sender<FacadeEvent>,
}

impl LocalSystemFacade {
    /// Create a facade from validated configuration
    ///
    /// The facade starts offline; the host reports the network with
    /// [`set_network`](Self::set_network).
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.engine.event_buffer);

        Ok(Self {
            network: AtomicU8::new(NET_NONE),
            roaming: AtomicBool::new(false),
            mobile_limits: RwLock::new(MobileLimits {
                hard: config.network.max_bytes_over_mobile,
                recommended: config.network.recommended_max_bytes_over_mobile,
            }),
            max_concurrent_downloads: AtomicUsize::new(config.engine.max_concurrent_downloads),
            event_tx,
        })
    }

    /// Subscribe to posted notifications and broadcasts
    ///
    /// Multiple subscribers are supported; a subscriber that falls behind by
    /// more than the configured buffer receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<FacadeEvent> {
        self.event_tx.subscribe()
    }

    /// Report the active network (None = offline) and roaming state
    pub fn set_network(&self, network: Option<NetworkType>, roaming: bool) {
        self.network.store(encode_network(network), Ordering::SeqCst);
        self.roaming.store(roaming, Ordering::SeqCst);
        tracing::debug!(?network, roaming, "Network facts updated");
    }

    /// Replace the mobile byte ceilings
    pub fn set_mobile_limits(&self, hard: Option<u64>, recommended: Option<u64>) -> Result<()> {
        validate_mobile_limits(hard, recommended)?;
        *self.mobile_limits.write() = MobileLimits { hard, recommended };
        tracing::debug!(?hard, ?recommended, "Mobile limits updated");
        Ok(())
    }

    /// Change the concurrency maximum
    ///
    /// Lowering it below the number of running downloads demotes the excess
    /// on the next scheduling pass.
    pub fn set_max_concurrent_downloads(&self, max: usize) -> Result<()> {
        validate_max_concurrent(max)?;
        self.max_concurrent_downloads.store(max, Ordering::SeqCst);
        tracing::info!(max_concurrent_downloads = max, "Concurrency limit changed");
        Ok(())
    }

    fn publish(&self, event: FacadeEvent) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

impl SystemFacade for LocalSystemFacade {
    fn current_time_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn active_network_type(&self) -> Option<NetworkType> {
        decode_network(self.network.load(Ordering::SeqCst))
    }

    fn is_roaming(&self) -> bool {
        self.roaming.load(Ordering::SeqCst)
    }

    fn max_bytes_over_mobile(&self) -> Option<u64> {
        self.mobile_limits.read().hard
    }

    fn recommended_max_bytes_over_mobile(&self) -> Option<u64> {
        self.mobile_limits.read().recommended
    }

    fn mobile_limits(&self) -> MobileLimits {
        *self.mobile_limits.read()
    }

    fn max_concurrent_downloads(&self) -> usize {
        self.max_concurrent_downloads.load(Ordering::SeqCst)
    }

    fn post_notification(&self, id: &NotificationId, content: &NotificationContent) {
        self.publish(FacadeEvent::NotificationPosted {
            id: id.clone(),
            content: content.clone(),
        });
    }

    fn cancel_notification(&self, id: &NotificationId) {
        self.publish(FacadeEvent::NotificationCancelled { id: id.clone() });
    }

    fn cancel_all_notifications(&self) {
        self.publish(FacadeEvent::AllNotificationsCancelled);
    }

    fn emit_broadcast(&self, kind: BroadcastKind, id: DownloadId) {
        self.publish(FacadeEvent::Broadcast { kind, id });
    }
}
