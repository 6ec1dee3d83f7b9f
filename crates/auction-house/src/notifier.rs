// Change notification: tells other observers of a store that a save happened
// so they know to reload.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::store::StateStore;

/// Signal payload: the version that was just saved.
///
/// Receivers must still compare against their own last-applied version;
/// the signal only means "a save happened".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChanged {
    pub version: u64,
}

/// Best-effort, at-least-once broadcast of "state changed" signals.
pub trait ChangeNotifier: Send + Sync {
    fn signal(&self, version: u64);

    /// Register a new listener. Each receiver sees every signal sent after
    /// it subscribed (unless it lags, in which case it should just resync).
    fn subscribe(&self) -> broadcast::Receiver<StateChanged>;
}

/// Channel capacity. Signals carry no state, so a lagging receiver loses
/// nothing but a redundant reload trigger.
const CHANNEL_CAPACITY: usize = 64;

/// In-process notifier backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<StateChanged>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        BroadcastNotifier { tx }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn signal(&self, version: u64) {
        // send only fails when nobody is listening, which is fine.
        if self.tx.send(StateChanged { version }).is_err() {
            debug!("state change v{} signalled with no listeners", version);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.tx.subscribe()
    }
}

/// Poll `store` every `interval` and signal `notifier` whenever the persisted
/// version rises above `seen_version`. This carries writes made by other
/// processes sharing the same database file into this process's notification
/// channel.
///
/// Pass the version the caller has already loaded (for example
/// `AuctionEngine::last_applied_version`), so a write landing before the
/// first poll is still signalled.
///
/// Runs until the task is aborted.
pub async fn watch_store(
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn ChangeNotifier>,
    interval: Duration,
    seen_version: u64,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_seen = seen_version;

    loop {
        ticker.tick().await;
        match store.stored_version() {
            Ok(Some(version)) if version > last_seen => {
                debug!("store watcher saw v{}", version);
                last_seen = version;
                notifier.signal(version);
            }
            Ok(_) => {}
            Err(e) => warn!("store watcher failed to read version: {}", e),
        }
    }
}
