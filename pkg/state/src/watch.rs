use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::broadcast;

use pkg_constants::state::WATCH_CHANNEL_CAPACITY;

/// Type of event in the watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single watch event representing a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

/// Live feed of state mutations with monotonic sequence numbers.
/// Nothing is retained for replay: a subscriber that lags must re-read the store.
#[derive(Clone)]
pub struct EventLog {
    seq: Arc<Mutex<u64>>,
    sender: broadcast::Sender<WatchEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            seq: Arc::new(Mutex::new(0)),
            sender,
        }
    }

    /// Publish a new event. Called internally by StateStore on put/delete.
    pub async fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let mut seq = self.seq.lock().await;
        *seq += 1;
        // Sent while holding the lock so subscribers observe seq order.
        let _ = self.sender.send(WatchEvent {
            seq: *seq,
            event_type,
            key,
            value,
        });
    }

    /// Subscribe to receive new events as they are emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
