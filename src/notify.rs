use serde_json::Value;
use tracing::info;

/// Event tags carried by pipeline notifications. Delivery (websocket, push)
/// belongs to the realtime layer; the pipeline only emits.
pub const EMBEDDING_COMPLETED: &str = "embedding_completed";
pub const EMBEDDING_FAILED: &str = "embedding_failed";
pub const CLUSTER_MATCHED_TO_USER: &str = "cluster_matched_to_user";
pub const CLUSTER_USER_IDENTIFIED: &str = "cluster_user_identified";
pub const UNKNOWN_CLUSTER_CREATED: &str = "unknown_cluster_created";
pub const RETROACTIVE_MATCHES_FOUND: &str = "retroactive_matches_found";
pub const FACE_MATCHING_COMPLETED: &str = "face_matching_completed";
pub const FACE_MATCH_BATCH: &str = "face_match_batch";

/// Best-effort notification capability injected into the pipeline. Sinks
/// must never block or fail the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, user_id: i64, event: &str, payload: Value);
}

/// Logs every event; the default sink for the standalone worker daemon.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, user_id: i64, event: &str, payload: Value) {
        info!(user_id, event, %payload, "notification");
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub user_id: i64,
    pub event: String,
    pub payload: Value,
}

/// Forwards events onto an unbounded channel for a delivery task to drain.
/// A closed receiver just drops events.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, user_id: i64, event: &str, payload: Value) {
        let _ = self.tx.send(Notification { user_id, event: event.to_string(), payload });
    }
}

/// Captures events in memory; used by tests to assert on emissions.
#[derive(Default)]
pub struct MemorySink {
    events: parking_lot::Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, user_id: i64, event: &str, payload: Value) {
        self.events.lock().push(Notification { user_id, event: event.to_string(), payload });
    }
}
