use run_events::NormalizedEvent;
use serde::Serialize;
use tokio::sync::mpsc;

/// One normalized event tagged with the session and run it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdate {
    pub session_id: String,
    pub run_id: String,
    pub event: NormalizedEvent,
}

/// Receives events in log order for each run. Runs are delivered independently of each other.
pub trait SessionUpdateSink: Send + Sync {
    fn deliver(&self, update: SessionUpdate);
}

impl SessionUpdateSink for mpsc::UnboundedSender<SessionUpdate> {
    fn deliver(&self, update: SessionUpdate) {
        // A dropped receiver means nobody is listening; the log still has everything.
        let _ = self.send(update);
    }
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SessionUpdateSink for NullSink {
    fn deliver(&self, _update: SessionUpdate) {}
}
