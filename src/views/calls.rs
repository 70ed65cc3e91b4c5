//! Call history state
//!
//! Keeps a bounded, most-recent-first list of calls, upserted by id from
//! `call_update` events. Pagination and rendering live elsewhere.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::connection::{ListenerId, LiveClient};
use crate::protocol::{CallRecord, CallUpdate, EventKind};

/// Bounded call history
pub struct CallLog {
    entries: Arc<RwLock<VecDeque<CallRecord>>>,
    capacity: usize,
}

impl CallLog {
    /// Create a log retaining at most `capacity` calls
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Register this log as a message observer
    pub fn attach(&self, client: &LiveClient) -> ListenerId {
        let entries = self.entries.clone();
        let capacity = self.capacity;
        client.add_message_listener(move |envelope| {
            if envelope.event() != EventKind::CallUpdate {
                return;
            }
            match envelope.decode::<CallUpdate>() {
                Ok(update) => {
                    let mut entries = entries.write();
                    entries.retain(|existing| existing.id != update.call.id);
                    entries.push_front(update.call);
                    entries.truncate(capacity);
                }
                Err(e) => {
                    warn!(error = %e, "ignoring malformed call update");
                }
            }
        })
    }

    /// Recent calls, newest first
    pub fn recent(&self) -> Vec<CallRecord> {
        self.entries.read().iter().cloned().collect()
    }

    /// Calls currently retained
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Calls currently in progress
    pub fn active_count(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|call| !call.status.is_final())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{BaseEndpoint, LiveClient, LiveClientConfig};
    use crate::protocol::{CallStatus, Envelope};

    fn test_client() -> LiveClient {
        let resolver = Arc::new(BaseEndpoint::new("ws://127.0.0.1:9").unwrap());
        LiveClient::new(LiveClientConfig::default(), resolver)
    }

    fn call_frame(id: &str, status: &str) -> Envelope {
        Envelope::parse(&format!(
            r#"{{"type":"call_update","call":{{"id":"{}","status":"{}"}}}}"#,
            id, status
        ))
        .unwrap()
    }

    #[test]
    fn test_newest_first() {
        let client = test_client();
        let log = CallLog::new(10);
        log.attach(&client);

        client.notify_message(&call_frame("call-1", "queued"));
        client.notify_message(&call_frame("call-2", "queued"));

        let recent = log.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "call-2");
        assert_eq!(recent[1].id, "call-1");
    }

    #[test]
    fn test_upsert_by_id() {
        let client = test_client();
        let log = CallLog::new(10);
        log.attach(&client);

        client.notify_message(&call_frame("call-1", "queued"));
        client.notify_message(&call_frame("call-2", "queued"));
        client.notify_message(&call_frame("call-1", "active"));

        let recent = log.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "call-1");
        assert_eq!(recent[0].status, CallStatus::Active);
    }

    #[test]
    fn test_capacity_bound() {
        let client = test_client();
        let log = CallLog::new(2);
        log.attach(&client);

        client.notify_message(&call_frame("call-1", "queued"));
        client.notify_message(&call_frame("call-2", "queued"));
        client.notify_message(&call_frame("call-3", "queued"));

        let recent = log.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "call-3");
        assert_eq!(recent[1].id, "call-2");
    }

    #[test]
    fn test_active_count() {
        let client = test_client();
        let log = CallLog::new(10);
        log.attach(&client);

        client.notify_message(&call_frame("call-1", "active"));
        client.notify_message(&call_frame("call-2", "completed"));
        client.notify_message(&call_frame("call-3", "abandoned"));

        assert_eq!(log.len(), 3);
        assert_eq!(log.active_count(), 1);
    }
}
