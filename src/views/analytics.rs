//! Analytics card state
//!
//! Tracks the latest aggregate metrics from `dashboard_update` events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use crate::connection::{ListenerId, LiveClient};
use crate::protocol::{AnalyticsSnapshot, DashboardUpdate, EventKind};

/// Latest analytics snapshot, replaced wholesale on every update
#[derive(Default)]
pub struct AnalyticsPanel {
    snapshot: Arc<RwLock<AnalyticsSnapshot>>,
    updated_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl AnalyticsPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register this panel as a message observer
    pub fn attach(&self, client: &LiveClient) -> ListenerId {
        let snapshot = self.snapshot.clone();
        let updated_at = self.updated_at.clone();
        client.add_message_listener(move |envelope| {
            if envelope.event() != EventKind::DashboardUpdate {
                return;
            }
            match envelope.decode::<DashboardUpdate>() {
                Ok(update) => {
                    *snapshot.write() = update.analytics;
                    *updated_at.write() = Some(Utc::now());
                }
                Err(e) => {
                    warn!(error = %e, "ignoring malformed dashboard update");
                }
            }
        })
    }

    /// The current snapshot
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        self.snapshot.read().clone()
    }

    /// When the last update arrived, if any has
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        *self.updated_at.read()
    }
}
