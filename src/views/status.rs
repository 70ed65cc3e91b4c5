//! Connection banner state
//!
//! Maps connection-state transitions to the banner the dashboard shows in
//! its header. Exhaustion of the reconnect budget becomes a permanent
//! offline indication until someone explicitly reconnects.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::connection::{ConnectionState, ListenerId, LiveClient, StateChange};

/// What the dashboard header should display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Banner {
    /// Receiving live updates
    Live,
    /// Attempting to (re)establish the channel
    Connecting,
    /// Not connected; `permanent` once automatic recovery has given up
    Offline { permanent: bool },
}

impl Banner {
    /// Short label for logs and status lines
    pub fn label(&self) -> &'static str {
        match self {
            Banner::Live => "live",
            Banner::Connecting => "connecting",
            Banner::Offline { permanent: false } => "offline",
            Banner::Offline { permanent: true } => "offline (gave up)",
        }
    }
}

impl Default for Banner {
    fn default() -> Self {
        Banner::Offline { permanent: false }
    }
}

/// Connection-state observer backing the header banner
#[derive(Default)]
pub struct ConnectionBanner {
    current: Arc<RwLock<Banner>>,
}

impl ConnectionBanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register this banner as a connection-state observer
    pub fn attach(&self, client: &LiveClient) -> ListenerId {
        let current = self.current.clone();
        client.add_state_listener(move |change| {
            *current.write() = Banner::from_state(change);
        })
    }

    /// The banner to display right now
    pub fn current(&self) -> Banner {
        *self.current.read()
    }
}

impl Banner {
    fn from_state(change: &StateChange) -> Self {
        match change.state {
            ConnectionState::Connected => Banner::Live,
            ConnectionState::Connecting => Banner::Connecting,
            ConnectionState::Disconnected | ConnectionState::Error => {
                Banner::Offline { permanent: false }
            }
            ConnectionState::Exhausted => Banner::Offline { permanent: true },
        }
    }
}
