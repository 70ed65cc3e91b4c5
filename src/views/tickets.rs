//! Ticket tracker state
//!
//! Mirrors the set of open tickets from `ticket_update` events. Resolved
//! and closed tickets drop off the board.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::connection::{ListenerId, LiveClient};
use crate::protocol::{EventKind, TicketPriority, TicketRecord, TicketUpdate};

/// Open tickets keyed by id
#[derive(Default)]
pub struct TicketBoard {
    tickets: Arc<RwLock<HashMap<String, TicketRecord>>>,
}

impl TicketBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register this board as a message observer
    pub fn attach(&self, client: &LiveClient) -> ListenerId {
        let tickets = self.tickets.clone();
        client.add_message_listener(move |envelope| {
            if envelope.event() != EventKind::TicketUpdate {
                return;
            }
            match envelope.decode::<TicketUpdate>() {
                Ok(update) => {
                    let mut tickets = tickets.write();
                    if update.ticket.status.is_closed() {
                        tickets.remove(&update.ticket.id);
                    } else {
                        tickets.insert(update.ticket.id.clone(), update.ticket);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "ignoring malformed ticket update");
                }
            }
        })
    }

    /// Look up one ticket
    pub fn get(&self, id: &str) -> Option<TicketRecord> {
        self.tickets.read().get(id).cloned()
    }

    /// Open tickets, most urgent first
    pub fn open(&self) -> Vec<TicketRecord> {
        let mut tickets: Vec<TicketRecord> = self.tickets.read().values().cloned().collect();
        tickets.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        tickets
    }

    /// Number of open tickets
    pub fn open_count(&self) -> usize {
        self.tickets.read().len()
    }

    /// Number of open tickets at or above `priority`
    pub fn count_at_least(&self, priority: TicketPriority) -> usize {
        self.tickets
            .read()
            .values()
            .filter(|ticket| ticket.priority >= priority)
            .count()
    }
}
