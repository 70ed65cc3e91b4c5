//! Dashboard view collaborators
//!
//! Each view registers as an observer on the live connection and keeps its
//! own presentation-free state up to date. Views never talk back to the
//! manager and never retain envelopes; rendering belongs to whatever
//! front-end consumes these states.

mod analytics;
mod calls;
mod status;
mod tickets;

pub use analytics::AnalyticsPanel;
pub use calls::CallLog;
pub use status::{Banner, ConnectionBanner};
pub use tickets::TicketBoard;
