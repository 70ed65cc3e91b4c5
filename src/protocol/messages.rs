//! Wire envelope and event payload definitions
//!
//! The server pushes JSON text frames shaped as `{ "type": <string>, ... }`.
//! The connection manager only interprets the discriminator; payload
//! decoding is left to whoever consumes the envelope. Payload fields are
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────

/// One parsed inbound frame: the discriminator plus the full JSON body.
///
/// The envelope is transient: it is handed to message observers and
/// dropped; the manager never retains it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    kind: String,
    body: serde_json::Value,
}

impl Envelope {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self> {
        let body: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::malformed_frame(format!("invalid JSON: {}", e)))?;
        Self::from_value(body)
    }

    /// Parse a binary frame (JSON bytes)
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        let body: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::malformed_frame(format!("invalid JSON: {}", e)))?;
        Self::from_value(body)
    }

    /// Build an envelope from an already-parsed JSON value
    pub fn from_value(body: serde_json::Value) -> Result<Self> {
        let kind = body
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::malformed_frame("missing \"type\" discriminator"))?
            .to_string();
        Ok(Self { kind, body })
    }

    /// The raw discriminator string
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The classified event kind
    pub fn event(&self) -> EventKind {
        EventKind::from_kind(&self.kind)
    }

    /// The full parsed frame, discriminator included
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Consume the envelope, yielding the full parsed frame
    pub fn into_body(self) -> serde_json::Value {
        self.body
    }

    /// Decode the frame into a typed payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| Error::Protocol(format!("cannot decode '{}' frame: {}", self.kind, e)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Event Classification
// ─────────────────────────────────────────────────────────────────

/// Known event discriminators, with a passthrough for everything else
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Outbound liveness probe
    Ping,
    /// Inbound liveness response
    Pong,
    /// Analytics card refresh
    DashboardUpdate,
    /// Call created or changed
    CallUpdate,
    /// Ticket created or changed
    TicketUpdate,
    /// Agent availability change
    AgentStatus,
    /// Anything the manager does not interpret
    Other(String),
}

impl EventKind {
    /// Classify a discriminator string
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "ping" => EventKind::Ping,
            "pong" => EventKind::Pong,
            "dashboard_update" => EventKind::DashboardUpdate,
            "call_update" => EventKind::CallUpdate,
            "ticket_update" => EventKind::TicketUpdate,
            "agent_status" => EventKind::AgentStatus,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// The wire discriminator for this kind
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Ping => "ping",
            EventKind::Pong => "pong",
            EventKind::DashboardUpdate => "dashboard_update",
            EventKind::CallUpdate => "call_update",
            EventKind::TicketUpdate => "ticket_update",
            EventKind::AgentStatus => "agent_status",
            EventKind::Other(kind) => kind,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Client-Originated Messages
// ─────────────────────────────────────────────────────────────────

/// Messages the connection manager itself puts on the wire
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe, payload-free
    Ping,
}

impl ClientMessage {
    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Protocol(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────
// Dashboard Analytics
// ─────────────────────────────────────────────────────────────────

/// Aggregate call-center metrics pushed with `dashboard_update`.
///
/// Every field is defaulted so partial refreshes decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    /// Calls handled today
    pub total_calls: u64,

    /// Calls currently in progress
    pub active_calls: u64,

    /// Calls waiting in queue
    pub waiting_calls: u64,

    /// Calls abandoned before an agent answered
    pub abandoned_calls: u64,

    /// Average queue wait in seconds
    pub avg_wait_seconds: f64,

    /// Average handle time in seconds
    pub avg_handle_seconds: f64,

    /// Tickets currently open
    pub open_tickets: u64,

    /// Agents signed in
    pub agents_online: u32,
}

/// `dashboard_update` payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUpdate {
    #[serde(default)]
    pub analytics: AnalyticsSnapshot,
}

// ─────────────────────────────────────────────────────────────────
// Calls
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Queued,
    Ringing,
    Active,
    Completed,
    Abandoned,
}

impl Default for CallStatus {
    fn default() -> Self {
        CallStatus::Queued
    }
}

impl CallStatus {
    /// Whether the call has left the live board
    pub fn is_final(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Abandoned)
    }
}

/// One row of the call history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    /// Server-assigned call id
    pub id: String,

    /// Caller phone number, masked by the server where required
    #[serde(default)]
    pub caller_number: Option<String>,

    /// Agent handling the call, if assigned
    #[serde(default)]
    pub agent: Option<String>,

    #[serde(default)]
    pub status: CallStatus,

    /// When the call entered the system
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Total duration, present once the call ends
    #[serde(default)]
    pub duration_seconds: Option<u64>,

    /// Recording reference for the playback panel
    #[serde(default)]
    pub recording_id: Option<String>,
}

/// `call_update` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUpdate {
    pub call: CallRecord,
}

// ─────────────────────────────────────────────────────────────────
// Tickets
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state of a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Pending,
    Resolved,
    Closed,
}

impl Default for TicketStatus {
    fn default() -> Self {
        TicketStatus::Open
    }
}

impl TicketStatus {
    /// Whether the ticket should leave the tracker
    pub fn is_closed(&self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }
}

/// Ticket urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Default for TicketPriority {
    fn default() -> Self {
        TicketPriority::Normal
    }
}

/// One row of the ticket tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    /// Server-assigned ticket id
    pub id: String,

    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub status: TicketStatus,

    #[serde(default)]
    pub priority: TicketPriority,

    /// Customer the ticket belongs to
    #[serde(default)]
    pub customer: Option<String>,

    /// Agent the ticket is assigned to
    #[serde(default)]
    pub assignee: Option<String>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `ticket_update` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketUpdate {
    pub ticket: TicketRecord,
}

// ─────────────────────────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────────────────────────

/// Agent availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAvailability {
    Available,
    OnCall,
    Away,
    Offline,
}

/// `agent_status` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusUpdate {
    pub agent: String,
    pub status: AgentAvailability,
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
