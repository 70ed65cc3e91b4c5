//! CareLink Console - live dashboard client
//!
//! Keeps a call-center dashboard synchronized with the CareLink server
//! over one persistent WebSocket channel. The [`connection`] module owns
//! the channel lifecycle (reconnect with exponential backoff, ping/pong
//! liveness, observer fan-out); the [`views`] module holds the dashboard
//! state that observers keep fresh.

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod version;
pub mod views;

pub use connection::{
    BaseEndpoint, ConnectionState, EndpointResolver, ListenerId, LiveClient, LiveClientConfig,
    StateChange,
};
pub use error::{Error, Result};
pub use protocol::Envelope;
