//! Protocol module for the live event channel
//!
//! Defines the wire envelope and the typed event payloads pushed by the
//! CareLink server. Every frame is a JSON object with a `"type"`
//! discriminator; unknown discriminators are carried through verbatim.

mod messages;

pub use messages::*;
