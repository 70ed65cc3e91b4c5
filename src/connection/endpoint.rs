//! Endpoint resolution for connect attempts
//!
//! The manager asks a resolver for the target URL once per connect
//! attempt. Resolution must be pure with respect to manager state, which
//! keeps the seam trivially mockable in tests.

use url::Url;

use crate::error::{Error, Result};

/// Maps a logical path to the concrete WebSocket URL to dial
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Result<Url>;
}

/// Resolver that joins paths onto a fixed base URL
#[derive(Debug, Clone)]
pub struct BaseEndpoint {
    base: Url,
}

impl BaseEndpoint {
    /// Create a resolver from a `ws://` or `wss://` base URL
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::endpoint_invalid(base_url, e.to_string()))?;
        match base.scheme() {
            "ws" | "wss" => Ok(Self { base }),
            scheme => Err(Error::endpoint_invalid(
                base_url,
                format!("unsupported scheme '{}', expected ws or wss", scheme),
            )),
        }
    }

    /// The configured base URL
    pub fn base(&self) -> &Url {
        &self.base
    }
}

impl EndpointResolver for BaseEndpoint {
    fn resolve(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::endpoint_invalid(path, e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
