//! HTTP client construction
//!
//! One client per provider, built from configuration at startup and reused
//! for every request so connections to the model server are pooled.

use reqwest::Client;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Timeout for the reachability probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for listing installed models
pub const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the local model server.
///
/// No client-wide timeout: each request sets its own (describe, probe and
/// model listing use different limits).
pub fn model_client() -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Map a transport-level failure onto the error taxonomy.
pub fn classify(err: reqwest::Error, context: &str) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("{}: {}", context, err))
    } else if err.is_decode() {
        AppError::InvalidResponse(format!("{}: {}", context, err))
    } else {
        AppError::Connection(format!("{}: {}", context, err))
    }
}
