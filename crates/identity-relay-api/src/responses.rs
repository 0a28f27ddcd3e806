//! Response body types for the HTTP service

use serde::{Deserialize, Serialize};

/// Body returned for every delivery the service takes responsibility for:
/// synced, acknowledged without action, or suppressed as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub message: String,
}

impl WebhookResponse {
    pub fn processed() -> Self {
        Self {
            message: "processed".to_string(),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Subject ids currently inside their dedup window
    pub tracked_subjects: usize,
}

impl HealthResponse {
    pub fn healthy(tracked_subjects: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tracked_subjects,
        }
    }
}
