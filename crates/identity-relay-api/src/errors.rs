//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use identity_relay_core::{SyncError, VerificationError, WebhookError};
use tracing::{debug, warn};

/// Webhook handler errors with HTTP status code mapping
///
/// The provider's delivery contract fixes both status and body for every
/// failure, so the bodies are short plain-text markers:
///
/// - `400 "no headers"`: a correlation header is missing
/// - `400 "error occurred"`: signature, timestamp or body rejected
/// - `500 "error processing"`: the downstream synchronizer failed
///
/// # Security Considerations
///
/// The detailed verification reason is logged server-side only and never
/// written to the response.
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    /// One or more of `svix-id`, `svix-timestamp`, `svix-signature` absent
    #[error("Missing headers: {}", .missing.join(", "))]
    MissingHeaders { missing: Vec<String> },

    /// The delivery failed verification
    #[error("Verification failed: {0}")]
    VerificationFailed(VerificationError),

    /// The synchronizer reported an error
    #[error("Downstream failure: {0}")]
    DownstreamFailure(SyncError),
}

impl WebhookHandlerError {
    pub const MISSING_HEADERS_BODY: &'static str = "no headers";
    pub const VERIFICATION_FAILED_BODY: &'static str = "error occurred";
    pub const DOWNSTREAM_FAILURE_BODY: &'static str = "error processing";

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingHeaders { .. } | Self::VerificationFailed(_) => StatusCode::BAD_REQUEST,
            Self::DownstreamFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Self::MissingHeaders { .. } => Self::MISSING_HEADERS_BODY,
            Self::VerificationFailed(_) => Self::VERIFICATION_FAILED_BODY,
            Self::DownstreamFailure(_) => Self::DOWNSTREAM_FAILURE_BODY,
        }
    }
}

impl From<WebhookError> for WebhookHandlerError {
    fn from(error: WebhookError) -> Self {
        match error {
            WebhookError::MissingHeaders { missing } => Self::MissingHeaders { missing },
            WebhookError::VerificationFailed(e) => Self::VerificationFailed(e),
        }
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        // Verification and sync failures were already logged with full
        // context inside the pipeline.
        match &self {
            Self::MissingHeaders { missing } => {
                warn!(missing = ?missing, "Rejecting webhook without required headers");
            }
            Self::VerificationFailed(e) => {
                debug!(reason = %e, "Responding to failed verification");
            }
            Self::DownstreamFailure(e) => {
                debug!(
                    error = %e,
                    transient = e.is_transient(),
                    "Responding to downstream failure"
                );
            }
        }

        (self.status_code(), self.body()).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl ServiceError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
