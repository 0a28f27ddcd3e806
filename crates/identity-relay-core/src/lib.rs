//! # Identity-Relay Core
//!
//! Core business logic for the identity-relay webhook intake service.
//!
//! This crate authenticates signed user-lifecycle notifications from the
//! identity provider, classifies them, suppresses redeliveries, and hands the
//! surviving events to a downstream user-record synchronizer.
//!
//! ## Architecture
//!
//! - [`webhook`] owns the inbound delivery types, signature verification,
//!   event classification and the [`webhook::WebhookPipeline`] that chains them
//! - [`dedup`] gates processing per subject id inside a fixed TTL window
//! - [`dispatcher`] calls the [`dispatcher::UserSynchronizer`] collaborator and
//!   reports a [`dispatcher::DispatchOutcome`]
//!
//! Infrastructure (HTTP server, persistence) is injected through traits.
//!
//! ## Usage
//!
//! ```rust
//! use identity_relay_core::{CorrelationId, SubjectId};
//!
//! let subject = SubjectId::new("user_2abc").unwrap();
//! assert_eq!(subject.as_str(), "user_2abc");
//! let _correlation_id = CorrelationId::new();
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use uuid::Uuid;

/// Standard result type for identity-relay operations
pub type IdentityRelayResult<T> = Result<T, IdentityRelayError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Provider-assigned identifier of the user a lifecycle event is about.
///
/// This is the key used by the delivery deduplicator, so two events about the
/// same user share one dedup window regardless of their delivery ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    /// Create new subject ID.
    ///
    /// The provider owns the id format, so the only rule is that it is not
    /// empty. Length and character set are passed through untouched.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "subject_id".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier for tracing requests across system boundaries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s
            .parse::<Uuid>()
            .map_err(|_| ValidationError::InvalidFormat {
                field: "correlation_id".to_string(),
                message: format!("expected UUID, got '{}'", s),
            })?;
        Ok(Self(uuid))
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Build a timestamp from whole Unix seconds.
    ///
    /// Returns `None` when the value is outside chrono's representable range.
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        Utc.timestamp_opt(seconds, 0).single().map(Self)
    }

    /// Whole seconds since the Unix epoch
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures; the provider will redeliver
    Transient,
    /// Permanent failures that won't succeed on redelivery
    Permanent,
    /// Authentication failures requiring attention
    Security,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },
}

/// Top-level error type for identity-relay operations
#[derive(Debug, thiserror::Error)]
pub enum IdentityRelayError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl IdentityRelayError {
    /// Get error category for monitoring and alerting
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Transient,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Webhook intake: delivery types, signature verification, classification
pub mod webhook;

/// Time-windowed delivery deduplication
pub mod dedup;

/// Routing of classified events to the user synchronizer
pub mod dispatcher;

pub use dedup::{DeliveryDeduplicator, ReaperHandle, DEFAULT_DEDUP_TTL, DEFAULT_REAP_INTERVAL};
pub use dispatcher::{DispatchOutcome, Dispatcher, SkipReason, SyncError, UserSynchronizer};
pub use webhook::{
    classifier::{EventKind, UserRecord, VerifiedEvent},
    signature::{
        SignatureVerifier, VerificationError, VerifiedPayload, WebhookSecret,
        DEFAULT_TIMESTAMP_TOLERANCE,
    },
    InboundDelivery, WebhookError, WebhookHeaders, WebhookPipeline,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
