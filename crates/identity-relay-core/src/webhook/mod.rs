//! # Webhook Intake Module
//!
//! Handles signed identity-provider deliveries: header extraction, signature
//! verification, event classification and the [`WebhookPipeline`] that gates
//! and dispatches the result.

use crate::dedup::DeliveryDeduplicator;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::{ErrorCategory, Timestamp};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

pub mod classifier;
pub mod signature;

use classifier::VerifiedEvent;
use signature::{SignatureVerifier, VerificationError};

/// Header carrying the provider's unique delivery id
pub const DELIVERY_ID_HEADER: &str = "svix-id";

/// Header carrying the Unix-seconds signing timestamp
pub const TIMESTAMP_HEADER: &str = "svix-timestamp";

/// Header carrying one or more space-separated `version,signature` entries
pub const SIGNATURE_HEADER: &str = "svix-signature";

// ============================================================================
// Core Types
// ============================================================================

/// The three correlation headers every signed delivery must carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookHeaders {
    pub delivery_id: String, // svix-id
    pub timestamp: String,   // svix-timestamp
    pub signature: String,   // svix-signature
}

impl WebhookHeaders {
    /// Extract the correlation headers from a lower-cased header map.
    ///
    /// A header that is absent or empty counts as missing. All three are
    /// checked before any cryptographic work happens so the error names
    /// every missing header at once.
    pub fn from_http_headers(headers: &HashMap<String, String>) -> Result<Self, WebhookError> {
        let lookup = |name: &str| {
            headers
                .get(name)
                .filter(|value| !value.is_empty())
                .cloned()
        };

        let delivery_id = lookup(DELIVERY_ID_HEADER);
        let timestamp = lookup(TIMESTAMP_HEADER);
        let signature = lookup(SIGNATURE_HEADER);

        match (delivery_id, timestamp, signature) {
            (Some(delivery_id), Some(timestamp), Some(signature)) => Ok(Self {
                delivery_id,
                timestamp,
                signature,
            }),
            (delivery_id, timestamp, signature) => {
                let missing = [
                    (DELIVERY_ID_HEADER, delivery_id.is_none()),
                    (TIMESTAMP_HEADER, timestamp.is_none()),
                    (SIGNATURE_HEADER, signature.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| name.to_string())
                .collect();

                Err(WebhookError::MissingHeaders { missing })
            }
        }
    }
}

/// One inbound HTTP delivery: the exact body bytes plus correlation headers.
///
/// Immutable once built; the body is never re-serialized because the
/// signature covers the bytes exactly as received.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    headers: WebhookHeaders,
    body: Bytes,
    received_at: Timestamp,
}

impl InboundDelivery {
    /// Create new inbound delivery
    pub fn new(headers: WebhookHeaders, body: Bytes) -> Self {
        Self {
            headers,
            body,
            received_at: Timestamp::now(),
        }
    }

    /// Parse headers and wrap the body in one step
    pub fn from_http_parts(
        headers: &HashMap<String, String>,
        body: Bytes,
    ) -> Result<Self, WebhookError> {
        Ok(Self::new(WebhookHeaders::from_http_headers(headers)?, body))
    }

    pub fn headers(&self) -> &WebhookHeaders {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn delivery_id(&self) -> &str {
        &self.headers.delivery_id
    }

    pub fn received_at(&self) -> Timestamp {
        self.received_at
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Request-terminal failures raised before the dispatcher is reached
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing required webhook headers: {}", .missing.join(", "))]
    MissingHeaders { missing: Vec<String> },

    #[error("Webhook verification failed: {0}")]
    VerificationFailed(#[from] VerificationError),
}

impl WebhookError {
    /// Get error category for monitoring
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::MissingHeaders { .. } => ErrorCategory::Permanent,
            Self::VerificationFailed(_) => ErrorCategory::Security,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Verify → classify → dedup gate → dispatch.
///
/// The verifier holds the injected secret; the deduplicator is shared with
/// whoever owns its reaper task.
pub struct WebhookPipeline {
    verifier: SignatureVerifier,
    deduplicator: DeliveryDeduplicator,
    dispatcher: Dispatcher,
}

impl WebhookPipeline {
    pub fn new(
        verifier: SignatureVerifier,
        deduplicator: DeliveryDeduplicator,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            verifier,
            deduplicator,
            dispatcher,
        }
    }

    pub fn deduplicator(&self) -> &DeliveryDeduplicator {
        &self.deduplicator
    }

    /// Run one delivery through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::VerificationFailed`] when the signature,
    /// timestamp or JSON body is rejected. The detailed reason is logged here
    /// and must not be echoed to the caller.
    ///
    /// Downstream failures are not errors at this level; they come back as
    /// [`DispatchOutcome::DownstreamFailure`] and leave the dedup entry in
    /// place until its TTL runs out.
    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.delivery_id()))]
    pub async fn process(&self, delivery: InboundDelivery) -> Result<DispatchOutcome, WebhookError> {
        let payload = self.verifier.verify(&delivery).map_err(|e| {
            warn!(
                error = %e,
                received_at = %delivery.received_at(),
                "Rejecting webhook delivery that failed verification"
            );
            WebhookError::from(e)
        })?;

        let event = VerifiedEvent::classify(payload);
        debug!(kind = %event.kind(), "Classified verified event");

        if let Some(subject_id) = event.subject_id() {
            if !self.deduplicator.should_process(subject_id) {
                info!(
                    subject_id = %subject_id,
                    kind = %event.kind(),
                    "Suppressing redelivery inside dedup window"
                );
                return Ok(DispatchOutcome::SkippedDuplicate);
            }
        }

        Ok(self.dispatcher.dispatch(&event).await)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
