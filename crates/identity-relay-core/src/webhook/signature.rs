//! Signature verification for provider-signed deliveries.
//!
//! The provider signs `{delivery-id}.{timestamp}.{body}` with HMAC-SHA256 and
//! sends the base64 digest as `v1,<digest>` in the signature header. Several
//! entries may be present, separated by spaces, to support key rotation.

use super::InboundDelivery;
use crate::{IdentityRelayError, Timestamp};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Prefix the provider puts in front of the base64 secret
const SECRET_PREFIX: &str = "whsec_";

/// The only signature scheme version this verifier accepts
const SIGNATURE_VERSION: &str = "v1";

/// Allowed clock skew between the signing timestamp and now, in both directions
pub const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Secret
// ============================================================================

/// HMAC key shared with the provider.
///
/// Key bytes are wiped on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WebhookSecret {
    key: Vec<u8>,
}

impl WebhookSecret {
    /// Parse a provider secret of the form `whsec_<base64>`.
    ///
    /// The prefix is optional.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityRelayError::Configuration`] when the value is empty
    /// or is not standard base64.
    pub fn parse(value: &str) -> Result<Self, IdentityRelayError> {
        let encoded = value.strip_prefix(SECRET_PREFIX).unwrap_or(value);

        if encoded.is_empty() {
            return Err(IdentityRelayError::Configuration {
                message: "webhook secret is empty".to_string(),
            });
        }

        let key = STANDARD
            .decode(encoded)
            .map_err(|e| IdentityRelayError::Configuration {
                message: format!("webhook secret is not valid base64: {}", e),
            })?;

        if key.is_empty() {
            return Err(IdentityRelayError::Configuration {
                message: "webhook secret decodes to an empty key".to_string(),
            });
        }

        Ok(Self { key })
    }

    /// Read and parse the secret from an environment variable.
    ///
    /// An unset or empty variable is a fatal configuration error; there is no
    /// fallback that skips verification.
    pub fn from_env(var: &str) -> Result<Self, IdentityRelayError> {
        let value = std::env::var(var).map_err(|_| IdentityRelayError::Configuration {
            message: format!("environment variable {} is not set", var),
        })?;
        Self::parse(&value)
    }

    /// Use raw key bytes directly
    pub fn from_raw_key(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Length of the decoded key in bytes
    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSecret")
            .field("length", &self.key.len())
            .field("key", &"<REDACTED>")
            .finish()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Reasons a delivery fails verification.
///
/// These are logged server-side; callers only ever see a generic rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("Timestamp header is not an integer: '{value}'")]
    MalformedTimestamp { value: String },

    #[error("Message timestamp too old: {timestamp} (now {now})")]
    TimestampTooOld { timestamp: i64, now: i64 },

    #[error("Message timestamp too new: {timestamp} (now {now})")]
    TimestampTooNew { timestamp: i64, now: i64 },

    #[error("No v1 signature matched the payload")]
    SignatureMismatch,

    #[error("Verified payload is not valid JSON: {message}")]
    InvalidPayload { message: String },
}

// ============================================================================
// Verified payload
// ============================================================================

/// JSON body of a delivery that passed verification.
///
/// Only [`SignatureVerifier`] can build one, which is what makes a
/// [`super::classifier::VerifiedEvent`] trustworthy.
#[derive(Debug, Clone)]
pub struct VerifiedPayload(serde_json::Value);

impl VerifiedPayload {
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifies provider signatures with an injected secret.
///
/// # Examples
///
/// ```rust
/// use identity_relay_core::{SignatureVerifier, WebhookSecret};
///
/// let secret = WebhookSecret::parse("whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw").unwrap();
/// let verifier = SignatureVerifier::new(&secret).unwrap();
/// let header = verifier.sign("msg_1", 1_700_000_000, b"{}");
/// assert!(header.starts_with("v1,"));
/// ```
#[derive(Clone)]
pub struct SignatureVerifier {
    keyed_mac: HmacSha256,
    tolerance: Duration,
}

impl SignatureVerifier {
    /// Create a verifier with the default 5 minute timestamp tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityRelayError::Configuration`] if the key cannot seed
    /// an HMAC instance.
    pub fn new(secret: &WebhookSecret) -> Result<Self, IdentityRelayError> {
        let keyed_mac = HmacSha256::new_from_slice(&secret.key).map_err(|_| {
            IdentityRelayError::Configuration {
                message: "webhook secret cannot be used as HMAC key".to_string(),
            }
        })?;

        Ok(Self {
            keyed_mac,
            tolerance: DEFAULT_TIMESTAMP_TOLERANCE,
        })
    }

    /// Override the timestamp tolerance
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Verify a delivery against the current wall clock
    pub fn verify(&self, delivery: &InboundDelivery) -> Result<VerifiedPayload, VerificationError> {
        self.verify_at(delivery, Timestamp::now())
    }

    /// Verify a delivery as if the current time were `now`.
    ///
    /// Checks run in order: timestamp format, freshness, signature, JSON body.
    pub fn verify_at(
        &self,
        delivery: &InboundDelivery,
        now: Timestamp,
    ) -> Result<VerifiedPayload, VerificationError> {
        let headers = delivery.headers();

        let timestamp = headers.timestamp.parse::<i64>().map_err(|_| {
            VerificationError::MalformedTimestamp {
                value: headers.timestamp.clone(),
            }
        })?;
        self.check_freshness(timestamp, now.unix_seconds())?;

        let expected = self.digest(&headers.delivery_id, timestamp, delivery.body());
        let matched = headers
            .signature
            .split(' ')
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .any(|(_, signature)| bool::from(signature.as_bytes().ct_eq(expected.as_bytes())));

        if !matched {
            return Err(VerificationError::SignatureMismatch);
        }

        let value = serde_json::from_slice(delivery.body()).map_err(|e| {
            VerificationError::InvalidPayload {
                message: e.to_string(),
            }
        })?;

        Ok(VerifiedPayload(value))
    }

    /// Produce the signature header entry the provider would send
    pub fn sign(&self, delivery_id: &str, timestamp: i64, body: &[u8]) -> String {
        format!(
            "{},{}",
            SIGNATURE_VERSION,
            self.digest(delivery_id, timestamp, body)
        )
    }

    fn digest(&self, delivery_id: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = self.keyed_mac.clone();
        mac.update(delivery_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    fn check_freshness(&self, timestamp: i64, now: i64) -> Result<(), VerificationError> {
        let tolerance = i64::try_from(self.tolerance.as_secs()).unwrap_or(i64::MAX);

        if now.saturating_sub(timestamp) > tolerance {
            return Err(VerificationError::TimestampTooOld { timestamp, now });
        }

        if timestamp > now.saturating_add(tolerance) {
            return Err(VerificationError::TimestampTooNew { timestamp, now });
        }

        Ok(())
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("key", &"<REDACTED>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
