//! HTTP adapter for the downstream user-record service.

use async_trait::async_trait;
use identity_relay_core::{SubjectId, SyncError, UserSynchronizer};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Upper bound on how much of an error body is carried into [`SyncError`]
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Wire body for one upsert
#[derive(Debug, Serialize)]
struct UpsertUserRequest<'a> {
    id: &'a str,
    email: &'a str,
    name: &'a str,
}

/// Posts each user upsert as JSON to a fixed endpoint.
///
/// Status mapping:
/// - 2xx: success
/// - 4xx: [`SyncError::Rejected`]
/// - anything else, or a transport error: [`SyncError::Unavailable`]
#[derive(Debug, Clone)]
pub struct HttpUserSynchronizer {
    http_client: reqwest::Client,
    endpoint: Url,
}

impl HttpUserSynchronizer {
    /// Build the synchronizer.
    ///
    /// With `timeout` unset the call is bounded only by the transport.
    pub fn new(endpoint: Url, timeout: Option<Duration>) -> Result<Self, SyncError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("identity-relay/", env!("CARGO_PKG_VERSION")));

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let http_client = builder.build().map_err(|e| SyncError::Internal {
            message: format!("Failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl UserSynchronizer for HttpUserSynchronizer {
    #[instrument(skip(self, email, display_name), fields(endpoint = %self.endpoint))]
    async fn upsert_user(
        &self,
        subject_id: &SubjectId,
        email: &str,
        display_name: &str,
    ) -> Result<(), SyncError> {
        let body = UpsertUserRequest {
            id: subject_id.as_str(),
            email,
            name: display_name,
        };

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Unavailable {
                message: format!("HTTP request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "User upsert accepted");
            return Ok(());
        }

        let error_text: String = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error body".to_string())
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();

        if status.is_client_error() {
            Err(SyncError::Rejected {
                status: status.as_u16(),
                message: error_text,
            })
        } else {
            Err(SyncError::Unavailable {
                message: format!("User service responded {}: {}", status, error_text),
            })
        }
    }
}

#[cfg(test)]
#[path = "synchronizer_tests.rs"]
mod tests;
