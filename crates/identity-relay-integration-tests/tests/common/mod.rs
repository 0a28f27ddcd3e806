//! Common test utilities for identity-relay integration tests
//!
//! This module provides:
//! - A controllable in-memory [`UserSynchronizer`]
//! - A router wired exactly as the service wires it, minus the network
//! - Builders for signed and unsigned webhook requests

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use identity_relay_api::{create_router, AppState, ServiceConfig, ServiceMetrics};
use identity_relay_core::{
    DeliveryDeduplicator, Dispatcher, SignatureVerifier, SubjectId, SyncError, Timestamp,
    UserSynchronizer, WebhookPipeline, WebhookSecret,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Secret shared by every test router, in the provider's `whsec_` form
pub const TEST_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

#[allow(dead_code)]
pub const WEBHOOK_PATH: &str = "/api/webhook/clerk";

// ============================================================================
// Recording synchronizer
// ============================================================================

/// One upsert seen by [`RecordingSynchronizer`]
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertCall {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Records upserts; can be switched to fail and can delay each call so
/// concurrent requests overlap inside the handler.
#[derive(Default)]
pub struct RecordingSynchronizer {
    calls: Mutex<Vec<UpsertCall>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl RecordingSynchronizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<UpsertCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl UserSynchronizer for RecordingSynchronizer {
    async fn upsert_user(
        &self,
        subject_id: &SubjectId,
        email: &str,
        display_name: &str,
    ) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(UpsertCall {
            id: subject_id.to_string(),
            email: email.to_string(),
            name: display_name.to_string(),
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable {
                message: "user store offline".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Test application
// ============================================================================

#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub verifier: SignatureVerifier,
    pub synchronizer: Arc<RecordingSynchronizer>,
    pub pipeline: Arc<WebhookPipeline>,
    pub metrics: Arc<ServiceMetrics>,
}

#[allow(dead_code)]
impl TestApp {
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        let secret = WebhookSecret::parse(TEST_SECRET).expect("test secret must parse");
        let verifier = SignatureVerifier::new(&secret)
            .expect("verifier must build")
            .with_tolerance(config.webhooks.timestamp_tolerance());
        let synchronizer = RecordingSynchronizer::new();
        let pipeline = Arc::new(WebhookPipeline::new(
            verifier.clone(),
            DeliveryDeduplicator::new(config.webhooks.dedup_ttl()),
            Dispatcher::new(synchronizer.clone()),
        ));
        let metrics = ServiceMetrics::new().expect("metrics must register");
        let state = AppState::new(config, pipeline.clone(), metrics.clone());

        Self {
            router: create_router(state),
            verifier,
            synchronizer,
            pipeline,
            metrics,
        }
    }

    /// Send one request through a clone of the router
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Sign `body` now and deliver it
    pub async fn deliver(&self, delivery_id: &str, body: &serde_json::Value) -> Response<Body> {
        let request = signed_request(&self.verifier, delivery_id, body);
        self.send(request).await
    }
}

// ============================================================================
// Request builders
// ============================================================================

#[allow(dead_code)]
pub fn signed_request(
    verifier: &SignatureVerifier,
    delivery_id: &str,
    body: &serde_json::Value,
) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    signed_raw_request(verifier, delivery_id, Timestamp::now().unix_seconds(), bytes)
}

/// Sign arbitrary bytes at an explicit timestamp
#[allow(dead_code)]
pub fn signed_raw_request(
    verifier: &SignatureVerifier,
    delivery_id: &str,
    timestamp: i64,
    body: Vec<u8>,
) -> Request<Body> {
    let signature = verifier.sign(delivery_id, timestamp, &body);

    Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .header("svix-id", delivery_id)
        .header("svix-timestamp", timestamp.to_string())
        .header("svix-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

#[allow(dead_code)]
pub fn user_event(
    event_type: &str,
    id: &str,
    first: Option<&str>,
    last: Option<&str>,
) -> serde_json::Value {
    serde_json::json!({
        "type": event_type,
        "object": "event",
        "data": {
            "id": id,
            "object": "user",
            "email_addresses": [{ "email_address": format!("{}@example.com", id) }],
            "first_name": first,
            "last_name": last
        }
    })
}

#[allow(dead_code)]
pub fn user_created(id: &str) -> serde_json::Value {
    user_event("user.created", id, Some("Ada"), Some("Lovelace"))
}

#[allow(dead_code)]
pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).expect("response body must be JSON")
}
