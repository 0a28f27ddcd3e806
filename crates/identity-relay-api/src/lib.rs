//! # Identity-Relay HTTP Service
//!
//! HTTP server that receives signed user-lifecycle webhooks and runs them
//! through the [`WebhookPipeline`].
//!
//! This service provides:
//! - The webhook endpoint with its fixed status/body contract
//! - A health endpoint reporting dedup occupancy
//! - A Prometheus metrics endpoint

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::{LoggingConfig, ServerConfig, ServiceConfig, SynchronizerConfig, WebhookConfig};
pub use errors::{ConfigError, ServiceError, WebhookHandlerError};
pub use metrics::ServiceMetrics;
pub use responses::{HealthResponse, WebhookResponse};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use bytes::Bytes;
use identity_relay_core::{
    CorrelationId, DispatchOutcome, InboundDelivery, ReaperHandle, WebhookHeaders,
    WebhookPipeline,
};
use std::{collections::HashMap, future::Future, sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Header used to correlate a request across log lines
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Verify → classify → dedup → dispatch
    pub pipeline: Arc<WebhookPipeline>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        pipeline: Arc<WebhookPipeline>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            pipeline,
            metrics,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    // The header check runs before the body limit is enforced, so a request
    // without svix headers is a 400 whatever its size.
    let webhook_routes = Router::new()
        .route(&state.config.webhooks.endpoint_path, post(handle_webhook))
        .layer(DefaultBodyLimit::max(state.config.server.max_body_size))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_webhook_headers,
        ));

    let observability_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/metrics", get(metrics_endpoint));

    Router::new()
        .merge(webhook_routes)
        .merge(observability_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server
///
/// Binds to the configured address, serves until SIGINT/SIGTERM, then gives
/// in-flight requests up to `server.shutdown_timeout_seconds` to finish. The
/// dedup reaper is stopped once the server is down.
pub async fn start_server(
    config: ServiceConfig,
    pipeline: Arc<WebhookPipeline>,
    reaper: ReaperHandle,
) -> Result<(), ServiceError> {
    let metrics = ServiceMetrics::new().map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("Failed to initialize metrics: {}", e),
        })
    })?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener =
        tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.clone(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    let state = AppState::new(config, pipeline, metrics);
    let result = serve(listener, state, shutdown_signal()).await;

    reaper.shutdown().await;
    result
}

/// Serve `state` on an already bound listener until `shutdown` resolves.
///
/// After `shutdown` the server stops accepting connections and waits up to
/// the configured shutdown timeout for in-flight requests before abandoning
/// them.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown_timeout = state.config.server.shutdown_timeout();
    let app = create_router(state);

    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = drain_rx.await;
    });
    let mut server_task = tokio::spawn(async move { server.await });

    tokio::select! {
        finished = &mut server_task => {
            return flatten_server_result(finished);
        }
        _ = shutdown => {
            info!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "Initiating graceful shutdown"
            );
        }
    }

    let _ = drain_tx.send(());

    match tokio::time::timeout(shutdown_timeout, &mut server_task).await {
        Ok(finished) => {
            flatten_server_result(finished)?;
            info!("HTTP server shutdown complete");
            Ok(())
        }
        Err(_) => {
            warn!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "Graceful shutdown timed out; abandoning in-flight requests"
            );
            server_task.abort();
            Ok(())
        }
    }
}

fn flatten_server_result(
    finished: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), ServiceError> {
    match finished {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServiceError::ServerFailed {
            message: e.to_string(),
        }),
        Err(e) => Err(ServiceError::ServerFailed {
            message: format!("server task failed: {}", e),
        }),
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// ============================================================================
// Webhook Handler
// ============================================================================

/// Handle one provider delivery
///
/// | Outcome                         | Status | Body                        |
/// |---------------------------------|--------|-----------------------------|
/// | missing correlation headers     | 400    | `no headers`                |
/// | verification failed             | 400    | `error occurred`            |
/// | synchronizer failed             | 500    | `error processing`          |
/// | synced / acknowledged / skipped | 200    | `{"message":"processed"}`   |
///
/// Missing headers are answered by [`require_webhook_headers`] before this
/// handler runs; it receives the parsed headers as an extension.
#[instrument(skip(state, webhook_headers, body), fields(body_len = body.len()))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    Extension(webhook_headers): Extension<WebhookHeaders>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, WebhookHandlerError> {
    let start = Instant::now();

    let delivery = InboundDelivery::new(webhook_headers, body);
    let result = state.pipeline.process(delivery).await;

    state
        .metrics
        .set_tracked_subjects(state.pipeline.deduplicator().tracked_count());

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            state.metrics.record_rejected(&e, start.elapsed());
            return Err(e.into());
        }
    };

    state.metrics.record_outcome(&outcome, start.elapsed());

    match outcome {
        DispatchOutcome::DownstreamFailure(e) => Err(WebhookHandlerError::DownstreamFailure(e)),
        outcome => {
            info!(outcome = ?outcome, "Webhook processed");
            Ok(Json(WebhookResponse::processed()))
        }
    }
}

/// Flatten request headers into the lower-cased map the core expects.
///
/// Repeated lines for one header are joined with a single space, which is how
/// the provider concatenates several signature entries. A header with any
/// non-UTF-8 value becomes empty and therefore counts as missing.
fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let value = headers
                .get_all(name)
                .iter()
                .map(|value| value.to_str())
                .collect::<Result<Vec<_>, _>>()
                .map(|values| {
                    values
                        .into_iter()
                        .filter(|value| !value.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();

            (name.as_str().to_lowercase(), value)
        })
        .collect()
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Basic health check endpoint
#[instrument(skip(state))]
async fn handle_health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let tracked = state.pipeline.deduplicator().tracked_count();
    state.metrics.set_tracked_subjects(tracked);

    Json(HealthResponse::healthy(tracked))
}

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .set_tracked_subjects(state.pipeline.deduplicator().tracked_count());

    state.metrics.encode().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Reject deliveries that lack any svix header before the body is buffered.
///
/// On success the parsed [`WebhookHeaders`] travel to [`handle_webhook`] as a
/// request extension.
async fn require_webhook_headers(
    State(state): State<AppState>,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = Instant::now();

    match WebhookHeaders::from_http_headers(&collect_headers(request.headers())) {
        Ok(webhook_headers) => {
            request.extensions_mut().insert(webhook_headers);
            next.run(request).await
        }
        Err(e) => {
            state.metrics.record_rejected(&e, start.elapsed());
            WebhookHandlerError::from(e).into_response()
        }
    }
}

/// Request logging middleware with correlation ID tracking
///
/// This middleware:
/// - Reuses a well-formed inbound `x-correlation-id` or generates one
/// - Records it on the span and in request extensions
/// - Echoes it on the response
/// - Logs completion at a level matching the status class
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<CorrelationId>().ok())
        .unwrap_or_default();

    tracing::Span::current().record("correlation_id", correlation_id.as_str().as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.as_str().parse() {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
