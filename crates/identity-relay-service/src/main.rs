//! # Identity-Relay Service
//!
//! Binary entry point for the identity-relay webhook intake.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Initializes logging
//! - Loads the webhook signing secret (fatal if absent)
//! - Wires verifier, deduplicator, synchronizer and dispatcher into a pipeline
//! - Starts the HTTP server from identity-relay-api

mod settings;
mod synchronizer;

use identity_relay_api::{start_server, ConfigError, LoggingConfig, ServiceConfig};
use identity_relay_core::{
    DeliveryDeduplicator, Dispatcher, SignatureVerifier, WebhookPipeline, WebhookSecret,
};
use std::sync::Arc;
use synchronizer::HttpUserSynchronizer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code for any configuration problem, including a missing secret
const CONFIG_EXIT_CODE: i32 = 3;

#[tokio::main]
async fn main() {
    // Logging is not up yet; configuration errors go to stderr.
    let service_config = match settings::load_service_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load service configuration; aborting: {}", e);
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    init_tracing(&service_config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting identity-relay service");
    if let Some(path) = settings::explicit_config_path() {
        info!(path = %path, "Loaded configuration from explicit path");
    }

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(CONFIG_EXIT_CODE);
    }

    let pipeline = match build_pipeline(&service_config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Failed to initialize webhook pipeline; aborting");
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    let reaper = pipeline
        .deduplicator()
        .spawn_reaper(service_config.webhooks.dedup_reap_interval());

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        endpoint_path = %service_config.webhooks.endpoint_path,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(service_config, Arc::new(pipeline), reaper).await {
        error!(error = %e, "HTTP server terminated with an error");
        std::process::exit(e.exit_code());
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "identity_relay_service={level},identity_relay_api={level},identity_relay_core={level},tower_http=info",
            level = logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the verifier → dedup → dispatch pipeline from validated configuration.
///
/// The signing secret is read here, once; every later request uses the
/// verifier built from it.
fn build_pipeline(config: &ServiceConfig) -> Result<WebhookPipeline, ConfigError> {
    let invalid = |e: &dyn std::fmt::Display| ConfigError::Invalid {
        message: e.to_string(),
    };

    let secret = WebhookSecret::from_env(settings::WEBHOOK_SECRET_ENV).map_err(|e| invalid(&e))?;
    let verifier = SignatureVerifier::new(&secret)
        .map_err(|e| invalid(&e))?
        .with_tolerance(config.webhooks.timestamp_tolerance());

    let endpoint = config.synchronizer.endpoint_url()?;
    let synchronizer = HttpUserSynchronizer::new(endpoint, config.synchronizer.timeout())
        .map_err(|e| invalid(&e))?;
    info!(
        endpoint = %synchronizer.endpoint(),
        timeout_seconds = ?config.synchronizer.timeout_seconds,
        "Configured user synchronizer"
    );

    let deduplicator = DeliveryDeduplicator::new(config.webhooks.dedup_ttl());

    Ok(WebhookPipeline::new(
        verifier,
        deduplicator,
        Dispatcher::new(Arc::new(synchronizer)),
    ))
}
