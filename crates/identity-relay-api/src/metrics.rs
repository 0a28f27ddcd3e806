//! Prometheus metrics for the webhook intake.

use identity_relay_core::{DispatchOutcome, WebhookError};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

/// Service metrics for observability
///
/// Each instance owns its own [`Registry`] so several routers can coexist in
/// one process (tests build many).
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    pub webhook_requests_total: IntCounter,
    pub webhook_duration_seconds: Histogram,
    pub webhook_missing_headers_total: IntCounter,
    pub webhook_verification_failures_total: IntCounter,
    pub webhook_duplicates_suppressed_total: IntCounter,
    pub webhook_synchronizer_failures_total: IntCounter,
    pub webhook_users_synced_total: IntCounter,
    pub dedup_tracked_subjects: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let webhook_requests_total = IntCounter::new(
            "webhook_requests_total",
            "Total webhook requests received",
        )?;
        let webhook_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "webhook_duration_seconds",
                "Webhook processing time distribution",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0]),
        )?;
        let webhook_missing_headers_total = IntCounter::new(
            "webhook_missing_headers_total",
            "Deliveries rejected for missing svix headers",
        )?;
        let webhook_verification_failures_total = IntCounter::new(
            "webhook_verification_failures_total",
            "Deliveries rejected for a bad signature, stale timestamp or non-JSON body",
        )?;
        let webhook_duplicates_suppressed_total = IntCounter::new(
            "webhook_duplicates_suppressed_total",
            "Deliveries suppressed inside the dedup window",
        )?;
        let webhook_synchronizer_failures_total = IntCounter::new(
            "webhook_synchronizer_failures_total",
            "Failed user synchronizer calls",
        )?;
        let webhook_users_synced_total = IntCounter::new(
            "webhook_users_synced_total",
            "Successful user synchronizer calls",
        )?;
        let dedup_tracked_subjects = IntGauge::with_opts(Opts::new(
            "dedup_tracked_subjects",
            "Subject ids currently inside their dedup window",
        ))?;

        registry.register(Box::new(webhook_requests_total.clone()))?;
        registry.register(Box::new(webhook_duration_seconds.clone()))?;
        registry.register(Box::new(webhook_missing_headers_total.clone()))?;
        registry.register(Box::new(webhook_verification_failures_total.clone()))?;
        registry.register(Box::new(webhook_duplicates_suppressed_total.clone()))?;
        registry.register(Box::new(webhook_synchronizer_failures_total.clone()))?;
        registry.register(Box::new(webhook_users_synced_total.clone()))?;
        registry.register(Box::new(dedup_tracked_subjects.clone()))?;

        Ok(Arc::new(Self {
            registry,
            webhook_requests_total,
            webhook_duration_seconds,
            webhook_missing_headers_total,
            webhook_verification_failures_total,
            webhook_duplicates_suppressed_total,
            webhook_synchronizer_failures_total,
            webhook_users_synced_total,
            dedup_tracked_subjects,
        }))
    }

    /// Record a request that ended before dispatch
    pub fn record_rejected(&self, error: &WebhookError, duration: Duration) {
        self.webhook_requests_total.inc();
        self.webhook_duration_seconds.observe(duration.as_secs_f64());

        match error {
            WebhookError::MissingHeaders { .. } => self.webhook_missing_headers_total.inc(),
            WebhookError::VerificationFailed(_) => {
                self.webhook_verification_failures_total.inc()
            }
        }
    }

    /// Record a request that reached the pipeline's gate
    pub fn record_outcome(&self, outcome: &DispatchOutcome, duration: Duration) {
        self.webhook_requests_total.inc();
        self.webhook_duration_seconds.observe(duration.as_secs_f64());

        match outcome {
            DispatchOutcome::Synced => self.webhook_users_synced_total.inc(),
            DispatchOutcome::SkippedDuplicate => self.webhook_duplicates_suppressed_total.inc(),
            DispatchOutcome::DownstreamFailure(_) => {
                self.webhook_synchronizer_failures_total.inc()
            }
            DispatchOutcome::Acknowledged(_) => {}
        }
    }

    pub fn set_tracked_subjects(&self, count: usize) {
        self.dedup_tracked_subjects
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render every metric in Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
