//! Tests for [`ServiceMetrics`].

use super::*;
use identity_relay_core::{SkipReason, SyncError, VerificationError, WebhookError};

#[test]
fn test_instances_do_not_collide() {
    let first = ServiceMetrics::new().expect("first registry");
    let second = ServiceMetrics::new().expect("second registry");

    first.record_outcome(&DispatchOutcome::Synced, Duration::from_millis(3));

    assert_eq!(first.webhook_users_synced_total.get(), 1);
    assert_eq!(second.webhook_users_synced_total.get(), 0);
}

#[test]
fn test_outcomes_increment_matching_counters() {
    let metrics = ServiceMetrics::new().unwrap();
    let elapsed = Duration::from_millis(1);

    metrics.record_outcome(&DispatchOutcome::Synced, elapsed);
    metrics.record_outcome(&DispatchOutcome::SkippedDuplicate, elapsed);
    metrics.record_outcome(
        &DispatchOutcome::DownstreamFailure(SyncError::Unavailable {
            message: "down".to_string(),
        }),
        elapsed,
    );
    metrics.record_outcome(
        &DispatchOutcome::Acknowledged(SkipReason::UnrecognizedKind),
        elapsed,
    );
    metrics.record_rejected(
        &WebhookError::VerificationFailed(VerificationError::SignatureMismatch),
        elapsed,
    );

    assert_eq!(metrics.webhook_requests_total.get(), 5);
    assert_eq!(metrics.webhook_users_synced_total.get(), 1);
    assert_eq!(metrics.webhook_duplicates_suppressed_total.get(), 1);
    assert_eq!(metrics.webhook_synchronizer_failures_total.get(), 1);
    assert_eq!(metrics.webhook_verification_failures_total.get(), 1);
    assert_eq!(metrics.webhook_missing_headers_total.get(), 0);
    assert_eq!(metrics.webhook_duration_seconds.get_sample_count(), 5);
}

#[test]
fn test_missing_headers_counted_apart_from_verification_failures() {
    let metrics = ServiceMetrics::new().unwrap();

    metrics.record_rejected(
        &WebhookError::MissingHeaders {
            missing: vec!["svix-id".to_string()],
        },
        Duration::from_millis(1),
    );

    assert_eq!(metrics.webhook_requests_total.get(), 1);
    assert_eq!(metrics.webhook_missing_headers_total.get(), 1);
    assert_eq!(metrics.webhook_verification_failures_total.get(), 0);
}

#[test]
fn test_encode_exposes_all_families() {
    let metrics = ServiceMetrics::new().unwrap();
    metrics.set_tracked_subjects(4);

    let text = metrics.encode().unwrap();

    for name in [
        "webhook_requests_total",
        "webhook_duration_seconds",
        "webhook_missing_headers_total",
        "webhook_verification_failures_total",
        "webhook_duplicates_suppressed_total",
        "webhook_synchronizer_failures_total",
        "webhook_users_synced_total",
    ] {
        assert!(text.contains(name), "missing {} in:\n{}", name, text);
    }
    assert!(text.contains("dedup_tracked_subjects 4"));
}
