//! # Delivery Deduplication
//!
//! The provider delivers at least once, so the same user event can arrive
//! several times, sometimes concurrently. [`DeliveryDeduplicator`] lets the
//! first delivery for a subject through and suppresses the rest until a fixed
//! TTL has elapsed.
//!
//! Tracking is in-memory and best-effort: a restart forgets everything.
//!
//! ## Expiry
//!
//! Expiry is enforced twice:
//! - lazily, inside the atomic check-and-insert, so an expired entry never
//!   suppresses a delivery even if the reaper is late
//! - by a reaper task ([`DeliveryDeduplicator::spawn_reaper`]) that purges
//!   expired entries on a fixed interval, so memory is released with no traffic

use crate::SubjectId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Window during which a subject id counts as already handled
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(30);

/// How often the reaper purges expired entries
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks recently seen subject ids with their expiry instants.
///
/// Clones share the same tracking map.
#[derive(Debug, Clone)]
pub struct DeliveryDeduplicator {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<SubjectId, Instant>>>,
}

impl DeliveryDeduplicator {
    /// Create deduplicator with the given TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Atomically decide whether `subject_id` should be processed.
    ///
    /// Returns `true` and records the id with a fresh expiry when it is not
    /// tracked (or its entry has expired). Returns `false` while a live entry
    /// exists. The whole check-and-insert happens under one lock with no
    /// suspension point, so concurrent deliveries for the same id cannot both
    /// pass.
    pub fn should_process(&self, subject_id: &SubjectId) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.get(subject_id) {
            Some(expires_at) if *expires_at > now => false,
            _ => {
                entries.insert(subject_id.clone(), now + self.ttl);
                true
            }
        }
    }

    /// Whether a live entry exists for `subject_id`
    pub fn is_tracked(&self, subject_id: &SubjectId) -> bool {
        let now = Instant::now();
        self.lock()
            .get(subject_id)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Number of entries currently held, including expired ones the reaper
    /// has not purged yet
    pub fn tracked_count(&self) -> usize {
        self.lock().len()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    /// Start a background task that purges expired entries every `interval`.
    ///
    /// Must be called from within a tokio runtime. The task holds only a
    /// clone of the shared map and stops when the returned handle is shut
    /// down or dropped.
    pub fn spawn_reaper(&self, interval: Duration) -> ReaperHandle {
        let deduplicator = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let purged = deduplicator.purge_expired();
                if purged > 0 {
                    debug!(purged, "Evicted expired dedup entries");
                }
            }
        });

        ReaperHandle { task: Some(task) }
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned lock is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, HashMap<SubjectId, Instant>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DeliveryDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

/// Owner of the reaper task. Dropping it cancels the task.
#[derive(Debug)]
pub struct ReaperHandle {
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for it to finish
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            info!("Dedup reaper stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "dedup_tests.rs"]
mod tests;
