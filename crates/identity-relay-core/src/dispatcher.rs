//! # Dispatcher
//!
//! Routes classified, non-duplicate events to the downstream
//! [`UserSynchronizer`] and reports what happened as a [`DispatchOutcome`].

use crate::webhook::classifier::VerifiedEvent;
use crate::{ErrorCategory, SubjectId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};

// ============================================================================
// Downstream collaborator
// ============================================================================

/// Persists or updates the user record for a subject.
///
/// Implementations are owned outside this crate; the dispatcher only calls
/// them and interprets success or failure.
#[async_trait]
pub trait UserSynchronizer: Send + Sync {
    /// Create the user record, or update it if it already exists
    async fn upsert_user(
        &self,
        subject_id: &SubjectId,
        email: &str,
        display_name: &str,
    ) -> Result<(), SyncError>;
}

/// Failures reported by a [`UserSynchronizer`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Synchronizer rejected the user record ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Synchronizer unavailable: {message}")]
    Unavailable { message: String },

    #[error("Synchronizer internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Check if a later redelivery could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rejected { .. } => false,
            Self::Unavailable { .. } => true,
            Self::Internal { .. } => true,
        }
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> ErrorCategory {
        if self.is_transient() {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Permanent
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Why an event was acknowledged without calling the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not a `user.created` / `user.updated` event
    UnrecognizedKind,
    /// User event whose `data.id` is absent, empty or not a string
    MissingSubjectId,
    /// User event without a primary email
    MissingEmail,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedKind => f.write_str("unrecognized_kind"),
            Self::MissingSubjectId => f.write_str("missing_subject_id"),
            Self::MissingEmail => f.write_str("missing_email"),
        }
    }
}

/// Result of handing one event to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The synchronizer accepted the user record
    Synced,
    /// A live dedup entry suppressed this delivery
    SkippedDuplicate,
    /// Nothing to do; acknowledged as a designed no-op
    Acknowledged(SkipReason),
    /// The synchronizer failed; the dedup entry is left to expire naturally
    DownstreamFailure(SyncError),
}

impl DispatchOutcome {
    /// True for every outcome except [`DispatchOutcome::DownstreamFailure`]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::DownstreamFailure(_))
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Calls the synchronizer for user events that carry an email
#[derive(Clone)]
pub struct Dispatcher {
    synchronizer: Arc<dyn UserSynchronizer>,
}

impl Dispatcher {
    pub fn new(synchronizer: Arc<dyn UserSynchronizer>) -> Self {
        Self { synchronizer }
    }

    /// Dispatch a classified event.
    ///
    /// Non-user kinds, user events without a subject id and email-less user
    /// events are acknowledged without a synchronizer call. No retry is attempted on failure; redelivery is the
    /// provider's job.
    #[instrument(skip(self, event), fields(kind = %event.kind()))]
    pub async fn dispatch(&self, event: &VerifiedEvent) -> DispatchOutcome {
        if !event.kind().is_user_lifecycle() {
            info!("Acknowledging event that is not a user lifecycle event");
            return DispatchOutcome::Acknowledged(SkipReason::UnrecognizedKind);
        }

        let Some(subject_id) = event.subject_id() else {
            info!("User event has no subject id; skipping sync");
            return DispatchOutcome::Acknowledged(SkipReason::MissingSubjectId);
        };

        let user = event.user();
        let Some(email) = user.primary_email.as_deref() else {
            info!(subject_id = %subject_id, "User event has no primary email; skipping sync");
            return DispatchOutcome::Acknowledged(SkipReason::MissingEmail);
        };

        match self
            .synchronizer
            .upsert_user(subject_id, email, &user.display_name)
            .await
        {
            Ok(()) => {
                info!(subject_id = %subject_id, "User record synchronized");
                DispatchOutcome::Synced
            }
            Err(e) => {
                error!(
                    subject_id = %subject_id,
                    error = %e,
                    transient = e.is_transient(),
                    "User synchronizer failed"
                );
                DispatchOutcome::DownstreamFailure(e)
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
