//! Classification of verified payloads into typed user-lifecycle events.
//!
//! Classification never fails. Missing or oddly-typed optional fields degrade
//! to `None` / empty strings; anything that is not a recognised user event
//! becomes [`EventKind::Other`] and is acknowledged without dispatch.

use super::signature::VerifiedPayload;
use crate::SubjectId;
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Kind tag of a verified event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    UserCreated,
    UserUpdated,
    /// Any other `type` value, kept for logging
    Other(String),
}

impl EventKind {
    /// Map the payload's `type` field to a kind
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "user.created" => Self::UserCreated,
            "user.updated" => Self::UserUpdated,
            other => Self::Other(other.to_string()),
        }
    }

    /// True for the kinds that are forwarded to the synchronizer
    pub fn is_user_lifecycle(&self) -> bool {
        matches!(self, Self::UserCreated | Self::UserUpdated)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
            Self::Other(event_type) => event_type,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User fields extracted from a lifecycle event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    /// First entry of `email_addresses`, if it is a non-empty string
    pub primary_email: Option<String>,

    /// `"{first} {last}"`, absent parts rendered as empty strings
    pub display_name: String,
}

/// A classified event. Only obtainable from a [`VerifiedPayload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEvent {
    kind: EventKind,
    subject_id: Option<SubjectId>,
    user: UserRecord,
}

impl VerifiedEvent {
    /// Classify a verified payload.
    ///
    /// A user event without a usable `data.id` keeps its kind but carries no
    /// subject id; it cannot be deduplicated or synchronized.
    pub fn classify(payload: VerifiedPayload) -> Self {
        let value = payload.as_value();

        let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");
        let kind = EventKind::from_type(event_type);

        if !kind.is_user_lifecycle() {
            return Self {
                kind,
                subject_id: None,
                user: UserRecord::default(),
            };
        }

        let data = value.get("data").unwrap_or(&Value::Null);

        let subject_id = match data
            .get("id")
            .and_then(Value::as_str)
            .map(SubjectId::new)
        {
            Some(Ok(id)) => id,
            Some(Err(e)) => {
                warn!(kind = %kind, error = %e, "User event carries an invalid subject id");
                return Self::without_subject(kind);
            }
            None => {
                warn!(kind = %kind, "User event has no subject id");
                return Self::without_subject(kind);
            }
        };

        let primary_email = data
            .get("email_addresses")
            .and_then(Value::as_array)
            .and_then(|addresses| addresses.first())
            .and_then(|address| address.get("email_address"))
            .and_then(Value::as_str)
            .filter(|email| !email.is_empty())
            .map(String::from);

        let first_name = data.get("first_name").and_then(Value::as_str);
        let last_name = data.get("last_name").and_then(Value::as_str);

        Self {
            kind,
            subject_id: Some(subject_id),
            user: UserRecord {
                primary_email,
                display_name: display_name(first_name, last_name),
            },
        }
    }

    fn without_subject(kind: EventKind) -> Self {
        Self {
            kind,
            subject_id: None,
            user: UserRecord::default(),
        }
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Subject id of a user-lifecycle event; `None` for every other kind and
    /// for user events whose `data.id` is absent, empty or not a string
    pub fn subject_id(&self) -> Option<&SubjectId> {
        self.subject_id.as_ref()
    }

    pub fn user(&self) -> &UserRecord {
        &self.user
    }
}

/// Join first and last name with a single space.
///
/// The separator is always present: `("Ada", None)` gives `"Ada "`.
pub fn display_name(first_name: Option<&str>, last_name: Option<&str>) -> String {
    format!(
        "{} {}",
        first_name.unwrap_or_default(),
        last_name.unwrap_or_default()
    )
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
