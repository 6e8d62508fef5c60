// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbox Value Objects and Session Id Validation
//!
//! An `OutboxEvent` is a locally buffered event awaiting submission to the
//! hosted OrgX API. Events are grouped per logical session into one JSON
//! file each, so corruption and replay backoff stay scoped to a single
//! session. The session id doubles as a file name segment and is therefore
//! validated as a core security rule, not an infrastructure nicety.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::activity::ActivityItem;

/// Kind of buffered event, mirroring the OrgX submission endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventKind {
    Progress,
    Decision,
    Artifact,
    Changeset,
    Retro,
    Outcome,
}

/// A locally buffered event awaiting remote submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique within a session's queue; appending a repeated id replaces the
    /// existing entry in place (idempotent append).
    pub id: String,

    #[serde(rename = "type")]
    pub kind: OutboxEventKind,

    /// RFC 3339 creation time, used for queue-health aggregates.
    pub timestamp: String,

    /// Opaque replay payload, forwarded verbatim to the remote API.
    #[serde(default)]
    pub payload: Value,

    /// Denormalized activity item so the dashboard can render the event
    /// locally while offline. Optional: not every event surfaces in the feed.
    #[serde(default, rename = "activityItem", skip_serializing_if = "Option::is_none")]
    pub activity_item: Option<ActivityItem>,
}

/// Outbox validation errors. Session-id violations are caller bugs and are
/// raised synchronously before any I/O is attempted.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Invalid outbox session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Outbox I/O failed for session {session}: {source}")]
    Io {
        session: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Outbox serialization failed for session {session}: {source}")]
    Serialize {
        session: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Safe-path-segment predicate for session ids.
///
/// Rejects anything that could escape the outbox directory when joined into
/// a path: separators, NUL bytes, `..`, and empty/dot-only names.
pub fn validate_session_id(session_id: &str) -> Result<(), OutboxError> {
    let rejected = session_id.is_empty()
        || session_id == "."
        || session_id == ".."
        || session_id.contains("..")
        || session_id.contains('/')
        || session_id.contains('\\')
        || session_id.contains('\0');

    if rejected {
        tracing::warn!(
            session_id = %session_id.escape_debug(),
            "Rejected unsafe outbox session id"
        );
        return Err(OutboxError::InvalidSessionId(session_id.to_string()));
    }

    Ok(())
}
