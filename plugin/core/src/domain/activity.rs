// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Activity Timeline Value Objects
//!
//! One `ActivityItem` per observed event in an agent's execution timeline.
//! The `timestamp` string is the authoritative ordering key; items are kept
//! in a single canonical order everywhere (`epoch desc, id desc`) so that
//! cursor pagination never skips or repeats a row.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Activity item shape, validation, canonical ordering

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Items older than this are dropped on every snapshot rebuild.
pub const RETENTION_DAYS: i64 = 45;

/// Hard bound on the in-memory/persisted item count. Keeps the full
/// rebuild-sort-dedup pass O(n) with a small n; see DESIGN.md for the
/// known scaling limit if retention ever needs to grow.
pub const MAX_STORE_ITEMS: usize = 50_000;

/// Kind of activity observed in an agent timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    RunStarted,
    RunCompleted,
    RunFailed,
    ArtifactCreated,
    DecisionRequested,
    DecisionResolved,
    HandoffRequested,
    HandoffClaimed,
    HandoffFulfilled,
    BlockerCreated,
    MilestoneCompleted,
    Delegation,
}

/// One observed event in an agent's execution timeline.
///
/// `metadata` is deliberately an open JSON object — event producers extend it
/// freely. Only `id` and `timestamp` are validated strictly; everything else
/// is carried as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
    /// Globally unique identifier. Re-appending the same id with different
    /// content is an update, never a duplicate.
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ActivityKind,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, rename = "agentName", skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    /// Correlates items into a session.
    #[serde(default, rename = "runId", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(default, rename = "initiativeId", skip_serializing_if = "Option::is_none")]
    pub initiative_id: Option<String>,

    /// RFC 3339 timestamp string as emitted by the producer. Parsed at the
    /// store boundary; an unparseable timestamp rejects the item.
    pub timestamp: String,

    #[serde(default)]
    pub metadata: Value,
}

impl ActivityItem {
    /// Parse the authoritative timestamp. `None` means the item is invalid
    /// and must not enter the store.
    pub fn epoch_ms(&self) -> Option<i64> {
        parse_epoch_ms(&self.timestamp)
    }

    /// Session correlation key: the item's own `run_id`, falling back to
    /// `metadata.runId` for producers that only tag metadata.
    pub fn effective_run_id(&self) -> Option<&str> {
        if let Some(run_id) = self.run_id.as_deref() {
            return Some(run_id);
        }
        self.metadata.get("runId").and_then(Value::as_str)
    }

    /// Whether a candidate with the same id carries different content.
    ///
    /// Compared fields: timestamp, kind, title, description, summary and
    /// metadata (by canonical JSON-string equality, so key-order noise does
    /// not count as a change).
    pub fn content_differs(&self, other: &ActivityItem) -> bool {
        self.timestamp != other.timestamp
            || self.kind != other.kind
            || self.title != other.title
            || self.description != other.description
            || self.summary != other.summary
            || metadata_fingerprint(&self.metadata) != metadata_fingerprint(&other.metadata)
    }

    /// Validation gate for the append path: id present, timestamp parseable.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && self.epoch_ms().is_some()
    }

    /// Whether the item is older than the retention window at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.epoch_ms() {
            Some(epoch) => epoch < (now - Duration::days(RETENTION_DAYS)).timestamp_millis(),
            // Unparseable timestamps are dropped elsewhere; treat as stale.
            None => true,
        }
    }
}

/// Parse an RFC 3339 timestamp string into epoch milliseconds.
pub fn parse_epoch_ms(timestamp: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

fn metadata_fingerprint(metadata: &Value) -> String {
    serde_json::to_string(metadata).unwrap_or_default()
}

/// Canonical store order: `(epoch desc, id desc)`.
///
/// The id tie-break is what makes cursor pagination deterministic when two
/// items share a timestamp. Items with equal epoch and id compare equal.
pub fn canonical_order(a_epoch: i64, a_id: &str, b_epoch: i64, b_id: &str) -> Ordering {
    b_epoch.cmp(&a_epoch).then_with(|| b_id.cmp(a_id))
}

/// Strictly-before predicate used by cursor exclusion: an item is emitted
/// only when it sorts after the cursor position in canonical order.
pub fn is_before_cursor(item_epoch: i64, item_id: &str, cursor_epoch: i64, cursor_id: &str) -> bool {
    match item_epoch.cmp(&cursor_epoch) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => item_id < cursor_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str, timestamp: &str) -> ActivityItem {
        ActivityItem {
            id: id.to_string(),
            kind: ActivityKind::RunStarted,
            title: "run started".to_string(),
            description: String::new(),
            summary: None,
            agent_id: None,
            agent_name: None,
            run_id: None,
            initiative_id: None,
            timestamp: timestamp.to_string(),
            metadata: Value::Null,
        }
    }

    #[test]
    fn test_epoch_parsing() {
        let it = item("a", "2026-01-15T10:30:00Z");
        assert!(it.epoch_ms().is_some());

        let bad = item("a", "not-a-timestamp");
        assert!(bad.epoch_ms().is_none());
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_effective_run_id_falls_back_to_metadata() {
        let mut it = item("a", "2026-01-15T10:30:00Z");
        assert_eq!(it.effective_run_id(), None);

        it.metadata = json!({"runId": "run-7"});
        assert_eq!(it.effective_run_id(), Some("run-7"));

        it.run_id = Some("run-1".to_string());
        assert_eq!(it.effective_run_id(), Some("run-1"));
    }

    #[test]
    fn test_content_differs_ignores_identical_metadata() {
        let mut a = item("a", "2026-01-15T10:30:00Z");
        a.metadata = json!({"k": 1});
        let b = a.clone();
        assert!(!a.content_differs(&b));

        let mut c = a.clone();
        c.title = "renamed".to_string();
        assert!(a.content_differs(&c));

        let mut d = a.clone();
        d.metadata = json!({"k": 2});
        assert!(a.content_differs(&d));
    }

    #[test]
    fn test_canonical_order_ties_break_on_id_desc() {
        // Same epoch: higher id sorts first.
        assert_eq!(canonical_order(100, "b", 100, "a"), Ordering::Less);
        assert_eq!(canonical_order(100, "a", 100, "b"), Ordering::Greater);
        // Newer epoch sorts first regardless of id.
        assert_eq!(canonical_order(200, "a", 100, "z"), Ordering::Less);
    }

    #[test]
    fn test_cursor_exclusion_is_strict() {
        // Exactly at the cursor position: excluded.
        assert!(!is_before_cursor(100, "b", 100, "b"));
        // Same epoch, lower id: included.
        assert!(is_before_cursor(100, "a", 100, "b"));
        // Older epoch: included.
        assert!(is_before_cursor(99, "z", 100, "a"));
        // Newer epoch: excluded.
        assert!(!is_before_cursor(101, "a", 100, "z"));
    }

    #[test]
    fn test_retention_window() {
        let now = Utc::now();
        let fresh = item("a", &now.to_rfc3339());
        assert!(!fresh.is_stale(now));

        let old = item("b", &(now - Duration::days(RETENTION_DAYS + 1)).to_rfc3339());
        assert!(old.is_stale(now));
    }

    #[test]
    fn test_wire_field_names() {
        let it = item("a", "2026-01-15T10:30:00Z");
        let wire = serde_json::to_value(&it).unwrap();
        assert_eq!(wire.get("type").unwrap(), "run_started");
        assert!(wire.get("kind").is_none());

        let parsed: ActivityItem = serde_json::from_value(json!({
            "id": "x",
            "type": "decision_requested",
            "title": "needs a call",
            "runId": "run-3",
            "timestamp": "2026-01-15T10:30:00Z"
        }))
        .unwrap();
        assert_eq!(parsed.kind, ActivityKind::DecisionRequested);
        assert_eq!(parsed.run_id.as_deref(), Some("run-3"));
    }
}
