// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Offline Outbox
//!
//! Buffers structured events per logical session while the hosted OrgX API
//! is unreachable, one JSON file per session under the outbox directory.
//! Per-session files bound the blast radius of corruption to one session,
//! allow independent replay/backoff, and keep one pathological queue from
//! starving the rest.
//!
//! All operations are async (`tokio::fs`) — the outbox is never on a
//! latency-sensitive request path, and directory scans should not block the
//! event loop. Concurrent writers to the same session file from *different*
//! processes are out of scope: the outbox is owned by a single plugin host
//! process.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::activity::{canonical_order, ActivityItem};
use crate::domain::outbox::{validate_session_id, OutboxError, OutboxEvent};
use crate::infrastructure::atomic_io::{
    backup_corrupt_file, ensure_private_dir, write_json_file_atomic_async, FILE_MODE_PRIVATE,
};

/// Aggregate queue-health metrics across all sessions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutboxSummary {
    #[serde(rename = "pendingTotal")]
    pub pending_total: usize,

    /// Session id → pending event count.
    #[serde(rename = "pendingByQueue")]
    pub pending_by_queue: std::collections::HashMap<String, usize>,

    #[serde(rename = "oldestEventAt", skip_serializing_if = "Option::is_none")]
    pub oldest_event_at: Option<DateTime<Utc>>,

    #[serde(rename = "newestEventAt", skip_serializing_if = "Option::is_none")]
    pub newest_event_at: Option<DateTime<Utc>>,
}

/// Per-session offline event queues on disk.
pub struct OutboxStore {
    dir: PathBuf,
}

impl OutboxStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, OutboxError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    /// Read one session's queue. Missing file → empty queue; malformed file
    /// → quarantine-and-reset, also an empty queue (the outbox is a buffer,
    /// not a system of record).
    pub async fn read(&self, session_id: &str) -> Result<Vec<OutboxEvent>, OutboxError> {
        let path = self.session_path(session_id)?;

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(OutboxError::Io {
                    session: session_id.to_string(),
                    source,
                })
            }
        };

        match serde_json::from_slice::<Vec<OutboxEvent>>(&raw) {
            Ok(events) => Ok(events),
            Err(error) => {
                warn!(
                    session_id,
                    %error,
                    "Outbox queue failed to parse, quarantining"
                );
                if let Err(backup_error) = backup_corrupt_file(&path) {
                    warn!(session_id, error = %backup_error, "Outbox quarantine failed");
                }
                Ok(Vec::new())
            }
        }
    }

    /// Idempotent upsert: an event id already present in the session's queue
    /// is replaced in place, preserving queue order.
    pub async fn append(&self, session_id: &str, event: OutboxEvent) -> Result<(), OutboxError> {
        let mut events = self.read(session_id).await?;

        match events.iter_mut().find(|existing| existing.id == event.id) {
            Some(existing) => *existing = event,
            None => events.push(event),
        }

        self.persist(session_id, &events).await
    }

    /// Wholesale replacement of a session's queue. An empty queue deletes
    /// the file — there is no reason to keep a zero-length queue around.
    pub async fn replace(
        &self,
        session_id: &str,
        events: &[OutboxEvent],
    ) -> Result<(), OutboxError> {
        if events.is_empty() {
            return self.clear(session_id).await;
        }
        self.persist(session_id, events).await
    }

    /// Delete a session's queue file. Tolerates an already-missing file.
    pub async fn clear(&self, session_id: &str) -> Result<(), OutboxError> {
        let path = self.session_path(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(session_id, "Cleared outbox queue");
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(OutboxError::Io {
                session: session_id.to_string(),
                source,
            }),
        }
    }

    /// Session ids with a queue file on disk (quarantine/temp artifacts are
    /// not sessions).
    pub async fn list_sessions(&self) -> Result<Vec<String>, OutboxError> {
        let mut sessions = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(source) => {
                return Err(OutboxError::Io {
                    session: String::new(),
                    source,
                })
            }
        };

        while let Some(entry) =
            entries
                .next_entry()
                .await
                .map_err(|source| OutboxError::Io {
                    session: String::new(),
                    source,
                })?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(session_id) = name.strip_suffix(".json") {
                if !session_id.contains(".corrupt.") && !session_id.contains(".tmp.") {
                    sessions.push(session_id.to_string());
                }
            }
        }

        sessions.sort();
        Ok(sessions)
    }

    /// All denormalized activity items across every session, newest first —
    /// populates the dashboard's local view while offline.
    pub async fn read_all_items(&self) -> Result<Vec<ActivityItem>, OutboxError> {
        let mut items: Vec<(i64, ActivityItem)> = Vec::new();

        for session_id in self.list_sessions().await? {
            for event in self.read(&session_id).await? {
                if let Some(item) = event.activity_item {
                    let epoch = item.epoch_ms().unwrap_or(0);
                    items.push((epoch, item));
                }
            }
        }

        items.sort_by(|(a_epoch, a), (b_epoch, b)| {
            canonical_order(*a_epoch, &a.id, *b_epoch, &b.id)
        });
        Ok(items.into_iter().map(|(_, item)| item).collect())
    }

    /// Queue-health aggregates without materializing payloads for callers.
    pub async fn summary(&self) -> Result<OutboxSummary, OutboxError> {
        let mut summary = OutboxSummary::default();

        for session_id in self.list_sessions().await? {
            let events = self.read(&session_id).await?;
            if events.is_empty() {
                continue;
            }
            summary.pending_total += events.len();
            summary
                .pending_by_queue
                .insert(session_id.clone(), events.len());

            for event in &events {
                let Ok(at) = DateTime::parse_from_rfc3339(&event.timestamp) else {
                    continue;
                };
                let at = at.with_timezone(&Utc);
                if summary.oldest_event_at.is_none_or(|oldest| at < oldest) {
                    summary.oldest_event_at = Some(at);
                }
                if summary.newest_event_at.is_none_or(|newest| at > newest) {
                    summary.newest_event_at = Some(at);
                }
            }
        }

        Ok(summary)
    }

    async fn persist(&self, session_id: &str, events: &[OutboxEvent]) -> Result<(), OutboxError> {
        let path = self.session_path(session_id)?;
        ensure_private_dir(&self.dir).map_err(|source| OutboxError::Io {
            session: session_id.to_string(),
            source,
        })?;

        write_json_file_atomic_async(&path, &events, FILE_MODE_PRIVATE)
            .await
            .map_err(|source| OutboxError::Io {
                session: session_id.to_string(),
                source,
            })
    }
}
