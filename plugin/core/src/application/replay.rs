// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbox Replay Service
//!
//! Drains buffered outbox queues into the hosted OrgX API once connectivity
//! returns. The remote API is an external collaborator reached only through
//! the [`OrgXSink`] trait, so the drain logic stays testable offline.
//!
//! Replay is per session: events are submitted oldest-first, the queue file
//! is deleted only after every event in it was accepted, and a partial
//! failure rewrites the undelivered remainder so nothing is lost. Because
//! appends are idempotent upserts by event id, re-submitting an event after
//! a crash between submit and rewrite is safe on the remote side too.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::outbox::{OutboxError, OutboxEvent};
use crate::infrastructure::outbox_store::OutboxStore;

/// Remote submission endpoint for buffered events.
#[async_trait]
pub trait OrgXSink: Send + Sync {
    /// Submit one event. An error leaves the event (and everything after
    /// it in the same queue) buffered for a later attempt.
    async fn submit(&self, session_id: &str, event: &OutboxEvent) -> anyhow::Result<()>;
}

/// Outcome of draining a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReplay {
    pub session_id: String,
    pub submitted: usize,
    pub remaining: usize,
}

impl SessionReplay {
    pub fn fully_drained(&self) -> bool {
        self.remaining == 0
    }
}

/// Aggregate outcome of a full replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub sessions_drained: usize,
    pub events_submitted: usize,
    pub events_remaining: usize,
}

pub struct OutboxReplayService {
    outbox: Arc<OutboxStore>,
    sink: Arc<dyn OrgXSink>,
}

impl OutboxReplayService {
    pub fn new(outbox: Arc<OutboxStore>, sink: Arc<dyn OrgXSink>) -> Self {
        Self { outbox, sink }
    }

    /// Drain one session's queue oldest-first.
    ///
    /// Stops at the first sink failure and rewrites the remainder; clears
    /// the queue file only on full success.
    pub async fn drain_session(&self, session_id: &str) -> Result<SessionReplay, OutboxError> {
        let events = self.outbox.read(session_id).await?;
        if events.is_empty() {
            return Ok(SessionReplay {
                session_id: session_id.to_string(),
                submitted: 0,
                remaining: 0,
            });
        }

        let mut submitted = 0usize;
        for (index, event) in events.iter().enumerate() {
            if let Err(error) = self.sink.submit(session_id, event).await {
                warn!(
                    session_id,
                    event_id = %event.id,
                    %error,
                    "Outbox replay interrupted, keeping undelivered events"
                );
                let remainder: Vec<OutboxEvent> = events[index..].to_vec();
                let remaining = remainder.len();
                self.outbox.replace(session_id, &remainder).await?;
                return Ok(SessionReplay {
                    session_id: session_id.to_string(),
                    submitted,
                    remaining,
                });
            }
            submitted += 1;
        }

        self.outbox.clear(session_id).await?;
        info!(session_id, submitted, "Outbox queue drained");
        Ok(SessionReplay {
            session_id: session_id.to_string(),
            submitted,
            remaining: 0,
        })
    }

    /// Drain every session. One failing session never blocks another; its
    /// undelivered events stay buffered for the next pass.
    pub async fn drain_all(&self) -> Result<ReplayReport, OutboxError> {
        let mut report = ReplayReport::default();

        for session_id in self.outbox.list_sessions().await? {
            let replay = self.drain_session(&session_id).await?;
            report.events_submitted += replay.submitted;
            report.events_remaining += replay.remaining;
            if replay.fully_drained() && replay.submitted > 0 {
                report.sessions_drained += 1;
            }
        }

        Ok(report)
    }
}
