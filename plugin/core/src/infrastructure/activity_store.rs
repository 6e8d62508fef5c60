// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Local Activity Store
//!
//! Append-only, deduplicating store for the agent activity feed: an
//! in-memory cache over a single JSON snapshot file, with debounced atomic
//! persistence and cursor-paginated reads.
//!
//! The store trades write amplification for read-path correctness: any
//! append that changes anything triggers a full rebuild-sort-dedup-truncate
//! pass, so there is exactly one canonical order (`epoch desc, id desc`)
//! everywhere and cursor pagination can never skip or repeat a row. With the
//! item bound at [`MAX_STORE_ITEMS`] the O(n) rebuild is cheap.
//!
//! This is a read-optimization cache over data the remote OrgX service is
//! the source of truth for. Durability is eventual within one debounce
//! window; an abrupt process exit loses at most that window's mutations.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Activity snapshot persistence and paginated reads

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::activity::{
    canonical_order, is_before_cursor, ActivityItem, MAX_STORE_ITEMS, RETENTION_DAYS,
};
use crate::domain::cursor::ActivityCursor;
use crate::infrastructure::atomic_io::{
    backup_corrupt_file, write_json_file_atomic, FILE_MODE_PRIVATE,
};
use crate::infrastructure::scheduler::FlushScheduler;

/// Snapshot schema version. Readers treat any other version as absent.
const SNAPSHOT_VERSION: u32 = 1;

/// Default debounce window between a mutation and its disk flush.
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_millis(1250);

const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 500;

/// On-disk snapshot document.
#[derive(Debug, Serialize, Deserialize)]
struct ActivitySnapshot {
    version: u32,

    #[serde(rename = "updatedAt")]
    updated_at: String,

    items: Vec<ActivityItem>,
}

/// Result of one append batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppendOutcome {
    pub appended: usize,
    pub updated: usize,
    /// Item count after the rebuild (post dedup/retention/truncation).
    pub total: usize,
}

/// Read query for [`ActivityStore::list_page`].
#[derive(Debug, Clone, Default)]
pub struct ActivityPageQuery {
    /// Clamped to `[1, 500]`; defaults to 50.
    pub limit: Option<usize>,
    pub run_id: Option<String>,
    /// Inclusive epoch-millisecond bounds.
    pub since_epoch_ms: Option<i64>,
    pub until_epoch_ms: Option<i64>,
    /// Opaque token from a previous page's `next_cursor`.
    pub cursor: Option<String>,
}

/// One page of the activity feed.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityPage {
    pub activities: Vec<ActivityItem>,

    /// Present only when the page filled to exactly `limit`, signaling that
    /// more rows may exist.
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    /// Rows matching the time/run filters (cursor position excluded).
    pub total: usize,

    #[serde(rename = "storeUpdatedAt", skip_serializing_if = "Option::is_none")]
    pub store_updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityStoreStats {
    pub total: usize,

    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Item plus its parsed epoch, so the canonical sort never re-parses.
#[derive(Debug, Clone)]
struct StoredItem {
    epoch_ms: i64,
    item: ActivityItem,
}

#[derive(Default)]
struct StoreState {
    loaded: bool,
    /// Always sorted canonically (`epoch desc, id desc`), ids unique.
    items: Vec<StoredItem>,
    by_id: HashMap<String, usize>,
    updated_at: Option<DateTime<Utc>>,
    dirty: bool,
}

/// Tuning knobs; defaults match the production plugin.
#[derive(Debug, Clone)]
pub struct ActivityStoreConfig {
    pub path: PathBuf,
    pub flush_debounce: Duration,
    pub max_items: usize,
    pub retention_days: i64,
}

impl ActivityStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_debounce: DEFAULT_FLUSH_DEBOUNCE,
            max_items: MAX_STORE_ITEMS,
            retention_days: RETENTION_DAYS,
        }
    }
}

/// Process-wide activity store.
///
/// Constructed once at startup and passed by reference (`Arc`) to request
/// handlers — an explicit context object, not a hidden module-level global.
/// All mutation happens in [`ActivityStore::append_items`]; every other
/// operation reads the current cache snapshot under the same lock.
pub struct ActivityStore {
    config: ActivityStoreConfig,
    scheduler: Arc<dyn FlushScheduler>,
    state: Mutex<StoreState>,
}

impl ActivityStore {
    pub fn new(config: ActivityStoreConfig, scheduler: Arc<dyn FlushScheduler>) -> Arc<Self> {
        Arc::new(Self {
            config,
            scheduler,
            state: Mutex::new(StoreState::default()),
        })
    }

    /// Append a batch of candidate items.
    ///
    /// Per candidate: items without an id or with an unparseable timestamp
    /// are rejected; a known id with identical content is a no-op; a known
    /// id with changed content is an update (full replacement, no field
    /// patches); everything else is a pure append. Any append or update
    /// triggers a rebuild and schedules a debounced flush.
    pub fn append_items(self: &Arc<Self>, candidates: &[ActivityItem]) -> AppendOutcome {
        let now = Utc::now();
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, now);

        let mut appended = 0usize;
        let mut updated = 0usize;

        for candidate in candidates {
            let Some(epoch_ms) = candidate.epoch_ms() else {
                debug!(id = %candidate.id, "Rejected activity item with unparseable timestamp");
                continue;
            };
            if candidate.id.is_empty() {
                debug!("Rejected activity item without id");
                continue;
            }

            match state.by_id.get(&candidate.id).copied() {
                Some(index) => {
                    if state.items[index].item.content_differs(candidate) {
                        state.items[index] = StoredItem {
                            epoch_ms,
                            item: candidate.clone(),
                        };
                        updated += 1;
                    }
                }
                None => {
                    let index = state.items.len();
                    state.by_id.insert(candidate.id.clone(), index);
                    state.items.push(StoredItem {
                        epoch_ms,
                        item: candidate.clone(),
                    });
                    appended += 1;
                }
            }
        }

        if appended > 0 || updated > 0 {
            Self::rebuild(&mut state, &self.config, now);
            state.updated_at = Some(now);
            state.dirty = true;
            self.schedule_flush();
        }

        AppendOutcome {
            appended,
            updated,
            total: state.items.len(),
        }
    }

    /// Serve one cursor-paginated page in canonical order.
    ///
    /// Filter order: time window → run id (item field, falling back to
    /// `metadata.runId`) → cursor exclusion.
    pub fn list_page(self: &Arc<Self>, query: &ActivityPageQuery) -> ActivityPage {
        let now = Utc::now();
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, now);

        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let cursor = query.cursor.as_deref().and_then(ActivityCursor::decode);

        let mut activities = Vec::with_capacity(limit.min(64));
        let mut matching_total = 0usize;

        for stored in &state.items {
            if let Some(since) = query.since_epoch_ms {
                if stored.epoch_ms < since {
                    continue;
                }
            }
            if let Some(until) = query.until_epoch_ms {
                if stored.epoch_ms > until {
                    continue;
                }
            }
            if let Some(run_id) = query.run_id.as_deref() {
                if stored.item.effective_run_id() != Some(run_id) {
                    continue;
                }
            }
            matching_total += 1;

            if let Some(cursor) = &cursor {
                if !is_before_cursor(
                    stored.epoch_ms,
                    &stored.item.id,
                    cursor.before_epoch_ms,
                    &cursor.before_id,
                ) {
                    continue;
                }
            }

            if activities.len() < limit {
                activities.push(stored.item.clone());
            }
        }

        let next_cursor = if activities.len() == limit {
            activities.last().and_then(|item| {
                item.epoch_ms()
                    .map(|epoch| ActivityCursor::new(epoch, item.id.clone()).encode())
            })
        } else {
            None
        };

        ActivityPage {
            activities,
            next_cursor,
            total: matching_total,
            store_updated_at: state.updated_at.map(|at| at.to_rfc3339()),
        }
    }

    pub fn stats(self: &Arc<Self>) -> ActivityStoreStats {
        let now = Utc::now();
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state, now);
        ActivityStoreStats {
            total: state.items.len(),
            updated_at: state.updated_at.map(|at| at.to_rfc3339()),
        }
    }

    /// Flush the current state synchronously if dirty. Used at shutdown and
    /// by the debounce timer; callers on the append path never wait for it.
    pub fn flush_now(&self) -> std::io::Result<()> {
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(());
        }

        let snapshot = ActivitySnapshot {
            version: SNAPSHOT_VERSION,
            updated_at: state
                .updated_at
                .unwrap_or_else(Utc::now)
                .to_rfc3339(),
            items: state.items.iter().map(|stored| stored.item.clone()).collect(),
        };

        write_json_file_atomic(&self.config.path, &snapshot, FILE_MODE_PRIVATE)?;
        state.dirty = false;
        debug!(
            path = %self.config.path.display(),
            items = snapshot.items.len(),
            "Flushed activity snapshot"
        );
        Ok(())
    }

    fn schedule_flush(self: &Arc<Self>) {
        let store: Weak<ActivityStore> = Arc::downgrade(self);
        self.scheduler.schedule_once(
            self.config.flush_debounce,
            Box::new(move || {
                // The flush reads current state, so coalesced mutations from
                // the whole debounce window land in one write. A store that
                // was dropped in the meantime has nothing left to persist.
                if let Some(store) = store.upgrade() {
                    if let Err(error) = store.flush_now() {
                        warn!(%error, "Debounced activity flush failed");
                    }
                }
            }),
        );
    }

    /// Lazy snapshot load with quarantine-and-reset on anything unreadable.
    fn ensure_loaded(&self, state: &mut StoreState, now: DateTime<Utc>) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        let raw = match std::fs::read(&self.config.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return,
            Err(error) => {
                warn!(
                    path = %self.config.path.display(),
                    %error,
                    "Activity snapshot unreadable, starting empty"
                );
                return;
            }
        };

        let snapshot = match serde_json::from_slice::<ActivitySnapshot>(&raw) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot,
            Ok(snapshot) => {
                warn!(
                    version = snapshot.version,
                    "Activity snapshot has unknown version, quarantining"
                );
                self.quarantine();
                return;
            }
            Err(error) => {
                warn!(%error, "Activity snapshot failed to parse, quarantining");
                self.quarantine();
                return;
            }
        };

        state.updated_at = DateTime::parse_from_rfc3339(&snapshot.updated_at)
            .ok()
            .map(|at| at.with_timezone(&Utc));

        // Normalize-on-read: invalid and stale rows are silently dropped so
        // the store self-heals instead of refusing to start.
        state.items = snapshot
            .items
            .into_iter()
            .filter_map(|item| {
                if item.id.is_empty() {
                    return None;
                }
                let epoch_ms = item.epoch_ms()?;
                if item.is_stale(now) {
                    return None;
                }
                Some(StoredItem { epoch_ms, item })
            })
            .collect();

        Self::rebuild(state, &self.config, now);
        debug!(
            path = %self.config.path.display(),
            items = state.items.len(),
            "Loaded activity snapshot"
        );
    }

    /// Canonical sort + dedup-by-id + retention prune + bound truncation.
    fn rebuild(state: &mut StoreState, config: &ActivityStoreConfig, now: DateTime<Utc>) {
        let retention_floor =
            (now - chrono::Duration::days(config.retention_days)).timestamp_millis();
        state.items.retain(|stored| stored.epoch_ms >= retention_floor);

        state
            .items
            .sort_by(|a, b| canonical_order(a.epoch_ms, &a.item.id, b.epoch_ms, &b.item.id));

        // Ids are unique by construction on the append path, but snapshot
        // files arrive from outside this process: keep the newest occurrence.
        let mut seen = HashMap::with_capacity(state.items.len());
        let mut deduped = Vec::with_capacity(state.items.len());
        for stored in state.items.drain(..) {
            if seen.insert(stored.item.id.clone(), ()).is_none() {
                deduped.push(stored);
            }
        }
        state.items = deduped;

        state.items.truncate(config.max_items);

        state.by_id = state
            .items
            .iter()
            .enumerate()
            .map(|(index, stored)| (stored.item.id.clone(), index))
            .collect();
    }

    fn quarantine(&self) {
        if let Err(error) = backup_corrupt_file(&self.config.path) {
            warn!(
                path = %self.config.path.display(),
                %error,
                "Failed to quarantine corrupt activity snapshot"
            );
        }
    }
}

impl Drop for ActivityStore {
    fn drop(&mut self) {
        self.scheduler.cancel();
    }
}
