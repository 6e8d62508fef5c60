// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the offline persistence pipeline
//!
//! These tests cover the lifecycle a disconnected OpenClaw session goes
//! through:
//! 1. Activities accumulate in the local store and paginate stably
//! 2. The debounced snapshot survives a process restart
//! 3. A corrupted snapshot self-heals with a quarantine backup
//! 4. Buffered outbox events replay into the remote sink on reconnect
//! 5. The config layer wires the whole runtime from defaults

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use orgx_openclaw_core::application::replay::{OrgXSink, OutboxReplayService};
use orgx_openclaw_core::config::{PluginConfig, PluginRuntime};
use orgx_openclaw_core::domain::activity::{ActivityItem, ActivityKind};
use orgx_openclaw_core::domain::outbox::{OutboxEvent, OutboxEventKind};
use orgx_openclaw_core::infrastructure::activity_store::{
    ActivityPageQuery, ActivityStore, ActivityStoreConfig,
};
use orgx_openclaw_core::infrastructure::outbox_store::OutboxStore;
use orgx_openclaw_core::infrastructure::scheduler::ManualFlushScheduler;
use orgx_openclaw_core::presentation::mcp::{ScopePolicy, ToolRegistry};

fn item_at(id: &str, epoch_ms: i64) -> ActivityItem {
    ActivityItem {
        id: id.to_string(),
        kind: ActivityKind::ArtifactCreated,
        title: format!("artifact {id}"),
        description: String::new(),
        summary: None,
        agent_id: Some("agent-7".to_string()),
        agent_name: None,
        run_id: Some("run-1".to_string()),
        initiative_id: None,
        timestamp: Utc.timestamp_millis_opt(epoch_ms).unwrap().to_rfc3339(),
        metadata: json!({}),
    }
}

fn outbox_event(id: &str) -> OutboxEvent {
    OutboxEvent {
        id: id.to_string(),
        kind: OutboxEventKind::Progress,
        timestamp: Utc::now().to_rfc3339(),
        payload: json!({"step": id}),
        activity_item: None,
    }
}

#[test]
fn test_pagination_is_stable_across_equal_timestamps() {
    let dir = TempDir::new().expect("tempdir");
    let scheduler = ManualFlushScheduler::new();
    let store = ActivityStore::new(
        ActivityStoreConfig::new(dir.path().join("activity.json")),
        scheduler,
    );

    // Two items share an epoch; id breaks the tie deterministically.
    let base = Utc::now().timestamp_millis() - 60_000;
    store.append_items(&[
        item_at("a", base),
        item_at("b", base),
        item_at("c", base + 1),
    ]);

    let first = store.list_page(&ActivityPageQuery {
        limit: Some(2),
        ..Default::default()
    });
    let ids: Vec<&str> = first.activities.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b"]);
    assert_eq!(first.total, 3);
    let cursor = first.next_cursor.expect("full page yields a cursor");

    let second = store.list_page(&ActivityPageQuery {
        limit: Some(2),
        cursor: Some(cursor),
        ..Default::default()
    });
    let ids: Vec<&str> = second.activities.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["a"], "no row skipped, no row repeated");
    assert!(second.next_cursor.is_none());
}

#[test]
fn test_snapshot_survives_restart() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("activity.json");
    let scheduler = ManualFlushScheduler::new();
    let store = ActivityStore::new(ActivityStoreConfig::new(&path), scheduler.clone());

    store.append_items(&[item_at("a", Utc::now().timestamp_millis())]);
    assert!(!path.exists(), "flush is debounced, not immediate");
    assert!(scheduler.fire(), "a flush was pending");
    assert!(path.exists());

    // A fresh store (new process) reads the snapshot back.
    let reopened = ActivityStore::new(ActivityStoreConfig::new(&path), ManualFlushScheduler::new());
    let stats = reopened.stats();
    assert_eq!(stats.total, 1);
}

#[test]
fn test_corrupt_snapshot_self_heals_with_backup() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("activity.json");
    std::fs::write(&path, b"{ not json").expect("write garbage");

    let store = ActivityStore::new(ActivityStoreConfig::new(&path), ManualFlushScheduler::new());
    assert_eq!(store.stats().total, 0, "corruption reads as empty");

    let backups: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .contains("activity.json.corrupt.")
        })
        .collect();
    assert_eq!(backups.len(), 1, "original bytes preserved for inspection");
}

struct FlakySink {
    accepted: Mutex<Vec<String>>,
    reject: Mutex<bool>,
}

#[async_trait::async_trait]
impl OrgXSink for FlakySink {
    async fn submit(&self, _session_id: &str, event: &OutboxEvent) -> anyhow::Result<()> {
        if *self.reject.lock() {
            anyhow::bail!("still offline");
        }
        self.accepted.lock().push(event.id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_offline_buffer_then_reconnect_replay() {
    let dir = TempDir::new().expect("tempdir");
    let outbox = Arc::new(OutboxStore::new(dir.path()));

    // Buffer while offline. Re-appending an id is a no-op upsert.
    for id in ["e1", "e2"] {
        outbox.append("session-a", outbox_event(id)).await.expect("append");
    }
    outbox.append("session-a", outbox_event("e1")).await.expect("append");
    outbox.append("session-b", outbox_event("e3")).await.expect("append");

    let summary = outbox.summary().await.expect("summary");
    assert_eq!(summary.pending_total, 3);

    let sink = Arc::new(FlakySink {
        accepted: Mutex::new(Vec::new()),
        reject: Mutex::new(true),
    });
    let service = OutboxReplayService::new(outbox.clone(), sink.clone());

    // First pass: still offline, everything stays buffered.
    let report = service.drain_all().await.expect("drain");
    assert_eq!(report.events_submitted, 0);
    assert_eq!(report.events_remaining, 3);

    // Reconnect: both sessions drain and their queue files disappear.
    *sink.reject.lock() = false;
    let report = service.drain_all().await.expect("drain");
    assert_eq!(report.events_submitted, 3);
    assert_eq!(report.events_remaining, 0);
    assert_eq!(report.sessions_drained, 2);
    assert!(outbox.list_sessions().await.expect("sessions").is_empty());
    assert_eq!(sink.accepted.lock().len(), 3);
}

#[tokio::test]
async fn test_runtime_wires_from_config_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = PluginConfig::default();
    config.storage.data_dir = Some(dir.path().to_path_buf());

    let runtime = PluginRuntime::build(&config, ToolRegistry::new(), ScopePolicy::new());

    runtime
        .activity_store
        .append_items(&[item_at("a", Utc::now().timestamp_millis())]);
    assert_eq!(runtime.activity_store.stats().total, 1);

    runtime
        .outbox
        .append("session-a", outbox_event("e1"))
        .await
        .expect("append");
    assert!(dir.path().join("outbox").join("session-a.json").exists());

    let limits = config.worker_limits();
    assert_eq!(limits.timeout_ms, Some(30 * 60 * 1000));
    assert_eq!(limits.stall_ms, Some(5 * 60 * 1000));
}
