// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Plugin Configuration
//!
//! YAML-backed configuration for the OpenClaw plugin, plus the wiring that
//! turns a loaded config into a running set of stores and the HTTP surface.
//! Every field has a default, so an absent or empty config file yields a
//! fully working plugin rooted under `~/.openclaw/orgx`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::worker::WorkerLimits;
use crate::infrastructure::activity_store::{ActivityStore, ActivityStoreConfig};
use crate::infrastructure::outbox_store::OutboxStore;
use crate::infrastructure::scheduler::TokioFlushScheduler;
use crate::presentation::mcp::{
    AppState, McpDispatcher, ScopePolicy, ServerIdentity, ToolRegistry,
};

/// Top-level plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PluginConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Name reported by the MCP `initialize` handshake.
    pub name: String,
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "orgx-openclaw".to_string(),
            bind_address: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Root directory for all local plugin state. Defaults to
    /// `~/.openclaw/orgx`, created private (0700) on first use.
    pub data_dir: Option<PathBuf>,

    /// Debounce window between an activity mutation and its disk flush.
    #[serde(with = "humantime_serde")]
    pub flush_debounce: Duration,

    pub max_activity_items: usize,
    pub activity_retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            flush_debounce: Duration::from_millis(1250),
            max_activity_items: 50_000,
            activity_retention_days: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Hard wall-clock budget for a background worker.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum silence on the worker's log before it counts as stalled.
    /// Zero disables stall detection.
    #[serde(with = "humantime_serde")]
    pub log_stall: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            log_stall: Duration::from_secs(5 * 60),
        }
    }
}

impl PluginConfig {
    /// Parse a YAML document. An empty document yields the defaults.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("Failed to parse plugin configuration")
    }

    /// Load from a file; a missing file is not an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_yaml_str(&contents)
                .with_context(|| format!("Invalid plugin configuration: {}", path.display())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => {
                Err(error).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }

    /// Resolved state root, falling back to `~/.openclaw/orgx`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage.data_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".openclaw")
            .join("orgx")
    }

    pub fn activity_snapshot_path(&self) -> PathBuf {
        self.data_dir().join("activity.json")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.data_dir().join("outbox")
    }

    pub fn worker_limits(&self) -> WorkerLimits {
        WorkerLimits {
            timeout_ms: nonzero_ms(self.workers.timeout),
            stall_ms: nonzero_ms(self.workers.log_stall),
        }
    }
}

fn nonzero_ms(duration: Duration) -> Option<u64> {
    match duration.as_millis() as u64 {
        0 => None,
        ms => Some(ms),
    }
}

/// The plugin's wired-up runtime: the stores plus the HTTP state, built
/// once at startup and shared behind `Arc`s from then on.
pub struct PluginRuntime {
    pub activity_store: Arc<ActivityStore>,
    pub outbox: Arc<OutboxStore>,
    pub state: Arc<AppState>,
}

impl PluginRuntime {
    /// Wire the stores and dispatcher from a config. Must run inside a
    /// Tokio runtime (the flush scheduler captures the current handle).
    pub fn build(
        config: &PluginConfig,
        registry: ToolRegistry,
        policy: ScopePolicy,
    ) -> Self {
        let activity_store = ActivityStore::new(
            ActivityStoreConfig {
                path: config.activity_snapshot_path(),
                flush_debounce: config.storage.flush_debounce,
                max_items: config.storage.max_activity_items,
                retention_days: config.storage.activity_retention_days,
            },
            Arc::new(TokioFlushScheduler::new()),
        );
        let outbox = Arc::new(OutboxStore::new(config.outbox_dir()));

        let dispatcher = McpDispatcher::new(
            ServerIdentity {
                name: config.server.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            registry,
            policy,
        );

        let state = Arc::new(AppState {
            dispatcher,
            activity_store: activity_store.clone(),
            outbox: outbox.clone(),
        });

        Self {
            activity_store,
            outbox,
            state,
        }
    }
}
