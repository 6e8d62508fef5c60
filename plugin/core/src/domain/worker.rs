// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker Lifecycle Guard
//!
//! Pure decision functions for spawned agent worker processes. The guard
//! never performs I/O and never kills anything itself: an external process
//! supervisor calls [`should_kill_worker`] on every health-check tick and is
//! responsible for acting on a kill decision.
//!
//! Also hosts the MCP handshake failure scanner: a failed MCP handshake
//! inside a spawned worker is a common failure mode that otherwise looks
//! like a generic timeout, so it gets first-class detection. The scan is
//! heuristic string matching over free-text logs — an ordered list of
//! pattern → extractor rules, best-effort by design, not a parser.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Wall-clock inputs for a kill decision, all epoch milliseconds.
///
/// Missing instants fall back to `now`, which clamps the derived duration
/// to zero rather than producing a nonsense negative value.
#[derive(Debug, Clone, Copy)]
pub struct WorkerClock {
    pub now_epoch_ms: i64,
    pub started_at_epoch_ms: Option<i64>,
    pub log_updated_at_epoch_ms: Option<i64>,
}

/// Kill thresholds. `None` or `0` disables the corresponding check.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkerLimits {
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub stall_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillKind {
    Timeout,
    LogStall,
}

/// Advisory output of a health-check tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum WorkerKillDecision {
    Keep {
        elapsed_ms: u64,
        idle_ms: u64,
    },
    Kill {
        kind: KillKind,
        reason: String,
        elapsed_ms: u64,
        idle_ms: u64,
    },
}

impl WorkerKillDecision {
    pub fn should_kill(&self) -> bool {
        matches!(self, WorkerKillDecision::Kill { .. })
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            WorkerKillDecision::Keep { elapsed_ms, .. }
            | WorkerKillDecision::Kill { elapsed_ms, .. } => *elapsed_ms,
        }
    }

    pub fn idle_ms(&self) -> u64 {
        match self {
            WorkerKillDecision::Keep { idle_ms, .. }
            | WorkerKillDecision::Kill { idle_ms, .. } => *idle_ms,
        }
    }
}

/// Decide whether a spawned worker should be killed on this tick.
///
/// Timeout is evaluated before stall: when both thresholds are about to trip
/// at once, the total-runtime ceiling wins over an aggressive idle threshold.
pub fn should_kill_worker(clock: WorkerClock, limits: WorkerLimits) -> WorkerKillDecision {
    let elapsed_ms = elapsed_since(clock.now_epoch_ms, clock.started_at_epoch_ms);
    let idle_ms = elapsed_since(clock.now_epoch_ms, clock.log_updated_at_epoch_ms);

    if let Some(timeout_ms) = active_limit(limits.timeout_ms) {
        if elapsed_ms > timeout_ms {
            return WorkerKillDecision::Kill {
                kind: KillKind::Timeout,
                reason: format!("worker exceeded runtime limit ({elapsed_ms}ms > {timeout_ms}ms)"),
                elapsed_ms,
                idle_ms,
            };
        }
    }

    if let Some(stall_ms) = active_limit(limits.stall_ms) {
        if idle_ms > stall_ms {
            return WorkerKillDecision::Kill {
                kind: KillKind::LogStall,
                reason: format!("worker log idle for {idle_ms}ms (stall limit {stall_ms}ms)"),
                elapsed_ms,
                idle_ms,
            };
        }
    }

    WorkerKillDecision::Keep { elapsed_ms, idle_ms }
}

fn active_limit(limit: Option<u64>) -> Option<u64> {
    limit.filter(|ms| *ms > 0)
}

fn elapsed_since(now_epoch_ms: i64, instant_epoch_ms: Option<i64>) -> u64 {
    let instant = instant_epoch_ms.unwrap_or(now_epoch_ms);
    now_epoch_ms.saturating_sub(instant).max(0) as u64
}

/// A detected MCP handshake failure inside a worker's log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeFailure {
    /// Best-effort extracted MCP server name; `None` when no extractor rule
    /// matched the offending line.
    pub server: Option<String>,

    /// The matched log line, always returned for operator diagnosis.
    pub line: String,
}

/// Signal phrases indicating an MCP server failed to initialize inside a
/// spawned worker. Matched case-insensitively against each log line.
const HANDSHAKE_FAILURE_PHRASES: &[&str] = &[
    "mcp startup failed",
    "handshaking with mcp server failed",
    "failed to start mcp server",
    "mcp server initialization failed",
];

/// Server-name extractor rules, tried in priority order against the matched
/// line. Captures that are themselves failure words are discarded.
static SERVER_NAME_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Quoted name near "mcp server": mcp server "linear" / 'linear' / `linear`
        r#"(?i)mcp server\s+["'`]([^"'`]+)["'`]"#,
        // Bare token after "mcp server": mcp server linear-mcp failed
        r#"(?i)mcp server\s+([A-Za-z0-9][A-Za-z0-9._-]*)"#,
        // Structured field: server=linear-mcp
        r#"(?i)\bserver=([A-Za-z0-9][A-Za-z0-9._-]*)"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static handshake pattern must compile"))
    .collect()
});

const EXTRACTOR_STOPWORDS: &[&str] = &["failed", "startup", "initialization", "init", "error"];

/// Scan worker log text for an MCP handshake failure signature.
///
/// Returns the first matching line (scan order = log order) with a
/// best-effort server name.
pub fn detect_mcp_handshake_failure(log_text: &str) -> Option<HandshakeFailure> {
    for line in log_text.lines() {
        let lowered = line.to_lowercase();
        if !HANDSHAKE_FAILURE_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
        {
            continue;
        }

        let server = SERVER_NAME_RULES.iter().find_map(|rule| {
            let capture = rule.captures(line)?.get(1)?.as_str().trim().to_string();
            if capture.is_empty() || EXTRACTOR_STOPWORDS.contains(&capture.to_lowercase().as_str())
            {
                None
            } else {
                Some(capture)
            }
        });

        return Some(HandshakeFailure {
            server,
            line: line.trim().to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(now: i64, started: i64, logged: i64) -> WorkerClock {
        WorkerClock {
            now_epoch_ms: now,
            started_at_epoch_ms: Some(started),
            log_updated_at_epoch_ms: Some(logged),
        }
    }

    #[test]
    fn test_keep_when_under_limits() {
        let decision = should_kill_worker(
            clock(10_000, 5_000, 9_000),
            WorkerLimits {
                timeout_ms: Some(60_000),
                stall_ms: Some(30_000),
            },
        );
        assert_eq!(
            decision,
            WorkerKillDecision::Keep {
                elapsed_ms: 5_000,
                idle_ms: 1_000
            }
        );
    }

    #[test]
    fn test_timeout_kill() {
        let decision = should_kill_worker(
            clock(100_000, 0, 99_000),
            WorkerLimits {
                timeout_ms: Some(60_000),
                stall_ms: None,
            },
        );
        assert!(decision.should_kill());
        assert!(matches!(
            decision,
            WorkerKillDecision::Kill {
                kind: KillKind::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn test_stall_kill() {
        let decision = should_kill_worker(
            clock(100_000, 90_000, 10_000),
            WorkerLimits {
                timeout_ms: Some(600_000),
                stall_ms: Some(30_000),
            },
        );
        assert!(matches!(
            decision,
            WorkerKillDecision::Kill {
                kind: KillKind::LogStall,
                ..
            }
        ));
    }

    #[test]
    fn test_timeout_takes_precedence_over_stall() {
        // Both limits exceeded: timeout is the harder ceiling.
        let decision = should_kill_worker(
            clock(200_000, 0, 0),
            WorkerLimits {
                timeout_ms: Some(60_000),
                stall_ms: Some(30_000),
            },
        );
        assert!(matches!(
            decision,
            WorkerKillDecision::Kill {
                kind: KillKind::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_limit_disables_check() {
        let decision = should_kill_worker(
            clock(200_000, 0, 0),
            WorkerLimits {
                timeout_ms: Some(0),
                stall_ms: Some(0),
            },
        );
        assert!(!decision.should_kill());
    }

    #[test]
    fn test_missing_instants_fall_back_to_now() {
        let decision = should_kill_worker(
            WorkerClock {
                now_epoch_ms: 50_000,
                started_at_epoch_ms: None,
                log_updated_at_epoch_ms: None,
            },
            WorkerLimits {
                timeout_ms: Some(1),
                stall_ms: Some(1),
            },
        );
        assert_eq!(decision.elapsed_ms(), 0);
        assert_eq!(decision.idle_ms(), 0);
        assert!(!decision.should_kill());
    }

    #[test]
    fn test_clock_skew_clamps_to_zero() {
        // Log timestamp in the future (clock skew): idle clamps to 0.
        let decision = should_kill_worker(
            clock(10_000, 20_000, 30_000),
            WorkerLimits {
                timeout_ms: Some(1),
                stall_ms: Some(1),
            },
        );
        assert_eq!(decision.elapsed_ms(), 0);
        assert_eq!(decision.idle_ms(), 0);
    }

    #[test]
    fn test_handshake_detection_with_quoted_server() {
        let log = "starting tools\nERROR handshaking with MCP server \"linear\" failed: timeout\ndone";
        let failure = detect_mcp_handshake_failure(log).unwrap();
        assert_eq!(failure.server.as_deref(), Some("linear"));
        assert!(failure.line.contains("handshaking"));
    }

    #[test]
    fn test_handshake_detection_bare_name() {
        let log = "warn: MCP startup failed for mcp server linear-remote (exit 1)";
        let failure = detect_mcp_handshake_failure(log).unwrap();
        assert_eq!(failure.server.as_deref(), Some("linear-remote"));
    }

    #[test]
    fn test_handshake_detection_no_server_name() {
        // "failed" is a stopword, so the bare-token rule must not match it.
        let log = "fatal: handshaking with mcp server failed";
        let failure = detect_mcp_handshake_failure(log).unwrap();
        assert_eq!(failure.server, None);
        assert_eq!(failure.line, "fatal: handshaking with mcp server failed");
    }

    #[test]
    fn test_handshake_detection_clean_log() {
        assert_eq!(
            detect_mcp_handshake_failure("all servers initialized\nrun complete"),
            None
        );
    }
}
