// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OrgX OpenClaw Plugin Core
//!
//! Local-first companion to the hosted OrgX API, embedded in the OpenClaw
//! agent host. Keeps a bounded on-disk activity feed, buffers events in a
//! per-session outbox while offline, and exposes the MCP JSON-RPC surface
//! workers talk to.
//!
//! # Architecture
//!
//! - **domain** — pure types and decision logic (activities, cursors,
//!   outbox events, worker lifecycle)
//! - **application** — use-case services (outbox replay)
//! - **infrastructure** — crash-safe filesystem persistence
//! - **presentation** — the HTTP/MCP surface

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
