// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Presentation Layer
//!
//! The plugin's HTTP surface: the MCP JSON-RPC endpoints (scoped and
//! unscoped) and the health probe.

pub mod mcp;
