// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Filesystem-backed persistence for the plugin's local state: crash-safe
//! write primitives, the activity snapshot store with its debounce
//! scheduler, and the per-session offline outbox.

pub mod activity_store;
pub mod atomic_io;
pub mod outbox_store;
pub mod scheduler;
