// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Pure value objects and decision logic: activity timeline items and their
//! canonical ordering, pagination cursors, outbox events with session-id
//! validation, and the worker lifecycle guard. No I/O lives here.

pub mod activity;
pub mod cursor;
pub mod outbox;
pub mod worker;
