// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! Use-case services composing the infrastructure stores with external
//! collaborators (the hosted OrgX API behind `OrgXSink`).

pub mod replay;
