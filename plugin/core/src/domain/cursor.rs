// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Opaque Activity Page Cursor
//!
//! A cursor encodes the `(epoch, id)` pair of the last emitted item as
//! base64url(JSON). Decoding is tolerant: malformed or partially-populated
//! tokens mean "no cursor", never an error — the token crosses a trust
//! boundary (dashboard query string) and must not be able to fault a read.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCursor {
    #[serde(rename = "beforeEpoch")]
    pub before_epoch_ms: i64,

    #[serde(rename = "beforeId")]
    pub before_id: String,
}

impl ActivityCursor {
    pub fn new(before_epoch_ms: i64, before_id: impl Into<String>) -> Self {
        Self {
            before_epoch_ms,
            before_id: before_id.into(),
        }
    }

    /// Encode to an opaque token.
    pub fn encode(&self) -> String {
        // Serializing two scalar fields cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a caller-supplied token. Returns `None` for anything that is
    /// not a well-formed, fully-populated cursor.
    pub fn decode(token: &str) -> Option<Self> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        let raw = URL_SAFE_NO_PAD.decode(trimmed).ok()?;
        let cursor: ActivityCursor = serde_json::from_slice(&raw).ok()?;
        if cursor.before_id.is_empty() {
            return None;
        }
        Some(cursor)
    }
}
