// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! JSONL export of a recorded rollout.
//!
//! One compact JSON object per line with keys `timestamp` (ISO-8601
//! with milliseconds), `type` and `payload` — the interchange format
//! consumed by trace tooling and fine-tuning pipelines.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::store;
use crate::RolloutError;

/// Serialize all items of `rollout_id` as JSONL, in sequence order.
pub fn export_jsonl(db_path: &Path, rollout_id: &str) -> Result<String, RolloutError> {
    let conn = store::open(db_path)?;
    if store::get_rollout(&conn, rollout_id)?.is_none() {
        return Err(RolloutError::NotFound(rollout_id.to_string()));
    }
    let rows = store::read_items(&conn, rollout_id)?;
    let mut out = String::new();
    for (_, timestamp, payload) in rows {
        let parsed: Value = serde_json::from_str(&payload)?;
        let line = json!({
            "timestamp": iso8601_millis(timestamp),
            "type": parsed["type"],
            "payload": parsed["payload"],
        });
        out.push_str(&serde_json::to_string(&line)?);
        out.push('\n');
    }
    Ok(out)
}

fn iso8601_millis(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
