// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Synchronous SQLite layer under the rollout recorder.
//!
//! Two tables: `rollouts` (one row per conversation, indexed by
//! `updated` for listing and `expires_at` for cleanup) and
//! `rollout_items` (the ordered items, unique on `[rollout_id,
//! sequence]`).  All timestamps are unix milliseconds.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::RolloutError;

pub const SCHEMA_VERSION: i32 = 1;

/// How many `rollouts` rows one list call may examine.
pub const LIST_SCAN_CAP: usize = 100;

pub fn open(db_path: &Path) -> Result<Connection, RolloutError> {
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<(), RolloutError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS rollouts (
            id TEXT PRIMARY KEY,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            item_count INTEGER NOT NULL DEFAULT 0,
            user_item_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            expires_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS rollout_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rollout_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            item_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            UNIQUE(rollout_id, sequence),
            FOREIGN KEY (rollout_id) REFERENCES rollouts(id)
        );

        CREATE INDEX IF NOT EXISTS idx_rollouts_updated ON rollouts(updated DESC);
        CREATE INDEX IF NOT EXISTS idx_rollouts_expires ON rollouts(expires_at);
        CREATE INDEX IF NOT EXISTS idx_rollouts_status ON rollouts(status);
        "#,
    )?;
    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RolloutRow {
    pub id: String,
    pub created: i64,
    pub updated: i64,
    pub item_count: u64,
    pub user_item_count: u64,
    pub status: String,
    pub expires_at: Option<i64>,
}

pub fn insert_rollout(
    conn: &Connection,
    id: &str,
    now_ms: i64,
    expires_at: Option<i64>,
) -> Result<(), RolloutError> {
    conn.execute(
        "INSERT INTO rollouts (id, created, updated, status, expires_at)
         VALUES (?1, ?2, ?2, 'active', ?3)",
        params![id, now_ms, expires_at],
    )?;
    Ok(())
}

pub fn get_rollout(conn: &Connection, id: &str) -> Result<Option<RolloutRow>, RolloutError> {
    let row = conn
        .query_row(
            "SELECT id, created, updated, item_count, user_item_count, status, expires_at
             FROM rollouts WHERE id = ?1",
            [id],
            |row| {
                Ok(RolloutRow {
                    id: row.get(0)?,
                    created: row.get(1)?,
                    updated: row.get(2)?,
                    item_count: row.get::<_, i64>(3)? as u64,
                    user_item_count: row.get::<_, i64>(4)? as u64,
                    status: row.get(5)?,
                    expires_at: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn last_sequence(conn: &Connection, rollout_id: &str) -> Result<Option<u64>, RolloutError> {
    let seq: Option<i64> = conn.query_row(
        "SELECT MAX(sequence) FROM rollout_items WHERE rollout_id = ?1",
        [rollout_id],
        |row| row.get(0),
    )?;
    Ok(seq.map(|s| s as u64))
}

/// One pre-serialized item ready for insertion.
pub struct ItemRow {
    pub sequence: u64,
    pub timestamp: i64,
    pub item_type: &'static str,
    pub payload: String,
}

/// Append a batch of items and bump the rollout counters in the same
/// transaction, so `item_count`/`updated` can never drift from the item
/// table.
pub fn append_items(
    conn: &mut Connection,
    rollout_id: &str,
    items: &[ItemRow],
    user_items: u64,
    now_ms: i64,
) -> Result<(), RolloutError> {
    let tx = conn.transaction()?;
    for item in items {
        tx.execute(
            "INSERT INTO rollout_items (rollout_id, sequence, timestamp, item_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rollout_id,
                item.sequence as i64,
                item.timestamp,
                item.item_type,
                item.payload
            ],
        )?;
    }
    tx.execute(
        "UPDATE rollouts
         SET item_count = item_count + ?2,
             user_item_count = user_item_count + ?3,
             updated = ?4
         WHERE id = ?1",
        params![rollout_id, items.len() as i64, user_items as i64, now_ms],
    )?;
    tx.commit()?;
    Ok(())
}

/// Read all items of a rollout in sequence order.
pub fn read_items(
    conn: &Connection,
    rollout_id: &str,
) -> Result<Vec<(u64, i64, String)>, RolloutError> {
    let mut stmt = conn.prepare(
        "SELECT sequence, timestamp, payload FROM rollout_items
         WHERE rollout_id = ?1 ORDER BY sequence ASC",
    )?;
    let rows = stmt
        .query_map([rollout_id], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Scan the `updated` index descending, starting strictly below
/// `cursor`, returning at most `limit` raw rows.
pub fn scan_below_cursor(
    conn: &Connection,
    cursor: Option<(i64, &str)>,
    limit: usize,
) -> Result<Vec<RolloutRow>, RolloutError> {
    let sql_base = "SELECT id, created, updated, item_count, user_item_count, status, expires_at
         FROM rollouts";
    let map = |row: &rusqlite::Row<'_>| {
        Ok(RolloutRow {
            id: row.get(0)?,
            created: row.get(1)?,
            updated: row.get(2)?,
            item_count: row.get::<_, i64>(3)? as u64,
            user_item_count: row.get::<_, i64>(4)? as u64,
            status: row.get(5)?,
            expires_at: row.get(6)?,
        })
    };
    let rows = match cursor {
        Some((ts, id)) => {
            let mut stmt = conn.prepare(&format!(
                "{sql_base} WHERE updated < ?1 OR (updated = ?1 AND id < ?2)
                 ORDER BY updated DESC, id DESC LIMIT ?3"
            ))?;
            let result = stmt
                .query_map(params![ts, id, limit as i64], map)?
                .collect::<Result<Vec<_>, _>>()?;
            result
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "{sql_base} ORDER BY updated DESC, id DESC LIMIT ?1"
            ))?;
            let result = stmt
                .query_map(params![limit as i64], map)?
                .collect::<Result<Vec<_>, _>>()?;
            result
        }
    };
    Ok(rows)
}

/// Delete every rollout whose `expires_at` is strictly before `now_ms`,
/// cascading to its items.  Rollouts with NULL `expires_at` are
/// permanent and never touched.  Returns the number of rollouts removed.
pub fn delete_expired(conn: &mut Connection, now_ms: i64) -> Result<usize, RolloutError> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM rollout_items WHERE rollout_id IN
         (SELECT id FROM rollouts WHERE expires_at IS NOT NULL AND expires_at < ?1)",
        [now_ms],
    )?;
    let count = tx.execute(
        "DELETE FROM rollouts WHERE expires_at IS NOT NULL AND expires_at < ?1",
        [now_ms],
    )?;
    tx.commit()?;
    Ok(count)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
