// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use birk_protocol::{RolloutItem, SessionMeta};

use crate::policy::{is_persisted, is_user_input};
use crate::store::{self, ItemRow, LIST_SCAN_CAP};
use crate::RolloutError;

/// How a recorder is attached to storage.
#[derive(Debug, Clone)]
pub enum RolloutRecorderParams {
    /// Start a fresh rollout for a new conversation.
    Create {
        conversation_id: String,
        instructions: Option<String>,
    },
    /// Re-open an existing rollout and continue appending.
    Resume { rollout_id: String },
}

enum WriterCmd {
    Items { rows: Vec<ItemRow>, user_items: u64 },
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Appends a conversation's items to the rollout store.
///
/// One recorder per session; all writes flow through an internal FIFO
/// writer task, so sequence numbers are contiguous and `record_items`
/// never blocks on the database.  `flush` waits for everything enqueued
/// so far to be committed.
pub struct RolloutRecorder {
    rollout_id: String,
    db_path: PathBuf,
    tx: mpsc::UnboundedSender<WriterCmd>,
    next_sequence: AtomicU64,
    show_raw_reasoning: bool,
    closed: AtomicBool,
}

impl RolloutRecorder {
    /// Open the store and initialize the recorder.
    ///
    /// For `Create`, the rollout row and its SessionMeta item (sequence
    /// 0) are committed before this returns, so a crash right after
    /// session creation still leaves a resumable rollout behind.
    pub fn new(
        db_path: &Path,
        params: RolloutRecorderParams,
        ttl_days: Option<u32>,
        show_raw_reasoning: bool,
    ) -> Result<Self, RolloutError> {
        let mut conn = store::open(db_path)?;
        let now_ms = Utc::now().timestamp_millis();

        let (rollout_id, next_sequence) = match params {
            RolloutRecorderParams::Create { conversation_id, instructions } => {
                let expires_at =
                    ttl_days.map(|d| now_ms + i64::from(d) * 24 * 60 * 60 * 1000);
                store::insert_rollout(&conn, &conversation_id, now_ms, expires_at)?;
                let meta =
                    RolloutItem::SessionMeta(SessionMeta::new(&conversation_id, instructions));
                let row = ItemRow {
                    sequence: 0,
                    timestamp: now_ms,
                    item_type: meta.type_tag(),
                    payload: serde_json::to_string(&meta)?,
                };
                store::append_items(&mut conn, &conversation_id, &[row], 0, now_ms)?;
                debug!(rollout_id = %conversation_id, "created rollout");
                (conversation_id, 1)
            }
            RolloutRecorderParams::Resume { rollout_id } => {
                let row = store::get_rollout(&conn, &rollout_id)?
                    .ok_or_else(|| RolloutError::NotFound(rollout_id.clone()))?;
                let next = store::last_sequence(&conn, &row.id)?.map(|s| s + 1).unwrap_or(0);
                debug!(rollout_id = %row.id, next_sequence = next, "resumed rollout");
                (row.id, next)
            }
        };

        // The writer task owns the connection from here on.
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterCmd>();
        let writer_rollout_id = rollout_id.clone();
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    WriterCmd::Items { rows, user_items } => {
                        let now_ms = Utc::now().timestamp_millis();
                        if let Err(e) = store::append_items(
                            &mut conn,
                            &writer_rollout_id,
                            &rows,
                            user_items,
                            now_ms,
                        ) {
                            // The event stream stays truthful; history may
                            // miss items until the next write succeeds.
                            warn!(rollout_id = %writer_rollout_id, error = %e,
                                  "rollout write failed");
                        }
                    }
                    WriterCmd::Flush(ack) => {
                        let _ = ack.send(());
                    }
                    WriterCmd::Shutdown(ack) => {
                        let _ = ack.send(());
                        break;
                    }
                }
            }
        });

        Ok(Self {
            rollout_id,
            db_path: db_path.to_path_buf(),
            tx,
            next_sequence: AtomicU64::new(next_sequence),
            show_raw_reasoning,
            closed: AtomicBool::new(false),
        })
    }

    pub fn rollout_id(&self) -> &str {
        &self.rollout_id
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Enqueue `items` for persistence, in order.
    ///
    /// Items dropped by the persistence policy consume no sequence
    /// number.  Returns as soon as the batch is enqueued; the commit is
    /// asynchronous but strictly ordered behind earlier batches.
    pub fn record_items(&self, items: &[RolloutItem]) -> Result<(), RolloutError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut rows = Vec::new();
        let mut user_items = 0u64;
        for item in items {
            if !is_persisted(item, self.show_raw_reasoning) {
                continue;
            }
            if is_user_input(item) {
                user_items += 1;
            }
            rows.push(ItemRow {
                sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
                timestamp: now_ms,
                item_type: item.type_tag(),
                payload: serde_json::to_string(item)?,
            });
        }
        if rows.is_empty() {
            return Ok(());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(RolloutError::Closed);
        }
        self.tx
            .send(WriterCmd::Items { rows, user_items })
            .map_err(|_| RolloutError::Closed)
    }

    /// Wait until everything enqueued so far is committed.  Idempotent.
    pub async fn flush(&self) -> Result<(), RolloutError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriterCmd::Flush(ack_tx))
            .map_err(|_| RolloutError::Closed)?;
        let _ = ack_rx.await;
        Ok(())
    }

    /// Flush and close.  Subsequent `record_items` calls fail with
    /// [`RolloutError::Closed`].
    pub async fn shutdown(&self) -> Result<(), RolloutError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriterCmd::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        Ok(())
    }
}

// ─── Listing, history and cleanup ─────────────────────────────────────────────

/// Pagination cursor, serialized as `"timestamp|id"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub timestamp: i64,
    pub id: String,
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.timestamp, self.id)
    }
}

impl FromStr for Cursor {
    type Err = RolloutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts, id) = s
            .split_once('|')
            .ok_or_else(|| RolloutError::InvalidCursor(s.to_string()))?;
        let timestamp = ts
            .parse::<i64>()
            .map_err(|_| RolloutError::InvalidCursor(s.to_string()))?;
        if id.is_empty() {
            return Err(RolloutError::InvalidCursor(s.to_string()));
        }
        Ok(Self { timestamp, id: id.to_string() })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created: i64,
    pub updated: i64,
    pub item_count: u64,
}

#[derive(Debug)]
pub struct ConversationsPage {
    pub items: Vec<ConversationSummary>,
    pub next_cursor: Option<Cursor>,
    pub num_scanned: usize,
    /// The 100-record scan cap was hit; more rows may exist beyond
    /// `next_cursor` even when `items` is short.
    pub reached_cap: bool,
}

/// List conversations newest-first, starting strictly below `cursor`.
///
/// Only rollouts that contain a SessionMeta and at least one user input
/// item are returned.  At most [`LIST_SCAN_CAP`] rows are examined per
/// call regardless of how many qualify.
pub fn list_conversations(
    db_path: &Path,
    page_size: usize,
    cursor: Option<&Cursor>,
) -> Result<ConversationsPage, RolloutError> {
    let conn = store::open(db_path)?;
    let rows = store::scan_below_cursor(
        &conn,
        cursor.map(|c| (c.timestamp, c.id.as_str())),
        LIST_SCAN_CAP,
    )?;

    let mut items = Vec::new();
    let mut num_scanned = 0usize;
    let mut last_examined: Option<Cursor> = None;
    for row in &rows {
        num_scanned += 1;
        last_examined = Some(Cursor { timestamp: row.updated, id: row.id.clone() });
        // item_count > 0 implies SessionMeta (always sequence 0).
        if row.item_count > 0 && row.user_item_count > 0 {
            items.push(ConversationSummary {
                id: row.id.clone(),
                created: row.created,
                updated: row.updated,
                item_count: row.item_count,
            });
            if items.len() == page_size {
                break;
            }
        }
    }

    let reached_cap = num_scanned == LIST_SCAN_CAP;
    let more_may_exist = items.len() == page_size || reached_cap;
    Ok(ConversationsPage {
        items,
        next_cursor: if more_may_exist { last_examined } else { None },
        num_scanned,
        reached_cap,
    })
}

#[derive(Debug, Clone)]
pub struct ResumedHistory {
    pub conversation_id: String,
    pub history: Vec<RolloutItem>,
    pub rollout_id: String,
}

/// What a session starts from: a fresh conversation, or a recorded one.
#[derive(Debug, Clone)]
pub enum InitialHistory {
    New,
    Resumed(ResumedHistory),
}

/// Read the full recorded history of a rollout, in sequence order.
pub fn get_rollout_history(
    db_path: &Path,
    rollout_id: &str,
) -> Result<InitialHistory, RolloutError> {
    let conn = store::open(db_path)?;
    if store::get_rollout(&conn, rollout_id)?.is_none() {
        return Ok(InitialHistory::New);
    }
    let rows = store::read_items(&conn, rollout_id)?;
    if rows.is_empty() {
        return Ok(InitialHistory::New);
    }
    let mut history = Vec::with_capacity(rows.len());
    for (_, _, payload) in rows {
        history.push(serde_json::from_str::<RolloutItem>(&payload)?);
    }
    let conversation_id = history
        .iter()
        .find_map(|item| match item {
            RolloutItem::SessionMeta(meta) => Some(meta.id.clone()),
            _ => None,
        })
        .unwrap_or_else(|| rollout_id.to_string());
    Ok(InitialHistory::Resumed(ResumedHistory {
        conversation_id,
        history,
        rollout_id: rollout_id.to_string(),
    }))
}

/// Delete every rollout whose TTL has lapsed.  Permanent rollouts
/// (no `expires_at`) are never deleted.  Returns the number removed.
pub fn cleanup_expired(db_path: &Path) -> Result<usize, RolloutError> {
    let mut conn = store::open(db_path)?;
    store::delete_expired(&mut conn, Utc::now().timestamp_millis())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use birk_protocol::{EventMsg, NotificationKind, ResponseItem};

    fn db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollouts.sqlite3");
        (dir, path)
    }

    fn create_recorder(path: &Path, id: &str) -> RolloutRecorder {
        RolloutRecorder::new(
            path,
            RolloutRecorderParams::Create {
                conversation_id: id.into(),
                instructions: None,
            },
            Some(60),
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_commits_session_meta_at_sequence_zero() {
        let (_dir, path) = db();
        let rec = create_recorder(&path, "conv-1");
        // SessionMeta is committed synchronously, before any flush.
        match get_rollout_history(&path, rec.rollout_id()).unwrap() {
            InitialHistory::Resumed(r) => {
                assert_eq!(r.history.len(), 1);
                assert!(matches!(r.history[0], RolloutItem::SessionMeta(_)));
            }
            InitialHistory::New => panic!("expected resumed history"),
        }
    }

    #[tokio::test]
    async fn record_flush_resume_round_trip() {
        let (_dir, path) = db();
        {
            let rec = create_recorder(&path, "conv-1");
            rec.record_items(&[
                RolloutItem::ResponseItem(ResponseItem::user_text("q1")),
                RolloutItem::ResponseItem(ResponseItem::assistant_text("a1")),
                RolloutItem::ResponseItem(ResponseItem::user_text("q2")),
            ])
            .unwrap();
            rec.flush().await.unwrap();
            rec.shutdown().await.unwrap();
        }

        // Resume and append two more.
        let rec = RolloutRecorder::new(
            &path,
            RolloutRecorderParams::Resume { rollout_id: "conv-1".into() },
            Some(60),
            false,
        )
        .unwrap();
        rec.record_items(&[
            RolloutItem::ResponseItem(ResponseItem::assistant_text("a2")),
            RolloutItem::ResponseItem(ResponseItem::user_text("q3")),
        ])
        .unwrap();
        rec.flush().await.unwrap();

        match get_rollout_history(&path, "conv-1").unwrap() {
            InitialHistory::Resumed(r) => {
                assert_eq!(r.conversation_id, "conv-1");
                assert_eq!(r.history.len(), 6, "1 meta + 5 items");
            }
            InitialHistory::New => panic!("expected resumed"),
        }
    }

    #[tokio::test]
    async fn sequences_are_contiguous_after_policy_filtering() {
        let (_dir, path) = db();
        let rec = create_recorder(&path, "conv-1");
        rec.record_items(&[
            RolloutItem::ResponseItem(ResponseItem::user_text("q")),
            // Dropped by policy: must not consume a sequence number.
            RolloutItem::Event(EventMsg::AgentMessageDelta { delta: "d".into() }),
            RolloutItem::Event(EventMsg::Notification {
                kind: NotificationKind::System,
                payload: serde_json::Value::Null,
            }),
            RolloutItem::ResponseItem(ResponseItem::assistant_text("a")),
        ])
        .unwrap();
        rec.flush().await.unwrap();

        let conn = store::open(&path).unwrap();
        let rows = store::read_items(&conn, "conv-1").unwrap();
        let seqs: Vec<u64> = rows.iter().map(|(s, _, _)| *s).collect();
        assert_eq!(seqs, vec![0, 1, 2], "contiguous despite dropped items");
    }

    #[tokio::test]
    async fn record_after_shutdown_fails_closed() {
        let (_dir, path) = db();
        let rec = create_recorder(&path, "conv-1");
        rec.shutdown().await.unwrap();
        let err = rec
            .record_items(&[RolloutItem::ResponseItem(ResponseItem::user_text("q"))])
            .unwrap_err();
        assert!(matches!(err, RolloutError::Closed));
        // Second shutdown is a no-op.
        rec.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn resume_of_missing_rollout_is_not_found() {
        let (_dir, path) = db();
        // Initialize the schema first.
        create_recorder(&path, "conv-1");
        let err = RolloutRecorder::new(
            &path,
            RolloutRecorderParams::Resume { rollout_id: "ghost".into() },
            None,
            false,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RolloutError::NotFound(_)));
    }

    // ── Cursor ────────────────────────────────────────────────────────────────

    #[test]
    fn cursor_round_trips_through_string_form() {
        let c = Cursor { timestamp: 1712345678901, id: "abc".into() };
        let parsed: Cursor = c.to_string().parse().unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn invalid_cursors_are_rejected() {
        assert!("no-separator".parse::<Cursor>().is_err());
        assert!("notanumber|id".parse::<Cursor>().is_err());
        assert!("123|".parse::<Cursor>().is_err());
    }

    // ── Listing ───────────────────────────────────────────────────────────────

    async fn seed_conversations(path: &Path, n: usize) {
        for i in 0..n {
            let id = format!("conv-{i:03}");
            let rec = create_recorder(path, &id);
            rec.record_items(&[RolloutItem::ResponseItem(ResponseItem::user_text("q"))])
                .unwrap();
            rec.flush().await.unwrap();
            rec.shutdown().await.unwrap();
            // Distinct `updated` timestamps for a deterministic order.
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        }
    }

    #[tokio::test]
    async fn pagination_is_stable_and_disjoint() {
        let (_dir, path) = db();
        seed_conversations(&path, 25).await;

        let page1 = list_conversations(&path, 10, None).unwrap();
        assert_eq!(page1.items.len(), 10);
        let page2 = list_conversations(&path, 10, page1.next_cursor.as_ref()).unwrap();
        assert_eq!(page2.items.len(), 10);
        let page3 = list_conversations(&path, 10, page2.next_cursor.as_ref()).unwrap();
        assert_eq!(page3.items.len(), 5);
        assert!(page3.next_cursor.is_none());

        // No duplicates and newest-first across all pages.
        let mut all: Vec<&ConversationSummary> = Vec::new();
        all.extend(&page1.items);
        all.extend(&page2.items);
        all.extend(&page3.items);
        assert_eq!(all.len(), 25);
        let mut ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 25, "pages must be disjoint");
        for pair in all.windows(2) {
            assert!(
                (pair[0].updated, &pair[0].id) >= (pair[1].updated, &pair[1].id),
                "descending order violated"
            );
        }

        // Re-requesting the same cursor returns the same page.
        let again = list_conversations(&path, 10, page1.next_cursor.as_ref()).unwrap();
        let ids_a: Vec<&str> = page2.items.iter().map(|s| s.id.as_str()).collect();
        let ids_b: Vec<&str> = again.items.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn rollouts_without_user_input_are_hidden() {
        let (_dir, path) = db();
        // One conversation with user input, one without.
        let with_user = create_recorder(&path, "with-user");
        with_user
            .record_items(&[RolloutItem::ResponseItem(ResponseItem::user_text("q"))])
            .unwrap();
        with_user.flush().await.unwrap();

        let _empty = create_recorder(&path, "meta-only");

        let page = list_conversations(&path, 10, None).unwrap();
        let ids: Vec<&str> = page.items.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["with-user"]);
        assert_eq!(page.num_scanned, 2, "hidden rows still count as scanned");
    }

    #[tokio::test]
    async fn history_of_unknown_rollout_is_new() {
        let (_dir, path) = db();
        create_recorder(&path, "conv-1");
        assert!(matches!(
            get_rollout_history(&path, "missing").unwrap(),
            InitialHistory::New
        ));
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cleanup_only_removes_lapsed_ttls() {
        let (_dir, path) = db();
        // TTL of 0 days expires immediately; permanent never does.
        let expired = RolloutRecorder::new(
            &path,
            RolloutRecorderParams::Create {
                conversation_id: "expired".into(),
                instructions: None,
            },
            Some(0),
            false,
        )
        .unwrap();
        expired.flush().await.unwrap();
        let forever = RolloutRecorder::new(
            &path,
            RolloutRecorderParams::Create {
                conversation_id: "forever".into(),
                instructions: None,
            },
            None,
            false,
        )
        .unwrap();
        forever.flush().await.unwrap();

        // expires_at == created for the 0-day TTL; wait past it.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(cleanup_expired(&path).unwrap(), 1);
        assert_eq!(cleanup_expired(&path).unwrap(), 0, "idempotent");
        assert!(matches!(
            get_rollout_history(&path, "forever").unwrap(),
            InitialHistory::Resumed(_)
        ));
    }
}
