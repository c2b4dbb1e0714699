// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use birk_protocol::{InputItem, ReviewDecision};

use crate::tasks::SessionTask;

/// The kind of work a running task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Regular,
    Compact,
    Review,
}

/// Per-turn mutable state: approvals the turn is waiting on and input
/// injected mid-task (drained at the start of the next turn, never into
/// a turn already in flight).
#[derive(Default)]
pub struct TurnState {
    pending_approvals: HashMap<String, oneshot::Sender<ReviewDecision>>,
    pending_input: Vec<InputItem>,
}

impl TurnState {
    /// Register an approval resolver.  A duplicate insert for the same
    /// execution id replaces the prior resolver and resolves it with
    /// `Abort` so no waiter hangs forever.
    pub fn insert_pending_approval(
        &mut self,
        execution_id: impl Into<String>,
        tx: oneshot::Sender<ReviewDecision>,
    ) {
        if let Some(prior) = self.pending_approvals.insert(execution_id.into(), tx) {
            let _ = prior.send(ReviewDecision::Abort);
        }
    }

    pub fn remove_pending_approval(
        &mut self,
        execution_id: &str,
    ) -> Option<oneshot::Sender<ReviewDecision>> {
        self.pending_approvals.remove(execution_id)
    }

    pub fn pending_approval_count(&self) -> usize {
        self.pending_approvals.len()
    }

    pub fn push_pending_input(&mut self, items: Vec<InputItem>) {
        self.pending_input.extend(items);
    }

    pub fn take_pending_input(&mut self) -> Vec<InputItem> {
        std::mem::take(&mut self.pending_input)
    }

    /// Abort path: every pending approval resolves with `Abort` and the
    /// injected input is dropped.
    pub fn clear_pending(&mut self) {
        for (_, tx) in self.pending_approvals.drain() {
            let _ = tx.send(ReviewDecision::Abort);
        }
        self.pending_input.clear();
    }
}

/// One task registered with the session.
///
/// Holds no reference back to the session: the task body receives its
/// `Arc<Session>` as a run argument, which keeps the
/// task → session → active-turn chain acyclic.
pub struct RunningTask {
    pub kind: TaskKind,
    pub cancellation_token: CancellationToken,
    pub task: Arc<dyn SessionTask>,
    /// Notified when the task body finishes (normally or via abort).
    pub done: Arc<Notify>,
    /// Set right after the body is spawned; used as the hard-stop
    /// fallback when cooperative cancellation does not finish in time.
    pub handle: Option<JoinHandle<()>>,
}

/// Tracks the tasks currently running in a session, keyed by submission
/// id.  The map form supports multiple concurrent tasks even though the
/// runtime currently spawns at most one Regular task at a time.
#[derive(Default)]
pub struct ActiveTurn {
    tasks: HashMap<String, RunningTask>,
    pub turn_state: Arc<tokio::sync::Mutex<TurnState>>,
}

impl ActiveTurn {
    pub fn add_task(&mut self, sub_id: impl Into<String>, task: RunningTask) {
        self.tasks.insert(sub_id.into(), task);
    }

    /// Remove one task; returns `true` when it was present.
    pub fn remove_task(&mut self, sub_id: &str) -> bool {
        self.tasks.remove(sub_id).is_some()
    }

    pub fn drain_tasks(&mut self) -> Vec<(String, RunningTask)> {
        self.tasks.drain().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn has_task_of_kind(&self, kind: TaskKind) -> bool {
        self.tasks.values().any(|t| t.kind == kind)
    }

    pub fn set_handle(&mut self, sub_id: &str, handle: JoinHandle<()>) {
        if let Some(task) = self.tasks.get_mut(sub_id) {
            task.handle = Some(handle);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
