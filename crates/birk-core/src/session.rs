// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use birk_config::Config;
use birk_model::{ModelClient, Prompt, ResponseEvent, ToolSpec};
use birk_protocol::{
    CompactedItem, Event, EventMsg, InputItem, NotificationKind, ResponseItem, ReviewDecision,
    RolloutItem, TurnAbortReason,
};
use birk_rollout::RolloutRecorder;
use birk_tools::ToolRegistry;

use crate::compact::{build_bridge_item, COMPACT_PROMPT};
use crate::context::TurnContext;
use crate::state::{ActiveTurn, RunningTask, TaskKind};
use crate::tasks::{input_items_to_response_items, SessionTask, TaskError, TaskOutcome};

/// Called with every delivered event; the side panel's hook into the
/// runtime without the runtime knowing anything about rendering.
pub type Notifier = Arc<dyn Fn(&Event) + Send + Sync>;

/// Long-lived collaborators of a session.  `model_client` and `tools`
/// are immutable after initialization and shared; the rollout recorder
/// serializes its own writes internally.
pub struct SessionServices {
    pub model_client: Arc<dyn ModelClient>,
    pub tools: Arc<ToolRegistry>,
    pub rollout: Option<RolloutRecorder>,
    pub notifier: Option<Notifier>,
}

struct SessionState {
    history: Vec<ResponseItem>,
    turn_context: TurnContext,
}

/// Owns one conversation: its history, its persistent turn context, the
/// currently running tasks, and the persist-then-deliver event path.
pub struct Session {
    session_id: String,
    config: Arc<Config>,
    services: SessionServices,
    event_tx: mpsc::UnboundedSender<Event>,
    state: Mutex<SessionState>,
    active_turn: Mutex<Option<ActiveTurn>>,
}

impl Session {
    pub fn new(
        session_id: String,
        config: Arc<Config>,
        services: SessionServices,
        event_tx: mpsc::UnboundedSender<Event>,
        initial_history: Vec<ResponseItem>,
    ) -> Arc<Self> {
        let turn_context = TurnContext::from_config(&config);
        let session = Arc::new(Self {
            session_id: session_id.clone(),
            config,
            services,
            event_tx,
            state: Mutex::new(SessionState { history: initial_history, turn_context }),
            active_turn: Mutex::new(None),
        });
        // Announce identity so consumers reset their display state.
        let configured = Event {
            id: session_id.clone(),
            msg: EventMsg::SessionConfigured {
                session_id,
                model: session.config.model.selected.clone(),
                rollout_id: session
                    .services
                    .rollout
                    .as_ref()
                    .map(|r| r.rollout_id().to_string()),
            },
        };
        session.send_event(configured);
        session
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn model_client(&self) -> Arc<dyn ModelClient> {
        Arc::clone(&self.services.model_client)
    }

    pub fn tools(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.services.tools)
    }

    pub fn show_raw_reasoning(&self) -> bool {
        self.config.show_raw_agent_reasoning
    }

    pub fn tool_timeout_ms(&self) -> u64 {
        self.config.tools.timeout_ms
    }

    pub fn request_max_retries(&self) -> u32 {
        self.config.request_max_retries
    }

    pub fn auto_compact_token_limit(&self) -> Option<u64> {
        self.config.model.auto_compact_token_limit
    }

    pub async fn persistent_context(&self) -> TurnContext {
        self.state.lock().await.turn_context.clone()
    }

    pub async fn history_snapshot(&self) -> Vec<ResponseItem> {
        self.state.lock().await.history.clone()
    }

    pub async fn last_assistant_message(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.history.iter().rev().find_map(|item| match item {
            ResponseItem::Message { role, .. } if role == "assistant" => {
                Some(birk_protocol::response_item_text(item))
            }
            _ => None,
        })
    }

    pub async fn active_task_count(&self) -> usize {
        self.active_turn
            .lock()
            .await
            .as_ref()
            .map(|t| t.task_count())
            .unwrap_or(0)
    }

    pub async fn pending_approval_count(&self) -> usize {
        match self.active_turn.lock().await.as_ref() {
            Some(at) => at.turn_state.lock().await.pending_approval_count(),
            None => 0,
        }
    }

    // ── Turn context ──────────────────────────────────────────────────────────

    /// Apply an `OverrideTurnContext` to the persistent snapshot.  When
    /// cwd/sandbox/model changed, the new snapshot is recorded into the
    /// conversation.  Running tasks keep the snapshot they started with.
    pub async fn override_turn_context(&self, op: &birk_protocol::Op) {
        let recordable = {
            let mut state = self.state.lock().await;
            state.turn_context.apply_override(op)
        };
        if recordable {
            let item = {
                let state = self.state.lock().await;
                state.turn_context.to_rollout_item()
            };
            self.record_rollout_items(&[RolloutItem::TurnContext(item)]).await;
        }
    }

    // ── Prompt assembly ───────────────────────────────────────────────────────

    /// Build the model prompt for the next turn under `ctx`.
    pub async fn build_prompt(&self, ctx: &TurnContext) -> Prompt {
        let tools = self
            .services
            .tools
            .list_tools_filtered(&self.config.tools.enabled, &self.config.tools.disabled)
            .into_iter()
            .map(|d| ToolSpec::Function {
                name: d.name,
                description: d.description,
                strict: false,
                parameters: d.parameters,
            })
            .collect();
        Prompt {
            input: self.history_snapshot().await,
            tools,
            base_instructions_override: ctx.base_instructions.clone(),
            user_instructions: None,
            output_schema: None,
        }
    }

    // ── Recording & emission ──────────────────────────────────────────────────

    /// Append items to conversation history and persist them.
    pub async fn record_conversation_items(&self, items: &[ResponseItem]) {
        if items.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock().await;
            state.history.extend(items.iter().cloned());
        }
        let rollout_items: Vec<RolloutItem> = items
            .iter()
            .map(|i| RolloutItem::ResponseItem(i.clone()))
            .collect();
        self.record_rollout_items(&rollout_items).await;
    }

    /// Persist rollout items; storage failures degrade to a warning
    /// notification while the in-memory session stays authoritative.
    pub async fn record_rollout_items(&self, items: &[RolloutItem]) {
        let Some(rollout) = &self.services.rollout else {
            return;
        };
        if let Err(e) = rollout.record_items(items) {
            warn!(error = %e, "failed to persist rollout items");
            self.send_event(Event {
                id: self.session_id.clone(),
                msg: EventMsg::Notification {
                    kind: NotificationKind::Warning,
                    payload: serde_json::json!({ "storage_error": e.to_string() }),
                },
            });
        }
    }

    /// Persist-then-deliver: the rollout sees the derived item before
    /// any consumer sees the event, so observers can treat the event
    /// stream as canonical and the rollout as its durable prefix.
    pub async fn record_and_emit(&self, sub_id: &str, msg: EventMsg) {
        self.record_rollout_items(&[RolloutItem::Event(msg.clone())]).await;
        self.send_event(Event { id: sub_id.to_string(), msg });
    }

    fn send_event(&self, event: Event) {
        if let Some(notifier) = &self.services.notifier {
            notifier(&event);
        }
        if self.event_tx.send(event).is_err() {
            debug!("event receiver dropped; event discarded");
        }
    }

    pub async fn flush_rollout(&self) {
        if let Some(rollout) = &self.services.rollout {
            if let Err(e) = rollout.flush().await {
                warn!(error = %e, "rollout flush failed");
            }
        }
    }

    pub async fn shutdown_rollout(&self) {
        if let Some(rollout) = &self.services.rollout {
            if let Err(e) = rollout.shutdown().await {
                warn!(error = %e, "rollout shutdown failed");
            }
        }
    }

    // ── Task lifecycle ────────────────────────────────────────────────────────

    /// Spawn a task for `sub_id`.  Any running task is aborted first
    /// (`Replaced`); the new task is registered before its body starts
    /// so an immediate `Interrupt` can reach it.
    pub async fn spawn_task<T: SessionTask>(
        self: &Arc<Self>,
        ctx: TurnContext,
        sub_id: String,
        input: Vec<InputItem>,
        task: T,
    ) {
        self.abort_all_tasks(TurnAbortReason::Replaced).await;

        let ctx = Arc::new(ctx);
        let task: Arc<dyn SessionTask> = Arc::new(task);
        let kind = task.kind();
        let cancel = CancellationToken::new();
        let done = Arc::new(Notify::new());

        if !ctx.is_review {
            self.record_rollout_items(&[RolloutItem::TurnContext(ctx.to_rollout_item())])
                .await;
        }
        self.record_and_emit(
            &sub_id,
            EventMsg::TaskStarted { model: ctx.model.clone(), cwd: ctx.cwd.clone() },
        )
        .await;

        {
            let mut active = self.active_turn.lock().await;
            let turn = active.get_or_insert_with(ActiveTurn::default);
            turn.add_task(
                &sub_id,
                RunningTask {
                    kind,
                    cancellation_token: cancel.clone(),
                    task: Arc::clone(&task),
                    done: Arc::clone(&done),
                    handle: None,
                },
            );
        }

        let handle = tokio::spawn({
            let session = Arc::clone(self);
            let ctx = Arc::clone(&ctx);
            let task = Arc::clone(&task);
            let sub_id = sub_id.clone();
            let cancel = cancel.clone();
            let done = Arc::clone(&done);
            async move {
                let child = cancel.child_token();
                let result = task
                    .run(Arc::clone(&session), ctx, sub_id.clone(), input, child)
                    .await;
                session.flush_rollout().await;
                if !cancel.is_cancelled() {
                    match result {
                        Ok(outcome) => session.on_task_finished(&sub_id, outcome).await,
                        // The abort path owns the TurnAborted emission.
                        Err(TaskError::Cancelled) => {}
                        Err(TaskError::Fatal(message)) => {
                            session.on_task_failed(&sub_id, message).await
                        }
                    }
                }
                done.notify_waiters();
            }
        });
        if let Some(turn) = self.active_turn.lock().await.as_mut() {
            turn.set_handle(&sub_id, handle);
        }
    }

    async fn on_task_finished(&self, sub_id: &str, outcome: TaskOutcome) {
        let leftover = self.remove_task_and_drain(sub_id).await;
        if !leftover.is_empty() {
            // Input injected after the final turn still belongs to the
            // conversation; record it so the next task sees it.
            self.record_conversation_items(&input_items_to_response_items(leftover))
                .await;
        }
        self.record_and_emit(
            sub_id,
            EventMsg::TaskComplete {
                turn_count: outcome.turn_count,
                token_usage: outcome.token_usage,
                last_agent_message: outcome.last_agent_message,
            },
        )
        .await;
    }

    async fn on_task_failed(&self, sub_id: &str, message: String) {
        let _ = self.remove_task_and_drain(sub_id).await;
        self.record_and_emit(sub_id, EventMsg::TaskFailed { message }).await;
    }

    async fn remove_task_and_drain(&self, sub_id: &str) -> Vec<InputItem> {
        let mut active = self.active_turn.lock().await;
        let Some(at) = active.as_mut() else {
            return Vec::new();
        };
        at.remove_task(sub_id);
        let mut leftover = Vec::new();
        if at.is_empty() {
            leftover = at.turn_state.lock().await.take_pending_input();
            *active = None;
        }
        leftover
    }

    /// Abort every running task: resolve pending approvals with `Abort`,
    /// drop injected input, cancel cooperatively, and emit `TurnAborted`
    /// per task.  Idempotent per task.
    pub async fn abort_all_tasks(self: &Arc<Self>, reason: TurnAbortReason) {
        let drained = {
            let mut active = self.active_turn.lock().await;
            match active.take() {
                Some(mut at) => {
                    at.turn_state.lock().await.clear_pending();
                    at.drain_tasks()
                }
                None => Vec::new(),
            }
        };
        for (sub_id, task) in drained {
            self.handle_task_abort(sub_id, task, reason.clone()).await;
        }
    }

    async fn handle_task_abort(
        self: &Arc<Self>,
        sub_id: String,
        task: RunningTask,
        reason: TurnAbortReason,
    ) {
        if task.cancellation_token.is_cancelled() {
            return;
        }
        debug!(sub_id, "aborting running task");
        task.cancellation_token.cancel();
        task.task.abort(Arc::clone(self), &sub_id).await;

        // Give the body a moment to unwind through its cancellation
        // guards before the hard stop.
        tokio::select! {
            _ = task.done.notified() => {}
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                warn!(sub_id, "task did not stop gracefully; aborting its handle");
                if let Some(handle) = &task.handle {
                    handle.abort();
                }
            }
        }

        self.record_and_emit(&sub_id, EventMsg::TurnAborted { reason }).await;
    }

    // ── Input injection ───────────────────────────────────────────────────────

    /// Hand `items` to the running Regular task.  Returns the items back
    /// when no such task exists, in which case the caller spawns one.
    pub async fn inject_input(&self, items: Vec<InputItem>) -> Result<(), Vec<InputItem>> {
        let active = self.active_turn.lock().await;
        match active.as_ref() {
            Some(at) if at.has_task_of_kind(TaskKind::Regular) => {
                at.turn_state.lock().await.push_pending_input(items);
                Ok(())
            }
            _ => Err(items),
        }
    }

    pub async fn take_pending_input(&self) -> Vec<InputItem> {
        match self.active_turn.lock().await.as_ref() {
            Some(at) => at.turn_state.lock().await.take_pending_input(),
            None => Vec::new(),
        }
    }

    // ── Approvals ─────────────────────────────────────────────────────────────

    /// Park the turn on a one-shot approval channel and ask the user.
    pub async fn request_approval(
        &self,
        sub_id: &str,
        execution_id: &str,
        command: &str,
        args: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> ReviewDecision {
        let (tx, rx) = oneshot::channel();
        {
            let active = self.active_turn.lock().await;
            match active.as_ref() {
                Some(at) => {
                    at.turn_state.lock().await.insert_pending_approval(execution_id, tx)
                }
                None => return ReviewDecision::Abort,
            }
        }
        self.record_and_emit(
            sub_id,
            EventMsg::ExecApprovalRequest {
                execution_id: execution_id.to_string(),
                command: format!("{command} {args}"),
                explanation: None,
            },
        )
        .await;

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => ReviewDecision::Abort,
            res = rx => res.unwrap_or(ReviewDecision::Abort),
        };
        if let Some(at) = self.active_turn.lock().await.as_ref() {
            at.turn_state.lock().await.remove_pending_approval(execution_id);
        }
        decision
    }

    /// Resolve a pending approval.  A decision for an id nobody is
    /// waiting on (already aborted, duplicate answer) is dropped with a
    /// warning notification.
    pub async fn resolve_approval(
        &self,
        sub_id: &str,
        execution_id: &str,
        decision: ReviewDecision,
    ) {
        let sender = match self.active_turn.lock().await.as_ref() {
            Some(at) => at.turn_state.lock().await.remove_pending_approval(execution_id),
            None => None,
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(decision);
            }
            None => {
                self.send_event(Event {
                    id: sub_id.to_string(),
                    msg: EventMsg::Notification {
                        kind: NotificationKind::Warning,
                        payload: serde_json::json!({
                            "stale_approval": execution_id,
                        }),
                    },
                });
            }
        }
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    /// Summarize the conversation with a tool-free model call and
    /// replace history with a bridge message carrying the summary.
    pub async fn compact(&self, sub_id: &str, ctx: &TurnContext) -> anyhow::Result<()> {
        let mut input = self.history_snapshot().await;
        input.push(ResponseItem::user_text(COMPACT_PROMPT));
        let prompt = Prompt {
            input,
            tools: Vec::new(),
            base_instructions_override: ctx.base_instructions.clone(),
            user_instructions: None,
            output_schema: None,
        };

        let mut stream = self
            .services
            .model_client
            .stream(&prompt)
            .await
            .map_err(|e| anyhow::anyhow!(e.message))
            .context("compaction model call failed")?;

        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event.map_err(|e| anyhow::anyhow!(e.message))? {
                ResponseEvent::OutputItemDone(item @ ResponseItem::Message { .. }) => {
                    summary = birk_protocol::response_item_text(&item);
                }
                ResponseEvent::Completed { .. } => break,
                _ => {}
            }
        }
        if summary.is_empty() {
            bail!("compaction produced an empty summary");
        }

        {
            let mut state = self.state.lock().await;
            state.history = vec![build_bridge_item(&summary)];
        }
        self.record_rollout_items(&[RolloutItem::Compacted(CompactedItem {
            message: summary.clone(),
        })])
        .await;
        self.record_and_emit(
            sub_id,
            EventMsg::Notification {
                kind: NotificationKind::System,
                payload: serde_json::json!({ "compacted": true }),
            },
        )
        .await;
        Ok(())
    }
}
