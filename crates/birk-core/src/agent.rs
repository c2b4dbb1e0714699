// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use birk_config::Config;
use birk_model::ModelClient;
use birk_protocol::{Event, EventMsg, Op, ResponseItem, RolloutItem, Submission, TurnAbortReason};
use birk_rollout::{InitialHistory, RolloutRecorder, RolloutRecorderParams};
use birk_tools::ToolRegistry;

use crate::session::{Notifier, Session, SessionServices};
use crate::tasks::{CompactTask, RegularTask};

/// The agent runtime: callers enqueue [`Op`]s through [`Agent::submit`],
/// a single cooperative submission loop routes them to the session, and
/// results come back on the totally-ordered event stream.
pub struct Agent {
    session: Arc<Session>,
    submission_tx: mpsc::UnboundedSender<Submission>,
    event_rx: Mutex<mpsc::UnboundedReceiver<Event>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Start an agent for a fresh conversation.
    ///
    /// When `rollout_db` is given, the conversation is persisted there;
    /// the rollout (with its SessionMeta) exists before this returns.
    pub fn new(
        config: Config,
        model_client: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        rollout_db: Option<&Path>,
        notifier: Option<Notifier>,
    ) -> anyhow::Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let rollout = match rollout_db {
            Some(path) => Some(RolloutRecorder::new(
                path,
                RolloutRecorderParams::Create {
                    conversation_id: session_id.clone(),
                    instructions: config.base_instructions.clone(),
                },
                config.rollout.ttl.days(),
                config.show_raw_agent_reasoning,
            )?),
            None => None,
        };
        Self::start(session_id, config, model_client, tools, rollout, notifier, Vec::new())
    }

    /// Resume a recorded conversation: prior response items become the
    /// session's starting history and new items append to the same
    /// rollout.
    pub fn resume(
        config: Config,
        model_client: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        rollout_db: &Path,
        rollout_id: &str,
    ) -> anyhow::Result<Self> {
        let history = match birk_rollout::get_rollout_history(rollout_db, rollout_id)? {
            InitialHistory::Resumed(resumed) => resumed,
            InitialHistory::New => anyhow::bail!("rollout {rollout_id} has no recorded history"),
        };
        let rollout = RolloutRecorder::new(
            rollout_db,
            RolloutRecorderParams::Resume { rollout_id: rollout_id.to_string() },
            config.rollout.ttl.days(),
            config.show_raw_agent_reasoning,
        )?;
        let initial: Vec<ResponseItem> = history
            .history
            .into_iter()
            .filter_map(|item| match item {
                RolloutItem::ResponseItem(ri) => Some(ri),
                _ => None,
            })
            .collect();
        Self::start(
            history.conversation_id,
            config,
            model_client,
            tools,
            Some(rollout),
            None,
            initial,
        )
    }

    fn start(
        session_id: String,
        config: Config,
        model_client: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        rollout: Option<RolloutRecorder>,
        notifier: Option<Notifier>,
        initial_history: Vec<ResponseItem>,
    ) -> anyhow::Result<Self> {
        let (submission_tx, submission_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let services = SessionServices { model_client, tools, rollout, notifier };
        let session = Session::new(
            session_id,
            Arc::new(config),
            services,
            event_tx,
            initial_history,
        );
        let loop_handle = tokio::spawn(submission_loop(Arc::clone(&session), submission_rx));
        Ok(Self {
            session,
            submission_tx,
            event_rx: Mutex::new(event_rx),
            loop_handle: Mutex::new(Some(loop_handle)),
        })
    }

    /// Enqueue an operation.  Returns the submission id that every
    /// resulting event echoes.  Never blocks.
    pub fn submit(&self, op: Op) -> String {
        let id = Uuid::new_v4().to_string();
        if self
            .submission_tx
            .send(Submission { id: id.clone(), op })
            .is_err()
        {
            warn!("submission loop is gone; op dropped");
        }
        id
    }

    /// Next event in session order; `None` after shutdown completes and
    /// the stream drains.
    pub async fn next_event(&self) -> Option<Event> {
        self.event_rx.lock().await.recv().await
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Drain through `Op::Shutdown` and wait for the loop to exit.
    pub async fn shutdown(&self) {
        self.submit(Op::Shutdown);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// The single cooperative submission loop.  Handlers catch their own
/// failures and emit `Error` events; nothing escapes to the loop.
async fn submission_loop(session: Arc<Session>, mut rx: mpsc::UnboundedReceiver<Submission>) {
    while let Some(Submission { id, op }) = rx.recv().await {
        debug!(sub_id = %id, "processing submission");
        match op {
            Op::UserInput { items } => {
                // A running task consumes the items; otherwise they
                // start a fresh task under the persistent context.
                if let Err(items) = session.inject_input(items).await {
                    let ctx = session.persistent_context().await;
                    session
                        .spawn_task(ctx, id, items, RegularTask::default())
                        .await;
                }
            }

            Op::UserTurn {
                items,
                cwd,
                approval_policy,
                sandbox_policy,
                model,
                effort,
                summary,
            } => {
                let ctx = session.persistent_context().await.for_user_turn(
                    cwd,
                    approval_policy,
                    sandbox_policy,
                    model,
                    effort,
                    summary,
                );
                session
                    .spawn_task(ctx, id, items, RegularTask::default())
                    .await;
            }

            op @ Op::OverrideTurnContext { .. } => {
                session.override_turn_context(&op).await;
            }

            Op::Interrupt => {
                session.abort_all_tasks(TurnAbortReason::UserInterrupt).await;
            }

            Op::ExecApproval { execution_id, decision }
            | Op::PatchApproval { execution_id, decision } => {
                session.resolve_approval(&id, &execution_id, decision).await;
            }

            Op::Compact => {
                let ctx = session.persistent_context().await;
                session
                    .spawn_task(ctx, id, Vec::new(), CompactTask)
                    .await;
            }

            Op::Shutdown => {
                session.abort_all_tasks(TurnAbortReason::UserInterrupt).await;
                session.shutdown_rollout().await;
                session.record_and_emit(&id, EventMsg::ShutdownComplete).await;
                break;
            }
        }
    }
    debug!("submission loop exited");
}
