// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use birk_config::Config;
use birk_protocol::{AskForApproval, Op, SandboxPolicy, TurnContextItem};

/// The configuration snapshot a turn executes under.
///
/// Two scopes exist: the session's **persistent** snapshot, mutated only
/// by `Op::OverrideTurnContext`, and **per-turn** copies built from
/// `Op::UserTurn` overrides.  A running task keeps the copy it started
/// with; persistent changes apply from the next task onward.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub model: String,
    /// Base URL of the page context the turn operates on.
    pub cwd: String,
    pub approval_policy: AskForApproval,
    pub sandbox_policy: SandboxPolicy,
    pub effort: Option<String>,
    pub summary: Option<String>,
    pub base_instructions: Option<String>,
    /// Review turns run in an isolated context; their items never reach
    /// the main conversation's rollout.
    pub is_review: bool,
}

impl TurnContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.selected.clone(),
            cwd: String::new(),
            approval_policy: AskForApproval::default(),
            sandbox_policy: SandboxPolicy::default(),
            effort: None,
            summary: None,
            base_instructions: config.base_instructions.clone(),
            is_review: false,
        }
    }

    /// Per-turn copy for an `Op::UserTurn`.
    pub fn for_user_turn(
        &self,
        cwd: String,
        approval_policy: AskForApproval,
        sandbox_policy: SandboxPolicy,
        model: String,
        effort: Option<String>,
        summary: Option<String>,
    ) -> Self {
        Self {
            model,
            cwd,
            approval_policy,
            sandbox_policy,
            effort,
            summary,
            base_instructions: self.base_instructions.clone(),
            is_review: false,
        }
    }

    /// Apply an `Op::OverrideTurnContext` in place.  Returns `true` when
    /// `cwd`, `sandbox_policy` or `model` changed — those changes get
    /// recorded into conversation history.
    pub fn apply_override(&mut self, op: &Op) -> bool {
        let Op::OverrideTurnContext {
            cwd,
            approval_policy,
            sandbox_policy,
            model,
            effort,
            summary,
        } = op
        else {
            return false;
        };
        let mut recordable = false;
        if let Some(cwd) = cwd {
            if *cwd != self.cwd {
                recordable = true;
            }
            self.cwd = cwd.clone();
        }
        if let Some(policy) = approval_policy {
            self.approval_policy = *policy;
        }
        if let Some(policy) = sandbox_policy {
            if *policy != self.sandbox_policy {
                recordable = true;
            }
            self.sandbox_policy = *policy;
        }
        if let Some(model) = model {
            if *model != self.model {
                recordable = true;
            }
            self.model = model.clone();
        }
        if let Some(effort) = effort {
            self.effort = Some(effort.clone());
        }
        if let Some(summary) = summary {
            self.summary = Some(summary.clone());
        }
        recordable
    }

    /// The rollout-recorded form of this snapshot.
    pub fn to_rollout_item(&self) -> TurnContextItem {
        TurnContextItem {
            model: self.model.clone(),
            cwd: self.cwd.clone(),
            approval_policy: self.approval_policy,
            sandbox_policy: self.sandbox_policy,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TurnContext {
        TurnContext::from_config(&Config::default())
    }

    fn override_op(model: Option<&str>, cwd: Option<&str>) -> Op {
        Op::OverrideTurnContext {
            cwd: cwd.map(String::from),
            approval_policy: None,
            sandbox_policy: None,
            model: model.map(String::from),
            effort: None,
            summary: None,
        }
    }

    #[test]
    fn from_config_uses_selected_model() {
        assert_eq!(ctx().model, "gpt-5");
        assert!(!ctx().is_review);
    }

    #[test]
    fn override_model_change_is_recordable() {
        let mut c = ctx();
        assert!(c.apply_override(&override_op(Some("gpt-5-mini"), None)));
        assert_eq!(c.model, "gpt-5-mini");
    }

    #[test]
    fn override_to_same_model_is_not_recordable() {
        let mut c = ctx();
        assert!(!c.apply_override(&override_op(Some("gpt-5"), None)));
    }

    #[test]
    fn override_approval_policy_alone_is_not_recordable() {
        let mut c = ctx();
        let op = Op::OverrideTurnContext {
            cwd: None,
            approval_policy: Some(AskForApproval::Never),
            sandbox_policy: None,
            model: None,
            effort: None,
            summary: None,
        };
        assert!(!c.apply_override(&op));
        assert_eq!(c.approval_policy, AskForApproval::Never);
    }

    #[test]
    fn override_cwd_change_is_recordable() {
        let mut c = ctx();
        assert!(c.apply_override(&override_op(None, Some("https://example.com"))));
        assert_eq!(c.cwd, "https://example.com");
    }

    #[test]
    fn user_turn_copy_keeps_base_instructions() {
        let mut c = ctx();
        c.base_instructions = Some("custom".into());
        let per_turn = c.for_user_turn(
            "https://x".into(),
            AskForApproval::Never,
            SandboxPolicy::ReadOnly,
            "gpt-5-mini".into(),
            None,
            None,
        );
        assert_eq!(per_turn.base_instructions.as_deref(), Some("custom"));
        assert_eq!(per_turn.model, "gpt-5-mini");
        // The persistent snapshot is untouched.
        assert_eq!(c.model, "gpt-5");
    }
}
