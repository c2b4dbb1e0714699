// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so enabled-by-default flags need a named function.
fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    75_000
}

/// Keep the partial-config fallback in sync with
/// `ProviderConfig::default()`: a `provider:` block that omits
/// `api_key_env` still reads the standard variable.
fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".into())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub rollout: RolloutConfig,
    /// How many times a retryable model-stream failure is retried before
    /// the task fails.
    #[serde(default = "default_max_retries")]
    pub request_max_retries: u32,
    /// Surface raw model reasoning as events and persist reasoning items.
    #[serde(default)]
    pub show_raw_agent_reasoning: bool,
    /// Replaces the built-in base instructions when set.
    #[serde(default)]
    pub base_instructions: Option<String>,
}

/// Which streaming wire protocol the provider speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireApi {
    #[default]
    Responses,
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier, e.g. "openai" or "azure".
    pub name: String,
    /// API base that ends before `/responses`.
    pub base_url: String,
    #[serde(default)]
    pub wire_api: WireApi,
    /// Environment variable that holds the API key (read at runtime).
    /// Prefer this over `api_key` so secrets stay out of config files.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub requires_openai_auth: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            wire_api: WireApi::Responses,
            api_key_env: default_api_key_env(),
            api_key: None,
            requires_openai_auth: true,
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key: explicit value first, then the configured
    /// environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }

    /// Azure deployments need `store = true` and item ids on the request.
    pub fn is_azure_responses(&self) -> bool {
        self.base_url.contains("azure.com") && self.wire_api == WireApi::Responses
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningSummary {
    None,
    #[default]
    Brief,
    Detailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model id forwarded to the provider.
    pub selected: String,
    pub context_window: u64,
    /// Must not exceed `context_window`.
    pub max_output_tokens: u64,
    /// Turn-end usage above this threshold triggers inline compaction.
    /// `None` disables auto-compaction.
    #[serde(default)]
    pub auto_compact_token_limit: Option<u64>,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
    #[serde(default)]
    pub reasoning_summary: ReasoningSummary,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            selected: "gpt-5".into(),
            context_window: 272_000,
            max_output_tokens: 128_000,
            auto_compact_token_limit: None,
            reasoning_effort: ReasoningEffort::Medium,
            reasoning_summary: ReasoningSummary::Brief,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// When non-empty, only these tools are exposed to the model.
    #[serde(default)]
    pub enabled: Vec<String>,
    /// Removed from the exposed set even when listed in `enabled`.
    #[serde(default)]
    pub disabled: Vec<String>,
    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: u64,
    /// Per-attempt idle timeout on the model stream.
    #[serde(default = "default_idle_timeout_ms")]
    pub stream_idle_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            disabled: Vec::new(),
            timeout_ms: default_tool_timeout_ms(),
            stream_idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

/// Rollout retention: a number of days, or keep forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RolloutTtl {
    Days(u32),
    #[serde(rename = "permanent")]
    Permanent(PermanentTag),
}

/// Single-value marker so `ttl: permanent` parses from YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentTag {
    Permanent,
}

impl Default for RolloutTtl {
    fn default() -> Self {
        Self::Days(60)
    }
}

impl RolloutTtl {
    /// Retention in days; `None` means keep forever.
    pub fn days(&self) -> Option<u32> {
        match self {
            Self::Days(d) => Some(*d),
            Self::Permanent(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub ttl: RolloutTtl,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_openai_responses() {
        let cfg = Config::default();
        assert_eq!(cfg.provider.name, "openai");
        assert_eq!(cfg.provider.wire_api, WireApi::Responses);
        assert_eq!(cfg.request_max_retries, 3);
        assert!(!cfg.show_raw_agent_reasoning);
    }

    #[test]
    fn default_tool_timeout_is_30s() {
        assert_eq!(ToolsConfig::default().timeout_ms, 30_000);
    }

    #[test]
    fn default_ttl_is_60_days() {
        assert_eq!(RolloutConfig::default().ttl.days(), Some(60));
    }

    #[test]
    fn permanent_ttl_parses_from_yaml() {
        let cfg: RolloutConfig = serde_yaml::from_str("ttl: permanent").unwrap();
        assert_eq!(cfg.ttl.days(), None);
    }

    #[test]
    fn numeric_ttl_parses_from_yaml() {
        let cfg: RolloutConfig = serde_yaml::from_str("ttl: 7").unwrap();
        assert_eq!(cfg.ttl.days(), Some(7));
    }

    #[test]
    fn azure_detection_requires_responses_wire_api() {
        let mut p = ProviderConfig {
            base_url: "https://x.openai.azure.com".into(),
            ..Default::default()
        };
        assert!(p.is_azure_responses());
        p.wire_api = WireApi::Chat;
        assert!(!p.is_azure_responses());
    }

    #[test]
    fn non_azure_base_url_is_not_azure() {
        let p = ProviderConfig::default();
        assert!(!p.is_azure_responses());
    }

    #[test]
    fn partial_provider_block_keeps_api_key_env_fallback() {
        // A provider block that sets only name/base_url must not lose
        // the standard env-var fallback to serde's per-field default.
        let p: ProviderConfig =
            serde_yaml::from_str("name: azure\nbase_url: https://x.openai.azure.com").unwrap();
        assert_eq!(p.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
    }

    #[test]
    fn partial_provider_block_resolves_key_from_env() {
        std::env::set_var("OPENAI_API_KEY", "sk-from-env");
        let p: ProviderConfig =
            serde_yaml::from_str("name: custom\nbase_url: https://llm.internal/v1").unwrap();
        assert_eq!(p.resolve_api_key().as_deref(), Some("sk-from-env"));
        std::env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn explicit_api_key_wins_over_env() {
        let p = ProviderConfig {
            api_key: Some("sk-explicit".into()),
            api_key_env: Some("BIRK_TEST_KEY_UNSET".into()),
            ..Default::default()
        };
        assert_eq!(p.resolve_api_key().as_deref(), Some("sk-explicit"));
    }

    #[test]
    fn reasoning_effort_serializes_lowercase() {
        let json = serde_json::to_string(&ReasoningEffort::High).unwrap();
        assert_eq!(json, r#""high""#);
    }
}
