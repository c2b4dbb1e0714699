// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::RwLock;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_stream::StreamExt as TokioStreamExt;
use tracing::{debug, warn};

use birk_config::{Config, ProviderConfig};

use crate::error::{StreamAttemptError, StreamError};
use crate::prompt::{Prompt, ReasoningParam, ResponsesApiRequest};
use crate::sse::drain_complete_sse_lines;
use crate::types::{ResponseEvent, ResponseStream};

/// Streaming model client.  One implementation talks HTTP
/// ([`ResponsesClient`]); tests use [`crate::ScriptedMockClient`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Open one streaming completion for `prompt`.
    ///
    /// Implementations retry retryable transport failures internally; an
    /// `Err` return means the attempt budget is exhausted or the failure
    /// is permanent.
    async fn stream(&self, prompt: &Prompt) -> Result<ResponseStream, StreamError>;
}

/// Holds the bearer token and re-resolves it on a 401.
///
/// The token lives behind an `RwLock` so a refresh triggered by one
/// attempt is visible to the next without rebuilding the client.
pub struct AuthManager {
    provider: ProviderConfig,
    token: RwLock<Option<String>>,
}

impl AuthManager {
    pub fn new(provider: &ProviderConfig) -> Self {
        Self {
            provider: provider.clone(),
            token: RwLock::new(provider.resolve_api_key()),
        }
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    /// Re-resolve the key from config/environment.  Returns `true` when
    /// the token changed.
    pub fn refresh(&self) -> bool {
        let fresh = self.provider.resolve_api_key();
        if let Ok(mut slot) = self.token.write() {
            let changed = *slot != fresh;
            *slot = fresh;
            changed
        } else {
            false
        }
    }
}

/// HTTP client for `POST {base_url}/responses` with retry/backoff.
pub struct ResponsesClient {
    provider: ProviderConfig,
    model: String,
    reasoning: Option<ReasoningParam>,
    conversation_id: String,
    auth: AuthManager,
    client: reqwest::Client,
    max_retries: u32,
    idle_timeout: Duration,
}

impl ResponsesClient {
    pub fn new(config: &Config, conversation_id: impl Into<String>) -> Self {
        let reasoning = reasoning_param_for(&config.model.selected, config);
        Self {
            provider: config.provider.clone(),
            model: config.model.selected.clone(),
            reasoning,
            conversation_id: conversation_id.into(),
            auth: AuthManager::new(&config.provider),
            client: reqwest::Client::new(),
            max_retries: config.request_max_retries,
            idle_timeout: Duration::from_millis(config.tools.stream_idle_timeout_ms),
        }
    }

    /// The model id this client sends requests for.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn attempt_stream(
        &self,
        payload: &ResponsesApiRequest,
    ) -> Result<ResponseStream, StreamAttemptError> {
        let url = format!("{}/responses", self.provider.base_url.trim_end_matches('/'));

        let mut req = self
            .client
            .post(&url)
            .header("OpenAI-Beta", "responses=experimental")
            .header("conversation_id", &self.conversation_id)
            .header("session_id", &self.conversation_id)
            .header("Accept", "text/event-stream")
            .json(payload);
        if self.provider.requires_openai_auth {
            let token = self.auth.bearer_token().ok_or_else(|| {
                StreamAttemptError::Fatal {
                    source: anyhow!(
                        "API key not set; provide api_key or api_key_env in config"
                    ),
                }
            })?;
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StreamAttemptError::RetryableTransport { source: anyhow!(e) })?;

        let status = resp.status();
        if status.as_u16() == 401 {
            // The key may have rotated under us; re-resolve before retry.
            self.auth.refresh();
            return Err(StreamAttemptError::RetryableHttp { status: 401, retry_after: None });
        }
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_status(status.as_u16(), retry_after, body));
        }

        debug!(model = %self.model, url = %url, "model stream opened");
        Ok(sse_response_stream(resp, self.idle_timeout))
    }
}

#[async_trait]
impl ModelClient for ResponsesClient {
    async fn stream(&self, prompt: &Prompt) -> Result<ResponseStream, StreamError> {
        let payload = ResponsesApiRequest::build(
            prompt,
            &self.model,
            &self.conversation_id,
            &self.provider,
            self.reasoning,
        );

        let mut attempt: u32 = 0;
        loop {
            match self.attempt_stream(&payload).await {
                Ok(stream) => return Ok(stream),
                Err(e) if !e.is_fatal() && attempt < self.max_retries => {
                    let delay = e.delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying model request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into_stream_error()),
            }
        }
    }
}

/// Wrap an HTTP SSE response body into a [`ResponseStream`].
///
/// Each TCP chunk extends the persistent line buffer; complete lines are
/// parsed into events.  A gap longer than `idle_timeout` between chunks
/// yields a retryable [`StreamError`] and ends the stream.
fn sse_response_stream(resp: reqwest::Response, idle_timeout: Duration) -> ResponseStream {
    let parsed = resp
        .bytes_stream()
        .scan(String::new(), |buf, chunk| {
            let events: Vec<Result<ResponseEvent, StreamError>> = match chunk {
                Ok(b) => {
                    buf.push_str(&String::from_utf8_lossy(&b));
                    drain_complete_sse_lines(buf)
                }
                Err(e) => vec![Err(StreamError::retryable(format!("stream read error: {e}")))],
            };
            std::future::ready(Some(events))
        })
        .flat_map(futures::stream::iter);

    // `map` exists on both stream extension traits; qualify the call.
    let with_idle = futures::StreamExt::map(
        TokioStreamExt::timeout(parsed, idle_timeout),
        |item| match item {
            Ok(ev) => ev,
            Err(_elapsed) => Err(StreamError::retryable("model stream idle timeout exceeded")),
        },
    );

    Box::pin(with_idle)
}

/// Map a non-success HTTP status onto the retry taxonomy: 429 and 5xx
/// are retryable, everything else 4xx is fatal.
fn classify_http_status(
    status: u16,
    retry_after: Option<Duration>,
    body: String,
) -> StreamAttemptError {
    if status == 429 || status >= 500 {
        StreamAttemptError::RetryableHttp { status, retry_after }
    } else {
        StreamAttemptError::Fatal {
            source: anyhow!("model request failed with HTTP {status}: {body}"),
        }
    }
}

/// `Retry-After` arrives in whole seconds.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Reasoning parameters are only sent for reasoning-capable model
/// families; other models reject the field.
fn reasoning_param_for(model: &str, config: &Config) -> Option<ReasoningParam> {
    let capable = model.starts_with("gpt-5") || model.starts_with("o3") || model.starts_with("o4");
    capable.then_some(ReasoningParam {
        effort: config.model.reasoning_effort,
        summary: config.model.reasoning_summary,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
