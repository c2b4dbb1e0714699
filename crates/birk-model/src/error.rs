// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

/// Error surfaced to consumers of a model stream.
///
/// `retryable` describes whether retrying the *whole turn* may help
/// (transport hiccup, rate limit) as opposed to a permanent failure
/// (invalid request, exhausted retries).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StreamError {
    pub message: String,
    pub retryable: bool,
}

impl StreamError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

/// Classified outcome of one HTTP attempt against the Responses API.
///
/// The retry loop sleeps and retries the `Retryable*` variants up to the
/// configured budget; `Fatal` is returned to the caller immediately.
#[derive(Debug, thiserror::Error)]
pub enum StreamAttemptError {
    #[error("HTTP {status}")]
    RetryableHttp {
        status: u16,
        /// Server-requested delay from the `Retry-After` header.
        retry_after: Option<Duration>,
    },
    #[error("transport error: {source}")]
    RetryableTransport {
        #[source]
        source: anyhow::Error,
    },
    #[error("{source}")]
    Fatal {
        #[source]
        source: anyhow::Error,
    },
}

impl StreamAttemptError {
    /// Backoff before the attempt numbered `attempt` (0-based) is retried:
    /// the server-requested delay when present, otherwise exponential
    /// growth capped at 30 s.
    pub fn delay(&self, attempt: u32) -> Duration {
        if let Self::RetryableHttp { retry_after: Some(d), .. } = self {
            return *d;
        }
        let exp = 1000u64.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(exp.min(30_000))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Collapse into the error handed to the stream consumer.
    pub fn into_stream_error(self) -> StreamError {
        match self {
            Self::RetryableHttp { status, .. } => {
                StreamError::retryable(format!("model request failed with HTTP {status}"))
            }
            Self::RetryableTransport { source } => {
                StreamError::retryable(format!("model transport error: {source}"))
            }
            Self::Fatal { source } => StreamError::fatal(source.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
