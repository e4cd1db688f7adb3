// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limit exceeded (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication rejected by provider")]
    Authentication,

    #[error("{provider} requires an API key")]
    MissingApiKey { provider: &'static str },

    #[error("Circuit open for {provider}")]
    CircuitOpen { provider: &'static str },

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ProviderError {
    /// Maps a reqwest failure, keeping timeouts distinct from other transport errors.
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::RequestFailed(error)
        }
    }

    /// Network-level failure: connection refused, reset, timed out.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::RequestFailed(_) | Self::Timeout)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Short label for logs and health counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestFailed(_) => "transport",
            Self::Timeout => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Authentication => "authentication",
            Self::MissingApiKey { .. } => "missing_api_key",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::InvalidResponse(_) => "invalid_response",
            Self::ApiError { .. } => "api_error",
            Self::SerializationError(_) => "serialization",
        }
    }
}
