// SPDX-License-Identifier: GPL-3.0-or-later

use encore_providers::ProviderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecommendationError>;

#[derive(Debug, Error)]
pub enum RecommendationError {
    /// No JSON value in one of the accepted shapes was found in the response.
    #[error("no recommendation JSON found in provider response")]
    ParseFailure,

    #[error("recommendation cycle cancelled")]
    Cancelled,

    #[error("all {attempts} providers failed; last error: {last_error}")]
    ProvidersExhausted { attempts: usize, last_error: String },

    #[error("no providers configured")]
    NoProviders,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("library error: {0}")]
    Library(#[source] anyhow::Error),

    #[error("import list error: {0}")]
    Sink(#[source] anyhow::Error),
}

impl RecommendationError {
    /// Errors after which the next provider in the chain should be tried.
    /// Every provider-side failure qualifies, including rejected credentials.
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            RecommendationError::ParseFailure | RecommendationError::Provider(_)
        )
    }
}
