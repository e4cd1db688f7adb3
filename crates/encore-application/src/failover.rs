// SPDX-License-Identifier: GPL-3.0-or-later
use crate::error::{RecommendationError, Result};
use crate::sanitizer::RecommendationSanitizer;
use encore_domain::RecommendationBatch;
use encore_providers::{ChatRequest, CompletionProvider, ProviderHealth};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Item cap used when the chain is empty.
const FALLBACK_MAX_ITEMS: usize = 20;

/// Ordered providers; the first is the primary.
///
/// Each call walks the list from the top and returns the first batch that both
/// arrives and parses. Between attempts it waits a fixed delay plus random
/// jitter.
pub struct ProviderChain {
    providers: Vec<Arc<dyn CompletionProvider>>,
    sanitizer: RecommendationSanitizer,
    delay: Duration,
    jitter: Duration,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn CompletionProvider>>) -> Self {
        Self {
            providers,
            sanitizer: RecommendationSanitizer::new(),
            delay: Duration::from_millis(500),
            jitter: Duration::from_millis(250),
        }
    }

    pub fn with_delay(mut self, delay: Duration, jitter: Duration) -> Self {
        self.delay = delay;
        self.jitter = jitter;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: RecommendationSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn primary(&self) -> Option<&Arc<dyn CompletionProvider>> {
        self.providers.first()
    }

    pub fn providers(&self) -> &[Arc<dyn CompletionProvider>] {
        &self.providers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Smallest request size limit in the chain, so a fallback is never
    /// asked for more than it accepts.
    pub fn max_items_per_request(&self) -> usize {
        self.providers
            .iter()
            .map(|provider| provider.max_items_per_request())
            .min()
            .unwrap_or(FALLBACK_MAX_ITEMS)
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        self.providers
            .iter()
            .filter_map(|provider| provider.health())
            .collect()
    }

    pub async fn generate(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<RecommendationBatch> {
        if self.providers.is_empty() {
            return Err(RecommendationError::NoProviders);
        }

        let mut last_error: Option<RecommendationError> = None;
        for (index, provider) in self.providers.iter().enumerate() {
            if index > 0 {
                self.pause(cancel).await?;
            }
            if cancel.is_cancelled() {
                return Err(RecommendationError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RecommendationError::Cancelled),
                result = self.attempt(provider.as_ref(), request) => result,
            };

            match result {
                Ok(batch) => {
                    if index > 0 {
                        info!(
                            target: "failover",
                            provider = provider.id(),
                            position = index,
                            "served by fallback provider"
                        );
                    }
                    return Ok(batch);
                }
                Err(error) if error.is_failover() => {
                    warn!(
                        target: "failover",
                        provider = provider.id(),
                        model = provider.model(),
                        error = %error,
                        remaining = self.providers.len() - index - 1,
                        "provider attempt failed"
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(RecommendationError::ProvidersExhausted {
            attempts: self.providers.len(),
            last_error: last_error.map(|error| error.to_string()).unwrap_or_default(),
        })
    }

    async fn attempt(
        &self,
        provider: &dyn CompletionProvider,
        request: &ChatRequest,
    ) -> Result<RecommendationBatch> {
        let completion = provider.complete(request).await?;
        let sanitized = self.sanitizer.parse(&completion.content)?;
        debug!(
            target: "failover",
            provider = %completion.provider,
            model = %completion.model,
            latency_ms = completion.latency.as_millis() as u64,
            accepted = sanitized.recommendations.len(),
            dropped = sanitized.dropped,
            "provider response parsed"
        );
        Ok(RecommendationBatch::new(
            completion.provider,
            completion.model,
            sanitized.recommendations,
        ))
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(RecommendationError::Cancelled),
            _ = tokio::time::sleep(self.delay + jitter) => Ok(()),
        }
    }
}
