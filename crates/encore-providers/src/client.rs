// SPDX-License-Identifier: GPL-3.0-or-later

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{ProviderError, Result};
use crate::health::{HealthTracker, ProviderHealth};
use crate::models::{ChatCompletion, ChatRequest};
use crate::profile::{AuthStyle, ProviderProfile, WireFormat};
use crate::provider::CompletionProvider;
use crate::rate_limiter::RateLimiter;
use crate::wire;
use encore_domain::ProviderKind;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const USER_AGENT: &str = concat!(
    "Encore/",
    env!("CARGO_PKG_VERSION"),
    " ( https://github.com/encore-music/encore )"
);
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Chat-completion client for one configured backend.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    profile: &'static ProviderProfile,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_items_per_request: usize,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    health: HealthTracker,
}

impl ProviderClient {
    /// Create a client for `kind` with default endpoint, model and limits.
    pub fn new(kind: ProviderKind, api_key: Option<String>) -> Result<Self> {
        let mut builder = Self::builder(kind);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        builder.build()
    }

    /// Create a client builder for custom configuration.
    pub fn builder(kind: ProviderKind) -> ProviderClientBuilder {
        ProviderClientBuilder::new(kind)
    }

    pub fn kind(&self) -> ProviderKind {
        self.profile.kind
    }

    pub fn profile(&self) -> &'static ProviderProfile {
        self.profile
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a chat completion through the circuit breaker and rate limiter.
    ///
    /// # Example
    /// ```no_run
    /// # use encore_providers::{ChatRequest, ProviderClient, ProviderKind};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = ProviderClient::new(ProviderKind::Ollama, None)?;
    /// let request = ChatRequest::new("Answer in JSON.", "Recommend three shoegaze albums.");
    /// let completion = client.complete(&request).await?;
    /// println!("{}", completion.content);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let provider = self.profile.kind.as_str();

        let Some(permit) = self.breaker.try_acquire() else {
            debug!(target: "providers", provider, "circuit open, skipping request");
            return Err(ProviderError::CircuitOpen { provider });
        };

        self.rate_limiter.acquire().await;

        let started = Instant::now();
        let result = self.send_completion(request).await;
        let latency = started.elapsed();

        match &result {
            Ok(_) => {
                permit.success();
                self.health.record_success(latency);
                debug!(target: "providers", provider, model = %self.model, ?latency, "completion received");
            }
            Err(error) => {
                permit.failure();
                self.health.record_failure(error.kind());
                warn!(target: "providers", provider, model = %self.model, error = %error, "completion failed");
            }
        }

        result.map(|content| ChatCompletion {
            provider: provider.to_string(),
            model: self.model.clone(),
            content,
            latency,
        })
    }

    /// List the models the backend reports; doubles as a connection test.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        self.rate_limiter.acquire().await;

        let url = match self.profile.wire {
            WireFormat::OpenAiChat => format!("{}/models", self.base_url),
            WireFormat::Anthropic => format!("{}/v1/models", self.base_url),
            WireFormat::Gemini => format!("{}/v1beta/models", self.base_url),
            WireFormat::Ollama => format!("{}/api/tags", self.base_url),
        };
        trace!(target: "providers", provider = self.profile.kind.as_str(), "GET {}", url);

        let request = self.authorize(self.client.get(&url))?;
        let response = request.send().await.map_err(ProviderError::from_transport)?;
        let body = Self::read_success_body(response).await?;
        wire::decode_models(self.profile.wire, &body)
    }

    pub fn health(&self) -> ProviderHealth {
        self.health
            .snapshot(self.profile.kind.as_str(), &self.model, self.breaker.state())
    }

    async fn send_completion(&self, request: &ChatRequest) -> Result<String> {
        let url = match self.profile.wire {
            WireFormat::OpenAiChat => format!("{}/chat/completions", self.base_url),
            WireFormat::Anthropic => format!("{}/v1/messages", self.base_url),
            WireFormat::Gemini => format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ),
            WireFormat::Ollama => format!("{}/api/chat", self.base_url),
        };
        let payload = wire::encode_request(self.profile.wire, &self.model, request)?;

        trace!(target: "providers", provider = self.profile.kind.as_str(), "POST {}", url);

        let builder = self.authorize(self.client.post(&url).json(&payload))?;
        let response = builder.send().await.map_err(ProviderError::from_transport)?;
        let body = Self::read_success_body(response).await?;
        trace!(target: "providers", "response body: {}", body);

        wire::decode_completion(self.profile.wire, &body)
    }

    fn authorize(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let provider = self.profile.kind.as_str();
        let key = || {
            self.api_key
                .as_deref()
                .filter(|key| !key.is_empty())
                .ok_or(ProviderError::MissingApiKey { provider })
        };

        let builder = match self.profile.auth {
            AuthStyle::None => builder,
            AuthStyle::Bearer => builder.bearer_auth(key()?),
            AuthStyle::ApiKeyHeader => builder
                .header("x-api-key", key()?)
                .header("anthropic-version", ANTHROPIC_VERSION),
            AuthStyle::QueryKey => builder.query(&[("key", key()?)]),
        };

        Ok(match self.profile.kind {
            ProviderKind::OpenRouter => builder
                .header("HTTP-Referer", "https://github.com/encore-music/encore")
                .header("X-Title", "Encore"),
            _ => builder,
        })
    }

    async fn read_success_body(response: Response) -> Result<String> {
        let status = response.status();
        debug!(target: "providers", "response status: {}", status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::Authentication);
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: message.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        response.text().await.map_err(ProviderError::from_transport)
    }
}

#[async_trait::async_trait]
impl CompletionProvider for ProviderClient {
    fn id(&self) -> &str {
        self.profile.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_items_per_request(&self) -> usize {
        self.max_items_per_request
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        ProviderClient::complete(self, request).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        ProviderClient::list_models(self).await
    }

    fn health(&self) -> Option<ProviderHealth> {
        Some(ProviderClient::health(self))
    }
}

/// Builder for configuring a provider client.
#[derive(Debug)]
pub struct ProviderClientBuilder {
    profile: &'static ProviderProfile,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    max_items_per_request: Option<usize>,
    timeout: Duration,
    requests_per_minute: u32,
    failure_threshold: u32,
    cooldown: Duration,
}

impl ProviderClientBuilder {
    fn new(kind: ProviderKind) -> Self {
        Self {
            profile: ProviderProfile::for_kind(kind),
            base_url: None,
            model: None,
            api_key: None,
            max_items_per_request: None,
            timeout: Duration::from_secs(60),
            requests_per_minute: 30,
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }

    /// Set a custom base URL (proxies, self-hosted gateways, mock servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the per-call item cap from the provider profile.
    pub fn max_items_per_request(mut self, max: usize) -> Self {
        self.max_items_per_request = Some(max);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn requests_per_minute(mut self, requests: u32) -> Self {
        self.requests_per_minute = requests;
        self
    }

    /// Configure the circuit breaker.
    pub fn circuit_breaker(mut self, failure_threshold: u32, cooldown: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.cooldown = cooldown;
        self
    }

    pub fn build(self) -> Result<ProviderClient> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let base_url = self
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.profile.default_base_url.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = self
            .model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| self.profile.default_model.to_string());

        Ok(ProviderClient {
            client,
            profile: self.profile,
            base_url,
            model,
            api_key: self.api_key,
            max_items_per_request: self
                .max_items_per_request
                .unwrap_or(self.profile.max_items_per_request)
                .max(1),
            rate_limiter: RateLimiter::per_minute(self.requests_per_minute),
            breaker: CircuitBreaker::new(
                self.profile.kind.as_str(),
                self.failure_threshold,
                self.cooldown,
            ),
            health: HealthTracker::default(),
        })
    }
}
