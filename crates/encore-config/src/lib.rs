// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use encore_domain::{
    DiscoveryMode, ProviderKind, RecommendationMode, SamplingStrategy, Validate, ValidationError,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarrConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LidarrConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8686".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// One AI backend. Providers are tried in the order they are listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Upper bound on recommendations requested in a single call.
    #[serde(default)]
    pub max_items_per_request: Option<usize>,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_provider_timeout() -> u64 {
    60
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            base_url: None,
            model: None,
            max_items_per_request: None,
            requests_per_minute: default_requests_per_minute(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    pub target_count: usize,
    pub max_attempts: u32,
    /// Consecutive zero-yield iterations before the top-up loop gives up.
    pub stagnation_threshold: u32,
    pub growth_factor: usize,
    pub min_confidence: f32,
    pub discovery_mode: DiscoveryMode,
    pub recommendation_mode: RecommendationMode,
    pub sampling_strategy: SamplingStrategy,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            target_count: 20,
            max_attempts: 4,
            stagnation_threshold: 2,
            growth_factor: 2,
            min_confidence: 0.0,
            discovery_mode: DiscoveryMode::default(),
            recommendation_mode: RecommendationMode::default(),
            sampling_strategy: SamplingStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    pub delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            delay_ms: 500,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 60 * 60,
            max_entries: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicBrainzConfig {
    pub resolve_mbids: bool,
    /// Drop items whose MusicBrainz IDs could not be resolved.
    pub require_mbids: bool,
    pub base_url: Option<String>,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            resolve_mbids: false,
            require_mbids: false,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub refresh_interval_secs: u64,
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 6 * 60 * 60,
            max_concurrent_jobs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("encore-import-list.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub telemetry: TelemetryConfig,
    pub lidarr: LidarrConfig,
    pub providers: Vec<ProviderConfig>,
    pub recommendation: RecommendationConfig,
    pub failover: FailoverConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub musicbrainz: MusicBrainzConfig,
    pub scheduler: SchedulerConfig,
    pub output: OutputConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            lidarr: LidarrConfig::default(),
            providers: vec![ProviderConfig::new(ProviderKind::Ollama)],
            recommendation: RecommendationConfig::default(),
            failover: FailoverConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            musicbrainz: MusicBrainzConfig::default(),
            scheduler: SchedulerConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !is_http_url(&self.lidarr.base_url) {
            errors.push(ValidationError::new(
                "lidarr.base_url",
                "must be an http(s) URL",
            ));
        }

        if self.providers.is_empty() {
            errors.push(ValidationError::new(
                "providers",
                "at least one provider must be configured",
            ));
        }

        for (index, provider) in self.providers.iter().enumerate() {
            let field = |name: &str| format!("providers[{index}].{name}");
            let has_key = provider
                .api_key
                .as_deref()
                .is_some_and(|key| !key.trim().is_empty());
            if !provider.kind.is_local() && !has_key {
                errors.push(ValidationError::new(
                    field("api_key"),
                    format!("{} requires an API key", provider.kind),
                ));
            }
            if let Some(url) = &provider.base_url {
                if !is_http_url(url) {
                    errors.push(ValidationError::new(field("base_url"), "must be an http(s) URL"));
                }
            }
            if provider.max_items_per_request == Some(0) {
                errors.push(ValidationError::new(
                    field("max_items_per_request"),
                    "must be greater than zero",
                ));
            }
            if provider.requests_per_minute == 0 {
                errors.push(ValidationError::new(
                    field("requests_per_minute"),
                    "must be greater than zero",
                ));
            }
        }

        let rec = &self.recommendation;
        if rec.target_count == 0 {
            errors.push(ValidationError::new(
                "recommendation.target_count",
                "must be greater than zero",
            ));
        }
        if rec.max_attempts == 0 {
            errors.push(ValidationError::new(
                "recommendation.max_attempts",
                "must be greater than zero",
            ));
        }
        if rec.stagnation_threshold == 0 {
            errors.push(ValidationError::new(
                "recommendation.stagnation_threshold",
                "must be greater than zero",
            ));
        }
        if rec.growth_factor == 0 {
            errors.push(ValidationError::new(
                "recommendation.growth_factor",
                "must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&rec.min_confidence) {
            errors.push(ValidationError::new(
                "recommendation.min_confidence",
                "must be between 0 and 1",
            ));
        }

        if self.musicbrainz.require_mbids && !self.musicbrainz.resolve_mbids {
            errors.push(ValidationError::new(
                "musicbrainz.require_mbids",
                "requires musicbrainz.resolve_mbids",
            ));
        }

        if self.scheduler.refresh_interval_secs == 0 {
            errors.push(ValidationError::new(
                "scheduler.refresh_interval_secs",
                "must be greater than zero",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn is_http_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: ENCORE_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("ENCORE_").split("__"));

    let config: AppConfig = figment.extract()?;
    info!(
        target: "config",
        providers = config.providers.len(),
        target_count = config.recommendation.target_count,
        "configuration loaded"
    );
    Ok(config)
}

/// Load and validate, reporting every invalid field at once.
pub fn load_validated(config_path: Option<&Path>) -> Result<AppConfig> {
    let config = load(config_path)?;
    if let Err(errors) = config.validate() {
        let details = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        bail!("invalid configuration: {details}");
    }
    Ok(config)
}
