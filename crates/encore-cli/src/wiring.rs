// SPDX-License-Identifier: GPL-3.0-or-later

//! Builds the runtime object graph from [`AppConfig`].

use anyhow::{Context, Result};
use encore_application::{
    ImportListService, PromptBuilder, ProviderChain, RecommendationCache, TopUpSettings,
};
use encore_config::{AppConfig, ProviderConfig};
use encore_infrastructure::{LidarrClient, MusicBrainzResolver};
use encore_providers::{CompletionProvider, ProviderClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub fn provider_client(config: &AppConfig, provider: &ProviderConfig) -> Result<ProviderClient> {
    let mut builder = ProviderClient::builder(provider.kind)
        .timeout(Duration::from_secs(provider.timeout_secs))
        .requests_per_minute(provider.requests_per_minute)
        .circuit_breaker(
            config.circuit_breaker.failure_threshold,
            Duration::from_secs(config.circuit_breaker.cooldown_secs),
        );

    if let Some(url) = &provider.base_url {
        builder = builder.base_url(url.clone());
    }
    if let Some(model) = &provider.model {
        builder = builder.model(model.clone());
    }
    if let Some(key) = &provider.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(max) = provider.max_items_per_request {
        builder = builder.max_items_per_request(max);
    }

    builder
        .build()
        .with_context(|| format!("failed to build {} client", provider.kind.as_str()))
}

pub fn provider_clients(config: &AppConfig) -> Result<Vec<ProviderClient>> {
    config
        .providers
        .iter()
        .map(|provider| provider_client(config, provider))
        .collect()
}

pub fn provider_chain(config: &AppConfig) -> Result<ProviderChain> {
    let providers = provider_clients(config)?
        .into_iter()
        .map(|client| Arc::new(client) as Arc<dyn CompletionProvider>)
        .collect();

    Ok(ProviderChain::new(providers).with_delay(
        Duration::from_millis(config.failover.delay_ms),
        Duration::from_millis(config.failover.jitter_ms),
    ))
}

pub fn lidarr_client(config: &AppConfig) -> Result<LidarrClient> {
    let api_key = config
        .lidarr
        .api_key
        .clone()
        .context("lidarr.api_key is not set (ENCORE_LIDARR__API_KEY)")?;
    Ok(LidarrClient::new(
        &config.lidarr.base_url,
        api_key,
        Duration::from_secs(config.lidarr.timeout_secs),
    )?)
}

pub fn import_list_service(config: &AppConfig) -> Result<ImportListService> {
    let library = Arc::new(lidarr_client(config)?);
    let chain = Arc::new(provider_chain(config)?);

    let mut builder = ImportListService::builder(library, chain)
        .prompts(PromptBuilder::from(&config.recommendation))
        .settings(TopUpSettings::from(&config.recommendation))
        .require_mbids(config.musicbrainz.require_mbids);

    if config.cache.enabled {
        builder = builder.cache(RecommendationCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        ));
    }
    if config.musicbrainz.resolve_mbids {
        let resolver = MusicBrainzResolver::new(config.musicbrainz.base_url.clone())?;
        builder = builder.resolver(Arc::new(resolver));
    }

    info!(
        target: "cli",
        providers = config.providers.len(),
        cache = config.cache.enabled,
        musicbrainz = config.musicbrainz.resolve_mbids,
        "import list service ready"
    );
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_domain::ProviderKind;

    #[test]
    fn chain_follows_configured_order() {
        let mut config = AppConfig::default();
        let mut groq = ProviderConfig::new(ProviderKind::Groq);
        groq.api_key = Some("gsk-test".into());
        groq.max_items_per_request = Some(12);
        config.providers = vec![groq, ProviderConfig::new(ProviderKind::Ollama)];

        let chain = provider_chain(&config).unwrap();
        let ids: Vec<&str> = chain.providers().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["groq", "ollama"]);
        assert_eq!(chain.max_items_per_request(), 12);
    }

    #[test]
    fn custom_model_and_endpoint_are_applied() {
        let config = AppConfig::default();
        let mut ollama = ProviderConfig::new(ProviderKind::Ollama);
        ollama.base_url = Some("http://gpu-box:11434/".into());
        ollama.model = Some("qwen2.5:14b".into());

        let client = provider_client(&config, &ollama).unwrap();
        assert_eq!(client.base_url(), "http://gpu-box:11434");
        assert_eq!(client.model(), "qwen2.5:14b");
    }

    #[test]
    fn lidarr_requires_api_key() {
        let config = AppConfig::default();
        let error = lidarr_client(&config).unwrap_err();
        assert!(error.to_string().contains("api_key"));
    }

    #[test]
    fn service_builds_with_all_options() {
        let mut config = AppConfig::default();
        config.lidarr.api_key = Some("secret".into());
        config.musicbrainz.resolve_mbids = true;
        assert!(import_list_service(&config).is_ok());
    }
}
