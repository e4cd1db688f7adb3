// SPDX-License-Identifier: GPL-3.0-or-later
use crate::cache::{CacheKey, RecommendationCache};
use crate::error::{RecommendationError, Result};
use crate::failover::ProviderChain;
use crate::library::LibraryProfile;
use crate::prompt::PromptBuilder;
use crate::topup::{
    BatchGenerator, GenerationRequest, StopReason, TopUpController, TopUpOutcome, TopUpSettings,
};
use encore_domain::{
    ImportListItem, LibraryFingerprint, Recommendation, RecommendationBatch, RecommendationMode,
};
use encore_infrastructure::{ImportListSink, LibraryRepository, MbidResolver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Asks the provider chain with prompts built from the library profile.
struct PromptedChain<'a> {
    chain: &'a ProviderChain,
    prompts: &'a PromptBuilder,
    profile: &'a LibraryProfile,
}

#[async_trait::async_trait]
impl<'a> BatchGenerator for PromptedChain<'a> {
    fn max_request_size(&self) -> usize {
        self.chain.max_items_per_request()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<RecommendationBatch> {
        let chat = self.prompts.build(self.profile, request);
        let mut batch = self.chain.generate(&chat, cancel).await?;
        if self.prompts.recommendation_mode() == RecommendationMode::Artists {
            for recommendation in &mut batch.recommendations {
                recommendation.album = None;
            }
        }
        Ok(batch)
    }
}

/// Result of one fetch cycle.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub items: Vec<ImportListItem>,
    pub fingerprint: String,
    pub from_cache: bool,
    /// `None` when the result came from the cache.
    pub outcome: Option<TopUpOutcome>,
    /// Items dropped because no MusicBrainz ID could be found.
    pub unresolved: usize,
}

/// One import list: library in, recommendations out.
pub struct ImportListService {
    library: Arc<dyn LibraryRepository>,
    chain: Arc<ProviderChain>,
    resolver: Option<Arc<dyn MbidResolver>>,
    cache: Option<RecommendationCache>,
    prompts: PromptBuilder,
    controller: TopUpController,
    require_mbids: bool,
}

impl ImportListService {
    pub fn builder(
        library: Arc<dyn LibraryRepository>,
        chain: Arc<ProviderChain>,
    ) -> ImportListServiceBuilder {
        ImportListServiceBuilder {
            library,
            chain,
            resolver: None,
            cache: None,
            prompts: PromptBuilder::default(),
            settings: TopUpSettings::default(),
            require_mbids: false,
        }
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// Runs one cycle and returns the import list items.
    ///
    /// Cancellation discards everything; no partial list is returned.
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<FetchReport> {
        let snapshot = self
            .library
            .snapshot()
            .await
            .map_err(RecommendationError::Library)?;
        let fingerprint = LibraryFingerprint::from_snapshot(&snapshot);
        info!(
            target: "import-list",
            fingerprint = fingerprint.short_hash(),
            artists = fingerprint.artist_count(),
            albums = fingerprint.album_count(),
            "library loaded"
        );

        let cache_key = self.chain.primary().map(|primary| {
            CacheKey::new(&fingerprint, primary.id(), primary.model())
        });

        let cached = match (&self.cache, &cache_key) {
            (Some(cache), Some(key)) => cache.get(key),
            _ => None,
        };

        let (recommendations, outcome, from_cache) = match cached {
            Some(batch) => {
                info!(
                    target: "import-list",
                    count = batch.len(),
                    generated_at = %batch.generated_at,
                    "using cached recommendations"
                );
                (batch.recommendations.clone(), None, true)
            }
            None => {
                let profile = LibraryProfile::build(&snapshot, self.prompts.sampling_strategy());
                let generator = PromptedChain {
                    chain: &self.chain,
                    prompts: &self.prompts,
                    profile: &profile,
                };
                let outcome = self.controller.run(&generator, &fingerprint, cancel).await?;
                self.store(&cache_key, &outcome);
                (outcome.recommendations.clone(), Some(outcome), false)
            }
        };

        let (items, unresolved) = self.to_items(&recommendations, cancel).await?;
        info!(
            target: "import-list",
            items = items.len(),
            unresolved,
            from_cache,
            "fetch cycle complete"
        );

        Ok(FetchReport {
            items,
            fingerprint: fingerprint.hash().to_string(),
            from_cache,
            outcome,
            unresolved,
        })
    }

    /// Fetches and hands the items to `sink`. A failed or cancelled cycle
    /// publishes nothing, so the previous list stays in place.
    pub async fn refresh(
        &self,
        sink: &dyn ImportListSink,
        cancel: &CancellationToken,
    ) -> Result<FetchReport> {
        let report = self.fetch(cancel).await?;
        if cancel.is_cancelled() {
            return Err(RecommendationError::Cancelled);
        }
        sink.publish(&report.items)
            .await
            .map_err(RecommendationError::Sink)?;
        Ok(report)
    }

    /// Only complete cycles are cached; a stagnated run is retried next time.
    fn store(&self, key: &Option<CacheKey>, outcome: &TopUpOutcome) {
        let (Some(cache), Some(key)) = (&self.cache, key) else {
            return;
        };
        if outcome.stop_reason != StopReason::TargetReached || outcome.recommendations.is_empty() {
            debug!(target: "import-list", reason = %outcome.stop_reason, "result not cached");
            return;
        }

        let (provider, model) = outcome
            .provider
            .clone()
            .unwrap_or_else(|| (key.provider.clone(), key.model.clone()));
        cache.insert(
            key.clone(),
            RecommendationBatch::new(provider, model, outcome.recommendations.clone()),
        );
    }

    async fn to_items(
        &self,
        recommendations: &[Recommendation],
        cancel: &CancellationToken,
    ) -> Result<(Vec<ImportListItem>, usize)> {
        let mut items: Vec<ImportListItem> =
            recommendations.iter().map(ImportListItem::from).collect();

        let Some(resolver) = &self.resolver else {
            return Ok((items, 0));
        };

        for item in &mut items {
            if cancel.is_cancelled() {
                return Err(RecommendationError::Cancelled);
            }
            let lookup = match &item.album {
                Some(album) => resolver
                    .resolve_album(&item.artist, album)
                    .await
                    .map(|found| found.map(|(artist, album)| (Some(artist), Some(album)))),
                None => resolver
                    .resolve_artist(&item.artist)
                    .await
                    .map(|found| found.map(|artist| (Some(artist), None))),
            };

            match lookup {
                Ok(Some((artist_mbid, album_mbid))) => {
                    item.artist_mbid = artist_mbid;
                    item.album_mbid = album_mbid;
                }
                Ok(None) => {
                    debug!(target: "import-list", artist = %item.artist, album = ?item.album, "no MusicBrainz match");
                }
                Err(error) => {
                    warn!(target: "import-list", artist = %item.artist, error = %error, "MusicBrainz lookup failed");
                }
            }
        }

        if !self.require_mbids {
            return Ok((items, 0));
        }

        let before = items.len();
        items.retain(|item| {
            item.artist_mbid.is_some() && (item.album.is_none() || item.album_mbid.is_some())
        });
        let unresolved = before - items.len();
        Ok((items, unresolved))
    }
}

pub struct ImportListServiceBuilder {
    library: Arc<dyn LibraryRepository>,
    chain: Arc<ProviderChain>,
    resolver: Option<Arc<dyn MbidResolver>>,
    cache: Option<RecommendationCache>,
    prompts: PromptBuilder,
    settings: TopUpSettings,
    require_mbids: bool,
}

impl ImportListServiceBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn MbidResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn cache(mut self, cache: RecommendationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn settings(mut self, settings: TopUpSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Drop items without MusicBrainz IDs. Ignored without a resolver.
    pub fn require_mbids(mut self, require: bool) -> Self {
        self.require_mbids = require;
        self
    }

    pub fn build(self) -> ImportListService {
        ImportListService {
            library: self.library,
            chain: self.chain,
            resolver: self.resolver,
            cache: self.cache,
            prompts: self.prompts,
            controller: TopUpController::new(self.settings),
            require_mbids: self.require_mbids,
        }
    }
}
