// SPDX-License-Identifier: GPL-3.0-or-later

//! Iterative top-up: keep asking for recommendations until enough unique,
//! library-absent ones are collected.
//!
//! The first request asks for the target count (capped by the generator).
//! Every following request asks for `remaining * growth_factor`, again capped,
//! and lists everything already collected as exclusions. The loop stops when
//! the target is reached, the attempt budget is spent, or a number of
//! consecutive iterations added nothing new. Running short is not an error:
//! the outcome carries whatever was collected and the reason it stopped.

use crate::error::{RecommendationError, Result};
use encore_config::RecommendationConfig;
use encore_domain::{LibraryFingerprint, Recommendation, RecommendationBatch, RecommendationKey};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One request to a [`BatchGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Number of recommendations to ask for.
    pub request_size: usize,
    /// 1-based iteration number.
    pub attempt: u32,
    /// Display names (`Artist` or `Artist - Album`) of everything collected so far.
    pub exclusions: Vec<String>,
}

/// Source of recommendation batches for the top-up loop.
#[async_trait::async_trait]
pub trait BatchGenerator: Send + Sync {
    /// Largest request size the backend accepts.
    fn max_request_size(&self) -> usize;

    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<RecommendationBatch>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopUpSettings {
    pub target_count: usize,
    pub max_attempts: u32,
    pub stagnation_threshold: u32,
    pub growth_factor: usize,
    pub min_confidence: f32,
}

impl Default for TopUpSettings {
    fn default() -> Self {
        Self::from(&RecommendationConfig::default())
    }
}

impl From<&RecommendationConfig> for TopUpSettings {
    fn from(config: &RecommendationConfig) -> Self {
        Self {
            target_count: config.target_count,
            max_attempts: config.max_attempts,
            stagnation_threshold: config.stagnation_threshold,
            growth_factor: config.growth_factor,
            min_confidence: config.min_confidence,
        }
    }
}

/// Per-cycle accumulator. `collected` keeps insertion order and never holds
/// two entries with the same [`RecommendationKey`].
#[derive(Debug, Clone)]
pub struct TopUpState {
    target_count: usize,
    max_attempts: u32,
    attempts: u32,
    collected: Vec<Recommendation>,
    keys: HashSet<RecommendationKey>,
}

impl TopUpState {
    pub fn new(target_count: usize, max_attempts: u32) -> Self {
        Self {
            target_count,
            max_attempts,
            attempts: 0,
            collected: Vec::with_capacity(target_count),
            keys: HashSet::with_capacity(target_count),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn collected(&self) -> &[Recommendation] {
        &self.collected
    }

    pub fn remaining(&self) -> usize {
        self.target_count.saturating_sub(self.collected.len())
    }

    pub fn is_complete(&self) -> bool {
        self.collected.len() >= self.target_count
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn contains(&self, key: &RecommendationKey) -> bool {
        self.keys.contains(key)
    }

    /// Adds the recommendation unless its key is already collected.
    pub fn insert(&mut self, recommendation: Recommendation) -> bool {
        if !self.keys.insert(recommendation.key()) {
            return false;
        }
        self.collected.push(recommendation);
        true
    }

    pub fn exclusions(&self) -> Vec<String> {
        self.collected
            .iter()
            .map(|rec| match &rec.album {
                Some(album) => format!("{} - {}", rec.artist, album),
                None => rec.artist.clone(),
            })
            .collect()
    }

    fn into_collected(self) -> Vec<Recommendation> {
        self.collected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    AttemptsExhausted,
    /// Consecutive iterations produced nothing new.
    Stagnated,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetReached => write!(f, "target reached"),
            Self::AttemptsExhausted => write!(f, "attempts exhausted"),
            Self::Stagnated => write!(f, "stagnated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopUpOutcome {
    pub recommendations: Vec<Recommendation>,
    pub attempts: u32,
    pub stop_reason: StopReason,
    pub duplicates_filtered: usize,
    pub library_filtered: usize,
    pub low_confidence_filtered: usize,
    /// Iterations whose generator call failed.
    pub failed_attempts: u32,
    /// Provider and model of the last successful batch.
    pub provider: Option<(String, String)>,
}

#[derive(Debug, Default)]
struct Filtered {
    duplicates: usize,
    library: usize,
    low_confidence: usize,
}

#[derive(Debug, Clone)]
pub struct TopUpController {
    settings: TopUpSettings,
}

impl TopUpController {
    pub fn new(settings: TopUpSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TopUpSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        generator: &dyn BatchGenerator,
        fingerprint: &LibraryFingerprint,
        cancel: &CancellationToken,
    ) -> Result<TopUpOutcome> {
        let settings = &self.settings;
        let cap = generator.max_request_size().max(1);
        let growth = settings.growth_factor.max(1);
        let stagnation_threshold = settings.stagnation_threshold.max(1);

        let mut state = TopUpState::new(settings.target_count, settings.max_attempts.max(1));
        let mut filtered = Filtered::default();
        let mut failed_attempts = 0;
        let mut zero_yield_streak = 0;
        let mut previous_hash: Option<String> = None;
        let mut provider = None;
        let mut request_size = settings.target_count.min(cap);

        let stop_reason = loop {
            if state.is_complete() {
                break StopReason::TargetReached;
            }
            if cancel.is_cancelled() {
                return Err(RecommendationError::Cancelled);
            }

            state.attempts += 1;
            let request = GenerationRequest {
                request_size,
                attempt: state.attempts,
                exclusions: state.exclusions(),
            };
            let hash = request_hash(fingerprint, &request);
            debug!(
                target: "topup",
                attempt = request.attempt,
                request_size,
                exclusions = request.exclusions.len(),
                request_hash = %hash,
                repeated = previous_hash.as_deref() == Some(hash.as_str()),
                "requesting recommendations"
            );
            previous_hash = Some(hash);

            let added = match generator.generate(&request, cancel).await {
                Ok(batch) => {
                    provider = Some((batch.provider.clone(), batch.model.clone()));
                    self.absorb(&mut state, batch, fingerprint, &mut filtered)
                }
                Err(RecommendationError::Cancelled) => return Err(RecommendationError::Cancelled),
                Err(error) => {
                    failed_attempts += 1;
                    warn!(
                        target: "topup",
                        attempt = request.attempt,
                        error = %error,
                        "recommendation request failed"
                    );
                    0
                }
            };

            info!(
                target: "topup",
                attempt = request.attempt,
                requested = request_size,
                added,
                collected = state.collected().len(),
                target = settings.target_count,
                "top-up iteration complete"
            );

            if state.is_complete() {
                break StopReason::TargetReached;
            }
            zero_yield_streak = if added == 0 { zero_yield_streak + 1 } else { 0 };
            if zero_yield_streak >= stagnation_threshold {
                break StopReason::Stagnated;
            }
            if !state.can_retry() {
                break StopReason::AttemptsExhausted;
            }

            request_size = state.remaining().saturating_mul(growth).clamp(1, cap);
        };

        let attempts = state.attempts();
        if stop_reason != StopReason::TargetReached {
            warn!(
                target: "topup",
                collected = state.collected().len(),
                target = settings.target_count,
                attempts,
                reason = %stop_reason,
                "returning fewer recommendations than requested"
            );
        }

        Ok(TopUpOutcome {
            recommendations: state.into_collected(),
            attempts,
            stop_reason,
            duplicates_filtered: filtered.duplicates,
            library_filtered: filtered.library,
            low_confidence_filtered: filtered.low_confidence,
            failed_attempts,
            provider,
        })
    }

    /// Returns the number of recommendations added to `state`.
    fn absorb(
        &self,
        state: &mut TopUpState,
        batch: RecommendationBatch,
        fingerprint: &LibraryFingerprint,
        filtered: &mut Filtered,
    ) -> usize {
        let mut added = 0;
        for recommendation in batch.recommendations {
            if state.is_complete() {
                break;
            }
            if recommendation.confidence < self.settings.min_confidence {
                filtered.low_confidence += 1;
                continue;
            }

            let key = recommendation.key();
            if fingerprint.contains(&key) {
                filtered.library += 1;
            } else if state.insert(recommendation) {
                added += 1;
            } else {
                filtered.duplicates += 1;
            }
        }
        added
    }
}

/// Digest of everything that shapes a request, for spotting repeats in logs.
fn request_hash(fingerprint: &LibraryFingerprint, request: &GenerationRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.hash().as_bytes());
    hasher.update(request.request_size.to_le_bytes());
    for exclusion in &request.exclusions {
        hasher.update(exclusion.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_domain::{LibraryAlbum, LibraryArtist, LibrarySnapshot};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted batches and records the requests it saw.
    struct Scripted {
        cap: usize,
        responses: Mutex<VecDeque<Result<Vec<Recommendation>>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl Scripted {
        fn new(cap: usize, responses: Vec<Result<Vec<Recommendation>>>) -> Self {
            Self {
                cap,
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl BatchGenerator for Scripted {
        fn max_request_size(&self) -> usize {
            self.cap
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
            _cancel: &CancellationToken,
        ) -> Result<RecommendationBatch> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self.responses.lock().unwrap().pop_front().unwrap_or(Ok(vec![]));
            next.map(|recs| RecommendationBatch::new("test", "scripted", recs))
        }
    }

    fn albums(prefix: &str, count: usize) -> Vec<Recommendation> {
        (0..count)
            .map(|i| Recommendation::new(format!("{prefix} {i}")).with_album("LP"))
            .collect()
    }

    fn empty_library() -> LibraryFingerprint {
        LibraryFingerprint::from_snapshot(&LibrarySnapshot::default())
    }

    fn settings(target: usize, max_attempts: u32) -> TopUpSettings {
        TopUpSettings {
            target_count: target,
            max_attempts,
            stagnation_threshold: 2,
            growth_factor: 2,
            min_confidence: 0.0,
        }
    }

    #[tokio::test]
    async fn tops_up_past_duplicates_to_target() {
        let first = albums("Artist", 6);
        let mut second = albums("Other", 4);
        second.insert(2, first[3].clone());
        let generator = Scripted::new(50, vec![Ok(first), Ok(second)]);

        let outcome = TopUpController::new(settings(10, 5))
            .run(&generator, &empty_library(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.recommendations.len(), 10);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.stop_reason, StopReason::TargetReached);
        assert_eq!(outcome.duplicates_filtered, 1);

        let requests = generator.requests();
        assert_eq!(requests[0].request_size, 10);
        assert!(requests[0].exclusions.is_empty());
        assert_eq!(requests[1].request_size, 8);
        assert_eq!(requests[1].exclusions.len(), 6);
        assert_eq!(requests[1].exclusions[0], "Artist 0 - LP");
    }

    #[tokio::test]
    async fn never_returns_library_items_or_duplicate_keys() {
        let snapshot = LibrarySnapshot::new(
            vec![LibraryArtist {
                id: 1,
                name: "Radiohead".into(),
                mbid: None,
                genres: vec![],
            }],
            vec![LibraryAlbum {
                id: 2,
                artist_id: 1,
                artist_name: "Radiohead".into(),
                title: "Kid A".into(),
                mbid: None,
                release_year: Some(2000),
                genres: vec![],
            }],
        );
        let fingerprint = LibraryFingerprint::from_snapshot(&snapshot);
        let batch = vec![
            Recommendation::new("radiohead").with_album("KID A"),
            Recommendation::new("Radiohead"),
            Recommendation::new("Radiohead").with_album("Amnesiac"),
            Recommendation::new("  Radiohead ").with_album("amnesiac"),
            Recommendation::new("Portishead").with_album("Third"),
        ];
        let generator = Scripted::new(50, vec![Ok(batch)]);

        let outcome = TopUpController::new(settings(2, 3))
            .run(&generator, &fingerprint, &CancellationToken::new())
            .await
            .unwrap();

        let keys: Vec<_> = outcome.recommendations.iter().map(|r| r.key()).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|key| !fingerprint.contains(key)));
        assert_eq!(outcome.library_filtered, 2);
        assert_eq!(outcome.duplicates_filtered, 1);
    }

    #[tokio::test]
    async fn request_size_respects_generator_cap() {
        let generator = Scripted::new(5, vec![Ok(albums("A", 5)), Ok(albums("B", 5))]);

        let outcome = TopUpController::new(settings(30, 2))
            .run(&generator, &empty_library(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(generator.requests().iter().all(|r| r.request_size == 5));
        assert_eq!(outcome.recommendations.len(), 10);
        assert_eq!(outcome.stop_reason, StopReason::AttemptsExhausted);
    }

    #[tokio::test]
    async fn stops_after_consecutive_zero_yield_iterations() {
        let repeat = albums("Same", 3);
        let generator = Scripted::new(
            50,
            vec![Ok(repeat.clone()), Ok(repeat.clone()), Ok(repeat), Ok(albums("Late", 10))],
        );

        let outcome = TopUpController::new(settings(10, 10))
            .run(&generator, &empty_library(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::Stagnated);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.recommendations.len(), 3);
        assert_eq!(outcome.duplicates_filtered, 6);
    }

    #[tokio::test]
    async fn stagnation_threshold_is_configurable() {
        let generator = Scripted::new(50, vec![Ok(albums("A", 1))]);
        let mut settings = settings(10, 10);
        settings.stagnation_threshold = 4;

        let outcome = TopUpController::new(settings)
            .run(&generator, &empty_library(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 5);
        assert_eq!(outcome.stop_reason, StopReason::Stagnated);
    }

    #[tokio::test]
    async fn generator_errors_count_as_empty_iterations() {
        let generator = Scripted::new(
            50,
            vec![
                Err(RecommendationError::ParseFailure),
                Ok(albums("A", 4)),
            ],
        );

        let outcome = TopUpController::new(settings(4, 3))
            .run(&generator, &empty_library(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failed_attempts, 1);
        assert_eq!(outcome.recommendations.len(), 4);
        assert_eq!(outcome.provider, Some(("test".into(), "scripted".into())));
    }

    #[tokio::test]
    async fn low_confidence_entries_are_filtered() {
        let batch = vec![
            Recommendation::new("Drop").with_confidence(0.2),
            Recommendation::new("Keep").with_confidence(0.9),
        ];
        let generator = Scripted::new(50, vec![Ok(batch)]);
        let mut settings = settings(1, 1);
        settings.min_confidence = 0.5;

        let outcome = TopUpController::new(settings)
            .run(&generator, &empty_library(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.recommendations[0].artist, "Keep");
        assert_eq!(outcome.low_confidence_filtered, 1);
    }

    #[tokio::test]
    async fn cancellation_discards_partial_results() {
        let generator = Scripted::new(50, vec![Ok(albums("A", 1))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = TopUpController::new(settings(5, 3))
            .run(&generator, &empty_library(), &cancel)
            .await;
        assert!(matches!(result, Err(RecommendationError::Cancelled)));
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn zero_target_makes_no_requests() {
        let generator = Scripted::new(50, vec![]);

        let outcome = TopUpController::new(settings(0, 3))
            .run(&generator, &empty_library(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.stop_reason, StopReason::TargetReached);
        assert!(generator.requests().is_empty());
    }
}
