// SPDX-License-Identifier: GPL-3.0-or-later
use crate::library::LibraryProfile;
use crate::topup::GenerationRequest;
use encore_config::RecommendationConfig;
use encore_domain::{DiscoveryMode, RecommendationMode, SamplingStrategy};
use encore_providers::ChatRequest;
use std::fmt::Write;

const TOKENS_PER_ITEM: u32 = 80;
const BASE_TOKENS: u32 = 300;
const MAX_TOKENS: u32 = 4096;
/// Exclusions beyond this are summarized instead of listed.
const MAX_LISTED_EXCLUSIONS: usize = 100;

const SYSTEM_PROMPT: &str = "You are a music recommendation engine. \
Respond with JSON only: an object with a \"recommendations\" array. \
Each element has \"artist\" (required), \"album\", \"genre\", \"year\" (integer), \
\"confidence\" (0.0 to 1.0) and \"reason\" (one short sentence). \
Only recommend real, released music. Do not add commentary outside the JSON.";

/// Builds chat requests from the library profile and the current top-up request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PromptBuilder {
    discovery_mode: DiscoveryMode,
    recommendation_mode: RecommendationMode,
    sampling_strategy: SamplingStrategy,
}

impl From<&RecommendationConfig> for PromptBuilder {
    fn from(config: &RecommendationConfig) -> Self {
        Self::new(
            config.discovery_mode,
            config.recommendation_mode,
            config.sampling_strategy,
        )
    }
}

impl PromptBuilder {
    pub fn new(
        discovery_mode: DiscoveryMode,
        recommendation_mode: RecommendationMode,
        sampling_strategy: SamplingStrategy,
    ) -> Self {
        Self {
            discovery_mode,
            recommendation_mode,
            sampling_strategy,
        }
    }

    pub fn sampling_strategy(&self) -> SamplingStrategy {
        self.sampling_strategy
    }

    pub fn recommendation_mode(&self) -> RecommendationMode {
        self.recommendation_mode
    }

    pub fn build(&self, profile: &LibraryProfile, request: &GenerationRequest) -> ChatRequest {
        let mut prompt = String::new();

        let _ = writeln!(prompt, "{}", self.task_line(request.request_size));
        let _ = writeln!(prompt, "{}", self.discovery_line());
        prompt.push('\n');
        self.write_library(&mut prompt, profile);

        if !request.exclusions.is_empty() {
            prompt.push('\n');
            let _ = writeln!(
                prompt,
                "Already suggested (do not repeat any of these):"
            );
            for excluded in request.exclusions.iter().take(MAX_LISTED_EXCLUSIONS) {
                let _ = writeln!(prompt, "- {excluded}");
            }
            if request.exclusions.len() > MAX_LISTED_EXCLUSIONS {
                let _ = writeln!(
                    prompt,
                    "- ...and {} more",
                    request.exclusions.len() - MAX_LISTED_EXCLUSIONS
                );
            }
        }

        prompt.push('\n');
        prompt.push_str("Never recommend anything listed in the library above.");

        ChatRequest::new(SYSTEM_PROMPT, prompt)
            .max_tokens(token_budget(request.request_size))
            .temperature(self.temperature())
    }

    fn task_line(&self, count: usize) -> String {
        match self.recommendation_mode {
            RecommendationMode::Artists => format!(
                "Recommend {count} artists the listener does not have yet. Leave \"album\" out."
            ),
            RecommendationMode::Albums => format!(
                "Recommend {count} specific albums the listener does not have yet, \
                 with the exact album title in \"album\"."
            ),
        }
    }

    fn discovery_line(&self) -> &'static str {
        match self.discovery_mode {
            DiscoveryMode::Similar => {
                "Stay close to the library: same genres, same eras, artists with a direct stylistic link."
            }
            DiscoveryMode::Adjacent => {
                "Branch out one step: related genres and scenes the library touches but does not cover."
            }
            DiscoveryMode::Exploratory => {
                "Be adventurous: unfamiliar genres, regions and eras that a fan of this library could still enjoy."
            }
        }
    }

    fn write_library(&self, prompt: &mut String, profile: &LibraryProfile) {
        if profile.is_empty() {
            prompt.push_str("The library is empty; recommend widely acclaimed starting points.\n");
            return;
        }

        let _ = writeln!(
            prompt,
            "Library: {} artists, {} albums.",
            profile.artist_count, profile.album_count
        );
        if !profile.top_genres.is_empty() {
            let genres: Vec<String> = profile
                .top_genres
                .iter()
                .map(|(genre, count)| format!("{genre} ({count})"))
                .collect();
            let _ = writeln!(prompt, "Top genres: {}.", genres.join(", "));
        }
        if !profile.decades.is_empty() {
            let decades: Vec<String> = profile
                .decades
                .iter()
                .map(|(decade, count)| format!("{decade}s: {count}"))
                .collect();
            let _ = writeln!(prompt, "Albums by decade: {}.", decades.join(", "));
        }
        if !profile.sample_artists.is_empty() {
            let _ = writeln!(prompt, "Artists include: {}.", profile.sample_artists.join(", "));
        }
        if !profile.sample_albums.is_empty() {
            let _ = writeln!(prompt, "Albums include: {}.", profile.sample_albums.join("; "));
        }
    }

    fn temperature(&self) -> f32 {
        match self.discovery_mode {
            DiscoveryMode::Similar => 0.5,
            DiscoveryMode::Adjacent => 0.7,
            DiscoveryMode::Exploratory => 0.9,
        }
    }
}

fn token_budget(request_size: usize) -> u32 {
    let items = u32::try_from(request_size).unwrap_or(u32::MAX);
    items
        .saturating_mul(TOKENS_PER_ITEM)
        .saturating_add(BASE_TOKENS)
        .min(MAX_TOKENS)
}
