// SPDX-License-Identifier: GPL-3.0-or-later

//! MusicBrainz ID lookup for recommended artists and albums.

use crate::repositories::MbidResolver;
use encore_domain::normalize_name;
use encore_providers::RateLimiter;
use moka::sync::Cache;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const MUSICBRAINZ_API_BASE: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = concat!(
    "Encore/",
    env!("CARGO_PKG_VERSION"),
    " ( https://github.com/encore-music/encore )"
);
/// Search score below which a differently-spelled result is not trusted.
const MIN_SCORE: u32 = 90;

#[derive(Debug, Deserialize)]
struct ArtistSearch {
    #[serde(default)]
    artists: Vec<ArtistHit>,
}

#[derive(Debug, Deserialize)]
struct ArtistHit {
    id: String,
    name: String,
    #[serde(default)]
    score: u32,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupSearch {
    #[serde(rename = "release-groups", default)]
    release_groups: Vec<ReleaseGroupHit>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupHit {
    id: String,
    title: String,
    #[serde(default)]
    score: u32,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ArtistCredit>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    artist: CreditedArtist,
}

#[derive(Debug, Deserialize)]
struct CreditedArtist {
    id: String,
    name: String,
}

fn is_trusted(expected: &str, found: &str, score: u32) -> bool {
    normalize_name(expected) == normalize_name(found) || score >= MIN_SCORE
}

/// Resolves names to MusicBrainz IDs at MusicBrainz's 1 request/second limit.
/// Answers (including misses) are cached for the lifetime of the resolver.
#[derive(Clone)]
pub struct MusicBrainzResolver {
    client: Client,
    base_url: String,
    rate_limiter: RateLimiter,
    artist_cache: Cache<String, Option<String>>,
    album_cache: Cache<String, Option<(String, String)>>,
}

impl MusicBrainzResolver {
    pub fn new(base_url: Option<String>) -> anyhow::Result<Self> {
        Self::with_rate_limit(base_url, Duration::from_secs(1))
    }

    pub fn with_rate_limit(base_url: Option<String>, interval: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| MUSICBRAINZ_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            rate_limiter: RateLimiter::new(1, interval),
            artist_cache: Cache::new(10_000),
            album_cache: Cache::new(10_000),
        })
    }

    async fn search<T: for<'de> Deserialize<'de>>(
        &self,
        entity: &str,
        query: &str,
    ) -> anyhow::Result<T> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, entity))?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("fmt", "json")
            .append_pair("limit", "5");

        self.rate_limiter.acquire().await;
        trace!(target: "musicbrainz", "GET {}", url);

        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        debug!(target: "musicbrainz", "response status: {}", status);

        if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS {
            anyhow::bail!("MusicBrainz rate limit exceeded");
        }
        if !status.is_success() {
            anyhow::bail!("MusicBrainz API error: {}", status);
        }

        Ok(response.json::<T>().await?)
    }
}

/// Lucene phrase escaping for MusicBrainz search.
fn phrase(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait::async_trait]
impl MbidResolver for MusicBrainzResolver {
    async fn resolve_artist(&self, artist: &str) -> anyhow::Result<Option<String>> {
        let cache_key = normalize_name(artist);
        if let Some(cached) = self.artist_cache.get(&cache_key) {
            return Ok(cached);
        }

        let search: ArtistSearch = self
            .search("artist", &format!("artist:{}", phrase(artist)))
            .await?;
        let resolved = search
            .artists
            .into_iter()
            .find(|hit| is_trusted(artist, &hit.name, hit.score))
            .map(|hit| hit.id);

        debug!(target: "musicbrainz", artist, resolved = resolved.is_some(), "artist lookup");
        self.artist_cache.insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    async fn resolve_album(
        &self,
        artist: &str,
        album: &str,
    ) -> anyhow::Result<Option<(String, String)>> {
        let cache_key = format!("{}\u{1f}{}", normalize_name(artist), normalize_name(album));
        if let Some(cached) = self.album_cache.get(&cache_key) {
            return Ok(cached);
        }

        let query = format!("releasegroup:{} AND artist:{}", phrase(album), phrase(artist));
        let search: ReleaseGroupSearch = self.search("release-group", &query).await?;
        let resolved = search.release_groups.into_iter().find_map(|hit| {
            if !is_trusted(album, &hit.title, hit.score) {
                return None;
            }
            let credit = hit
                .artist_credit
                .into_iter()
                .find(|credit| normalize_name(&credit.artist.name) == normalize_name(artist))?;
            Some((credit.artist.id, hit.id))
        });

        debug!(target: "musicbrainz", artist, album, resolved = resolved.is_some(), "album lookup");
        self.album_cache.insert(cache_key, resolved.clone());
        Ok(resolved)
    }
}
