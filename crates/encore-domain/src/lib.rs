// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use unicode_normalization::UnicodeNormalization;

/// Confidence assigned to recommendations that do not carry one.
pub const DEFAULT_CONFIDENCE: f32 = 0.85;

// ============================================================================
// Enums
// ============================================================================

/// AI chat-completion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    #[serde(alias = "lm_studio", alias = "lm-studio")]
    LmStudio,
    OpenAi,
    Anthropic,
    Gemini,
    Groq,
    DeepSeek,
    Perplexity,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 9] = [
        Self::Ollama,
        Self::LmStudio,
        Self::OpenAi,
        Self::Anthropic,
        Self::Gemini,
        Self::Groq,
        Self::DeepSeek,
        Self::Perplexity,
        Self::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::DeepSeek => "deepseek",
            Self::Perplexity => "perplexity",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Local providers run on the user's machine and need no API key.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Ollama | Self::LmStudio)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown provider: {s}"))
    }
}

/// How far recommendations may stray from the existing library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    Similar,
    #[default]
    Adjacent,
    Exploratory,
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Similar => write!(f, "similar"),
            Self::Adjacent => write!(f, "adjacent"),
            Self::Exploratory => write!(f, "exploratory"),
        }
    }
}

/// Whether the list asks for whole artists or specific albums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationMode {
    Artists,
    #[default]
    Albums,
}

impl std::fmt::Display for RecommendationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Artists => write!(f, "artists"),
            Self::Albums => write!(f, "albums"),
        }
    }
}

/// Amount of library context sent along with each prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    Minimal,
    #[default]
    Balanced,
    Comprehensive,
}

impl SamplingStrategy {
    /// Number of library artists sampled into the prompt.
    pub fn artist_sample_size(&self) -> usize {
        match self {
            Self::Minimal => 10,
            Self::Balanced => 25,
            Self::Comprehensive => 50,
        }
    }

    /// Number of library albums sampled into the prompt.
    pub fn album_sample_size(&self) -> usize {
        match self {
            Self::Minimal => 10,
            Self::Balanced => 30,
            Self::Comprehensive => 60,
        }
    }
}

// ============================================================================
// Recommendations
// ============================================================================

/// Normalize a name for comparison: NFKC, lowercase, trimmed, single spaces.
pub fn normalize_name(value: &str) -> String {
    value
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identity of a recommendation for deduplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecommendationKey {
    pub artist: String,
    /// Empty for artist-only recommendations.
    pub album: String,
}

impl RecommendationKey {
    pub fn new(artist: &str, album: Option<&str>) -> Self {
        Self {
            artist: normalize_name(artist),
            album: album.map(normalize_name).unwrap_or_default(),
        }
    }

    pub fn is_artist_only(&self) -> bool {
        self.album.is_empty()
    }
}

impl std::fmt::Display for RecommendationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.album.is_empty() {
            write!(f, "{}", self.artist)
        } else {
            write!(f, "{} - {}", self.artist, self.album)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub artist: String,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub confidence: f32,
    pub reason: String,
}

impl Recommendation {
    pub fn new(artist: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            album: None,
            genre: None,
            year: None,
            confidence: DEFAULT_CONFIDENCE,
            reason: String::new(),
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Sets the confidence, clamped to [0, 1]. NaN falls back to the default.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn key(&self) -> RecommendationKey {
        RecommendationKey::new(&self.artist, self.album.as_deref())
    }
}

pub fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        DEFAULT_CONFIDENCE
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Recommendations produced by a single provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationBatch {
    pub provider: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,
    pub recommendations: Vec<Recommendation>,
}

impl RecommendationBatch {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        recommendations: Vec<Recommendation>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            generated_at: Utc::now(),
            recommendations,
        }
    }

    pub fn len(&self) -> usize {
        self.recommendations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty()
    }
}

// ============================================================================
// Library
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryArtist {
    pub id: i64,
    pub name: String,
    pub mbid: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryAlbum {
    pub id: i64,
    pub artist_id: i64,
    pub artist_name: String,
    pub title: String,
    pub mbid: Option<String>,
    pub release_year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// Point-in-time view of the music library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    pub artists: Vec<LibraryArtist>,
    pub albums: Vec<LibraryAlbum>,
}

impl LibrarySnapshot {
    pub fn new(artists: Vec<LibraryArtist>, albums: Vec<LibraryAlbum>) -> Self {
        Self { artists, albums }
    }

    pub fn is_empty(&self) -> bool {
        self.artists.is_empty() && self.albums.is_empty()
    }
}

/// Stable summary of the library used to deduplicate recommendations and to
/// key the recommendation cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFingerprint {
    hash: String,
    artists: HashSet<String>,
    pairs: HashSet<RecommendationKey>,
}

impl LibraryFingerprint {
    pub fn from_snapshot(snapshot: &LibrarySnapshot) -> Self {
        let mut sorted: BTreeSet<RecommendationKey> = BTreeSet::new();

        for artist in &snapshot.artists {
            sorted.insert(RecommendationKey::new(&artist.name, None));
        }
        for album in &snapshot.albums {
            sorted.insert(RecommendationKey::new(&album.artist_name, None));
            sorted.insert(RecommendationKey::new(&album.artist_name, Some(&album.title)));
        }

        let mut hasher = Sha256::new();
        for key in &sorted {
            hasher.update(key.artist.as_bytes());
            hasher.update([0x1f]);
            hasher.update(key.album.as_bytes());
            hasher.update([0x1e]);
        }
        let hash = format!("{:x}", hasher.finalize());

        let artists = sorted
            .iter()
            .filter(|key| key.is_artist_only())
            .map(|key| key.artist.clone())
            .collect();
        let pairs = sorted.into_iter().filter(|key| !key.is_artist_only()).collect();

        Self {
            hash,
            artists,
            pairs,
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Short form for logs and cache keys.
    pub fn short_hash(&self) -> &str {
        &self.hash[..12.min(self.hash.len())]
    }

    pub fn artist_count(&self) -> usize {
        self.artists.len()
    }

    pub fn album_count(&self) -> usize {
        self.pairs.len()
    }

    /// Artist-only keys match on the artist; album keys match the exact pair.
    pub fn contains(&self, key: &RecommendationKey) -> bool {
        if key.is_artist_only() {
            self.artists.contains(&key.artist)
        } else {
            self.pairs.contains(key)
        }
    }

    pub fn contains_artist(&self, artist: &str) -> bool {
        self.artists.contains(&normalize_name(artist))
    }
}

// ============================================================================
// Import list output
// ============================================================================

/// Record handed to Lidarr's import pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportListItem {
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_mbid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_mbid: Option<String>,
}

impl From<&Recommendation> for ImportListItem {
    fn from(rec: &Recommendation) -> Self {
        Self {
            artist: rec.artist.clone(),
            album: rec.album.clone(),
            release_year: rec.year,
            artist_mbid: None,
            album_mbid: None,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), Vec<ValidationError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> LibrarySnapshot {
        LibrarySnapshot::new(
            vec![LibraryArtist {
                id: 1,
                name: "Radiohead".into(),
                mbid: None,
                genres: vec!["alternative".into()],
            }],
            vec![LibraryAlbum {
                id: 10,
                artist_id: 1,
                artist_name: "Radiohead".into(),
                title: "OK Computer".into(),
                mbid: None,
                release_year: Some(1997),
                genres: vec![],
            }],
        )
    }

    #[test]
    fn normalize_name_collapses_case_and_whitespace() {
        assert_eq!(normalize_name("  The   National "), "the national");
        assert_eq!(normalize_name("Ｂｊｏｒｋ"), "bjork");
    }

    #[test]
    fn recommendation_key_ignores_formatting() {
        let a = Recommendation::new("Boards of Canada").with_album("Geogaddi");
        let b = Recommendation::new(" boards  OF canada ").with_album("GEOGADDI ");
        assert_eq!(a.key(), b.key());
        assert!(!a.key().is_artist_only());
        assert!(Recommendation::new("Low").key().is_artist_only());
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Recommendation::new("A").with_confidence(1.7).confidence, 1.0);
        assert_eq!(Recommendation::new("A").with_confidence(-0.2).confidence, 0.0);
        assert_eq!(
            Recommendation::new("A").with_confidence(f32::NAN).confidence,
            DEFAULT_CONFIDENCE
        );
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let mut reversed = snapshot();
        reversed.artists.push(LibraryArtist {
            id: 2,
            name: "Portishead".into(),
            mbid: None,
            genres: vec![],
        });
        let mut forward = reversed.clone();
        forward.artists.reverse();

        assert_eq!(
            LibraryFingerprint::from_snapshot(&forward).hash(),
            LibraryFingerprint::from_snapshot(&reversed).hash()
        );
        assert_ne!(
            LibraryFingerprint::from_snapshot(&forward).hash(),
            LibraryFingerprint::from_snapshot(&snapshot()).hash()
        );
    }

    #[test]
    fn fingerprint_membership_rules() {
        let fingerprint = LibraryFingerprint::from_snapshot(&snapshot());
        assert_eq!(fingerprint.hash().len(), 64);

        assert!(fingerprint.contains(&RecommendationKey::new("radiohead", None)));
        assert!(fingerprint.contains(&RecommendationKey::new("Radiohead", Some("ok computer"))));
        assert!(!fingerprint.contains(&RecommendationKey::new("Radiohead", Some("Kid A"))));
        assert!(!fingerprint.contains(&RecommendationKey::new("Portishead", None)));
        assert!(fingerprint.contains_artist("RADIOHEAD"));
    }

    #[test]
    fn provider_kind_parses_loosely() {
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert_eq!("lm-studio".parse::<ProviderKind>(), Ok(ProviderKind::LmStudio));
        assert_eq!("open_router".parse::<ProviderKind>(), Ok(ProviderKind::OpenRouter));
        assert!("watson".parse::<ProviderKind>().is_err());
        assert!(ProviderKind::Ollama.is_local());
        assert!(!ProviderKind::Gemini.is_local());
    }

    #[test]
    fn import_item_from_recommendation() {
        let rec = Recommendation::new("Slowdive").with_album("Souvlaki").with_year(1993);
        let item = ImportListItem::from(&rec);
        assert_eq!(item.album.as_deref(), Some("Souvlaki"));
        assert_eq!(item.release_year, Some(1993));

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["releaseYear"], 1993);
        assert!(json.get("artistMbid").is_none());
    }
}
