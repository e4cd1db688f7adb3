// SPDX-License-Identifier: GPL-3.0-or-later

//! Turns raw provider output into validated [`Recommendation`] records.
//!
//! Models wrap their JSON in prose, Markdown fences or reasoning blocks, emit
//! trailing commas and occasionally echo prompt-injection payloads back. The
//! sanitizer extracts the first JSON value in one of three accepted shapes:
//!
//! * an object with a `recommendations` array,
//! * a bare array of recommendation objects,
//! * a single recommendation object.
//!
//! Entries are then cleaned field by field. A bad entry is dropped and counted;
//! the batch only fails when no JSON structure can be found at all.

use crate::error::{RecommendationError, Result};
use chrono::Datelike;
use encore_domain::{clamp_confidence, normalize_name, Recommendation, DEFAULT_CONFIDENCE};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const MAX_ARTIST_CHARS: usize = 100;
pub const MAX_ALBUM_CHARS: usize = 150;
pub const MAX_GENRE_CHARS: usize = 50;
pub const MAX_REASON_CHARS: usize = 300;

/// Longer responses are truncated before JSON extraction.
const MAX_RESPONSE_BYTES: usize = 256 * 1024;
/// Opening brackets tried by the scanner before it gives up.
const MAX_SCAN_CANDIDATES: usize = 64;
pub const MIN_YEAR: i32 = 1900;

const ARTIST_FIELDS: &[&str] = &["artist", "artistName", "artist_name"];
const ALBUM_FIELDS: &[&str] = &["album", "albumTitle", "album_title"];
const GENRE_FIELDS: &[&str] = &["genre", "genres"];
const YEAR_FIELDS: &[&str] = &["year", "releaseYear", "release_year"];
const CONFIDENCE_FIELDS: &[&str] = &["confidence", "score"];
const REASON_FIELDS: &[&str] = &["reason", "reasoning", "why"];

const PLACEHOLDERS: &[&str] = &[
    "unknown",
    "unknown artist",
    "unknown album",
    "various",
    "various artists",
    "n/a",
    "na",
    "none",
    "null",
    "tbd",
    "tba",
    "untitled",
    "-",
    "?",
];

lazy_static! {
    static ref THINK_BLOCK: Regex =
        Regex::new(r"(?is)<think(?:ing)?>.*?</think(?:ing)?>").expect("valid think regex");
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid fence regex");
    static ref TRAILING_COMMA: Regex = Regex::new(r",(\s*[}\]])").expect("valid comma regex");
    static ref SCRIPT_BLOCK: Regex =
        Regex::new(r"(?is)<\s*(script|style|iframe)\b.*?(?:</\s*(?:script|style|iframe)\s*>|$)")
            .expect("valid script regex");
    static ref MARKUP_TAG: Regex = Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid tag regex");
    static ref SCRIPT_URI: Regex =
        Regex::new(r"(?i)\b(?:javascript|vbscript|data)\s*:").expect("valid uri regex");
    static ref EVENT_HANDLER: Regex =
        Regex::new(r#"(?i)\bon[a-z]+\s*=\s*("[^"]*"|'[^']*'|\S+)"#).expect("valid handler regex");
    static ref SQL_FRAGMENT: Regex = Regex::new(
        r"(?i)(?:;\s*(?:drop|delete|insert|update|alter|truncate|exec|create)\b[^;]*;?|\bunion\s+(?:all\s+)?select\b|\b(?:drop|truncate)\s+table\b|\bdelete\s+from\b|\binsert\s+into\b|'\s*or\s+'?\d+'?\s*=\s*'?\d+'?|/\*.*?\*/|--\s*$)"
    )
    .expect("valid sql regex");
    static ref YEAR_DIGITS: Regex = Regex::new(r"\b(\d{4})\b").expect("valid year regex");
}

/// Output of [`RecommendationSanitizer::parse`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedBatch {
    pub recommendations: Vec<Recommendation>,
    /// Entries that were present but unusable (no artist, not an object, ...).
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct RecommendationSanitizer {
    max_year: i32,
}

impl Default for RecommendationSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommendationSanitizer {
    /// Accepts release years up to next year.
    pub fn new() -> Self {
        Self {
            max_year: chrono::Utc::now().year() + 1,
        }
    }

    pub fn with_max_year(max_year: i32) -> Self {
        Self { max_year }
    }

    pub fn parse(&self, raw: &str) -> Result<SanitizedBatch> {
        let raw = truncate_response(raw);
        let Some(entries) = extract_entries(raw) else {
            warn!(
                target: "sanitizer",
                response_chars = raw.chars().count(),
                "no recommendation JSON found in response"
            );
            return Err(RecommendationError::ParseFailure);
        };

        let mut batch = SanitizedBatch::default();
        for entry in entries {
            match entry.as_object().and_then(|fields| self.sanitize_entry(fields)) {
                Some(recommendation) => batch.recommendations.push(recommendation),
                None => batch.dropped += 1,
            }
        }

        debug!(
            target: "sanitizer",
            accepted = batch.recommendations.len(),
            dropped = batch.dropped,
            "sanitized provider response"
        );
        Ok(batch)
    }

    fn sanitize_entry(&self, fields: &Map<String, Value>) -> Option<Recommendation> {
        let artist = text_field(fields, ARTIST_FIELDS, MAX_ARTIST_CHARS)
            .filter(|artist| !is_placeholder(artist))?;

        let mut recommendation = Recommendation::new(artist);
        recommendation.album =
            text_field(fields, ALBUM_FIELDS, MAX_ALBUM_CHARS).filter(|album| !is_placeholder(album));
        recommendation.genre =
            text_field(fields, GENRE_FIELDS, MAX_GENRE_CHARS).filter(|genre| !is_placeholder(genre));
        recommendation.year = field(fields, YEAR_FIELDS)
            .and_then(parse_year)
            .filter(|year| (MIN_YEAR..=self.max_year).contains(year));
        recommendation.confidence = field(fields, CONFIDENCE_FIELDS)
            .map(parse_confidence)
            .unwrap_or(DEFAULT_CONFIDENCE);
        recommendation.reason = text_field(fields, REASON_FIELDS, MAX_REASON_CHARS).unwrap_or_default();

        Some(recommendation)
    }
}

// ============================================================================
// JSON extraction
// ============================================================================

fn truncate_response(raw: &str) -> &str {
    if raw.len() <= MAX_RESPONSE_BYTES {
        return raw;
    }
    let mut cut = MAX_RESPONSE_BYTES;
    while !raw.is_char_boundary(cut) {
        cut -= 1;
    }
    warn!(
        target: "sanitizer",
        response_bytes = raw.len(),
        kept_bytes = cut,
        "provider response truncated"
    );
    &raw[..cut]
}

/// Entries of the first accepted JSON value in `raw`, or `None`.
///
/// An empty list is only returned when no non-empty accepted value follows
/// it, so prose such as `excluded: []` does not hide the real answer.
fn extract_entries(raw: &str) -> Option<Vec<Value>> {
    let text = THINK_BLOCK.replace_all(raw, "");
    let text = text.trim();

    if let Some(entries) = parse_candidate(text) {
        return Some(entries);
    }

    let mut empty = None;
    for fenced in CODE_FENCE.captures_iter(text) {
        match fenced.get(1).and_then(|body| scan(body.as_str())) {
            Some(entries) if entries.is_empty() => empty = Some(entries),
            Some(entries) => return Some(entries),
            None => {}
        }
    }

    scan(text).or(empty)
}

/// Tries balanced `{...}` / `[...]` spans from left to right, at most
/// [`MAX_SCAN_CANDIDATES`] of them.
fn scan(text: &str) -> Option<Vec<Value>> {
    let bytes = text.as_bytes();
    let mut empty = None;
    let mut candidates = 0;

    for start in 0..bytes.len() {
        if bytes[start] != b'{' && bytes[start] != b'[' {
            continue;
        }
        candidates += 1;
        if candidates > MAX_SCAN_CANDIDATES {
            debug!(target: "sanitizer", "scan candidate limit reached");
            break;
        }
        let Some(end) = balanced_end(bytes, start) else {
            continue;
        };
        match parse_candidate(&text[start..=end]) {
            Some(entries) if entries.is_empty() => {
                empty.get_or_insert(entries);
            }
            Some(entries) => return Some(entries),
            None => {}
        }
    }
    empty
}

/// Index of the bracket closing the one at `start`, ignoring brackets in strings.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_candidate(candidate: &str) -> Option<Vec<Value>> {
    let value = serde_json::from_str::<Value>(candidate).ok().or_else(|| {
        let repaired = TRAILING_COMMA.replace_all(candidate, "$1");
        serde_json::from_str::<Value>(&repaired).ok()
    })?;
    accepted_entries(value)
}

fn accepted_entries(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => {
            (items.is_empty() || items.iter().any(Value::is_object)).then_some(items)
        }
        Value::Object(mut object) => match object.remove("recommendations") {
            Some(Value::Array(items)) => Some(items),
            Some(_) => None,
            None if ARTIST_FIELDS.iter().any(|name| object.contains_key(*name)) => {
                Some(vec![Value::Object(object)])
            }
            None => None,
        },
        _ => None,
    }
}

// ============================================================================
// Field cleaning
// ============================================================================

fn field<'a>(fields: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| fields.get(*name))
        .filter(|value| !value.is_null())
}

fn text_field(fields: &Map<String, Value>, names: &[&str], max_chars: usize) -> Option<String> {
    let raw = match field(fields, names)? {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items.iter().find_map(Value::as_str)?.to_string(),
        _ => return None,
    };
    clean_text(&raw, max_chars)
}

/// Strips control characters and injection fragments, collapses whitespace
/// and truncates to `max_chars` characters. `None` if nothing is left.
pub fn clean_text(raw: &str, max_chars: usize) -> Option<String> {
    let text: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let text = SCRIPT_BLOCK.replace_all(&text, " ");
    let text = MARKUP_TAG.replace_all(&text, " ");
    let text = SCRIPT_URI.replace_all(&text, " ");
    let text = EVENT_HANDLER.replace_all(&text, " ");
    let text = SQL_FRAGMENT.replace_all(&text, " ");

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(max_chars).collect();
    let truncated = truncated.trim_end();

    (!truncated.is_empty()).then(|| truncated.to_string())
}

fn is_placeholder(value: &str) -> bool {
    PLACEHOLDERS.contains(&normalize_name(value).as_str())
}

fn parse_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|year| year as i64))
            .and_then(|year| i32::try_from(year).ok()),
        Value::String(text) => YEAR_DIGITS
            .captures(text)
            .and_then(|captures| captures.get(1))
            .and_then(|digits| digits.as_str().parse().ok()),
        _ => None,
    }
}

/// Numbers are clamped; strings may carry a percent sign (`"85%"`).
fn parse_confidence(value: &Value) -> f32 {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let text = text.trim();
            match text.strip_suffix('%') {
                Some(percent) => percent.trim().parse::<f64>().ok().map(|p| p / 100.0),
                None => text.parse::<f64>().ok(),
            }
        }
        _ => None,
    };

    match parsed {
        Some(confidence) if confidence.is_finite() => clamp_confidence(confidence as f32),
        _ => DEFAULT_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> RecommendationSanitizer {
        RecommendationSanitizer::with_max_year(2026)
    }

    #[test]
    fn accepts_wrapped_object_shape() {
        let raw = r#"{"recommendations": [
            {"artist": "Beach House", "album": "Bloom", "genre": "Dream Pop", "year": 2012, "confidence": 0.92, "reason": "Lush"},
            {"artist": "Mazzy Star", "album": "So Tonight That I Might See"}
        ]}"#;

        let batch = sanitizer().parse(raw).unwrap();
        assert_eq!(batch.recommendations.len(), 2);
        assert_eq!(batch.dropped, 0);

        let first = &batch.recommendations[0];
        assert_eq!(first.album.as_deref(), Some("Bloom"));
        assert_eq!(first.year, Some(2012));
        assert!((first.confidence - 0.92).abs() < f32::EPSILON);
        assert_eq!(batch.recommendations[1].confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn accepts_bare_array_inside_prose_and_fences() {
        let raw = "Sure! Here are some picks:\n```json\n[\n  {\"artist\": \"Khruangbin\"},\n  {\"artist\": \"Tinariwen\", \"album\": \"Amassakoul\"},\n]\n```\nEnjoy!";

        let batch = sanitizer().parse(raw).unwrap();
        let artists: Vec<_> = batch.recommendations.iter().map(|r| r.artist.as_str()).collect();
        assert_eq!(artists, vec!["Khruangbin", "Tinariwen"]);
    }

    #[test]
    fn accepts_single_object_after_reasoning_block() {
        let raw = "<think>The user likes [shoegaze] {maybe}</think>\n{\"artist\": \"Slowdive\", \"album\": \"Souvlaki\"}";

        let batch = sanitizer().parse(raw).unwrap();
        assert_eq!(batch.recommendations.len(), 1);
        assert_eq!(batch.recommendations[0].artist, "Slowdive");
    }

    #[test]
    fn skips_json_that_is_not_an_accepted_shape() {
        let raw = r#"Scores: [1, 2, 3]. Result: {"note": "x"} then [{"artist": "Low"}]"#;

        let batch = sanitizer().parse(raw).unwrap();
        assert_eq!(batch.recommendations.len(), 1);
        assert_eq!(batch.recommendations[0].artist, "Low");
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_scanner() {
        let raw = r#"Answer: [{"artist": "Godspeed You! Black Emperor", "reason": "fans of ] and { will enjoy"}]"#;

        let batch = sanitizer().parse(raw).unwrap();
        assert_eq!(batch.recommendations[0].reason, "fans of ] and { will enjoy");
    }

    #[test]
    fn no_json_is_parse_failure() {
        assert!(matches!(
            sanitizer().parse("I'm sorry, I can't help with that."),
            Err(RecommendationError::ParseFailure)
        ));
        assert!(matches!(
            sanitizer().parse(r#"{"status": "ok"}"#),
            Err(RecommendationError::ParseFailure)
        ));
    }

    #[test]
    fn empty_array_is_valid_and_empty() {
        let batch = sanitizer().parse("[]").unwrap();
        assert!(batch.recommendations.is_empty());
        assert_eq!(batch.dropped, 0);
    }

    #[test]
    fn empty_list_in_prose_does_not_hide_later_answer() {
        let raw = r#"Already excluded: []. My picks: [{"artist": "Broadcast"}]"#;
        let batch = sanitizer().parse(raw).unwrap();
        assert_eq!(batch.recommendations.len(), 1);
        assert_eq!(batch.recommendations[0].artist, "Broadcast");

        let raw = "```json\n{\"recommendations\": []}\n```\nNothing new, sorry.";
        assert!(sanitizer().parse(raw).unwrap().recommendations.is_empty());
    }

    #[test]
    fn bracket_heavy_response_is_bounded() {
        let raw = format!("{}[{{\"artist\": \"Stereolab\"}}]", "[{".repeat(50_000));
        let started = std::time::Instant::now();
        let result = sanitizer().parse(&raw);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(matches!(result, Err(RecommendationError::ParseFailure)));

        let batch = sanitizer()
            .parse(&format!("[{{\"artist\": \"Can\"}}]{}", "{".repeat(400_000)))
            .unwrap();
        assert_eq!(batch.recommendations[0].artist, "Can");
    }

    #[test]
    fn oversized_response_is_truncated_on_char_boundary() {
        let raw = "é".repeat(MAX_RESPONSE_BYTES);
        let kept = truncate_response(&raw);
        assert!(kept.len() <= MAX_RESPONSE_BYTES);
        assert!(kept.len() >= MAX_RESPONSE_BYTES - 1);
        assert_eq!(truncate_response("[]"), "[]");
    }

    #[test]
    fn entries_without_artist_are_dropped() {
        let raw = r#"[
            {"album": "Orphan Album"},
            {"artist": "   "},
            {"artist": "Unknown Artist", "album": "Mystery"},
            "just a string",
            {"artist": "Cocteau Twins"}
        ]"#;

        let batch = sanitizer().parse(raw).unwrap();
        assert_eq!(batch.recommendations.len(), 1);
        assert_eq!(batch.dropped, 4);
        assert!(batch.recommendations.iter().all(|r| !r.artist.is_empty()));
    }

    #[test]
    fn confidence_is_clamped_or_defaulted() {
        let raw = r#"[
            {"artist": "A", "confidence": 1.7},
            {"artist": "B", "confidence": -3},
            {"artist": "C", "confidence": "0.4"},
            {"artist": "D", "confidence": "very high"},
            {"artist": "E", "confidence": "65%"},
            {"artist": "F", "confidence": null}
        ]"#;

        let batch = sanitizer().parse(raw).unwrap();
        let confidences: Vec<f32> = batch.recommendations.iter().map(|r| r.confidence).collect();
        assert_eq!(confidences, vec![1.0, 0.0, 0.4, DEFAULT_CONFIDENCE, 0.65, DEFAULT_CONFIDENCE]);
        assert!(confidences.iter().all(|c| (0.0..=1.0).contains(c)));
    }

    #[test]
    fn fields_are_limited_and_control_characters_stripped() {
        let long_artist = "x".repeat(250);
        let raw = serde_json::json!([{
            "artist": long_artist,
            "album": "Line\u{0000}One\nLine\tTwo",
            "genre": "g".repeat(80),
            "reason": "r".repeat(400)
        }])
        .to_string();

        let batch = sanitizer().parse(&raw).unwrap();
        let rec = &batch.recommendations[0];
        assert_eq!(rec.artist.chars().count(), MAX_ARTIST_CHARS);
        assert_eq!(rec.album.as_deref(), Some("Line One Line Two"));
        assert_eq!(rec.genre.as_ref().map(|g| g.chars().count()), Some(MAX_GENRE_CHARS));
        assert_eq!(rec.reason.chars().count(), MAX_REASON_CHARS);
    }

    #[test]
    fn multibyte_names_truncate_on_char_boundaries() {
        let cleaned = clean_text(&"é".repeat(120), MAX_ARTIST_CHARS).unwrap();
        assert_eq!(cleaned.chars().count(), MAX_ARTIST_CHARS);
    }

    #[test]
    fn injection_fragments_are_stripped_not_fatal() {
        let raw = r#"[
            {"artist": "<script>alert('x')</script>Portishead", "album": "Dummy<img src=x onerror=alert(1)>"},
            {"artist": "Massive Attack'; DROP TABLE artists; --", "reason": "1' OR '1'='1 trip hop"},
            {"artist": "<b></b>"}
        ]"#;

        let batch = sanitizer().parse(raw).unwrap();
        assert_eq!(batch.recommendations.len(), 2);
        assert_eq!(batch.dropped, 1);
        assert_eq!(batch.recommendations[0].artist, "Portishead");
        assert_eq!(batch.recommendations[0].album.as_deref(), Some("Dummy"));
        assert_eq!(batch.recommendations[1].artist, "Massive Attack'");
        assert!(!batch.recommendations[1].reason.to_lowercase().contains("or '1'"));
    }

    #[test]
    fn years_outside_range_are_discarded() {
        let raw = r#"[
            {"artist": "A", "year": 1850},
            {"artist": "B", "year": "Released in 1994"},
            {"artist": "C", "year": 2031},
            {"artist": "D", "year": 2026}
        ]"#;

        let years: Vec<Option<i32>> = sanitizer()
            .parse(raw)
            .unwrap()
            .recommendations
            .iter()
            .map(|r| r.year)
            .collect();
        assert_eq!(years, vec![None, Some(1994), None, Some(2026)]);
    }

    #[test]
    fn alternate_field_names_and_placeholder_albums() {
        let raw = r#"[{"artistName": "Nick Drake", "albumTitle": "N/A", "genres": ["Folk", "Baroque Pop"], "reasoning": "Pink Moon"}]"#;

        let rec = &sanitizer().parse(raw).unwrap().recommendations[0];
        assert_eq!(rec.artist, "Nick Drake");
        assert_eq!(rec.album, None);
        assert_eq!(rec.genre.as_deref(), Some("Folk"));
        assert_eq!(rec.reason, "Pink Moon");
    }
}
