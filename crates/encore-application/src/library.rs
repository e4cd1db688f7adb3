// SPDX-License-Identifier: GPL-3.0-or-later
use encore_domain::{normalize_name, LibrarySnapshot, SamplingStrategy};
use std::collections::HashMap;

const TOP_GENRES: usize = 10;

/// Summary of the library that goes into the recommendation prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryProfile {
    pub artist_count: usize,
    pub album_count: usize,
    /// Most common genres with their counts, most frequent first.
    pub top_genres: Vec<(String, usize)>,
    /// Album counts per decade (`1990` for the 1990s), oldest first.
    pub decades: Vec<(i32, usize)>,
    pub sample_artists: Vec<String>,
    /// `Artist - Title` strings.
    pub sample_albums: Vec<String>,
}

impl LibraryProfile {
    /// Samples are deterministic for a given snapshot so identical libraries
    /// produce identical prompts.
    pub fn build(snapshot: &LibrarySnapshot, strategy: SamplingStrategy) -> Self {
        let mut albums_per_artist: HashMap<i64, usize> = HashMap::new();
        for album in &snapshot.albums {
            *albums_per_artist.entry(album.artist_id).or_default() += 1;
        }

        let mut artists: Vec<_> = snapshot.artists.iter().collect();
        artists.sort_by(|a, b| {
            let count_a = albums_per_artist.get(&a.id).copied().unwrap_or(0);
            let count_b = albums_per_artist.get(&b.id).copied().unwrap_or(0);
            count_b.cmp(&count_a).then_with(|| a.name.cmp(&b.name))
        });
        let sample_artists = artists
            .into_iter()
            .take(strategy.artist_sample_size())
            .map(|artist| artist.name.clone())
            .collect();

        let mut albums: Vec<_> = snapshot.albums.iter().collect();
        albums.sort_by(|a, b| {
            a.artist_name
                .cmp(&b.artist_name)
                .then_with(|| a.release_year.cmp(&b.release_year))
                .then_with(|| a.title.cmp(&b.title))
        });
        let sample_albums = spread(&albums, strategy.album_sample_size())
            .into_iter()
            .map(|album| format!("{} - {}", album.artist_name, album.title))
            .collect();

        let genres = snapshot
            .artists
            .iter()
            .flat_map(|artist| artist.genres.iter())
            .chain(snapshot.albums.iter().flat_map(|album| album.genres.iter()));

        let mut decades: HashMap<i32, usize> = HashMap::new();
        for year in snapshot.albums.iter().filter_map(|album| album.release_year) {
            *decades.entry(year - year.rem_euclid(10)).or_default() += 1;
        }
        let mut decades: Vec<_> = decades.into_iter().collect();
        decades.sort_unstable();

        Self {
            artist_count: snapshot.artists.len(),
            album_count: snapshot.albums.len(),
            top_genres: count_genres(genres),
            decades,
            sample_artists,
            sample_albums,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artist_count == 0 && self.album_count == 0
    }
}

/// Genres compared case-insensitively; the first spelling seen is kept.
fn count_genres<'a>(genres: impl Iterator<Item = &'a String>) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, (String, usize)> = HashMap::new();
    for genre in genres {
        let key = normalize_name(genre);
        if key.is_empty() {
            continue;
        }
        counts
            .entry(key)
            .or_insert_with(|| (genre.trim().to_string(), 0))
            .1 += 1;
    }

    let mut ranked: Vec<_> = counts.into_values().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_GENRES);
    ranked
}

/// Evenly spaced picks across `items`.
fn spread<T: Copy>(items: &[T], count: usize) -> Vec<T> {
    if items.len() <= count {
        return items.to_vec();
    }
    (0..count).map(|i| items[i * items.len() / count]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_domain::{LibraryAlbum, LibraryArtist};

    fn artist(id: i64, name: &str, genres: &[&str]) -> LibraryArtist {
        LibraryArtist {
            id,
            name: name.into(),
            mbid: None,
            genres: genres.iter().map(|g| g.to_string()).collect(),
        }
    }

    fn album(id: i64, artist_id: i64, artist_name: &str, title: &str, year: i32) -> LibraryAlbum {
        LibraryAlbum {
            id,
            artist_id,
            artist_name: artist_name.into(),
            title: title.into(),
            mbid: None,
            release_year: Some(year),
            genres: vec![],
        }
    }

    fn snapshot() -> LibrarySnapshot {
        LibrarySnapshot::new(
            vec![
                artist(1, "Radiohead", &["Alternative Rock", "Art Rock"]),
                artist(2, "Björk", &["art rock", "Electronic"]),
                artist(3, "Aphex Twin", &["Electronic"]),
            ],
            vec![
                album(10, 1, "Radiohead", "OK Computer", 1997),
                album(11, 1, "Radiohead", "Kid A", 2000),
                album(12, 2, "Björk", "Homogenic", 1997),
                album(13, 3, "Aphex Twin", "Drukqs", 2001),
            ],
        )
    }

    #[test]
    fn profiles_genres_and_decades() {
        let profile = LibraryProfile::build(&snapshot(), SamplingStrategy::Balanced);

        assert_eq!(profile.artist_count, 3);
        assert_eq!(profile.album_count, 4);
        assert_eq!(profile.top_genres[0], ("Art Rock".to_string(), 2));
        assert_eq!(profile.top_genres[1], ("Electronic".to_string(), 2));
        assert_eq!(profile.decades, vec![(1990, 2), (2000, 2)]);
    }

    #[test]
    fn samples_prolific_artists_first() {
        let profile = LibraryProfile::build(&snapshot(), SamplingStrategy::Balanced);
        assert_eq!(profile.sample_artists[0], "Radiohead");
        assert_eq!(profile.sample_albums.len(), 4);
    }

    #[test]
    fn sampling_is_deterministic_and_bounded() {
        let artists: Vec<_> = (0..200).map(|i| artist(i, &format!("Artist {i:03}"), &[])).collect();
        let albums: Vec<_> = (0..200)
            .map(|i| album(1000 + i, i, &format!("Artist {i:03}"), "Debut", 2010))
            .collect();
        let snapshot = LibrarySnapshot::new(artists, albums);

        let first = LibraryProfile::build(&snapshot, SamplingStrategy::Minimal);
        let second = LibraryProfile::build(&snapshot, SamplingStrategy::Minimal);
        assert_eq!(first, second);
        assert_eq!(first.sample_artists.len(), 10);
        assert_eq!(first.sample_albums.len(), 10);
        assert_eq!(first.sample_albums[1], "Artist 020 - Debut");
    }
}
