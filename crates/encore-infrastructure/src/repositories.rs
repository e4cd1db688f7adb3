// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use encore_domain::{ImportListItem, LibraryAlbum, LibraryArtist, LibrarySnapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ============================================================================
// Repository Traits
// ============================================================================

/// Read access to the music library recommendations are reconciled against.
#[async_trait::async_trait]
pub trait LibraryRepository: Send + Sync {
    async fn list_artists(&self) -> Result<Vec<LibraryArtist>>;
    async fn list_albums(&self) -> Result<Vec<LibraryAlbum>>;

    /// Artists and albums together; album artist names missing from the
    /// album listing are filled in from the artist listing.
    async fn snapshot(&self) -> Result<LibrarySnapshot> {
        let artists = self.list_artists().await?;
        let mut albums = self.list_albums().await?;

        let names: HashMap<i64, &str> = artists
            .iter()
            .map(|artist| (artist.id, artist.name.as_str()))
            .collect();
        for album in albums.iter_mut().filter(|album| album.artist_name.is_empty()) {
            if let Some(name) = names.get(&album.artist_id) {
                album.artist_name = (*name).to_string();
            }
        }
        albums.retain(|album| !album.artist_name.is_empty());

        Ok(LibrarySnapshot::new(artists, albums))
    }
}

/// Removal of artists, used by duplicate cleanup.
#[async_trait::async_trait]
pub trait ArtistRemover: Send + Sync {
    async fn delete_artist(&self, artist_id: i64, delete_files: bool) -> Result<()>;
}

/// Looks up MusicBrainz identifiers for recommended artists and albums.
#[async_trait::async_trait]
pub trait MbidResolver: Send + Sync {
    async fn resolve_artist(&self, artist: &str) -> Result<Option<String>>;

    /// Returns `(artist_mbid, release_group_mbid)` for an album.
    async fn resolve_album(&self, artist: &str, album: &str) -> Result<Option<(String, String)>>;
}

/// Destination for the finished import list.
#[async_trait::async_trait]
pub trait ImportListSink: Send + Sync {
    async fn publish(&self, items: &[ImportListItem]) -> Result<()>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// Library held in memory; also records deletions.
#[derive(Clone, Default)]
pub struct InMemoryLibraryRepository {
    artists: Arc<Mutex<Vec<LibraryArtist>>>,
    albums: Arc<Mutex<Vec<LibraryAlbum>>>,
}

impl InMemoryLibraryRepository {
    pub fn new(artists: Vec<LibraryArtist>, albums: Vec<LibraryAlbum>) -> Self {
        Self {
            artists: Arc::new(Mutex::new(artists)),
            albums: Arc::new(Mutex::new(albums)),
        }
    }

    pub fn from_snapshot(snapshot: LibrarySnapshot) -> Self {
        Self::new(snapshot.artists, snapshot.albums)
    }
}

#[async_trait::async_trait]
impl LibraryRepository for InMemoryLibraryRepository {
    async fn list_artists(&self) -> Result<Vec<LibraryArtist>> {
        Ok(self
            .artists
            .lock()
            .map_err(|_| anyhow::anyhow!("library lock poisoned"))?
            .clone())
    }

    async fn list_albums(&self) -> Result<Vec<LibraryAlbum>> {
        Ok(self
            .albums
            .lock()
            .map_err(|_| anyhow::anyhow!("library lock poisoned"))?
            .clone())
    }
}

#[async_trait::async_trait]
impl ArtistRemover for InMemoryLibraryRepository {
    async fn delete_artist(&self, artist_id: i64, _delete_files: bool) -> Result<()> {
        let mut artists = self
            .artists
            .lock()
            .map_err(|_| anyhow::anyhow!("library lock poisoned"))?;
        let before = artists.len();
        artists.retain(|artist| artist.id != artist_id);
        if artists.len() == before {
            anyhow::bail!("artist {artist_id} not found");
        }
        drop(artists);

        self.albums
            .lock()
            .map_err(|_| anyhow::anyhow!("library lock poisoned"))?
            .retain(|album| album.artist_id != artist_id);
        Ok(())
    }
}

/// Sink that keeps the last published list, for tests and dry runs.
#[derive(Clone, Default)]
pub struct MemorySink {
    published: Arc<Mutex<Vec<Vec<ImportListItem>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Vec<ImportListItem>> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ImportListSink for MemorySink {
    async fn publish(&self, items: &[ImportListItem]) -> Result<()> {
        self.published
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
            .push(items.to_vec());
        Ok(())
    }
}
