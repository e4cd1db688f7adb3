// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{LidarrError, Result};
use crate::repositories::{ArtistRemover, LibraryRepository};
use encore_domain::{LibraryAlbum, LibraryArtist};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, trace};

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtistResource {
    id: i64,
    artist_name: String,
    #[serde(default)]
    foreign_artist_id: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumArtistResource {
    artist_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumResource {
    id: i64,
    title: String,
    artist_id: i64,
    #[serde(default)]
    foreign_album_id: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    artist: Option<AlbumArtistResource>,
}

impl From<ArtistResource> for LibraryArtist {
    fn from(resource: ArtistResource) -> Self {
        Self {
            id: resource.id,
            name: resource.artist_name,
            mbid: resource.foreign_artist_id.filter(|id| !id.is_empty()),
            genres: resource.genres,
        }
    }
}

impl From<AlbumResource> for LibraryAlbum {
    fn from(resource: AlbumResource) -> Self {
        Self {
            id: resource.id,
            artist_id: resource.artist_id,
            artist_name: resource
                .artist
                .map(|artist| artist.artist_name)
                .unwrap_or_default(),
            title: resource.title,
            mbid: resource.foreign_album_id.filter(|id| !id.is_empty()),
            release_year: resource.release_date.as_deref().and_then(parse_year),
            genres: resource.genres,
        }
    }
}

/// Year from a Lidarr release date such as `1997-05-21T00:00:00Z`.
fn parse_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

/// Client for the parts of Lidarr's v1 REST API Encore needs.
#[derive(Debug, Clone)]
pub struct LidarrClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl LidarrClient {
    /// # Arguments
    /// * `base_url` - Lidarr root, e.g. `http://localhost:8686`.
    /// * `api_key` - Value of Settings > General > API Key.
    /// * `timeout` - Per-request timeout.
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| LidarrError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LidarrError::InvalidUrl(base_url.to_string()));
        }

        let client = crate::http_client(timeout)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub async fn fetch_artists(&self) -> Result<Vec<LibraryArtist>> {
        let artists: Vec<ArtistResource> = self.get("/api/v1/artist").await?;
        debug!(target: "lidarr", count = artists.len(), "fetched artists");
        Ok(artists.into_iter().map(LibraryArtist::from).collect())
    }

    pub async fn fetch_albums(&self) -> Result<Vec<LibraryAlbum>> {
        let albums: Vec<AlbumResource> = self.get("/api/v1/album").await?;
        debug!(target: "lidarr", count = albums.len(), "fetched albums");
        Ok(albums.into_iter().map(LibraryAlbum::from).collect())
    }

    /// Delete an artist and add it to Lidarr's import list exclusions so the
    /// list does not re-add it. Album files stay on disk unless `delete_files` is set.
    pub async fn remove_artist(&self, artist_id: i64, delete_files: bool) -> Result<()> {
        let url = format!(
            "{}/api/v1/artist/{}?deleteFiles={}&addImportListExclusion=true",
            self.base_url, artist_id, delete_files
        );
        trace!(target: "lidarr", "DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::check_status(response.status(), &url, response).await?;

        info!(target: "lidarr", artist_id, delete_files, "artist deleted");
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        trace!(target: "lidarr", "GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let response = Self::check_status(response.status(), &url, response).await?;

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn check_status(
        status: StatusCode,
        url: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        debug!(target: "lidarr", "response status: {}", status);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LidarrError::Unauthorized);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(LidarrError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LidarrError::ApiError {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl LibraryRepository for LidarrClient {
    async fn list_artists(&self) -> anyhow::Result<Vec<LibraryArtist>> {
        Ok(self.fetch_artists().await?)
    }

    async fn list_albums(&self) -> anyhow::Result<Vec<LibraryAlbum>> {
        Ok(self.fetch_albums().await?)
    }
}

#[async_trait::async_trait]
impl ArtistRemover for LidarrClient {
    async fn delete_artist(&self, artist_id: i64, delete_files: bool) -> anyhow::Result<()> {
        Ok(self.remove_artist(artist_id, delete_files).await?)
    }
}
