// SPDX-License-Identifier: GPL-3.0-or-later
pub mod error;
pub mod lidarr;
pub mod musicbrainz;
pub mod repositories;
pub mod sink;

use reqwest::Client;
use std::time::Duration;

pub use error::LidarrError;
pub use lidarr::LidarrClient;
pub use musicbrainz::MusicBrainzResolver;
pub use repositories::{
    ArtistRemover, ImportListSink, InMemoryLibraryRepository, LibraryRepository, MbidResolver,
    MemorySink,
};
pub use sink::JsonFileSink;

const USER_AGENT: &str = concat!("Encore/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client settings for the Lidarr connection.
pub fn http_client(timeout: Duration) -> error::Result<Client> {
    Ok(Client::builder()
        .pool_max_idle_per_host(8)
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}
