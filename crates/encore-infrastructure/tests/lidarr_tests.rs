use encore_infrastructure::{LibraryRepository, LidarrClient, LidarrError};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> LidarrClient {
    LidarrClient::new(&server.uri(), "lidarr-key", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_snapshot_from_artist_and_album_endpoints() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/artist"))
        .and(header("x-api-key", "lidarr-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 1,
                "artistName": "Boards of Canada",
                "foreignArtistId": "69158f97-4c07-4c4e-baf8-4e4ab1ed666e",
                "genres": ["Electronic", "IDM"],
                "monitored": true
            },
            {"id": 2, "artistName": "Stereolab", "foreignArtistId": ""}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/album"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 10,
                "title": "Music Has the Right to Children",
                "artistId": 1,
                "foreignAlbumId": "a1",
                "releaseDate": "1998-04-20T00:00:00Z",
                "genres": ["IDM"],
                "artist": {"artistName": "Boards of Canada"}
            },
            {"id": 11, "title": "Dots and Loops", "artistId": 2}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client(&server).snapshot().await.unwrap();

    assert_eq!(snapshot.artists.len(), 2);
    assert_eq!(snapshot.artists[1].mbid, None);
    assert_eq!(snapshot.albums.len(), 2);
    assert_eq!(snapshot.albums[0].release_year, Some(1998));
    assert_eq!(snapshot.albums[1].artist_name, "Stereolab");
}

#[tokio::test]
async fn test_rejected_api_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/artist"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client(&server).fetch_artists().await;
    assert!(matches!(result, Err(LidarrError::Unauthorized)));
}

#[tokio::test]
async fn test_remove_artist_keeps_files_by_default() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/artist/42"))
        .and(query_param("deleteFiles", "false"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).remove_artist(42, false).await.unwrap();
}

#[tokio::test]
async fn test_remove_missing_artist() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/artist/7"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = client(&server).remove_artist(7, false).await;
    assert!(matches!(result, Err(LidarrError::NotFound(_))));
}

#[tokio::test]
async fn test_server_error_carries_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/album"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database is locked"))
        .mount(&server)
        .await;

    match client(&server).fetch_albums().await {
        Err(LidarrError::ApiError { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "database is locked");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
