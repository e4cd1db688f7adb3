use async_trait::async_trait;
use encore_application::{
    ImportListService, ProviderChain, RecommendationCache, RecommendationError, StopReason,
    TopUpSettings,
};
use encore_domain::{LibraryAlbum, LibraryArtist};
use encore_infrastructure::{InMemoryLibraryRepository, MbidResolver, MemorySink};
use encore_providers::{CompletionProvider, ProviderClient, ProviderKind};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn library() -> Arc<InMemoryLibraryRepository> {
    Arc::new(InMemoryLibraryRepository::new(
        vec![LibraryArtist {
            id: 1,
            name: "Portishead".into(),
            mbid: None,
            genres: vec!["Trip Hop".into()],
        }],
        vec![LibraryAlbum {
            id: 10,
            artist_id: 1,
            artist_name: "Portishead".into(),
            title: "Dummy".into(),
            mbid: None,
            release_year: Some(1994),
            genres: vec![],
        }],
    ))
}

fn ollama_reply(content: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "llama3.2",
        "message": {"role": "assistant", "content": content.to_string()},
        "done": true
    }))
}

fn provider(kind: ProviderKind, server: &MockServer) -> Arc<dyn CompletionProvider> {
    Arc::new(
        ProviderClient::builder(kind)
            .base_url(server.uri())
            .api_key("key")
            .requests_per_minute(600)
            .build()
            .unwrap(),
    )
}

fn settings(target: usize) -> TopUpSettings {
    TopUpSettings {
        target_count: target,
        max_attempts: 3,
        stagnation_threshold: 2,
        growth_factor: 2,
        min_confidence: 0.0,
    }
}

#[tokio::test]
async fn test_refresh_publishes_library_absent_items_and_caches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ollama_reply(json!({"recommendations": [
            {"artist": "Portishead", "album": "Dummy", "confidence": 0.99},
            {"artist": "Massive Attack", "album": "Mezzanine", "year": 1998},
            {"artist": "Tricky", "album": "Maxinquaye", "year": 1995}
        ]})))
        .expect(1)
        .mount(&server)
        .await;

    let chain = Arc::new(ProviderChain::new(vec![provider(ProviderKind::Ollama, &server)]));
    let service = ImportListService::builder(library(), chain)
        .settings(settings(2))
        .cache(RecommendationCache::new(Duration::from_secs(60), 8))
        .build();
    let sink = MemorySink::new();
    let cancel = CancellationToken::new();

    let report = service.refresh(&sink, &cancel).await.unwrap();
    assert!(!report.from_cache);
    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.stop_reason, StopReason::TargetReached);
    assert_eq!(outcome.library_filtered, 1);

    let published = sink.published();
    assert_eq!(published.len(), 1);
    let artists: Vec<_> = published[0].iter().map(|item| item.artist.as_str()).collect();
    assert_eq!(artists, vec!["Massive Attack", "Tricky"]);
    assert_eq!(published[0][0].release_year, Some(1998));

    let again = service.fetch(&cancel).await.unwrap();
    assert!(again.from_cache);
    assert_eq!(again.items, published[0]);
}

#[tokio::test]
async fn test_failover_to_second_provider_on_unparseable_reply() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ollama_reply(json!("Sorry, I only know about jazz.")))
        .mount(&primary)
        .await;

    let backup = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "[{\"artist\": \"Boards of Canada\"}]"}}]
        })))
        .mount(&backup)
        .await;

    let chain = ProviderChain::new(vec![
        provider(ProviderKind::Ollama, &primary),
        provider(ProviderKind::Groq, &backup),
    ])
    .with_delay(Duration::from_millis(1), Duration::ZERO);
    let service = ImportListService::builder(library(), Arc::new(chain))
        .settings(settings(1))
        .build();

    let report = service.fetch(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].artist, "Boards of Canada");
    assert_eq!(
        report.outcome.and_then(|o| o.provider).map(|(provider, _)| provider),
        Some("groq".to_string())
    );
}

#[tokio::test]
async fn test_all_providers_down_yields_empty_list_not_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let chain = ProviderChain::new(vec![provider(ProviderKind::OpenAi, &server)])
        .with_delay(Duration::from_millis(1), Duration::ZERO);
    let service = ImportListService::builder(library(), Arc::new(chain))
        .settings(settings(5))
        .build();

    let report = service.fetch(&CancellationToken::new()).await.unwrap();
    let outcome = report.outcome.unwrap();
    assert!(report.items.is_empty());
    assert_eq!(outcome.stop_reason, StopReason::Stagnated);
    assert_eq!(outcome.failed_attempts, 2);
}

#[tokio::test]
async fn test_cancelled_refresh_publishes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ollama_reply(json!([{"artist": "Tricky"}])).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let chain = Arc::new(ProviderChain::new(vec![provider(ProviderKind::Ollama, &server)]));
    let service = ImportListService::builder(library(), chain)
        .settings(settings(1))
        .build();
    let sink = MemorySink::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = service.refresh(&sink, &cancel).await;
    assert!(matches!(result, Err(RecommendationError::Cancelled)));
    assert!(sink.published().is_empty());
}

struct FixedResolver;

#[async_trait]
impl MbidResolver for FixedResolver {
    async fn resolve_artist(&self, artist: &str) -> anyhow::Result<Option<String>> {
        Ok((artist == "Tricky").then(|| "tricky-mbid".to_string()))
    }

    async fn resolve_album(
        &self,
        artist: &str,
        _album: &str,
    ) -> anyhow::Result<Option<(String, String)>> {
        if artist == "Unreachable" {
            anyhow::bail!("lookup failed");
        }
        Ok(None)
    }
}

#[tokio::test]
async fn test_required_mbids_drop_unresolved_items() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ollama_reply(json!([
            {"artist": "Tricky"},
            {"artist": "Unreachable", "album": "Nowhere"},
            {"artist": "Nobody Knows"}
        ])))
        .mount(&server)
        .await;

    let chain = Arc::new(ProviderChain::new(vec![provider(ProviderKind::Ollama, &server)]));
    let service = ImportListService::builder(library(), chain)
        .settings(settings(3))
        .resolver(Arc::new(FixedResolver))
        .require_mbids(true)
        .build();

    let report = service.fetch(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.unresolved, 2);
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].artist_mbid.as_deref(), Some("tricky-mbid"));
}
