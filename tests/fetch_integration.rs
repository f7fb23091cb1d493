//! Integration tests for the page fetcher.
//!
//! These tests run the fetcher against a mock Codex API and check the retry
//! decisions through a recording sleeper.

use std::sync::Arc;
use std::time::Duration;

use codex_core::fetch::{ApiIdentity, FetchError, FetchSettings, PageFetcher, PageOutcome, PageSource};
use codex_core::{AppConfig, Credentials, RecordingSleeper, Section};
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> FetchSettings {
    FetchSettings::new(Url::parse(&server.uri()).expect("mock server uri"))
}

fn identity() -> ApiIdentity {
    let credentials = Credentials {
        ashes_key: Some("key-123".to_string()),
        ashes_auth: Some("Bearer tok-456".to_string()),
        ..Credentials::default()
    };
    ApiIdentity::from_config(&AppConfig::default(), &credentials)
}

fn fetcher(settings: FetchSettings) -> (PageFetcher, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::new());
    let fetcher = PageFetcher::new(settings, &identity(), sleeper.clone()).expect("fetcher");
    (fetcher, sleeper)
}

fn page_body(guids: &[&str]) -> serde_json::Value {
    json!({ "data": guids.iter().map(|g| json!({ "guid": g })).collect::<Vec<_>>() })
}

#[tokio::test]
async fn test_fetch_sends_identity_headers_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("page", "2"))
        .and(query_param("select", "data"))
        .and(query_param("id", ""))
        .and(query_param("limit", "1"))
        .and(header("apikey", "key-123"))
        .and(header("authorization", "Bearer tok-456"))
        .and(header("x-request-source", "CodexScraper"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["a", "b", "c"])))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, sleeper) = fetcher(settings(&server));
    let outcome = fetcher.fetch(Section::Items, 2).await.expect("fetch");

    match outcome {
        PageOutcome::Records(records) => {
            assert_eq!(records.len(), 3);
            assert_eq!(records[0]["guid"], "a");
        }
        other => panic!("expected records, got {other:?}"),
    }
    assert!(sleeper.calls().is_empty());

    let requests = server.received_requests().await.expect("recording enabled");
    let agent = requests[0]
        .headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(agent.starts_with("CodexScraper/"), "unexpected user agent {agent}");
}

#[tokio::test]
async fn test_fetch_empty_data_is_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/npcs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let (fetcher, _) = fetcher(settings(&server));
    assert_eq!(
        fetcher.fetch(Section::Npcs, 9).await.expect("fetch"),
        PageOutcome::Exhausted
    );
}

#[tokio::test]
async fn test_fetch_rate_limited_waits_retry_after_then_refetches_same_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mobs"))
        .and(query_param("page", "4"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mobs"))
        .and(query_param("page", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "_slug": "wolf" }] })))
        .mount(&server)
        .await;

    let (fetcher, sleeper) = fetcher(settings(&server));
    let outcome = fetcher.fetch(Section::Mobs, 4).await.expect("fetch");

    assert!(matches!(outcome, PageOutcome::Records(ref r) if r.len() == 1));
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(7)]);
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.url.query() == requests[0].url.query()));
}

#[tokio::test]
async fn test_fetch_rate_limited_honors_long_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7200"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let (fetcher, sleeper) = fetcher(settings(&server));
    let outcome = fetcher.fetch(Section::Items, 1).await.expect("fetch");

    assert_eq!(outcome, PageOutcome::Exhausted);
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(7200)]);
}

#[tokio::test]
async fn test_fetch_rate_limited_without_header_uses_default_delay() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pois"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pois"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let (fetcher, sleeper) = fetcher(settings(&server));
    let outcome = fetcher.fetch(Section::Pois, 1).await.expect("fetch");

    assert_eq!(outcome, PageOutcome::Exhausted);
    assert_eq!(
        sleeper.calls(),
        vec![Duration::from_secs(60), Duration::from_secs(60)]
    );
}

#[tokio::test]
async fn test_fetch_server_error_aborts_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status-effects"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, sleeper) = fetcher(settings(&server));
    let err = fetcher
        .fetch(Section::StatusEffects, 1)
        .await
        .expect_err("503 must abort");

    assert!(matches!(
        err,
        FetchError::HttpStatus {
            section: Section::StatusEffects,
            page: 1,
            status: 503
        }
    ));
    assert!(sleeper.calls().is_empty());
}

#[tokio::test]
async fn test_fetch_invalid_json_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let (fetcher, _) = fetcher(settings(&server));
    let err = fetcher.fetch(Section::Items, 1).await.expect_err("decode");
    assert!(matches!(err, FetchError::Decode { .. }));
}

#[tokio::test]
async fn test_fetch_repeated_timeouts_skip_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_body(&["late"]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut settings = settings(&server);
    settings.default_timeout = Duration::from_millis(100);
    settings.max_timeouts = 3;
    let (fetcher, sleeper) = fetcher(settings);

    let outcome = fetcher.fetch(Section::Items, 5).await.expect("fetch");

    // Three retries are tolerated; the fourth timeout skips the page.
    assert_eq!(outcome, PageOutcome::Skipped { timeouts: 4 });
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(5); 3]);
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 4);
}

#[tokio::test]
async fn test_fetch_timeout_then_success_returns_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_body(&["late"]))
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["fast"])))
        .mount(&server)
        .await;

    let mut settings = settings(&server);
    settings.default_timeout = Duration::from_millis(100);
    let (fetcher, sleeper) = fetcher(settings);

    let outcome = fetcher.fetch(Section::Items, 1).await.expect("fetch");

    assert!(matches!(outcome, PageOutcome::Records(ref r) if r[0]["guid"] == "fast"));
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(5)]);
}
