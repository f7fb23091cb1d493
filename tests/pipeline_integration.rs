//! End-to-end pipeline tests: a mock Codex API feeding the real fetcher,
//! walker and sinks.

use std::sync::Arc;

use codex_core::config::RestSettings;
use codex_core::sink::DEFAULT_REST_TIMEOUT;
use codex_core::{
    ApiIdentity, AppConfig, Credentials, DatabaseSink, FetchSettings, FileSink, NoopObserver,
    PageFetcher, Pipeline, PipelineError, RecordingSleeper, RestBackend, Section, SectionWalker,
    Sink, SinkError, Sleeper, UnknownErrorPolicy,
};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const UPSERT_PATH: &str = "/rest/v1/codex";

struct Harness {
    server: MockServer,
    sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            sleeper: Arc::new(RecordingSleeper::new()),
        }
    }

    async fn page(&self, section: &str, page: u32, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/{section}")))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    async fn upserts_accept_all(&self) {
        Mock::given(method("POST"))
            .and(path(UPSERT_PATH))
            .respond_with(|request: &Request| {
                let rows: Value = serde_json::from_slice(&request.body).unwrap_or(json!([]));
                ResponseTemplate::new(201).set_body_json(rows)
            })
            .mount(&self.server)
            .await;
    }

    fn sleeper(&self) -> Arc<dyn Sleeper> {
        self.sleeper.clone()
    }

    fn walker(&self) -> SectionWalker {
        let settings = FetchSettings::new(Url::parse(&self.server.uri()).expect("uri"));
        let identity = ApiIdentity::from_config(&AppConfig::default(), &Credentials::default());
        let fetcher = PageFetcher::new(settings, &identity, self.sleeper()).expect("fetcher");
        SectionWalker::new(Arc::new(fetcher), self.sleeper())
    }

    fn database_sink(&self, on_unknown: UnknownErrorPolicy) -> Box<dyn Sink> {
        let settings = RestSettings {
            url: self.server.uri(),
            key: "service-key".to_string(),
        };
        let backend =
            RestBackend::new(&settings, "CodexScraper/test", DEFAULT_REST_TIMEOUT).expect("backend");
        Box::new(DatabaseSink::new(backend, on_unknown, self.sleeper()))
    }

    async fn upsert_bodies(&self) -> Vec<Vec<Value>> {
        self.server
            .received_requests()
            .await
            .expect("recording enabled")
            .into_iter()
            .filter(|r| r.method.as_str() == "POST")
            .map(|r| serde_json::from_slice(&r.body).expect("upsert body is a JSON array"))
            .collect()
    }
}

fn empty_page() -> Value {
    json!({ "data": [] })
}

#[tokio::test]
async fn test_items_pages_are_upserted_as_envelopes() {
    let harness = Harness::start().await;
    harness
        .page(
            "items",
            1,
            json!({ "data": [
                { "guid": "sword-1", "displayName": "Sword" },
                { "_id": "shield-7" },
                { "displayName": "Ring of Ash" }
            ] }),
        )
        .await;
    harness.page("items", 2, empty_page()).await;
    harness.upserts_accept_all().await;

    let mut pipeline = Pipeline::new(
        harness.walker(),
        harness.database_sink(UnknownErrorPolicy::Skip),
        vec![Section::Items],
    );
    let summary = pipeline.run(&NoopObserver).await.expect("run");

    let bodies = harness.upsert_bodies().await;
    assert_eq!(bodies.len(), 1);
    let guids: Vec<&str> = bodies[0]
        .iter()
        .map(|e| e["guid"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(guids, ["sword-1", "shield-7", "Ring of Ash"]);
    for envelope in &bodies[0] {
        assert_eq!(envelope["section"], "items");
        assert_eq!(envelope["data"]["section"], "items");
        assert_eq!(envelope["data"]["guid"], envelope["guid"]);
    }

    let report = summary.section(Section::Items).expect("items report");
    assert!(report.is_success());
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.records, 3);
    assert_eq!(report.rows_written, 3);
}

#[tokio::test]
async fn test_slugless_mob_skips_its_page_but_later_pages_continue() {
    let harness = Harness::start().await;
    harness
        .page(
            "mobs",
            1,
            json!({ "data": [
                { "_slug": "wolf-alpha" },
                { "guid": "not-a-slug", "displayName": "Nameless" }
            ] }),
        )
        .await;
    harness
        .page("mobs", 2, json!({ "data": [{ "_slug": "bear" }] }))
        .await;
    harness.page("mobs", 3, empty_page()).await;
    harness.upserts_accept_all().await;

    let mut pipeline = Pipeline::new(
        harness.walker(),
        harness.database_sink(UnknownErrorPolicy::Skip),
        vec![Section::Mobs],
    );
    let summary = pipeline.run(&NoopObserver).await.expect("run");

    let bodies = harness.upsert_bodies().await;
    assert_eq!(bodies.len(), 1, "only page 2 reaches the datastore");
    assert_eq!(bodies[0][0]["guid"], "bear");

    let report = summary.section(Section::Mobs).expect("mobs report");
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.missing_guid, 1);
    assert_eq!(report.batches_skipped, 1);
    assert_eq!(report.batches_written, 1);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_failing_section_does_not_stop_later_sections() {
    let harness = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/pois"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.server)
        .await;
    harness
        .page("npcs", 1, json!({ "data": [{ "guid": "npc-1" }, { "guid": "npc-2" }] }))
        .await;
    harness
        .page("npcs", 2, json!({ "data": [{ "guid": "npc-3" }] }))
        .await;
    harness.page("npcs", 3, empty_page()).await;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut pipeline = Pipeline::new(
        harness.walker(),
        Box::new(FileSink::new(dir.path())),
        vec![Section::Pois, Section::Npcs],
    );
    let summary = pipeline.run(&NoopObserver).await.expect("run");

    assert_eq!(summary.sections_failed(), 1);
    let pois = summary.section(Section::Pois).expect("pois report");
    assert!(pois.failure.as_deref().unwrap_or_default().contains("500"));
    assert!(!dir.path().join("pois.json").exists());

    let npcs = summary.section(Section::Npcs).expect("npcs report");
    assert!(npcs.is_success());
    assert_eq!(npcs.saved_to.as_deref(), Some(dir.path().join("npcs.json").as_path()));

    let written: Vec<Value> =
        serde_json::from_slice(&std::fs::read(dir.path().join("npcs.json")).expect("read"))
            .expect("section file is a JSON array");
    let guids: Vec<&str> = written
        .iter()
        .map(|e| e["guid"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(guids, ["npc-1", "npc-2", "npc-3"]);
}

#[tokio::test]
async fn test_abort_policy_stops_the_run() {
    let harness = Harness::start().await;
    harness
        .page("items", 1, json!({ "data": [{ "guid": "sword-1" }] }))
        .await;
    Mock::given(method("POST"))
        .and(path(UPSERT_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "42P01",
            "message": "relation \"public.codex\" does not exist"
        })))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/npcs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_page()))
        .expect(0)
        .mount(&harness.server)
        .await;

    let mut pipeline = Pipeline::new(
        harness.walker(),
        harness.database_sink(UnknownErrorPolicy::Abort),
        vec![Section::Items, Section::Npcs],
    );
    let err = pipeline
        .run(&NoopObserver)
        .await
        .expect_err("unknown error must abort");

    let PipelineError::Aborted {
        section,
        page,
        source,
    } = err;
    assert_eq!(section, Section::Items);
    assert_eq!(page, 1);
    assert!(matches!(source, SinkError::Aborted { .. }));
}

#[tokio::test]
async fn test_file_sink_writes_pretty_unicode_json() {
    let harness = Harness::start().await;
    harness
        .page(
            "status-effects",
            1,
            json!({ "data": [{ "_id": "se-1", "displayName": "Brûlure ✦" }] }),
        )
        .await;
    harness.page("status-effects", 2, empty_page()).await;

    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("nested").join("out");
    let mut pipeline = Pipeline::new(
        harness.walker(),
        Box::new(FileSink::new(&out)),
        vec![Section::StatusEffects],
    );
    pipeline.run(&NoopObserver).await.expect("run");

    let text = std::fs::read_to_string(out.join("status-effects.json")).expect("file written");
    assert!(text.contains("Brûlure ✦"), "non-ASCII must not be escaped: {text}");
    assert!(text.starts_with("[\n  {"), "two-space pretty printing: {text}");
    assert!(text.contains("\"guid\": \"se-1\""));
}

#[tokio::test]
async fn test_pages_are_paced() {
    let harness = Harness::start().await;
    harness
        .page("pois", 1, json!({ "data": [{ "guid": "p-1" }] }))
        .await;
    harness.page("pois", 2, empty_page()).await;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut pipeline = Pipeline::new(
        harness.walker(),
        Box::new(FileSink::new(dir.path())),
        vec![Section::Pois],
    );
    pipeline.run(&NoopObserver).await.expect("run");

    assert!(
        harness
            .sleeper
            .calls()
            .contains(&codex_core::pipeline::DEFAULT_INTER_PAGE_DELAY)
    );
}
