//! HTTP surface tests against an in-process router with mock providers.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{fixtures, TestFixture};
use subfetch_core::{
    load_config_from_str, store::ConfigStore, testing::MockProvider, ProviderError,
};

fn episode_query() -> Value {
    serde_json::to_value(fixtures::episode_query()).unwrap()
}

fn providers() -> (Arc<MockProvider>, Arc<MockProvider>) {
    let alpha = Arc::new(MockProvider::new("alpha").with_results(vec![fixtures::candidate(
        "alpha",
        "a1",
        "Example.Show.S01E03.720p-GRP.srt",
    )]));
    let beta = Arc::new(MockProvider::new("beta").with_results(vec![fixtures::candidate(
        "beta",
        "b1",
        "Other.Thing.2001.srt",
    )]));
    (alpha, beta)
}

fn diagnostic<'a>(body: &'a Value, provider: &str) -> &'a Value {
    body["diagnostics"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["provider"] == provider)
        .unwrap_or_else(|| panic!("no diagnostic for {}", provider))
}

// =============================================================================
// Health and config
// =============================================================================

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new(Vec::new()).await;
    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_redacts_credentials() {
    let config = load_config_from_str(
        r#"
        [server]
        port = 9191

        [providers.alpha]
        priority = 3

        [providers.alpha.credentials]
        api_key = "super-secret"
        "#,
    )
    .unwrap();
    let fixture = TestFixture::with_config(config, Vec::new()).await;

    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["server"]["port"], 9191);
    assert_eq!(
        response.body["providers"]["alpha"]["credentials_configured"],
        json!(["api_key"])
    );
    assert!(!response.body.to_string().contains("super-secret"));
}

// =============================================================================
// Search and download
// =============================================================================

#[tokio::test]
async fn test_search_ranks_and_reports_diagnostics() {
    let (alpha, beta) = providers();
    let broken = Arc::new(MockProvider::new("broken").with_error(ProviderError::Auth("revoked".into())));
    let fixture = TestFixture::new(vec![alpha, beta, broken]).await;

    let response = fixture.post("/api/v1/search", episode_query()).await;
    assert_eq!(response.status, StatusCode::OK);

    let results = response.body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["candidate"]["id"], "a1");
    assert_eq!(response.body["from_cache"], false);

    assert_eq!(diagnostic(&response.body, "alpha")["status"], "success");
    let broken = diagnostic(&response.body, "broken");
    assert_eq!(broken["status"], "failed");
    assert_eq!(broken["kind"], "auth");
}

#[tokio::test]
async fn test_repeated_search_is_served_from_cache() {
    let (alpha, beta) = providers();
    let fixture = TestFixture::new(vec![alpha.clone(), beta]).await;

    let first = fixture.post("/api/v1/search", episode_query()).await;
    let second = fixture.post("/api/v1/search", episode_query()).await;

    assert_eq!(first.body["from_cache"], false);
    assert_eq!(second.body["from_cache"], true);
    assert_eq!(first.body["results"], second.body["results"]);
    assert_eq!(alpha.search_count(), 1);
}

#[tokio::test]
async fn test_search_rejects_empty_query() {
    let fixture = TestFixture::new(Vec::new()).await;

    let response = fixture.post("/api/v1/search", json!({ "title": "   " })).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("title"));

    let response = fixture.post_raw("/api/v1/search", "{not json").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_by_hash_without_title() {
    let (alpha, _) = providers();
    let fixture = TestFixture::new(vec![alpha.clone()]).await;

    let response = fixture
        .post("/api/v1/search", json!({ "title": "", "file_hash": "8e245d9679d31e12" }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(alpha.search_count(), 1);
}

#[tokio::test]
async fn test_download_returns_subtitle_bytes() {
    let (alpha, _) = providers();
    let fixture = TestFixture::new(vec![alpha.clone()]).await;

    let search = fixture.post("/api/v1/search", episode_query()).await;
    let result = search.body["results"][0].clone();

    let response = fixture
        .request_raw("POST", "/api/v1/download", Some(result))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers["content-type"], "application/x-subrip");
    assert!(response.headers["content-disposition"]
        .to_str()
        .unwrap()
        .contains("Example.Show.S01E03.720p-GRP.srt"));
    assert!(response.text().contains("Hello"));
    assert_eq!(alpha.download_count(), 1);
}

#[tokio::test]
async fn test_download_error_statuses() {
    let (alpha, _) = providers();
    let fixture = TestFixture::new(vec![alpha.clone()]).await;
    let search = fixture.post("/api/v1/search", episode_query()).await;

    let mut ghost = search.body["results"][0].clone();
    ghost["candidate"]["provider"] = json!("ghost");
    let response = fixture.post("/api/v1/download", ghost).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    fixture.post_empty("/api/v1/providers/alpha/disable").await;
    let response = fixture
        .post("/api/v1/download", search.body["results"][0].clone())
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(alpha.download_count(), 0);
}

// =============================================================================
// Provider management
// =============================================================================

#[tokio::test]
async fn test_list_providers() {
    let (alpha, beta) = providers();
    let fixture = TestFixture::new(vec![alpha, beta]).await;

    let response = fixture.get("/api/v1/providers").await;
    assert_eq!(response.status, StatusCode::OK);
    let list = response.body.as_array().unwrap();
    let names: Vec<_> = list.iter().map(|p| p["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(list[0]["origin"], "builtin");
    assert_eq!(list[0]["init"]["status"], "ready");
    assert_eq!(list[0]["circuit"]["state"], "closed");
    assert_eq!(list[0]["dispatchable"], true);

    let single = fixture.get("/api/v1/providers/beta").await;
    assert_eq!(single.body["name"], "beta");
    assert_eq!(fixture.get("/api/v1/providers/nope").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_disable_and_enable_provider() {
    let (alpha, beta) = providers();
    let fixture = TestFixture::new(vec![alpha.clone(), beta]).await;

    let response = fixture.post_empty("/api/v1/providers/alpha/disable").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["enabled"], false);
    assert_eq!(
        fixture.config_store.get("provider.alpha.enabled").unwrap(),
        Some("false".to_string())
    );

    let search = fixture.post("/api/v1/search", episode_query()).await;
    assert_eq!(diagnostic(&search.body, "alpha")["status"], "skipped_disabled");
    assert_eq!(alpha.search_count(), 0);

    let response = fixture.post_empty("/api/v1/providers/alpha/enable").await;
    assert_eq!(response.body["enabled"], true);

    // The toggle invalidated the cache, so alpha is called now.
    let search = fixture.post("/api/v1/search", episode_query()).await;
    assert_eq!(search.body["from_cache"], false);
    assert_eq!(alpha.search_count(), 1);
}

#[tokio::test]
async fn test_set_priority() {
    let (alpha, beta) = providers();
    let fixture = TestFixture::new(vec![alpha, beta]).await;

    let response = fixture
        .put("/api/v1/providers/beta/priority", json!({ "priority": 1 }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["priority"], 1);

    let list = fixture.get("/api/v1/providers").await;
    assert_eq!(list.body[0]["name"], "beta");

    let missing = fixture
        .put("/api/v1/providers/nope/priority", json!({ "priority": 1 }))
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let malformed = fixture
        .put("/api/v1/providers/beta/priority", json!({ "priority": -4 }))
        .await;
    assert!(malformed.status.is_client_error());
}

#[tokio::test]
async fn test_set_score_modifier() {
    let (alpha, _) = providers();
    let fixture = TestFixture::new(vec![alpha]).await;

    let response = fixture
        .put("/api/v1/providers/alpha/score-modifier", json!({ "score_modifier": -20 }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["score_modifier"], -20);
}

#[tokio::test]
async fn test_reenable_provider() {
    let (alpha, _) = providers();
    let fixture = TestFixture::new(vec![alpha]).await;

    let response = fixture.post_empty("/api/v1/providers/alpha/reenable").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["provider"], "alpha");
    assert_eq!(response.body["auto_disabled"], false);
    assert_eq!(response.body["consecutive_failures"], 0);

    let missing = fixture.post_empty("/api/v1/providers/nope/reenable").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connection_test_reports_failure_in_body() {
    let (alpha, _) = providers();
    let broken = Arc::new(MockProvider::new("broken").with_error(ProviderError::Transport("refused".into())));
    let fixture = TestFixture::new(vec![alpha, broken]).await;

    let ok = fixture.post_empty("/api/v1/providers/alpha/test").await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.body["ok"], true);

    let failed = fixture.post_empty("/api/v1/providers/broken/test").await;
    assert_eq!(failed.status, StatusCode::OK);
    assert_eq!(failed.body["ok"], false);
    assert_eq!(failed.body["error_kind"], "transport");
}

// =============================================================================
// Scoring weights
// =============================================================================

#[tokio::test]
async fn test_scoring_weights() {
    let fixture = TestFixture::new(Vec::new()).await;

    let weights = fixture.get("/api/v1/scoring/weights").await;
    assert_eq!(weights.body["hash"], 359);

    let updated = fixture
        .put("/api/v1/scoring/weights/title", json!({ "value": 200 }))
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["title"], 200);
    assert_eq!(
        fixture.config_store.get("scoring.title").unwrap(),
        Some("200".to_string())
    );

    let unknown = fixture
        .put("/api/v1/scoring/weights/bogus", json!({ "value": 1 }))
        .await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);

    let huge = fixture
        .put("/api/v1/scoring/weights/hash", json!({ "value": i64::MAX }))
        .await;
    assert_eq!(huge.status, StatusCode::BAD_REQUEST);
    assert_eq!(fixture.get("/api/v1/scoring/weights").await.body["hash"], 359);
}

// =============================================================================
// Plugins
// =============================================================================

#[tokio::test]
async fn test_plugin_reload() {
    let (alpha, _) = providers();
    let fixture = TestFixture::new(vec![alpha]).await;

    fixture.write_plugin(
        "remote.toml",
        "name = \"remote\"\nendpoint = \"http://127.0.0.1:9\"\nlanguages = [\"en\"]",
    );
    fixture.write_plugin("broken.toml", "name = \"\"\nendpoint = \"http://127.0.0.1:9\"");
    fixture.write_plugin("shadow.toml", "name = \"alpha\"\nendpoint = \"http://127.0.0.1:9\"");

    let response = fixture.post_empty("/api/v1/plugins/reload").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["loaded"], json!(["remote"]));
    let rejected: Vec<_> = response.body["rejected"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["source"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(rejected.len(), 2);
    assert!(rejected.contains(&"broken.toml".to_string()));
    assert!(rejected.contains(&"alpha".to_string()));

    let remote = fixture.get("/api/v1/providers/remote").await;
    assert_eq!(remote.body["origin"], "plugin");
    let alpha = fixture.get("/api/v1/providers/alpha").await;
    assert_eq!(alpha.body["origin"], "builtin");

    std::fs::remove_file(fixture.plugin_dir().join("remote.toml")).unwrap();
    let response = fixture.post_empty("/api/v1/plugins/reload").await;
    assert_eq!(response.body["removed"], json!(["remote"]));
    assert_eq!(
        fixture.get("/api/v1/providers/remote").await.status,
        StatusCode::NOT_FOUND
    );
}

// =============================================================================
// Metrics
// =============================================================================

#[tokio::test]
async fn test_metrics_endpoint() {
    let (alpha, _) = providers();
    let fixture = TestFixture::new(vec![alpha]).await;
    fixture.get("/api/v1/health").await;

    let response = fixture.request_raw("GET", "/metrics", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let text = response.text();
    assert!(text.contains("subfetch_http_requests_total"));
    assert!(text.contains("subfetch_providers_registered"));
    assert!(text.contains("path=\"/api/v1/health\""));
}
