//! Common test utilities for API testing with mock providers.
//!
//! Builds an in-process router over a `SubtitleEngine` whose providers are
//! `MockProvider`s, so the HTTP surface can be exercised without network
//! access or built-in providers.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use subfetch_core::{
    store::{MemoryConfigStore, MemoryHealthStore},
    testing::MockProvider,
    Config, Provider, SubtitleEngine,
};
use subfetch_server::state::AppState;

/// Re-export fixtures for test convenience
pub use subfetch_core::testing::fixtures;

/// In-process server over mock providers.
pub struct TestFixture {
    pub router: Router,
    pub engine: Arc<SubtitleEngine>,
    pub config_store: Arc<MemoryConfigStore>,
    /// Holds the plugin directory.
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Response with the raw body kept
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestFixture {
    /// Fixture with the given providers and a default config.
    pub async fn new(providers: Vec<Arc<MockProvider>>) -> Self {
        Self::with_config(Config::default(), providers).await
    }

    /// Fixture with a custom config. The plugin directory is always pointed
    /// at a fresh temp dir.
    pub async fn with_config(mut config: Config, providers: Vec<Arc<MockProvider>>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let plugin_dir = temp_dir.path().join("plugins");
        std::fs::create_dir_all(&plugin_dir).expect("Failed to create plugin dir");
        config.plugins.directory = Some(plugin_dir);
        config.plugins.hot_reload = false;

        let config_store = Arc::new(MemoryConfigStore::new());
        let mut builder = SubtitleEngine::builder(config.clone())
            .without_builtins()
            .config_store(config_store.clone())
            .health_store(Arc::new(MemoryHealthStore::new()));
        for provider in providers {
            builder = builder.provider(provider as Arc<dyn Provider>);
        }
        let engine = Arc::new(builder.build().await.expect("Failed to build engine"));

        let state = Arc::new(AppState::new(config, Arc::clone(&engine)));
        let router = subfetch_server::api::create_router(state);

        Self {
            router,
            engine,
            config_store,
            temp_dir,
        }
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.temp_dir.path().join("plugins")
    }

    /// Write a plugin manifest into the plugin directory.
    pub fn write_plugin(&self, file: &str, content: &str) {
        std::fs::write(self.plugin_dir().join(file), content).expect("Failed to write manifest");
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let raw = self
            .send(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await;
        raw.into_json()
    }

    /// Send a request and keep the body as bytes.
    pub async fn request_raw(&self, method: &str, path: &str, body: Option<Value>) -> RawResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        let body = match body {
            Some(json) => {
                request_builder = request_builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        self.send(request_builder.body(body).unwrap()).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        self.request_raw(method, path, body).await.into_json()
    }

    async fn send(&self, request: Request<Body>) -> RawResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes()
            .to_vec();

        RawResponse {
            status,
            headers,
            body,
        }
    }
}

impl RawResponse {
    fn into_json(self) -> TestResponse {
        let body = if self.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&self.body).unwrap_or(Value::Null)
        };
        TestResponse {
            status: self.status,
            body,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
