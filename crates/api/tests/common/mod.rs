#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use cosmos_api::config::ServerConfig;
use cosmos_api::router::build_app_router;
use cosmos_api::state::AppState;
use cosmos_executor::mock::{test_config as executor_test_config, FakeGateway};
use cosmos_executor::GpuExecutor;
use cosmos_orchestrator::Orchestrator;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tempfile::TempDir;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// The application router over a scripted GPU host on a temp filesystem.
pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<FakeGateway>,
    pub root: TempDir,
}

impl TestApp {
    /// A fresh clone of the router for one request.
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Write a source video and return its path.
    pub fn source_video(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::write(&path, b"source").unwrap();
        path
    }
}

pub fn build_test_app(pool: PgPool) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let gateway = Arc::new(FakeGateway::new());
    let executor = GpuExecutor::new(
        pool.clone(),
        gateway.clone(),
        executor_test_config(root.path()),
    );
    let config = test_config();
    let state = AppState {
        orchestrator: Orchestrator::with_executor(pool, executor, 8),
        config: Arc::new(config.clone()),
    };
    TestApp {
        router: build_app_router(state, &config),
        gateway,
        root,
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
