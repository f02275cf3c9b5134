//! Router assembly, shared state and the server loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{artifacts, feed, verify};
use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::feed::FeedStore;
use crate::metrics::{sink_for_config, ViralEvents};
use crate::ratelimit::{self, RateLimiter};
use crate::storage::{select_backend, StoreError};
use crate::verification::{self, HttpFetcher, PageFetcher, VerificationStore};

const FEED_FILE: &str = "feed.json";

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub artifacts: ArtifactStore,
    pub feed: Arc<FeedStore>,
    pub verifications: Arc<VerificationStore>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire up the stores for `config`, fetching verification pages over HTTP.
    pub async fn new(config: Config) -> Result<Self, StoreError> {
        Self::build(config, Arc::new(HttpFetcher::new())).await
    }

    pub async fn build(config: Config, fetcher: Arc<dyn PageFetcher>) -> Result<Self, StoreError> {
        let backend = select_backend(&config)?;
        let viral = ViralEvents::spawn(sink_for_config(&config));
        let artifacts = ArtifactStore::new(backend, viral);

        let feed = match &config.data_dir {
            Some(dir) => FeedStore::load(dir.join(FEED_FILE)).await,
            None => FeedStore::from_items(Vec::new()),
        };

        let limiter = RateLimiter::new(
            config.rate_limit_max,
            Duration::from_secs(config.rate_limit_window_secs),
        );

        Ok(Self {
            verifications: Arc::new(VerificationStore::new(config.verification_ttl_hours)),
            feed: Arc::new(feed),
            limiter: Arc::new(limiter),
            artifacts,
            fetcher,
            config,
        })
    }
}

/// Build the full router.
///
/// Write routes carry the body size limit and the rate limiter; reads are
/// unrestricted.
pub fn app(state: Arc<AppState>) -> Router {
    let read_routes = Router::new()
        .route("/api/health", get(health))
        .route("/artifacts", get(artifacts::list_artifacts))
        .route("/artifacts/:id", get(artifacts::get_artifact))
        .route("/feed/delta", get(feed::feed_delta))
        .nest("/verify", verify::routes());

    let write_routes = Router::new()
        .route("/artifacts", post(artifacts::create_artifact))
        .route("/artifacts/:id/remix", post(artifacts::remix_artifact))
        .nest("/verify", verify::write_routes())
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.limiter),
            ratelimit::rate_limit,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes));

    Router::new()
        .merge(read_routes)
        .merge(write_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until SIGINT/SIGTERM.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let reload_period = Duration::from_secs(config.feed_reload_secs);

    let state = Arc::new(AppState::new(config).await?);
    ratelimit::spawn_cleanup(Arc::clone(&state.limiter));
    verification::spawn_cleanup(Arc::clone(&state.verifications));
    crate::feed::spawn_reload(Arc::clone(&state.feed), reload_period);

    let app = app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "Server listening on {} (backend: {})",
        addr,
        state.artifacts.backend_name()
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    backend: &'static str,
    feed_items: usize,
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.artifacts.backend_name(),
        feed_items: state.feed.snapshot().await.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    use crate::feed::FeedItem;

    /// Serves whatever page the test last set.
    #[derive(Default)]
    struct StaticPage {
        body: Mutex<String>,
    }

    #[async_trait]
    impl PageFetcher for StaticPage {
        async fn fetch(&self, _url: &str) -> Result<String, String> {
            Ok(self.body.lock().unwrap().clone())
        }
    }

    async fn test_state(config: Config) -> Arc<AppState> {
        Arc::new(
            AppState::build(config, Arc::new(StaticPage::default()))
                .await
                .unwrap(),
        )
    }

    async fn setup() -> (TempDir, Arc<AppState>) {
        let temp = tempdir().unwrap();
        let state = test_state(Config::for_data_dir(temp.path())).await;
        (temp, state)
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = app(Arc::clone(state)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn valid_artifact(title: &str) -> Value {
        json!({
            "title": title,
            "body": "A reusable prompt pattern for summarizing release notes.",
            "author": "scout",
            "tags": ["Prompts", "release-notes"],
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (_temp, state) = setup().await;
        let (status, body) = send(&state, get_req("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "json_file");
    }

    #[tokio::test]
    async fn test_create_artifact_returns_201() {
        let (_temp, state) = setup().await;
        let (status, body) =
            send(&state, post_json("/artifacts", valid_artifact("Release digest"))).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["artifact"]["title"], "Release digest");
        assert!(body["artifact"]["id"].as_str().unwrap().starts_with("art_"));
        assert_eq!(body["artifact"]["tags"], json!(["prompts", "release-notes"]));

        let id = body["artifact"]["id"].as_str().unwrap().to_string();
        let (status, fetched) = send(&state, get_req(&format!("/artifacts/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["artifact"]["author"], "scout");
        assert!(fetched["artifact"].get("lineage").is_none());
    }

    #[tokio::test]
    async fn test_create_artifact_validation_failed() {
        let (_temp, state) = setup().await;
        let (status, body) = send(
            &state,
            post_json("/artifacts", json!({"title": "x", "body": "short"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
        assert!(!body["details"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_and_empty_body() {
        let (_temp, state) = setup().await;
        let request = Request::builder()
            .method("POST")
            .uri("/artifacts")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid JSON");

        let request = Request::builder()
            .method("POST")
            .uri("/artifacts")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
    }

    #[tokio::test]
    async fn test_unknown_artifact_is_404() {
        let (_temp, state) = setup().await;
        let (status, body) = send(&state, get_req("/artifacts/art_000000000000")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found");

        let (status, _) = send(
            &state,
            post_json("/artifacts/art_000000000000/remix", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remix_chain_lineage() {
        let (_temp, state) = setup().await;
        let (_, a) = send(&state, post_json("/artifacts", valid_artifact("Root"))).await;
        let a_id = a["artifact"]["id"].as_str().unwrap().to_string();

        let (status, b) = send(
            &state,
            post_json(&format!("/artifacts/{}/remix", a_id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(b["artifact"]["title"], "Remix of: Root");
        assert_eq!(b["artifact"]["parent_artifact_id"], a_id.as_str());
        assert_eq!(b["artifact"]["author"], "anonymous");
        let b_id = b["artifact"]["id"].as_str().unwrap().to_string();

        // A client-supplied parent is ignored.
        let (_, c) = send(
            &state,
            post_json(
                &format!("/artifacts/{}/remix", b_id),
                json!({"title": "Third", "parent_artifact_id": "art_spoofed00000"}),
            ),
        )
        .await;
        assert_eq!(c["artifact"]["parent_artifact_id"], b_id.as_str());
        let c_id = c["artifact"]["id"].as_str().unwrap().to_string();

        let (status, fetched) = send(&state, get_req(&format!("/artifacts/{}", c_id))).await;
        assert_eq!(status, StatusCode::OK);
        let lineage: Vec<&str> = fetched["artifact"]["lineage"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["id"].as_str().unwrap())
            .collect();
        assert_eq!(lineage, vec![b_id.as_str(), a_id.as_str()]);
    }

    #[tokio::test]
    async fn test_list_artifacts_paging() {
        let (_temp, state) = setup().await;
        for i in 0..3 {
            send(&state, post_json("/artifacts", valid_artifact(&format!("Item {}", i)))).await;
        }

        let (status, page) = send(&state, get_req("/artifacts?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["count"], 2);
        assert!(page["next_before"].is_string());

        let (_, all) = send(&state, get_req("/artifacts?limit=abc")).await;
        assert_eq!(all["count"], 3);
        assert!(all["next_before"].is_null());
    }

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let temp = tempdir().unwrap();
        let mut config = Config::for_data_dir(temp.path());
        config.max_body_bytes = 256;
        let state = test_state(config).await;

        let mut artifact = valid_artifact("Too big");
        artifact["body"] = json!("x".repeat(1024));
        let (status, body) = send(&state, post_json("/artifacts", artifact)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Payload too large");
    }

    #[tokio::test]
    async fn test_write_routes_are_rate_limited() {
        let temp = tempdir().unwrap();
        let mut config = Config::for_data_dir(temp.path());
        config.rate_limit_max = 2;
        let state = test_state(config).await;

        for _ in 0..2 {
            let (status, _) = send(&state, post_json("/artifacts", valid_artifact("Ok"))).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let response = app(Arc::clone(&state))
            .oneshot(post_json("/artifacts", valid_artifact("Blocked")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        // Reads are not limited.
        let (status, _) = send(&state, get_req("/artifacts")).await;
        assert_eq!(status, StatusCode::OK);
    }

    fn feed_item(id: &str, ts: &str) -> FeedItem {
        FeedItem {
            id: id.to_string(),
            title: format!("Story {}", id),
            url: Some(format!("https://news.example.com/{}", id)),
            source: None,
            summary: None,
            tags: vec!["agents".to_string()],
            published_at: ts.to_string(),
        }
    }

    #[tokio::test]
    async fn test_feed_delta_cursor_round_trip() {
        let temp = tempdir().unwrap();
        let items = vec![
            feed_item("n1", "2026-03-01T10:00:00.000Z"),
            feed_item("n2", "2026-03-02T10:00:00.000Z"),
            feed_item("n3", "2026-03-03T10:00:00.000Z"),
        ];
        std::fs::write(
            temp.path().join(FEED_FILE),
            serde_json::to_string(&items).unwrap(),
        )
        .unwrap();
        let state = test_state(Config::for_data_dir(temp.path())).await;

        let response = app(Arc::clone(&state))
            .oneshot(get_req("/feed/delta"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let first: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(first["count"], 3);
        assert_eq!(first["items"][0]["id"], "n3");
        let cursor = first["next_cursor"].as_str().unwrap().to_string();

        let (status, second) =
            send(&state, get_req(&format!("/feed/delta?cursor={}", cursor))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["count"], 0);
        assert_eq!(second["next_cursor"], cursor.as_str());
    }

    #[tokio::test]
    async fn test_feed_delta_tolerates_bad_input() {
        let (_temp, state) = setup().await;
        let (status, body) = send(
            &state,
            get_req("/feed/delta?cursor=not-a-cursor&limit=-4"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert!(body["next_cursor"].is_null());
    }

    #[tokio::test]
    async fn test_verification_flow() {
        let temp = tempdir().unwrap();
        let page = Arc::new(StaticPage::default());
        let state = Arc::new(
            AppState::build(Config::for_data_dir(temp.path()), page.clone())
                .await
                .unwrap(),
        );

        let (status, started) = send(
            &state,
            post_json(
                "/verify/start",
                json!({"agent_handle": "@Scout", "url": "https://scout.example.com"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let code = started["verification"]["code"].as_str().unwrap().to_string();

        let (status, _) = send(
            &state,
            post_json("/verify/check", json!({"agent_handle": "scout"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        *page.body.lock().unwrap() = format!("<meta name=\"foragents\" content=\"{}\">", code);
        let (status, checked) = send(
            &state,
            post_json("/verify/check", json!({"agent_handle": "scout"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(checked["verified"], true);

        let (status, record) = send(&state, get_req("/verify/scout")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(record["verified_at"].is_string());

        let (status, _) = send(&state, get_req("/verify/nobody")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_handle() {
        let (_temp, state) = setup().await;
        let (status, body) = send(
            &state,
            post_json(
                "/verify/start",
                json!({"agent_handle": "has space", "url": "https://x.example.com"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
    }
}
