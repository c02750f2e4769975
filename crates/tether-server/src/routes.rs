//! Request handlers for the status page, health check, and info endpoint.

use std::process;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::SERVER_NAME;
use crate::engine::Engine;

/// Process-wide facts shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pid: u32,
    engine: Engine,
    started: Instant,
    started_at: OffsetDateTime,
}

impl AppState {
    /// Captures the current process and start instant.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            pid: process::id(),
            engine,
            started: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
        }
    }

    fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: f64,
    pub pid: u32,
}

/// Body of `GET /api/info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub server: String,
    pub pid: u32,
    pub host: String,
    pub uptime: f64,
    pub engine: Engine,
    pub started_at: String,
}

/// Builds the payload router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/api/info", get(info))
        .with_state(Arc::new(state))
}

async fn home(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<!doctype html>\n<html>\n<head><title>{SERVER_NAME}</title></head>\n<body>\n\
         <h1>Server is running</h1>\n\
         <p>Process {pid} serving with the {engine} engine.</p>\n\
         <p>Uptime: {uptime:.1} seconds.</p>\n\
         <p><a href=\"/health\">health</a> | <a href=\"/api/info\">info</a></p>\n\
         </body>\n</html>\n",
        pid = state.pid,
        engine = state.engine,
        uptime = state.uptime_secs(),
    ))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();
    Json(HealthResponse {
        status: String::from("healthy"),
        timestamp,
        pid: state.pid,
    })
}

async fn info(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<InfoResponse> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    Json(InfoResponse {
        server: SERVER_NAME.to_owned(),
        pid: state.pid,
        host,
        uptime: state.uptime_secs(),
        engine: state.engine,
        started_at: state.started_at.format(&Rfc3339).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use rstest::{fixture, rstest};
    use tower::ServiceExt;

    use super::*;

    #[fixture]
    fn app() -> Router {
        router(AppState::new(Engine::Threaded))
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .uri(uri)
            .header(header::HOST, "example.test:9000")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, body.to_vec())
    }

    #[rstest]
    #[tokio::test]
    async fn health_reports_healthy_with_pid(app: Router) {
        let (status, body) = get_body(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).expect("json");
        assert_eq!(health.status, "healthy");
        assert_eq!(health.pid, process::id());
        assert!(health.timestamp > 0.0);
    }

    #[rstest]
    #[tokio::test]
    async fn info_reports_engine_host_and_uptime(app: Router) {
        let (status, body) = get_body(app, "/api/info").await;
        assert_eq!(status, StatusCode::OK);
        let info: InfoResponse = serde_json::from_slice(&body).expect("json");
        assert_eq!(info.server, SERVER_NAME);
        assert_eq!(info.pid, process::id());
        assert_eq!(info.host, "example.test:9000");
        assert_eq!(info.engine, Engine::Threaded);
        assert!(info.uptime >= 0.0);
        assert!(OffsetDateTime::parse(&info.started_at, &Rfc3339).is_ok());
    }

    #[rstest]
    #[tokio::test]
    async fn home_page_mentions_pid(app: Router) {
        let (status, body) = get_body(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        let page = String::from_utf8(body).expect("utf8");
        assert!(page.contains("Server is running"));
        assert!(page.contains(&process::id().to_string()));
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_route_is_not_found(app: Router) {
        let (status, _) = get_body(app, "/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
