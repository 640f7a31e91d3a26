/// HTTP/JSON management surface for multi-target mode.
///
///   POST /api/watches            {target, recipient} -> 201 {id} | 400 | 409
///   POST /api/watches/:id/stop   -> 200 {id} | 404
///   GET  /api/watches            -> 200 {watches: [...]}
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ManagerError;
use crate::manager::{WatchManager, WatchSnapshot};

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub recipient: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WatchIdResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WatchList {
    pub watches: Vec<WatchSnapshot>,
}

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ManagerError::Conflict(_) => StatusCode::CONFLICT,
            ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagerError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(manager: Arc<WatchManager>) -> Router {
    Router::new()
        .route("/api/watches", get(list_watches).post(start_watch))
        .route("/api/watches/:id/stop", post(stop_watch))
        .with_state(manager)
}

/// Serves the API on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    manager: Arc<WatchManager>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "management API listening");
    }
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn start_watch(
    State(manager): State<Arc<WatchManager>>,
    Json(req): Json<StartRequest>,
) -> Result<(StatusCode, Json<WatchIdResponse>), ManagerError> {
    let id = manager.start(req.target.trim(), req.recipient.trim()).await?;
    Ok((StatusCode::CREATED, Json(WatchIdResponse { id })))
}

async fn stop_watch(
    State(manager): State<Arc<WatchManager>>,
    Path(id): Path<String>,
) -> Result<Json<WatchIdResponse>, ManagerError> {
    manager.stop(&id).await?;
    Ok(Json(WatchIdResponse { id }))
}

async fn list_watches(State(manager): State<Arc<WatchManager>>) -> Json<WatchList> {
    Json(WatchList {
        watches: manager.list().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::extract::{PatternExtractor, Profile};
    use crate::notify::tests::RecordingNotifier;
    use crate::notify::Dispatcher;
    use crate::poll::tests::{spawn_page, FakePage};
    use crate::poll::PollClient;
    use crate::state::StateStore;
    use crate::watch::WatchContext;
    use serde_json::Value;
    use std::time::Duration;

    struct Api {
        _dir: tempfile::TempDir,
        base: String,
        target: String,
        http: reqwest::Client,
        manager: Arc<WatchManager>,
        shutdown: CancellationToken,
    }

    async fn spawn_api() -> Api {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::default();
        page.set(r#"<div id="response_root_question_9">vote now</div>"#);
        let target = spawn_page(page).await.to_string();
        let ctx = Arc::new(WatchContext {
            poller: PollClient::new(&HttpConfig::default()).unwrap(),
            extractor: Arc::new(PatternExtractor::new(Profile::Full).unwrap()),
            dispatcher: Dispatcher::new(Arc::new(RecordingNotifier::default()), Duration::from_secs(2)),
            store: Arc::new(StateStore::new(dir.path().join("state.json"))),
            interval: Duration::from_millis(50),
            notify_on_down: true,
        });
        let manager = Arc::new(WatchManager::new(ctx));
        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, Arc::clone(&manager), shutdown.clone()));
        Api {
            _dir: dir,
            base,
            target,
            http: reqwest::Client::new(),
            manager,
            shutdown,
        }
    }

    impl Api {
        async fn start(&self, target: &str, recipient: &str) -> reqwest::Response {
            self.http
                .post(format!("{}/api/watches", self.base))
                .json(&json!({ "target": target, "recipient": recipient }))
                .send()
                .await
                .unwrap()
        }

        async fn stop(&self, id: &str) -> reqwest::Response {
            self.http
                .post(format!("{}/api/watches/{id}/stop", self.base))
                .send()
                .await
                .unwrap()
        }

        async fn finish(self) {
            self.manager.shutdown().await;
            self.shutdown.cancel();
        }
    }

    #[tokio::test]
    async fn start_returns_created_with_id() {
        let api = spawn_api().await;
        let resp = api.start(&api.target, "+15550001").await;
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        let body: WatchIdResponse = resp.json().await.unwrap();
        assert_eq!(body.id.len(), 12);
        api.finish().await;
    }

    #[tokio::test]
    async fn duplicate_start_is_conflict() {
        let api = spawn_api().await;
        api.start(&api.target, "+15550001").await;
        let resp = api.start(&api.target, "+15550001").await;
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("already running"));
        api.finish().await;
    }

    #[tokio::test]
    async fn empty_or_invalid_input_is_bad_request() {
        let api = spawn_api().await;
        assert_eq!(
            api.start("", "+1").await.status(),
            reqwest::StatusCode::BAD_REQUEST
        );
        assert_eq!(
            api.start(&api.target, "").await.status(),
            reqwest::StatusCode::BAD_REQUEST
        );
        assert_eq!(
            api.start("javascript:alert(1)", "+1").await.status(),
            reqwest::StatusCode::BAD_REQUEST
        );
        api.finish().await;
    }

    #[tokio::test]
    async fn stop_then_stop_again_is_not_found() {
        let api = spawn_api().await;
        let body: WatchIdResponse = api.start(&api.target, "+1").await.json().await.unwrap();

        let resp = api.stop(&body.id).await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let stopped: WatchIdResponse = resp.json().await.unwrap();
        assert_eq!(stopped.id, body.id);

        assert_eq!(api.stop(&body.id).await.status(), reqwest::StatusCode::NOT_FOUND);
        api.finish().await;
    }

    #[tokio::test]
    async fn list_reports_last_check_and_activity() {
        let api = spawn_api().await;
        let body: WatchIdResponse = api.start(&api.target, "+1").await.json().await.unwrap();

        let mut found = None;
        for _ in 0..100 {
            let list: WatchList = api
                .http
                .get(format!("{}/api/watches", api.base))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if let Some(w) = list.watches.into_iter().find(|w| w.last_check.is_some()) {
                found = Some(w);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let watch = found.expect("watch never checked");
        assert_eq!(watch.id, body.id);
        assert_eq!(watch.last_activity.as_deref(), Some("9"));
        assert_eq!(watch.target, api.target);
        api.finish().await;
    }
}
