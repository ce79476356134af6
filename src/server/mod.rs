//! HTTP ingress for manual submissions.
//!
//! | Method | Path | Effect |
//! |---|---|---|
//! | `POST` | `/queue/post` | enqueue `{"postId": ...}` |
//! | `GET` | `/queue/add/{post_id}` | enqueue from the path |
//! | `GET` | `/queue/status` | `{"count": n}` unclaimed items |

pub mod queue;

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tracing::info;

use crate::scheduler::WorkQueue;

/// Errors raised while running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn WorkQueue>,
}

impl AppState {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }
}

/// Builds the ingress router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/queue/post", post(queue::api_enqueue))
        .route("/queue/add/{post_id}", get(queue::api_enqueue_path))
        .route("/queue/status", get(queue::api_status))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

/// Serves the router on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    info!(addr = %addr, "Ingress listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::scheduler::SqliteQueue;
    use crate::storage::Database;

    async fn state(dir: &tempfile::TempDir) -> (AppState, Arc<SqliteQueue>) {
        let db = Database::open(dir.path().join("server.db").to_str().expect("utf-8 path"))
            .await
            .expect("open");
        let queue = Arc::new(SqliteQueue::new(db.pool().clone(), "replyQueue"));
        (AppState::new(queue.clone()), queue)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/queue/post")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn test_post_enqueues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, queue) = state(&dir).await;

        let response = router(state)
            .oneshot(post_json(r#"{"postId": " 1850 "}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);

        let item = queue.peek().await.expect("peek").expect("item");
        assert_eq!(item.payload, "1850");
    }

    #[tokio::test]
    async fn test_post_accepts_legacy_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, queue) = state(&dir).await;

        let response = router(state)
            .oneshot(post_json(r#"{"tweetId": "77"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(queue.is_pending("77").await.expect("pending"));
    }

    #[tokio::test]
    async fn test_post_without_id_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, queue) = state(&dir).await;
        let app = router(state);

        for body in [r#"{}"#, r#"{"postId": "   "}"#, "not json"] {
            let response = app.clone().oneshot(post_json(body)).await.expect("response");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        }
        assert_eq!(queue.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_get_add_and_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _queue) = state(&dir).await;
        let app = router(state);

        for id in ["1", "2"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/queue/add/{id}"))
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/queue/status")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "count": 2 }));
    }

    #[tokio::test]
    async fn test_storage_failure_is_internal_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(dir.path().join("closed.db").to_str().expect("utf-8 path"))
            .await
            .expect("open");
        let queue = Arc::new(SqliteQueue::new(db.pool().clone(), "replyQueue"));
        db.close().await;

        let response = router(AppState::new(queue))
            .oneshot(post_json(r#"{"postId": "1"}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
