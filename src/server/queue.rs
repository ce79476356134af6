use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::{error, info};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    #[serde(default, alias = "tweetId")]
    post_id: Option<String>,
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn enqueue_post_id(state: &AppState, post_id: Option<&str>) -> axum::response::Response {
    let Some(post_id) = post_id.map(str::trim).filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Post ID is required");
    };

    match state.queue.enqueue(post_id).await {
        Ok(item_id) => {
            info!(post_id = %post_id, item_id = %item_id, "Post added to queue");
            Json(serde_json::json!({
                "success": true,
                "message": "Post added to queue",
                "itemId": item_id,
            }))
            .into_response()
        }
        Err(e) => {
            error!(post_id = %post_id, error = %e, "Failed to add post to queue");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to add post to queue")
        }
    }
}

/// `POST /queue/post` with `{"postId": "..."}`.
pub async fn api_enqueue(
    State(state): State<AppState>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> impl IntoResponse {
    match body {
        Ok(Json(body)) => enqueue_post_id(&state, body.post_id.as_deref()).await,
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    }
}

/// `GET /queue/add/{post_id}`, handy from a browser.
pub async fn api_enqueue_path(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> impl IntoResponse {
    enqueue_post_id(&state, Some(&post_id)).await
}

/// `GET /queue/status`: number of unclaimed items.
pub async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.count().await {
        Ok(count) => Json(serde_json::json!({ "count": count })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to get queue status");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get queue status")
        }
    }
}
