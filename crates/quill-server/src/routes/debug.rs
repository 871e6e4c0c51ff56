use crate::error::ApiError;
use crate::routes::chat::caller_identity;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct DumpResponse {
    path: String,
}

// User ids end up in a file name
fn validate_user_id(user_id: &str) -> Result<(), ApiError> {
    if user_id.contains('/') || user_id.contains('\\') || user_id.contains("..") {
        return Err(ApiError::bad_request("Invalid user id"));
    }
    Ok(())
}

async fn write_dump(dir: &Path, user_id: &str, content: &str) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let file = dir.join(format!("{}-{}.json", user_id, chrono::Utc::now().timestamp()));
    tokio::fs::write(&file, content).await?;
    Ok(file)
}

/// Write the caller's last completed conversation to the debug directory
async fn dump_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DumpResponse>, ApiError> {
    let dir = state
        .debug_dir
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Debug endpoints are disabled"))?;

    let caller = caller_identity(&headers)?;
    validate_user_id(&caller.user_id)?;

    let messages = state
        .conversations
        .last(&caller.user_id)
        .await
        .ok_or_else(|| ApiError::not_found("No conversation recorded for this user"))?;

    let content = serde_json::to_string_pretty(&messages)
        .map_err(|e| ApiError::internal(format!("Failed to serialize conversation: {}", e)))?;
    let path = write_dump(dir, &caller.user_id, &content)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to write conversation: {}", e)))?;

    tracing::info!(user = %caller.user_id, path = %path.display(), "Wrote conversation dump");
    Ok(Json(DumpResponse {
        path: path.display().to_string(),
    }))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/debug/conversation", post(dump_conversation))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_state;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use quill::models::message::Message;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn dump_request(user: &str) -> Request<Body> {
        Request::builder()
            .uri("/debug/conversation")
            .method("POST")
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_dump_writes_last_conversation() {
        let temp_dir = tempdir().unwrap();
        let (state, _) = test_state(vec![]);
        let state = state.with_debug_dir(temp_dir.path().join("dumps"));
        state
            .conversations
            .record("alice", vec![Message::user().with_text("remember the milk")])
            .await;

        let response = routes(state).oneshot(dump_request("alice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let response: DumpResponse = serde_json::from_slice(&body).unwrap();
        let path = PathBuf::from(&response.path);
        assert!(path.starts_with(temp_dir.path().join("dumps")));
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("alice-"));

        let saved: Vec<Message> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved[0].text(), "remember the milk");
    }

    #[tokio::test]
    async fn test_disabled_is_not_found() {
        let (state, _) = test_state(vec![]);
        state
            .conversations
            .record("alice", vec![Message::user().with_text("hi")])
            .await;

        let response = routes(state).oneshot(dump_request("alice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_no_conversation_is_not_found() {
        let temp_dir = tempdir().unwrap();
        let (state, _) = test_state(vec![]);
        let state = state.with_debug_dir(temp_dir.path().to_path_buf());

        let response = routes(state).oneshot(dump_request("bob")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_path_like_user_id_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let (state, _) = test_state(vec![]);
        let state = state.with_debug_dir(temp_dir.path().to_path_buf());
        state
            .conversations
            .record("../escape", vec![Message::user().with_text("hi")])
            .await;

        let response = routes(state)
            .oneshot(dump_request("../escape"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
