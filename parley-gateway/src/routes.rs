//! Route definitions for Parley Gateway.
//!
//! Provides the JSON-envelope endpoints for user management, messaging, and
//! health checks. Request bodies are validated structurally here; everything
//! past validation runs on the blocking pool against the conversation core.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use parley_common::Error;
use parley_core::{ConversationManager, Message};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConversationManager>,
}

/// Optional filters for the message list.
///
/// `after` and `before` are inclusive bounds on the message timestamp,
/// formatted `YYYYMMDDHHMMSS.ffffff` like the timestamps themselves.
#[derive(Debug, Default, Deserialize)]
pub struct MessageListQuery {
    pub origin: Option<String>,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl MessageListQuery {
    fn is_empty(&self) -> bool {
        self.origin.is_none() && self.after.is_none() && self.before.is_none()
    }
}

/// Build the complete router.
///
/// Every resource is registered with and without a trailing slash.
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/users", get(list_users_handler).post(create_user_handler))
        .route("/users/", get(list_users_handler).post(create_user_handler))
        .route(
            "/users/:user_id",
            get(get_user_handler).put(update_user_handler),
        )
        .route(
            "/users/:user_id/",
            get(get_user_handler).put(update_user_handler),
        )
        .route(
            "/users/:user_id/messages",
            get(list_messages_handler).post(post_message_handler),
        )
        .route(
            "/users/:user_id/messages/",
            get(list_messages_handler).post(post_message_handler),
        )
        .route(
            "/users/:user_id/messages/:message_id",
            get(get_message_handler),
        )
        .route(
            "/users/:user_id/messages/:message_id/",
            get(get_message_handler),
        )
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Helpers
// ─────────────────────────────────────────────────────────────────────────────

type ApiResponse = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(json!({ "type": "error", "value": message })))
}

/// Map a core error onto the wire.
///
/// `not_found` carries the status and description to use for a missing
/// resource, since those differ per endpoint. Anything unexpected is logged
/// and reported as a plain server-side error.
fn core_error(err: &Error, not_found: (StatusCode, &str)) -> ApiResponse {
    match err {
        Error::NotFound(_) => api_error(not_found.0, not_found.1),
        Error::AlreadyExists(_) => {
            api_error(StatusCode::METHOD_NOT_ALLOWED, "User already exists.")
        }
        _ => {
            tracing::error!(error = %err, "request failed");
            let status = StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            api_error(status, "Server-side error.")
        }
    }
}

/// Run a blocking conversation-core call on the blocking pool.
async fn blocking<T, F>(task: F) -> parley_common::Result<T>
where
    F: FnOnce() -> parley_common::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {e}")))?
}

/// User ids follow identifier rules: a leading ASCII letter or underscore,
/// then ASCII letters, digits, or underscores.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "parley-gateway",
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

async fn list_users_handler(State(state): State<AppState>) -> ApiResponse {
    let manager = Arc::clone(&state.manager);
    match blocking(move || manager.user_ids()).await {
        Ok(ids) => (
            StatusCode::OK,
            Json(json!({ "type": "user_list", "value": ids })),
        ),
        Err(err) => core_error(&err, (StatusCode::NOT_FOUND, "User not found.")),
    }
}

async fn create_user_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResponse {
    let Some(map) = body.as_object() else {
        return api_error(StatusCode::BAD_REQUEST, "Malformed request.");
    };
    if !map.contains_key("id") || !map.contains_key("name") || map.len() > 2 {
        return api_error(StatusCode::BAD_REQUEST, "Malformed request.");
    }
    let Some(id) = map["id"].as_str().filter(|id| is_identifier(id)) else {
        return api_error(StatusCode::BAD_REQUEST, "Invalid user ID.");
    };
    let Some(name) = map["name"].as_str().filter(|name| !name.is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "Invalid user name.");
    };

    let manager = Arc::clone(&state.manager);
    let id = id.to_string();
    let name = name.to_string();
    let created_id = id.clone();
    match blocking(move || manager.create_user(&id, &name)).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "type": "user_created", "id": created_id })),
        ),
        Err(err) => core_error(&err, (StatusCode::NOT_FOUND, "User not found.")),
    }
}

async fn get_user_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResponse {
    let manager = Arc::clone(&state.manager);
    match blocking(move || manager.user(&user_id)).await {
        Ok(user) => (
            StatusCode::OK,
            Json(json!({
                "type": "user",
                "value": { "id": user.id, "name": user.name },
            })),
        ),
        Err(err) => core_error(&err, (StatusCode::NOT_FOUND, "User not found.")),
    }
}

async fn update_user_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResponse {
    let Some(map) = body.as_object() else {
        return api_error(StatusCode::BAD_REQUEST, "Malformed request.");
    };
    if !map.keys().all(|key| key == "id" || key == "name") {
        return api_error(StatusCode::BAD_REQUEST, "Malformed request.");
    }
    if let Some(id) = map.get("id") {
        if id.as_str() != Some(user_id.as_str()) {
            return api_error(StatusCode::BAD_REQUEST, "Malformed request.");
        }
    }

    // A body without a name is a no-op update and succeeds as-is.
    if let Some(name_value) = map.get("name") {
        let Some(name) = name_value.as_str().filter(|name| !name.is_empty()) else {
            return api_error(StatusCode::BAD_REQUEST, "Invalid user name.");
        };
        let manager = Arc::clone(&state.manager);
        let id = user_id.clone();
        let name = name.to_string();
        if let Err(err) = blocking(move || manager.rename_user(&id, &name)).await {
            return core_error(&err, (StatusCode::METHOD_NOT_ALLOWED, "User not found."));
        }
    }

    (
        StatusCode::OK,
        Json(json!({ "type": "user_updated", "id": user_id })),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

async fn list_messages_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<MessageListQuery>,
) -> ApiResponse {
    let manager = Arc::clone(&state.manager);
    let result = if query.is_empty() {
        blocking(move || manager.message_ids(&user_id)).await
    } else {
        blocking(move || manager.messages(&user_id))
            .await
            .map(|messages| filter_message_ids(messages, &query))
    };

    match result {
        Ok(ids) => (
            StatusCode::OK,
            Json(json!({ "type": "message_list", "value": ids })),
        ),
        Err(err) => core_error(&err, (StatusCode::NOT_FOUND, "User not found.")),
    }
}

async fn post_message_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResponse {
    let Some(map) = body.as_object() else {
        return api_error(StatusCode::BAD_REQUEST, "Malformed request.");
    };
    let origin_ok = map
        .get("origin")
        .map_or(true, |origin| origin.as_str() == Some("client"));
    let keys_ok = map.keys().all(|key| key == "origin" || key == "content");
    if !origin_ok || !map.contains_key("content") || !keys_ok {
        return api_error(StatusCode::BAD_REQUEST, "Malformed request.");
    }
    let Some(content) = map["content"].as_str() else {
        return api_error(StatusCode::BAD_REQUEST, "Malformed request.");
    };
    let content = content.trim().to_string();
    if content.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "Empty message content.");
    }

    let manager = Arc::clone(&state.manager);
    match blocking(move || manager.post_message(&user_id, &content)).await {
        Ok((message_id, response_id)) => (
            StatusCode::OK,
            Json(json!({
                "type": "message_received",
                "id": message_id,
                "response_id": response_id,
            })),
        ),
        Err(err) => core_error(&err, (StatusCode::NOT_FOUND, "User not found.")),
    }
}

async fn get_message_handler(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(String, String)>,
) -> ApiResponse {
    let manager = Arc::clone(&state.manager);
    match blocking(move || manager.message(&user_id, &message_id)).await {
        Ok(message) => (
            StatusCode::OK,
            Json(json!({ "type": "message", "value": message })),
        ),
        // a missing user and a missing message report the same way here
        Err(err) => core_error(&err, (StatusCode::NOT_FOUND, "Message not found.")),
    }
}

/// Apply origin and inclusive time-bound filters, preserving log order.
///
/// Timestamps are fixed-width decimal strings, so lexicographic comparison
/// is chronological comparison.
fn filter_message_ids(messages: Vec<Message>, query: &MessageListQuery) -> Vec<String> {
    messages
        .into_iter()
        .filter(|message| {
            query
                .origin
                .as_deref()
                .map_or(true, |origin| message.origin.as_str() == origin)
                && query
                    .after
                    .as_deref()
                    .map_or(true, |after| message.time.as_str() >= after)
                && query
                    .before
                    .as_deref()
                    .map_or(true, |before| message.time.as_str() <= before)
        })
        .map(|message| message.id)
        .collect()
}
