//! routes/api.rs — plain HTTP queries against the live registry and the log.

use axum::{
    extract::{Extension, Path, Query},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{AppErr, AppResult},
    presence::Registry,
    store::{MessageLog, HISTORY_LIMIT},
};

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/check-username/:username", get(check_username))
        .route("/auth/online-users", get(online_users))
        .route("/messages/:room", get(recent_messages))
        .route("/messages/:room/all", get(all_messages))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "OK", "timestamp": Utc::now() }))
}

async fn check_username(
    Path(username): Path<String>,
    Extension(registry): Extension<Registry>,
) -> AppResult<Json<Value>> {
    let name = username.trim();
    if name.is_empty() {
        return Err(AppErr::Bad("Username is required".into()));
    }
    let available = registry.lookup_username(name).await.is_none();
    Ok(Json(json!({
        "available": available,
        "message": if available { "Username is available" } else { "Username is taken" },
    })))
}

async fn online_users(Extension(registry): Extension<Registry>) -> Json<Value> {
    let users: Vec<Value> = registry
        .all_sessions()
        .await
        .into_iter()
        .map(|s| json!({ "username": s.username, "joinedAt": s.joined_at, "room": s.room }))
        .collect();
    Json(json!({ "success": true, "count": users.len(), "users": users }))
}

async fn recent_messages(
    Path(room): Path<String>,
    Query(q): Query<HistoryQuery>,
    Extension(log): Extension<MessageLog>,
) -> AppResult<Json<Value>> {
    let messages = log.fetch_recent(&room, q.limit.unwrap_or(HISTORY_LIMIT)).await?;
    Ok(Json(json!({ "success": true, "count": messages.len(), "messages": messages })))
}

async fn all_messages(
    Path(room): Path<String>,
    Extension(log): Extension<MessageLog>,
) -> AppResult<Json<Value>> {
    let messages = log.fetch_ascending(&room).await?;
    Ok(Json(json!({ "success": true, "count": messages.len(), "messages": messages })))
}
