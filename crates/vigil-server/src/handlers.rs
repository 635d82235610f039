//! HTTP route handlers. Each handler resolves the bearer session, checks
//! the capability its route requires, and delegates to the store or the
//! connection supervisor.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use vigil_core::{ApiError, Capability, ConfigPatch, Role, UserId};
use vigil_store::{User, UserPatch};

use crate::auth::{authorize, require_session, ErrorResponse};
use crate::server::AppState;

const DEFAULT_LOG_LIMIT: usize = 100;

/// Public view of a user. Tokens only appear in the user-management routes.
fn public_user(user: &User) -> Value {
    json!({
        "id": user.id,
        "name": user.name,
        "role": user.role,
        "createdAt": user.created_at,
        "lastLogin": user.last_login,
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, ErrorResponse> {
    let (session, user) = state.store.login(&req.token)?;
    state
        .log
        .info(format!("User {} logged in", user.name));
    Ok(Json(json!({
        "sessionHandle": session.id,
        "user": public_user(&user),
        "permissions": user.role.permissions(),
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = require_session(&state, &headers)?;
    state.store.logout(&authed.session.id);
    state
        .log
        .info(format!("User {} logged out", authed.user.name));
    Ok(Json(json!({ "success": true })))
}

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = require_session(&state, &headers)?;
    Ok(Json(json!({
        "user": public_user(&authed.user),
        "permissions": authed.user.role.permissions(),
    })))
}

pub async fn get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorResponse> {
    authorize(&state, &headers, Capability::ReadStatus)?;
    Ok(Json(serde_json::to_value(state.conn.status()).map_err(
        |e| ApiError::Internal(e.to_string()),
    )?))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

pub async fn get_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ErrorResponse> {
    authorize(&state, &headers, Capability::ReadLogs)?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Ok(Json(json!({ "logs": state.log.recent(limit) })))
}

pub async fn start_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = authorize(&state, &headers, Capability::ControlConnection)?;
    let ack = state.conn.start(&authed.user.name).await;
    Ok(Json(json!({ "success": ack.success, "message": ack.message })))
}

pub async fn stop_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = authorize(&state, &headers, Capability::ControlConnection)?;
    let ack = state.conn.stop(&authed.user.name).await;
    Ok(Json(json!({ "success": ack.success, "message": ack.message })))
}

pub async fn restart_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = authorize(&state, &headers, Capability::ControlConnection)?;
    let ack = state.conn.restart(&authed.user.name).await;
    Ok(Json(json!({ "success": ack.success, "message": ack.message })))
}

pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorResponse> {
    authorize(&state, &headers, Capability::ReadConfig)?;
    Ok(Json(serde_json::to_value(state.store.config()).map_err(
        |e| ApiError::Internal(e.to_string()),
    )?))
}

pub async fn update_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = authorize(&state, &headers, Capability::WriteConfig)?;
    let updated = state.store.update_config(&patch)?;
    state
        .log
        .info(format!("Config updated by {}", authed.user.name));
    Ok(Json(serde_json::to_value(updated).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorResponse> {
    authorize(&state, &headers, Capability::ReadUsers)?;
    Ok(Json(json!({ "users": state.store.users() })))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub role: Role,
    pub token: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = authorize(&state, &headers, Capability::WriteUsers)?;
    let user = state.store.create_user(&req.name, req.role, req.token)?;
    state.log.info(format!(
        "User {} ({}) created by {}",
        user.name,
        user.role.as_str(),
        authed.user.name
    ));
    Ok(Json(serde_json::to_value(user).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = authorize(&state, &headers, Capability::WriteUsers)?;
    let id = UserId::from_raw(id);
    let user = state.store.update_user(&id, &patch, &authed.user.id)?;
    state
        .log
        .info(format!("User {} updated by {}", user.name, authed.user.name));
    Ok(Json(serde_json::to_value(user).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ErrorResponse> {
    let authed = authorize(&state, &headers, Capability::WriteUsers)?;
    let id = UserId::from_raw(id);
    let name = state
        .store
        .get_user(&id)
        .map(|u| u.name)
        .unwrap_or_else(|| id.as_str().to_string());
    state.store.delete_user(&id, &authed.user.id)?;
    state
        .log
        .info(format!("User {} deleted by {}", name, authed.user.name));
    Ok(Json(json!({ "success": true })))
}
