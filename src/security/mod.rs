pub mod access;
pub mod middleware;
pub mod permissions;

use axum::{
    extract::{Extension, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::errors::CoreError;
use crate::shared::models::Actor;
use crate::shared::state::AppState;

use access::{authorize, Decision};
use permissions::{Module, OverrideScope, PermAction, Role};

#[derive(Debug, Deserialize)]
pub struct AccessCheckQuery {
    pub module: String,
    pub action: String,
}

/// Non-authoritative mirror for the UI: lets a client ask what the server
/// would decide, without performing any action.
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<AccessCheckQuery>,
) -> Result<Json<Decision>, CoreError> {
    let module = parse_module(&query.module)?;
    let action = parse_action(&query.action)?;
    let decision = authorize(&state.permissions, &actor, module, action).await;
    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub scope: String,
    pub scope_id: Uuid,
    pub module: String,
    pub action: String,
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub scope: String,
    pub scope_id: Uuid,
    pub module: String,
    pub action: String,
}

pub async fn grant_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<GrantRequest>,
) -> Result<StatusCode, CoreError> {
    require_super_admin(&actor)?;
    let scope = parse_scope(&req.scope)?;
    let module = parse_module(&req.module)?;
    let action = parse_action(&req.action)?;

    state
        .permissions
        .grant(&state.conn, actor.id, scope, req.scope_id, module, action, req.allowed)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<RevokeRequest>,
) -> Result<StatusCode, CoreError> {
    require_super_admin(&actor)?;
    let scope = parse_scope(&req.scope)?;
    let module = parse_module(&req.module)?;
    let action = parse_action(&req.action)?;

    state
        .permissions
        .revoke(&state.conn, scope, req.scope_id, module, action)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn require_super_admin(actor: &Actor) -> Result<(), CoreError> {
    if actor.role() != Role::SuperAdmin {
        return Err(CoreError::Unauthorized {
            module: Module::Permissions,
            action: PermAction::Edit,
        });
    }
    Ok(())
}

fn parse_scope(raw: &str) -> Result<OverrideScope, CoreError> {
    raw.parse()
        .map_err(|()| CoreError::NotFound("Permission scope"))
}

fn parse_module(raw: &str) -> Result<Module, CoreError> {
    raw.parse().map_err(|()| CoreError::NotFound("Module"))
}

fn parse_action(raw: &str) -> Result<PermAction, CoreError> {
    raw.parse().map_err(|()| CoreError::NotFound("Action"))
}

pub fn configure_security_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/access/check", get(check_access))
        .route("/api/permissions/grant", post(grant_permission))
        .route("/api/permissions/revoke", post(revoke_permission))
}
