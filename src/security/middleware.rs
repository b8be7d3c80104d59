//! Actor resolution middleware. The transport hands us an opaque actor
//! reference (`x-actor-id`); we resolve it to a full `Actor` row exactly
//! once per request and stash it in the request extensions for handlers.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use diesel::prelude::*;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::shared::errors::CoreError;
use crate::shared::models::schema::users;
use crate::shared::models::Actor;
use crate::shared::state::AppState;

pub const ACTOR_HEADER: &str = "x-actor-id";

pub async fn actor_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, CoreError> {
    let actor_id = request
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(CoreError::Unauthenticated)?;

    let mut conn = state.conn.get()?;
    let actor: Actor = users::table
        .filter(users::id.eq(actor_id))
        .first(&mut conn)
        .optional()?
        .ok_or(CoreError::Unauthenticated)?;

    if !actor.is_active {
        return Err(CoreError::Unauthenticated);
    }

    debug!(actor = %actor.id, role = %actor.role, "resolved actor");
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}
