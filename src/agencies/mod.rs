//! Agency and user directory: the minimal management surface the
//! invariants need. Deactivating an agent nulls the weak agent reference
//! on that agent's properties instead of cascading.

use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::leads::eligible_assignees;
use crate::security::access::{require, VisibilityFilter};
use crate::security::permissions::{Module, PermAction, Role};
use crate::shared::errors::CoreError;
use crate::shared::models::schema::{agencies, properties, users};
use crate::shared::models::{Actor, Agency};
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAgencyRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub agency_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create_agency(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateAgencyRequest>,
) -> Result<Json<Agency>, CoreError> {
    require(&state.permissions, &actor, Module::Agencies, PermAction::Create).await?;

    let mut conn = state.conn.get()?;
    let now = Utc::now();
    let agency = Agency {
        id: Uuid::new_v4(),
        name: req.name,
        email: req.email,
        phone: req.phone,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(agencies::table)
        .values(&agency)
        .execute(&mut conn)?;

    info!(agency = %agency.id, "agency created by {}", actor.id);
    Ok(Json(agency))
}

pub async fn list_agencies(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<Agency>>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Agencies, PermAction::View).await?;

    let mut conn = state.conn.get()?;
    let mut q = agencies::table.into_boxed();
    if let VisibilityFilter::Agency(agency) = filter {
        q = q.filter(agencies::id.eq(agency));
    }

    let rows: Vec<Agency> = q.order(agencies::name.asc()).load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<Actor>, CoreError> {
    require(&state.permissions, &actor, Module::Users, PermAction::Create).await?;

    let role: Role = req.role.parse().map_err(|()| CoreError::NotFound("Role"))?;

    // An agency admin only staffs their own agency, and only with agents.
    let agency_id = match actor.role() {
        Role::AgencyAdmin => {
            if role != Role::Agent {
                return Err(CoreError::Unauthorized {
                    module: Module::Users,
                    action: PermAction::Create,
                });
            }
            actor.agency_id
        }
        _ => req.agency_id,
    };

    if matches!(role, Role::AgencyAdmin | Role::Agent) && agency_id.is_none() {
        return Err(CoreError::NotFound("Agency"));
    }

    let mut conn = state.conn.get()?;
    if let Some(agency) = agency_id {
        let exists: Option<Uuid> = agencies::table
            .filter(agencies::id.eq(agency))
            .select(agencies::id)
            .first(&mut conn)
            .optional()?;
        if exists.is_none() {
            return Err(CoreError::NotFound("Agency"));
        }
    }

    let now = Utc::now();
    let user = Actor {
        id: Uuid::new_v4(),
        username: req.username,
        email: req.email,
        role: role.as_str().to_string(),
        agency_id,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)?;

    info!(user = %user.id, role = %role, "user created by {}", actor.id);
    Ok(Json(user))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<Actor>>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Users, PermAction::View).await?;

    let mut conn = state.conn.get()?;
    let limit = query.limit.unwrap_or(100);
    let offset = query.offset.unwrap_or(0);

    let mut q = users::table.into_boxed();
    match filter {
        VisibilityFilter::All => {}
        VisibilityFilter::Agency(agency) => {
            q = q.filter(users::agency_id.eq(agency));
        }
        VisibilityFilter::Agent(id) => {
            q = q.filter(users::id.eq(id));
        }
        VisibilityFilter::Nothing => return Ok(Json(vec![])),
    }

    if let Some(role) = query.role {
        q = q.filter(users::role.eq(role));
    }

    let rows: Vec<Actor> = q
        .order(users::username.asc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;
    Ok(Json(rows))
}

/// Deactivation, not deletion: the account stops authenticating and, for
/// agents, their listings drop the weak agent reference.
pub async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Actor>, CoreError> {
    require(&state.permissions, &actor, Module::Users, PermAction::Edit).await?;

    if id == actor.id {
        return Err(CoreError::Unauthorized {
            module: Module::Users,
            action: PermAction::Edit,
        });
    }

    let mut conn = state.conn.get()?;
    let target: Actor = users::table
        .filter(users::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(CoreError::NotFound("User"))?;

    match actor.role() {
        Role::SuperAdmin => {}
        Role::AgencyAdmin => {
            if target.agency_id != actor.agency_id || target.role() != Role::Agent {
                return Err(CoreError::NotFound("User"));
            }
        }
        _ => {
            return Err(CoreError::Unauthorized {
                module: Module::Users,
                action: PermAction::Edit,
            })
        }
    }

    diesel::update(users::table.filter(users::id.eq(id)))
        .set((users::is_active.eq(false), users::updated_at.eq(Utc::now())))
        .execute(&mut conn)?;

    if target.role() == Role::Agent {
        let cleared = diesel::update(properties::table.filter(properties::agent_id.eq(id)))
            .set(properties::agent_id.eq(None::<Uuid>))
            .execute(&mut conn)?;
        if cleared > 0 {
            info!(agent = %id, "cleared agent reference on {} properties", cleared);
        }
    }

    info!(user = %id, "user deactivated by {}", actor.id);
    let fresh: Actor = users::table.filter(users::id.eq(id)).first(&mut conn)?;
    Ok(Json(fresh))
}

/// Assignee picker: active agents of one agency.
pub async fn list_agency_agents(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Actor>>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Users, PermAction::View).await?;

    match filter {
        VisibilityFilter::All => {}
        VisibilityFilter::Agency(agency) if agency == id => {}
        _ => return Err(CoreError::NotFound("Agency")),
    }

    let mut conn = state.conn.get()?;
    Ok(Json(eligible_assignees(&mut conn, id)?))
}

pub fn configure_directory_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/agencies", get(list_agencies).post(create_agency))
        .route("/api/agencies/:id/agents", get(list_agency_agents))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/:id/deactivate", post(deactivate_user))
}
