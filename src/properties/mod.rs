pub mod lifecycle;
pub mod types;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::notifications::NotificationKind;
use crate::security::access::{require, VisibilityFilter};
use crate::security::permissions::{Module, PermAction, Role};
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::schema::{agencies, leads, properties, property_notes, users};
use crate::shared::models::Actor;
use crate::shared::state::AppState;

pub use lifecycle::{initial_status, validate_transition, PropertyStatus, TransitionContext};
pub use types::{
    CreatePropertyRequest, NoteRequest, Property, PropertyListQuery, PropertyNote,
    TransitionRequest, UpdatePropertyRequest,
};

fn fetch_visible(
    conn: &mut PgConnection,
    id: Uuid,
    filter: &VisibilityFilter,
) -> CoreResult<Property> {
    let property: Option<Property> = properties::table
        .filter(properties::id.eq(id))
        .filter(properties::deleted_at.is_null())
        .first(conn)
        .optional()?;

    match property {
        Some(p) if filter.allows(Some(p.agency_id), p.agent_id) => Ok(p),
        // Out-of-scope entities are indistinguishable from absent ones.
        _ => Err(CoreError::NotFound("Property")),
    }
}

fn resolve_agency(
    conn: &mut PgConnection,
    actor: &Actor,
    requested: Option<Uuid>,
) -> CoreResult<Uuid> {
    let agency_id = match actor.role() {
        Role::AgencyAdmin | Role::Agent => actor
            .agency_id
            .ok_or(CoreError::NotFound("Agency"))?,
        _ => requested.ok_or(CoreError::NotFound("Agency"))?,
    };

    let exists: Option<Uuid> = agencies::table
        .filter(agencies::id.eq(agency_id))
        .filter(agencies::is_active.eq(true))
        .select(agencies::id)
        .first(conn)
        .optional()?;
    exists.ok_or(CoreError::NotFound("Agency"))
}

fn resolve_agent(
    conn: &mut PgConnection,
    actor: &Actor,
    agency_id: Uuid,
    requested: Option<Uuid>,
) -> CoreResult<Option<Uuid>> {
    if actor.role() == Role::Agent {
        return Ok(Some(actor.id));
    }

    let Some(agent_id) = requested else {
        return Ok(None);
    };

    let agent_agency: Option<Option<Uuid>> = users::table
        .filter(users::id.eq(agent_id))
        .filter(users::role.eq(Role::Agent.as_str()))
        .filter(users::is_active.eq(true))
        .select(users::agency_id)
        .first(conn)
        .optional()?;

    match agent_agency {
        None => Err(CoreError::NotFound("Agent")),
        Some(agency) if agency != Some(agency_id) => Err(CoreError::CrossAgencyViolation),
        Some(_) => Ok(Some(agent_id)),
    }
}

pub async fn create_property(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreatePropertyRequest>,
) -> Result<Json<Property>, CoreError> {
    require(&state.permissions, &actor, Module::Properties, PermAction::Create).await?;

    let mut conn = state.conn.get()?;
    let role = actor.role();
    let agency_id = resolve_agency(&mut conn, &actor, req.agency_id)?;
    let agent_id = resolve_agent(&mut conn, &actor, agency_id, req.agent_id)?;

    let now = Utc::now();
    let property = Property {
        id: Uuid::new_v4(),
        agency_id,
        agent_id,
        created_by: actor.id,
        creator_role: role.as_str().to_string(),
        title: req.title,
        description: req.description,
        price: req.price,
        location: req.location,
        specs: req.specs.unwrap_or_else(|| serde_json::json!({})),
        status: initial_status(role).as_str().to_string(),
        rejection_reason: None,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(properties::table)
        .values(&property)
        .execute(&mut conn)?;

    info!(
        property = %property.id,
        status = %property.status,
        "property created by {} ({})",
        actor.id,
        role
    );
    Ok(Json(property))
}

pub async fn list_properties(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<PropertyListQuery>,
) -> Result<Json<Vec<Property>>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Properties, PermAction::View).await?;

    let mut conn = state.conn.get()?;
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = properties::table
        .filter(properties::deleted_at.is_null())
        .into_boxed();

    match filter {
        VisibilityFilter::All => {}
        VisibilityFilter::Agency(agency) => {
            q = q.filter(properties::agency_id.eq(agency));
        }
        VisibilityFilter::Agent(agent) => {
            q = q.filter(properties::agent_id.eq(agent));
        }
        VisibilityFilter::Nothing => return Ok(Json(vec![])),
    }

    if let Some(status) = query.status {
        q = q.filter(properties::status.eq(status));
    }

    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(
            properties::title
                .ilike(pattern.clone())
                .or(properties::location.ilike(pattern)),
        );
    }

    let rows: Vec<Property> = q
        .order(properties::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows))
}

pub async fn get_property(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Property>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Properties, PermAction::View).await?;
    let mut conn = state.conn.get()?;
    Ok(Json(fetch_visible(&mut conn, id, &filter)?))
}

/// Content edit. An agent edit always resets the listing to `pending` so
/// changed content goes back through approval; no status field is ever
/// accepted on this path.
pub async fn update_property(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePropertyRequest>,
) -> Result<Json<Property>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Properties, PermAction::Edit).await?;

    let mut conn = state.conn.get()?;
    let current = fetch_visible(&mut conn, id, &filter)?;

    let role = actor.role();
    let next_status = if role == Role::Agent && req.changes_content() {
        PropertyStatus::Pending.as_str().to_string()
    } else {
        current.status.clone()
    };

    let updated = Property {
        title: req.title.unwrap_or(current.title.clone()),
        description: req.description.or(current.description.clone()),
        price: req.price.or(current.price),
        location: req.location.or(current.location.clone()),
        specs: req.specs.unwrap_or(current.specs.clone()),
        status: next_status,
        updated_at: Utc::now(),
        ..current.clone()
    };

    let affected = diesel::update(
        properties::table
            .filter(properties::id.eq(id))
            .filter(properties::status.eq(current.status.clone())),
    )
    .set(&updated)
    .execute(&mut conn)?;

    if affected == 0 {
        return Err(concurrent_or_missing(&mut conn, id));
    }

    if updated.status != current.status {
        info!(property = %id, "agent edit reset listing to pending");
    }
    Ok(Json(updated))
}

/// Lifecycle transition, performed as a single conditional update: the
/// write succeeds only if the stored status still equals the one the
/// guard validated.
pub async fn transition_property(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Property>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Properties, PermAction::Edit).await?;

    let mut conn = state.conn.get()?;
    let property = fetch_visible(&mut conn, id, &filter)?;

    let current: PropertyStatus = property
        .status
        .parse()
        .map_err(|()| CoreError::NotFound("Property status"))?;
    let requested: PropertyStatus = req.status.parse().map_err(|()| {
        CoreError::InvalidTransition {
            from: property.status.clone(),
            to: req.status.clone(),
        }
    })?;

    let ctx = TransitionContext {
        role: actor.role(),
        is_owning_agent: property.agent_id == Some(actor.id),
    };
    validate_transition(current, requested, &ctx)?;

    let is_rejection = current == PropertyStatus::Pending && requested == PropertyStatus::Inactive;
    let rejection_reason = if is_rejection {
        Some(req.reason.clone().unwrap_or_default())
    } else {
        property.rejection_reason.clone()
    };

    let now = Utc::now();
    let affected = diesel::update(
        properties::table
            .filter(properties::id.eq(id))
            .filter(properties::status.eq(current.as_str())),
    )
    .set((
        properties::status.eq(requested.as_str()),
        properties::rejection_reason.eq(rejection_reason.clone()),
        properties::updated_at.eq(now),
    ))
    .execute(&mut conn)?;

    if affected == 0 {
        return Err(concurrent_or_missing(&mut conn, id));
    }

    info!(
        property = %id,
        from = %current,
        to = %requested,
        "property transition by {}",
        actor.id
    );

    notify_transition(&state, &mut conn, &actor, &property, current, requested, &req.reason)
        .await?;

    let fresh: Property = properties::table
        .filter(properties::id.eq(id))
        .first(&mut conn)?;
    Ok(Json(fresh))
}

async fn notify_transition(
    state: &AppState,
    conn: &mut PgConnection,
    actor: &Actor,
    property: &Property,
    from: PropertyStatus,
    to: PropertyStatus,
    reason: &Option<String>,
) -> CoreResult<()> {
    if from != PropertyStatus::Pending {
        return Ok(());
    }

    let recipient = property.agent_id.unwrap_or(property.created_by);
    if recipient == actor.id {
        return Ok(());
    }

    match to {
        PropertyStatus::Active => {
            state
                .notifier
                .dispatch(
                    conn,
                    recipient,
                    NotificationKind::PropertyApproved,
                    "Listing approved",
                    &format!("Your listing '{}' is now live", property.title),
                )
                .await?;
        }
        PropertyStatus::Inactive => {
            let detail = match reason.as_deref() {
                Some(r) if !r.is_empty() => format!(": {r}"),
                _ => String::new(),
            };
            state
                .notifier
                .dispatch(
                    conn,
                    recipient,
                    NotificationKind::PropertyRejected,
                    "Listing rejected",
                    &format!("Your listing '{}' was rejected{detail}", property.title),
                )
                .await?;
        }
        _ => {}
    }
    Ok(())
}

fn concurrent_or_missing(conn: &mut PgConnection, id: Uuid) -> CoreError {
    let still_there: Result<Option<Uuid>, _> = properties::table
        .filter(properties::id.eq(id))
        .filter(properties::deleted_at.is_null())
        .select(properties::id)
        .first(conn)
        .optional();

    match still_there {
        Ok(Some(_)) => CoreError::ConcurrentModification,
        Ok(None) => CoreError::NotFound("Property"),
        Err(e) => CoreError::Database(e),
    }
}

/// Properties referenced by leads are soft-deleted so the weak references
/// stay resolvable; unreferenced ones are removed outright.
pub async fn delete_property(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, CoreError> {
    let filter =
        require(&state.permissions, &actor, Module::Properties, PermAction::Delete).await?;

    let mut conn = state.conn.get()?;
    fetch_visible(&mut conn, id, &filter)?;

    let referencing_leads: i64 = leads::table
        .filter(leads::property_id.eq(id))
        .count()
        .get_result(&mut conn)?;

    if referencing_leads > 0 {
        diesel::update(properties::table.filter(properties::id.eq(id)))
            .set(properties::deleted_at.eq(Utc::now()))
            .execute(&mut conn)?;
        info!(property = %id, "soft-deleted ({} referencing leads)", referencing_leads);
    } else {
        diesel::delete(property_notes::table.filter(property_notes::property_id.eq(id)))
            .execute(&mut conn)?;
        diesel::delete(properties::table.filter(properties::id.eq(id))).execute(&mut conn)?;
        info!(property = %id, "deleted");
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_note(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<NoteRequest>,
) -> Result<Json<PropertyNote>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Properties, PermAction::Edit).await?;

    let mut conn = state.conn.get()?;
    fetch_visible(&mut conn, id, &filter)?;

    let note = PropertyNote {
        id: Uuid::new_v4(),
        property_id: id,
        author_id: actor.id,
        body: req.body,
        created_at: Utc::now(),
    };

    diesel::insert_into(property_notes::table)
        .values(&note)
        .execute(&mut conn)?;

    Ok(Json(note))
}

pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PropertyNote>>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Properties, PermAction::View).await?;

    let mut conn = state.conn.get()?;
    fetch_visible(&mut conn, id, &filter)?;

    let notes: Vec<PropertyNote> = property_notes::table
        .filter(property_notes::property_id.eq(id))
        .order(property_notes::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(notes))
}

pub fn configure_property_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/properties", get(list_properties).post(create_property))
        .route(
            "/api/properties/:id",
            get(get_property).put(update_property).delete(delete_property),
        )
        .route("/api/properties/:id/transition", post(transition_property))
        .route("/api/properties/:id/notes", get(list_notes).post(add_note))
}
