pub mod assignment;
pub mod types;

use axum::{
    extract::{Extension, Path, Query, State},
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
use crate::shared::models::schema::{lead_entries, leads};
use crate::shared::models::Actor;
use crate::shared::state::AppState;

pub use assignment::{
    agent_agency, eligible_assignees, ensure_same_agency, monotonic_after, resolve_assignment,
    Assignment,
};
pub use types::{
    CreateLeadRequest, EntryKind, EntryRequest, Lead, LeadEntry, LeadListQuery, LeadPriority,
    LeadSource, LeadStatus, ReassignRequest, StatusRequest,
};

fn fetch_visible(conn: &mut PgConnection, id: Uuid, filter: &VisibilityFilter) -> CoreResult<Lead> {
    let lead: Option<Lead> = leads::table
        .filter(leads::id.eq(id))
        .first(conn)
        .optional()?;

    match lead {
        Some(l) if filter.allows(l.agency_id, l.assigned_agent_id) => Ok(l),
        _ => Err(CoreError::NotFound("Lead")),
    }
}

fn concurrent_or_missing(conn: &mut PgConnection, id: Uuid) -> CoreError {
    let still_there: Result<Option<Uuid>, _> = leads::table
        .filter(leads::id.eq(id))
        .select(leads::id)
        .first(conn)
        .optional();

    match still_there {
        Ok(Some(_)) => CoreError::ConcurrentModification,
        Ok(None) => CoreError::NotFound("Lead"),
        Err(e) => CoreError::Database(e),
    }
}

async fn create_lead_record(
    state: &AppState,
    actor: &Actor,
    req: CreateLeadRequest,
) -> CoreResult<Lead> {
    let mut conn = state.conn.get()?;

    let source = req
        .source
        .as_deref()
        .map(|s| s.parse::<LeadSource>().map_err(|()| CoreError::NotFound("Lead source")))
        .transpose()?
        .unwrap_or(LeadSource::Other);
    let priority = req
        .priority
        .as_deref()
        .map(|p| p.parse::<LeadPriority>().map_err(|()| CoreError::NotFound("Lead priority")))
        .transpose()?
        .unwrap_or(LeadPriority::Medium);

    let assignment =
        resolve_assignment(&mut conn, actor, req.property_id, req.assigned_agent_id)?;

    // Agency-scoped creators cannot route a lead into another agency.
    if actor.is_agency_scoped() {
        if let (Some(resolved), Some(own)) = (assignment.agency_id, actor.agency_id) {
            if resolved != own {
                return Err(CoreError::CrossAgencyViolation);
            }
        }
    }

    let now = Utc::now();
    let lead = Lead {
        id: Uuid::new_v4(),
        contact: req.contact,
        property_id: req.property_id,
        agency_id: assignment.agency_id,
        source: source.as_str().to_string(),
        status: LeadStatus::New.as_str().to_string(),
        priority: priority.as_str().to_string(),
        assigned_agent_id: assignment.agent_id,
        is_approved: false,
        created_by: Some(actor.id),
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(leads::table)
        .values(&lead)
        .execute(&mut conn)?;

    info!(
        lead = %lead.id,
        agent = ?lead.assigned_agent_id,
        "lead created by {}",
        actor.id
    );
    Ok(lead)
}

pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateLeadRequest>,
) -> Result<Json<Lead>, CoreError> {
    require(&state.permissions, &actor, Module::Leads, PermAction::Create).await?;
    Ok(Json(create_lead_record(&state, &actor, req).await?))
}

/// Customer-facing inquiry intake: same record, gated on the inquiries
/// module so visitors without lead-management access can submit.
pub async fn create_inquiry(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateLeadRequest>,
) -> Result<Json<Lead>, CoreError> {
    require(&state.permissions, &actor, Module::Inquiries, PermAction::Create).await?;
    Ok(Json(create_lead_record(&state, &actor, req).await?))
}

pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<LeadListQuery>,
) -> Result<Json<Vec<Lead>>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Leads, PermAction::View).await?;
    list_filtered(&state, filter, query)
}

/// Inbox of unapproved leads for triage.
pub async fn list_inquiries(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(mut query): Query<LeadListQuery>,
) -> Result<Json<Vec<Lead>>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Inquiries, PermAction::View).await?;
    query.approved = Some(false);
    list_filtered(&state, filter, query)
}

fn list_filtered(
    state: &AppState,
    filter: VisibilityFilter,
    query: LeadListQuery,
) -> Result<Json<Vec<Lead>>, CoreError> {
    let mut conn = state.conn.get()?;
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = leads::table.into_boxed();

    match filter {
        VisibilityFilter::All => {}
        VisibilityFilter::Agency(agency) => {
            q = q.filter(leads::agency_id.eq(agency));
        }
        VisibilityFilter::Agent(agent) => {
            q = q.filter(leads::assigned_agent_id.eq(agent));
        }
        VisibilityFilter::Nothing => return Ok(Json(vec![])),
    }

    if let Some(status) = query.status {
        q = q.filter(leads::status.eq(status));
    }
    if let Some(priority) = query.priority {
        q = q.filter(leads::priority.eq(priority));
    }
    if let Some(approved) = query.approved {
        q = q.filter(leads::is_approved.eq(approved));
    }

    let rows: Vec<Lead> = q
        .order(leads::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows))
}

pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Leads, PermAction::View).await?;
    let mut conn = state.conn.get()?;
    Ok(Json(fetch_visible(&mut conn, id, &filter)?))
}

/// Status move, guarded by a conditional update on the validated status.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Lead>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Leads, PermAction::Edit).await?;

    let mut conn = state.conn.get()?;
    let lead = fetch_visible(&mut conn, id, &filter)?;

    let requested: LeadStatus = req
        .status
        .parse()
        .map_err(|()| CoreError::NotFound("Lead status"))?;

    let now = Utc::now();
    let affected = diesel::update(
        leads::table
            .filter(leads::id.eq(id))
            .filter(leads::status.eq(lead.status.clone())),
    )
    .set((
        leads::status.eq(requested.as_str()),
        leads::updated_at.eq(now),
    ))
    .execute(&mut conn)?;

    if affected == 0 {
        return Err(concurrent_or_missing(&mut conn, id));
    }

    info!(lead = %id, from = %lead.status, to = %requested, "lead status changed");

    if let Some(agent) = lead.assigned_agent_id {
        if agent != actor.id {
            state
                .notifier
                .dispatch(
                    &mut conn,
                    agent,
                    NotificationKind::LeadStatusChanged,
                    "Lead status changed",
                    &format!("A lead you work moved to '{}'", requested),
                )
                .await?;
        }
    }

    let fresh: Lead = leads::table.filter(leads::id.eq(id)).first(&mut conn)?;
    Ok(Json(fresh))
}

/// Approval requires an assignee; the conditional update keys on both the
/// validated assignee and the unapproved flag so a concurrent reassign or
/// double approval loses cleanly.
pub async fn approve_lead(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Leads, PermAction::Edit).await?;
    require_lead_admin(&actor)?;

    let mut conn = state.conn.get()?;
    let lead = fetch_visible(&mut conn, id, &filter)?;

    let assignee = lead.assigned_agent_id.ok_or(CoreError::MissingAssignee)?;

    let affected = diesel::update(
        leads::table
            .filter(leads::id.eq(id))
            .filter(leads::assigned_agent_id.eq(assignee))
            .filter(leads::is_approved.eq(false)),
    )
    .set((leads::is_approved.eq(true), leads::updated_at.eq(Utc::now())))
    .execute(&mut conn)?;

    if affected == 0 {
        return Err(concurrent_or_missing(&mut conn, id));
    }

    info!(lead = %id, agent = %assignee, "lead approved by {}", actor.id);

    state
        .notifier
        .dispatch(
            &mut conn,
            assignee,
            NotificationKind::LeadAssigned,
            "Lead assigned to you",
            "An approved lead is waiting for your follow-up",
        )
        .await?;

    let fresh: Lead = leads::table.filter(leads::id.eq(id)).first(&mut conn)?;
    Ok(Json(fresh))
}

pub async fn reassign_lead(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReassignRequest>,
) -> Result<Json<Lead>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Leads, PermAction::Edit).await?;
    require_lead_admin(&actor)?;

    let mut conn = state.conn.get()?;
    let lead: Lead = leads::table
        .filter(leads::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(CoreError::NotFound("Lead"))?;

    // Agency boundary first: a target in the wrong agency is reported as
    // such even when the lead is outside the actor's own scope.
    let new_agency = agent_agency(&mut conn, req.agent_id)?;
    ensure_same_agency(lead.agency_id, new_agency)?;

    if !filter.allows(lead.agency_id, lead.assigned_agent_id) {
        return Err(CoreError::NotFound("Lead"));
    }

    let previous = lead.assigned_agent_id;
    let update = diesel::update(leads::table.filter(leads::id.eq(id)));
    let set = (
        leads::assigned_agent_id.eq(Some(req.agent_id)),
        leads::agency_id.eq(lead.agency_id.or(new_agency)),
        leads::updated_at.eq(Utc::now()),
    );
    let affected = match previous {
        Some(prev) => update
            .filter(leads::assigned_agent_id.eq(prev))
            .set(set)
            .execute(&mut conn)?,
        None => update
            .filter(leads::assigned_agent_id.is_null())
            .set(set)
            .execute(&mut conn)?,
    };

    if affected == 0 {
        return Err(concurrent_or_missing(&mut conn, id));
    }

    info!(
        lead = %id,
        from = ?previous,
        to = %req.agent_id,
        "lead reassigned by {}",
        actor.id
    );

    state
        .notifier
        .dispatch(
            &mut conn,
            req.agent_id,
            NotificationKind::LeadAssigned,
            "Lead assigned to you",
            "A lead was reassigned to you",
        )
        .await?;

    let fresh: Lead = leads::table.filter(leads::id.eq(id)).first(&mut conn)?;
    Ok(Json(fresh))
}

fn require_lead_admin(actor: &Actor) -> CoreResult<()> {
    match actor.role() {
        Role::AgencyAdmin | Role::SuperAdmin => Ok(()),
        _ => Err(CoreError::Unauthorized {
            module: Module::Leads,
            action: PermAction::Edit,
        }),
    }
}

pub async fn add_entry(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<EntryRequest>,
) -> Result<Json<LeadEntry>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Leads, PermAction::Edit).await?;

    let mut conn = state.conn.get()?;
    fetch_visible(&mut conn, id, &filter)?;

    let kind: EntryKind = req
        .kind
        .parse()
        .map_err(|()| CoreError::NotFound("Entry kind"))?;

    let last: Option<chrono::DateTime<Utc>> = lead_entries::table
        .filter(lead_entries::lead_id.eq(id))
        .select(lead_entries::created_at)
        .order(lead_entries::created_at.desc())
        .first(&mut conn)
        .optional()?;

    let entry = LeadEntry {
        id: Uuid::new_v4(),
        lead_id: id,
        kind: kind.as_str().to_string(),
        author_id: actor.id,
        body: req.body,
        due_date: req.due_date,
        assigned_to: req.assigned_to,
        reminded_at: None,
        created_at: monotonic_after(last, Utc::now()),
    };

    diesel::insert_into(lead_entries::table)
        .values(&entry)
        .execute(&mut conn)?;

    if kind == EntryKind::Task {
        if let Some(assignee) = req.assigned_to {
            if assignee != actor.id {
                state
                    .notifier
                    .dispatch(
                        &mut conn,
                        assignee,
                        NotificationKind::TaskAssigned,
                        "Task assigned to you",
                        &entry.body,
                    )
                    .await?;
            }
        }
    }

    Ok(Json(entry))
}

pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LeadEntry>>, CoreError> {
    let filter = require(&state.permissions, &actor, Module::Leads, PermAction::View).await?;

    let mut conn = state.conn.get()?;
    fetch_visible(&mut conn, id, &filter)?;

    let entries: Vec<LeadEntry> = lead_entries::table
        .filter(lead_entries::lead_id.eq(id))
        .order(lead_entries::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(entries))
}

pub fn configure_lead_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leads", get(list_leads).post(create_lead))
        .route("/api/leads/:id", get(get_lead))
        .route("/api/leads/:id/status", post(update_status))
        .route("/api/leads/:id/approve", post(approve_lead))
        .route("/api/leads/:id/reassign", post(reassign_lead))
        .route("/api/leads/:id/entries", get(list_entries).post(add_entry))
        .route("/api/inquiries", get(list_inquiries).post(create_inquiry))
}
