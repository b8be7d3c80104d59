//! Assignment and routing: resolves which agent and agency own a lead,
//! derives assignees from referenced properties, and validates
//! reassignment targets against the agency boundary.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::security::permissions::Role;
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::schema::{properties, users};
use crate::shared::models::Actor;

/// Ownership resolved for a new lead: who works it and which agency it
/// belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Assignment {
    pub agent_id: Option<Uuid>,
    pub agency_id: Option<Uuid>,
}

/// Pure agency-boundary check used by reassignment. A lead with a known
/// agency only accepts agents of that agency.
pub fn ensure_same_agency(
    lead_agency: Option<Uuid>,
    agent_agency: Option<Uuid>,
) -> CoreResult<()> {
    match (lead_agency, agent_agency) {
        (Some(lead), Some(agent)) if lead == agent => Ok(()),
        // A lead that has not been routed to an agency yet adopts the
        // agent's agency on first assignment.
        (None, Some(_)) => Ok(()),
        _ => Err(CoreError::CrossAgencyViolation),
    }
}

/// Monotonic timestamp for append-only logs: never earlier than the last
/// entry, even when the wall clock retreats.
pub fn monotonic_after(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(last) if now <= last => last + Duration::milliseconds(1),
        _ => now,
    }
}

/// Looks up an active agent and returns its agency.
pub fn agent_agency(conn: &mut PgConnection, agent_id: Uuid) -> CoreResult<Option<Uuid>> {
    let agency: Option<Option<Uuid>> = users::table
        .filter(users::id.eq(agent_id))
        .filter(users::role.eq(Role::Agent.as_str()))
        .filter(users::is_active.eq(true))
        .select(users::agency_id)
        .first(conn)
        .optional()?;
    agency.ok_or(CoreError::NotFound("Agent"))
}

/// Resolves the assignment for a lead at creation time. An explicit
/// assignee wins; otherwise the referenced property's agent is derived
/// (never auto-approving); otherwise the lead stays unassigned, scoped to
/// the property's or creator's agency when one is known.
pub fn resolve_assignment(
    conn: &mut PgConnection,
    creator: &Actor,
    property_id: Option<Uuid>,
    explicit_agent: Option<Uuid>,
) -> CoreResult<Assignment> {
    if let Some(agent_id) = explicit_agent {
        let agency = agent_agency(conn, agent_id)?;
        return Ok(Assignment {
            agent_id: Some(agent_id),
            agency_id: agency,
        });
    }

    if let Some(pid) = property_id {
        let row: Option<(Uuid, Option<Uuid>)> = properties::table
            .filter(properties::id.eq(pid))
            .filter(properties::deleted_at.is_null())
            .select((properties::agency_id, properties::agent_id))
            .first(conn)
            .optional()?;

        if let Some((property_agency, property_agent)) = row {
            return Ok(Assignment {
                agent_id: property_agent,
                agency_id: Some(property_agency),
            });
        }
    }

    Ok(Assignment {
        agent_id: None,
        agency_id: creator.agency_id,
    })
}

/// Active agents of an agency, for assignee pickers.
pub fn eligible_assignees(conn: &mut PgConnection, agency_id: Uuid) -> CoreResult<Vec<Actor>> {
    let agents: Vec<Actor> = users::table
        .filter(users::agency_id.eq(agency_id))
        .filter(users::role.eq(Role::Agent.as_str()))
        .filter(users::is_active.eq(true))
        .order(users::username.asc())
        .load(conn)?;
    Ok(agents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_agency_passes() {
        let agency = Uuid::new_v4();
        assert!(ensure_same_agency(Some(agency), Some(agency)).is_ok());
    }

    #[test]
    fn test_cross_agency_rejected() {
        let result = ensure_same_agency(Some(Uuid::new_v4()), Some(Uuid::new_v4()));
        assert!(matches!(result, Err(CoreError::CrossAgencyViolation)));
    }

    #[test]
    fn test_agent_without_agency_rejected() {
        let result = ensure_same_agency(Some(Uuid::new_v4()), None);
        assert!(matches!(result, Err(CoreError::CrossAgencyViolation)));
    }

    #[test]
    fn test_unrouted_lead_adopts_agent_agency() {
        assert!(ensure_same_agency(None, Some(Uuid::new_v4())).is_ok());
    }

    #[test]
    fn test_monotonic_timestamps() {
        let now = Utc::now();
        assert_eq!(monotonic_after(None, now), now);

        let earlier = now - Duration::seconds(5);
        assert_eq!(monotonic_after(Some(earlier), now), now);

        let later = now + Duration::seconds(5);
        let stamped = monotonic_after(Some(later), now);
        assert!(stamped > later);

        let stamped_eq = monotonic_after(Some(now), now);
        assert!(stamped_eq > now);
    }
}
