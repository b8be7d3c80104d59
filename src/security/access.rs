//! Access evaluator: one authorization decision per request, taken at the
//! API boundary before any mutating operation on properties, leads,
//! agencies or users. Handlers never re-derive permissions ad hoc; the
//! decision carries the visibility filter the read/write path must apply.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::security::permissions::{Module, PermAction, PermissionRegistry, Role};
use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::Actor;

/// What subset of entities the actor may see or touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum VisibilityFilter {
    /// Unrestricted (super_admin, staff, and customer-facing reads).
    All,
    /// Entities owned by the given agency.
    Agency(Uuid),
    /// Entities whose agent (or, for leads, assigned agent) is the actor.
    Agent(Uuid),
    /// Nothing is visible; used when the decision is a deny.
    Nothing,
}

impl VisibilityFilter {
    /// Scope predicate over an entity's owning agency and agent fields.
    /// Properties pass `(Some(agency_id), agent_id)`; leads pass
    /// `(agency_id, assigned_agent_id)`.
    pub fn allows(&self, entity_agency: Option<Uuid>, entity_agent: Option<Uuid>) -> bool {
        match self {
            Self::All => true,
            Self::Agency(agency) => entity_agency == Some(*agency),
            Self::Agent(actor_id) => entity_agent == Some(*actor_id),
            Self::Nothing => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub filter: VisibilityFilter,
    pub reason: &'static str,
}

impl Decision {
    pub fn allow(filter: VisibilityFilter) -> Self {
        Self {
            allowed: true,
            filter,
            reason: "granted",
        }
    }

    pub fn deny(reason: &'static str) -> Self {
        Self {
            allowed: false,
            filter: VisibilityFilter::Nothing,
            reason,
        }
    }
}

/// Evaluates (actor, module, action) against the grant state. Pure over
/// the registry snapshot; no side effects.
pub async fn authorize(
    registry: &PermissionRegistry,
    actor: &Actor,
    module: Module,
    action: PermAction,
) -> Decision {
    if !actor.is_active {
        return Decision::deny("account disabled");
    }

    let role = match actor.role.parse::<Role>() {
        Ok(role) => role,
        Err(()) => return Decision::deny("unknown role"),
    };

    // Agency-scoped roles without an agency affiliation cannot act on
    // agency-scoped modules at all.
    if matches!(role, Role::AgencyAdmin | Role::Agent) && actor.agency_id.is_none() {
        return Decision::deny("role requires an agency affiliation");
    }

    let granted = registry
        .resolve(role, module, action, actor.id, actor.agency_id)
        .await;
    if !granted {
        debug!(
            actor = %actor.id,
            role = %role,
            "access denied for {}.{}",
            module,
            action
        );
        return Decision::deny("no grant for module action");
    }

    let filter = match role {
        Role::SuperAdmin | Role::Staff => VisibilityFilter::All,
        // Checked non-null above.
        Role::AgencyAdmin => match actor.agency_id {
            Some(agency) => VisibilityFilter::Agency(agency),
            None => return Decision::deny("role requires an agency affiliation"),
        },
        Role::Agent => VisibilityFilter::Agent(actor.id),
        Role::Customer => VisibilityFilter::All,
    };

    Decision::allow(filter)
}

/// Convenience wrapper for mutating handlers: deny becomes a typed error.
pub async fn require(
    registry: &PermissionRegistry,
    actor: &Actor,
    module: Module,
    action: PermAction,
) -> CoreResult<VisibilityFilter> {
    let decision = authorize(registry, actor, module, action).await;
    if decision.allowed {
        Ok(decision.filter)
    } else {
        Err(CoreError::Unauthorized { module, action })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn actor(role: &str, agency: Option<Uuid>) -> Actor {
        let now = Utc::now();
        Actor {
            id: Uuid::new_v4(),
            username: "t".into(),
            email: None,
            role: role.to_string(),
            agency_id: agency,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_super_admin_unrestricted() {
        let registry = PermissionRegistry::new();
        let admin = actor("super_admin", None);
        let decision = authorize(&registry, &admin, Module::Permissions, PermAction::Edit).await;
        assert!(decision.allowed);
        assert_eq!(decision.filter, VisibilityFilter::All);
    }

    #[tokio::test]
    async fn test_agency_admin_scoped_to_agency() {
        let registry = PermissionRegistry::new();
        let agency = Uuid::new_v4();
        let admin = actor("agency_admin", Some(agency));
        let decision = authorize(&registry, &admin, Module::Properties, PermAction::Edit).await;
        assert!(decision.allowed);
        assert_eq!(decision.filter, VisibilityFilter::Agency(agency));
    }

    #[tokio::test]
    async fn test_agency_admin_without_agency_denied() {
        let registry = PermissionRegistry::new();
        let admin = actor("agency_admin", None);
        let decision = authorize(&registry, &admin, Module::Properties, PermAction::View).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_agent_filter_matches_own_entities() {
        let registry = PermissionRegistry::new();
        let agent = actor("agent", Some(Uuid::new_v4()));
        let decision = authorize(&registry, &agent, Module::Leads, PermAction::View).await;
        assert!(decision.allowed);

        let filter = decision.filter;
        assert!(filter.allows(None, Some(agent.id)));
        assert!(!filter.allows(None, Some(Uuid::new_v4())));
        assert!(!filter.allows(None, None));
    }

    #[tokio::test]
    async fn test_default_deny_for_ungranted_module() {
        let registry = PermissionRegistry::new();
        let agent = actor("agent", Some(Uuid::new_v4()));
        let decision = authorize(&registry, &agent, Module::Settings, PermAction::View).await;
        assert!(!decision.allowed);
        assert_eq!(decision.filter, VisibilityFilter::Nothing);
    }

    #[tokio::test]
    async fn test_customer_has_no_admin_access() {
        let registry = PermissionRegistry::new();
        let customer = actor("user", None);
        for action in PermAction::ALL {
            let decision = authorize(&registry, &customer, Module::Users, action).await;
            assert!(!decision.allowed);
        }
        let decision = authorize(&registry, &customer, Module::Properties, PermAction::View).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_inactive_actor_denied() {
        let registry = PermissionRegistry::new();
        let mut admin = actor("super_admin", None);
        admin.is_active = false;
        let decision = authorize(&registry, &admin, Module::Properties, PermAction::View).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_agency_filter_predicate() {
        let agency = Uuid::new_v4();
        let filter = VisibilityFilter::Agency(agency);
        assert!(filter.allows(Some(agency), None));
        assert!(!filter.allows(Some(Uuid::new_v4()), None));
        assert!(!filter.allows(None, None));
    }
}
