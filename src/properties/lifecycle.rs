//! Property approval workflow. The transition table is role-gated:
//! agent-created listings always enter `pending`, approval and rejection
//! are admin actions, and a super_admin may override any state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::security::permissions::Role;
use crate::shared::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    Draft,
    Pending,
    Active,
    Inactive,
    Sold,
    Rented,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Sold => "sold",
            Self::Rented => "rented",
        }
    }
}

impl FromStr for PropertyStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "sold" => Ok(Self::Sold),
            "rented" => Ok(Self::Rented),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PropertyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initial state rule: listings from trusted roles go live immediately,
/// agent listings always require approval.
pub fn initial_status(creator: Role) -> PropertyStatus {
    match creator {
        Role::SuperAdmin | Role::AgencyAdmin | Role::Staff => PropertyStatus::Active,
        Role::Agent | Role::Customer => PropertyStatus::Pending,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub role: Role,
    /// The acting agent is the property's owning agent.
    pub is_owning_agent: bool,
}

/// Validates a requested transition against the current state. On reject
/// the entity is untouched; the caller performs the write as a single
/// conditional update keyed on `current`.
pub fn validate_transition(
    current: PropertyStatus,
    requested: PropertyStatus,
    ctx: &TransitionContext,
) -> CoreResult<()> {
    use PropertyStatus::*;

    // Administrative override: any state to any state.
    if ctx.role == Role::SuperAdmin {
        return Ok(());
    }

    let permitted = match (current, requested) {
        (Pending, Active) => ctx.role == Role::AgencyAdmin,
        (Pending, Inactive) => ctx.role == Role::AgencyAdmin,
        (Active, Sold) | (Active, Rented) | (Active, Inactive) => {
            ctx.role == Role::AgencyAdmin || (ctx.role == Role::Agent && ctx.is_owning_agent)
        }
        // An owning agent may always push their listing back into the
        // approval queue.
        (_, Pending) => ctx.role == Role::Agent && ctx.is_owning_agent && current != Pending,
        _ => false,
    };

    if permitted {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: current.as_str().to_string(),
            to: requested.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PropertyStatus::*;

    fn ctx(role: Role, is_owning_agent: bool) -> TransitionContext {
        TransitionContext {
            role,
            is_owning_agent,
        }
    }

    #[test]
    fn test_agent_created_listings_start_pending() {
        assert_eq!(initial_status(Role::Agent), Pending);
    }

    #[test]
    fn test_trusted_roles_start_active() {
        assert_eq!(initial_status(Role::SuperAdmin), Active);
        assert_eq!(initial_status(Role::AgencyAdmin), Active);
        assert_eq!(initial_status(Role::Staff), Active);
    }

    #[test]
    fn test_admin_approves_pending() {
        assert!(validate_transition(Pending, Active, &ctx(Role::AgencyAdmin, false)).is_ok());
        assert!(validate_transition(Pending, Active, &ctx(Role::SuperAdmin, false)).is_ok());
    }

    #[test]
    fn test_agent_cannot_approve() {
        let err = validate_transition(Pending, Active, &ctx(Role::Agent, true)).unwrap_err();
        match err {
            CoreError::InvalidTransition { from, to } => {
                assert_eq!(from, "pending");
                assert_eq!(to, "active");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_staff_cannot_approve() {
        assert!(validate_transition(Pending, Active, &ctx(Role::Staff, false)).is_err());
    }

    #[test]
    fn test_reject_lands_in_inactive() {
        assert!(validate_transition(Pending, Inactive, &ctx(Role::AgencyAdmin, false)).is_ok());
        assert!(validate_transition(Pending, Inactive, &ctx(Role::Agent, true)).is_err());
    }

    #[test]
    fn test_owning_agent_closes_active_listing() {
        assert!(validate_transition(Active, Sold, &ctx(Role::Agent, true)).is_ok());
        assert!(validate_transition(Active, Rented, &ctx(Role::Agent, true)).is_ok());
        assert!(validate_transition(Active, Inactive, &ctx(Role::Agent, true)).is_ok());
    }

    #[test]
    fn test_non_owning_agent_cannot_close() {
        assert!(validate_transition(Active, Sold, &ctx(Role::Agent, false)).is_err());
    }

    #[test]
    fn test_agent_resubmits_for_approval() {
        assert!(validate_transition(Active, Pending, &ctx(Role::Agent, true)).is_ok());
        assert!(validate_transition(Inactive, Pending, &ctx(Role::Agent, true)).is_ok());
        assert!(validate_transition(Pending, Pending, &ctx(Role::Agent, true)).is_err());
    }

    #[test]
    fn test_super_admin_overrides_anything() {
        assert!(validate_transition(Sold, Draft, &ctx(Role::SuperAdmin, false)).is_ok());
        assert!(validate_transition(Draft, Rented, &ctx(Role::SuperAdmin, false)).is_ok());
        assert!(validate_transition(Inactive, Active, &ctx(Role::SuperAdmin, false)).is_ok());
    }

    #[test]
    fn test_unlisted_transitions_rejected() {
        assert!(validate_transition(Inactive, Active, &ctx(Role::AgencyAdmin, false)).is_err());
        assert!(validate_transition(Sold, Active, &ctx(Role::AgencyAdmin, false)).is_err());
        assert!(validate_transition(Draft, Active, &ctx(Role::AgencyAdmin, false)).is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [Draft, Pending, Active, Inactive, Sold, Rented] {
            assert_eq!(status.as_str().parse::<PropertyStatus>().unwrap(), status);
        }
        assert!("listed".parse::<PropertyStatus>().is_err());
    }
}
