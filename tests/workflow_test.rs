#[cfg(test)]
mod workflow_integration_tests {
    use chrono::Utc;
    use estateserver::leads::ensure_same_agency;
    use estateserver::properties::{
        initial_status, validate_transition, PropertyStatus, TransitionContext,
    };
    use estateserver::security::access::{authorize, VisibilityFilter};
    use estateserver::security::permissions::{
        role_default, Module, OverrideScope, PermAction, PermissionRegistry, Role,
    };
    use estateserver::shared::errors::CoreError;
    use estateserver::shared::models::Actor;
    use uuid::Uuid;

    fn actor(role: &str, agency: Option<Uuid>) -> Actor {
        let now = Utc::now();
        Actor {
            id: Uuid::new_v4(),
            username: format!("{role}-user"),
            email: None,
            role: role.to_string(),
            agency_id: agency,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx(role: Role, is_owning_agent: bool) -> TransitionContext {
        TransitionContext {
            role,
            is_owning_agent,
        }
    }

    /// Agent creates in "Acme" -> pending; admin approves -> active; the
    /// agent's re-edit forces pending again; admin re-approves.
    #[test]
    fn test_agent_listing_approval_cycle() {
        let mut status = initial_status(Role::Agent);
        assert_eq!(status, PropertyStatus::Pending);

        validate_transition(status, PropertyStatus::Active, &ctx(Role::AgencyAdmin, false))
            .expect("admin approval from pending");
        status = PropertyStatus::Active;

        // Content edits by the owning agent always re-enter the queue.
        validate_transition(status, PropertyStatus::Pending, &ctx(Role::Agent, true))
            .expect("agent edit resets to pending");
        status = PropertyStatus::Pending;

        validate_transition(status, PropertyStatus::Active, &ctx(Role::AgencyAdmin, false))
            .expect("admin re-approval");
    }

    #[test]
    fn test_agent_never_activates_a_pending_listing() {
        let err = validate_transition(
            PropertyStatus::Pending,
            PropertyStatus::Active,
            &ctx(Role::Agent, true),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_exactly_one_racing_transition_wins() {
        // Two admins race an approve and a reject from the same observed
        // state. Both guards pass; the conditional write discipline means
        // whichever lands second sees zero affected rows.
        let observed = PropertyStatus::Pending;
        let admin = ctx(Role::AgencyAdmin, false);

        assert!(validate_transition(observed, PropertyStatus::Active, &admin).is_ok());
        assert!(validate_transition(observed, PropertyStatus::Inactive, &admin).is_ok());

        // After the approve wins, the reject's guard no longer holds.
        let after_approve = PropertyStatus::Active;
        assert!(validate_transition(after_approve, PropertyStatus::Inactive, &admin).is_ok());
        assert!(
            validate_transition(after_approve, PropertyStatus::Active, &admin).is_err(),
            "stale approve must not re-validate"
        );
    }

    #[tokio::test]
    async fn test_default_deny_holds_everywhere_without_grants() {
        let registry = PermissionRegistry::new();
        let customer = actor("user", None);
        let staff = actor("staff", None);

        for action in PermAction::ALL {
            let decision = authorize(&registry, &customer, Module::Permissions, action).await;
            assert!(!decision.allowed);
            let decision = authorize(&registry, &staff, Module::Permissions, action).await;
            assert!(!decision.allowed, "staff follows strict default-deny");
        }
    }

    #[tokio::test]
    async fn test_agency_grant_round_trip() {
        let registry = PermissionRegistry::new();
        let agency = Uuid::new_v4();
        let agent = actor("agent", Some(agency));

        // Role default is false for this pair.
        assert!(!role_default(Role::Agent, Module::Cms, PermAction::Edit));
        let before = authorize(&registry, &agent, Module::Cms, PermAction::Edit).await;
        assert!(!before.allowed);

        registry
            .insert_unpersisted(OverrideScope::Agency, agency, Module::Cms, PermAction::Edit, true)
            .await;

        let after = authorize(&registry, &agent, Module::Cms, PermAction::Edit).await;
        assert!(after.allowed);
    }

    #[tokio::test]
    async fn test_visibility_filters_per_role() {
        let registry = PermissionRegistry::new();
        let agency = Uuid::new_v4();

        let staff = actor("staff", None);
        let decision = authorize(&registry, &staff, Module::Leads, PermAction::View).await;
        assert_eq!(decision.filter, VisibilityFilter::All);

        let admin = actor("agency_admin", Some(agency));
        let decision = authorize(&registry, &admin, Module::Leads, PermAction::View).await;
        assert_eq!(decision.filter, VisibilityFilter::Agency(agency));
        assert!(decision.filter.allows(Some(agency), None));
        assert!(!decision.filter.allows(Some(Uuid::new_v4()), None));

        let agent = actor("agent", Some(agency));
        let decision = authorize(&registry, &agent, Module::Leads, PermAction::View).await;
        assert_eq!(decision.filter, VisibilityFilter::Agent(agent.id));
        assert!(decision.filter.allows(None, Some(agent.id)));
    }

    #[test]
    fn test_cross_agency_reassignment_rejected() {
        let agency_x = Uuid::new_v4();
        let agency_y = Uuid::new_v4();

        let result = ensure_same_agency(Some(agency_y), Some(agency_x));
        assert!(matches!(result, Err(CoreError::CrossAgencyViolation)));

        assert!(ensure_same_agency(Some(agency_x), Some(agency_x)).is_ok());
    }

    #[test]
    fn test_super_admin_override_spans_all_states() {
        let all = [
            PropertyStatus::Draft,
            PropertyStatus::Pending,
            PropertyStatus::Active,
            PropertyStatus::Inactive,
            PropertyStatus::Sold,
            PropertyStatus::Rented,
        ];
        for from in all {
            for to in all {
                assert!(
                    validate_transition(from, to, &ctx(Role::SuperAdmin, false)).is_ok(),
                    "super_admin override {from} -> {to}"
                );
            }
        }
    }
}
