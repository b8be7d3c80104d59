//! Permission model: static role-default grants plus scoped overrides.
//!
//! Role defaults are built once at process start and never mutated.
//! Overrides (per-agency or per-user) are durable rows mirrored into an
//! in-memory snapshot; reads take the snapshot without blocking writers,
//! writes go to the database first and then to the snapshot.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::schema::permission_overrides;
use crate::shared::utils::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Staff,
    AgencyAdmin,
    Agent,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Staff => "staff",
            Self::AgencyAdmin => "agency_admin",
            Self::Agent => "agent",
            Self::Customer => "user",
        }
    }

    pub fn hierarchy_level(&self) -> u8 {
        match self {
            Self::Customer => 0,
            Self::Agent => 1,
            Self::AgencyAdmin => 2,
            Self::Staff => 3,
            Self::SuperAdmin => 4,
        }
    }

    pub fn is_at_least(&self, other: &Role) -> bool {
        self.hierarchy_level() >= other.hierarchy_level()
    }

    /// The static (module, action) pairs this role is granted by default.
    /// Anything absent here is denied unless a scope override says otherwise.
    pub fn default_grants(&self) -> HashSet<(Module, PermAction)> {
        use Module::*;
        use PermAction::*;

        let mut grants = HashSet::new();
        match self {
            Self::SuperAdmin => {
                for module in Module::ALL {
                    for action in PermAction::ALL {
                        grants.insert((module, action));
                    }
                }
            }
            Self::Staff => {
                for module in [
                    Agencies,
                    Properties,
                    Leads,
                    Users,
                    Cms,
                    Settings,
                    Analytics,
                    Inquiries,
                    ContactMessages,
                ] {
                    grants.insert((module, View));
                }
                for module in [Properties, Leads, Cms, Inquiries, ContactMessages] {
                    grants.insert((module, Create));
                    grants.insert((module, Edit));
                }
            }
            Self::AgencyAdmin => {
                grants.insert((Agencies, View));
                for action in PermAction::ALL {
                    grants.insert((Properties, action));
                    grants.insert((Leads, action));
                }
                grants.insert((Users, View));
                grants.insert((Users, Create));
                grants.insert((Users, Edit));
                grants.insert((Analytics, View));
                grants.insert((Settings, View));
                grants.insert((Settings, Edit));
                grants.insert((Inquiries, View));
                grants.insert((Inquiries, Edit));
                grants.insert((ContactMessages, View));
            }
            Self::Agent => {
                grants.insert((Properties, View));
                grants.insert((Properties, Create));
                grants.insert((Properties, Edit));
                grants.insert((Leads, View));
                grants.insert((Leads, Edit));
                grants.insert((Inquiries, View));
            }
            Self::Customer => {
                grants.insert((Properties, View));
                grants.insert((Inquiries, Create));
                grants.insert((ContactMessages, Create));
            }
        }
        grants
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "super_admin" | "superadmin" => Ok(Self::SuperAdmin),
            "staff" => Ok(Self::Staff),
            "agency_admin" | "agencyadmin" => Ok(Self::AgencyAdmin),
            "agent" => Ok(Self::Agent),
            "user" | "customer" => Ok(Self::Customer),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Agencies,
    Properties,
    Leads,
    Users,
    Cms,
    Settings,
    Analytics,
    Permissions,
    Inquiries,
    ContactMessages,
}

impl Module {
    pub const ALL: [Module; 10] = [
        Module::Agencies,
        Module::Properties,
        Module::Leads,
        Module::Users,
        Module::Cms,
        Module::Settings,
        Module::Analytics,
        Module::Permissions,
        Module::Inquiries,
        Module::ContactMessages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agencies => "agencies",
            Self::Properties => "properties",
            Self::Leads => "leads",
            Self::Users => "users",
            Self::Cms => "cms",
            Self::Settings => "settings",
            Self::Analytics => "analytics",
            Self::Permissions => "permissions",
            Self::Inquiries => "inquiries",
            Self::ContactMessages => "contact_messages",
        }
    }
}

impl FromStr for Module {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agencies" => Ok(Self::Agencies),
            "properties" => Ok(Self::Properties),
            "leads" => Ok(Self::Leads),
            "users" => Ok(Self::Users),
            "cms" => Ok(Self::Cms),
            "settings" => Ok(Self::Settings),
            "analytics" => Ok(Self::Analytics),
            "permissions" => Ok(Self::Permissions),
            "inquiries" => Ok(Self::Inquiries),
            "contact_messages" => Ok(Self::ContactMessages),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermAction {
    View,
    Create,
    Edit,
    Delete,
}

impl PermAction {
    pub const ALL: [PermAction; 4] = [
        PermAction::View,
        PermAction::Create,
        PermAction::Edit,
        PermAction::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for PermAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "view" => Ok(Self::View),
            "create" => Ok(Self::Create),
            "edit" => Ok(Self::Edit),
            "delete" => Ok(Self::Delete),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PermAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideScope {
    Agency,
    User,
}

impl OverrideScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agency => "agency",
            Self::User => "user",
        }
    }
}

impl FromStr for OverrideScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agency" => Ok(Self::Agency),
            "user" => Ok(Self::User),
            _ => Err(()),
        }
    }
}

static ROLE_DEFAULTS: Lazy<HashMap<Role, HashSet<(Module, PermAction)>>> = Lazy::new(|| {
    [
        Role::SuperAdmin,
        Role::Staff,
        Role::AgencyAdmin,
        Role::Agent,
        Role::Customer,
    ]
    .into_iter()
    .map(|role| (role, role.default_grants()))
    .collect()
});

/// Role-default lookup. Absence means deny.
pub fn role_default(role: Role, module: Module, action: PermAction) -> bool {
    ROLE_DEFAULTS
        .get(&role)
        .map(|grants| grants.contains(&(module, action)))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = permission_overrides)]
pub struct PermissionOverride {
    pub id: Uuid,
    pub scope: String,
    pub scope_id: Uuid,
    pub module: String,
    pub action: String,
    pub allowed: bool,
    pub granted_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

type OverrideKey = (OverrideScope, Uuid, Module, PermAction);

/// In-memory mirror of the `permission_overrides` table. Reads are
/// snapshot-consistent (a caller may briefly observe a stale grant set);
/// writes hit the database before the snapshot so a crash can only lose
/// the cache, never the durable record.
pub struct PermissionRegistry {
    overrides: RwLock<HashMap<OverrideKey, bool>>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Loads the full override table into the snapshot. Called once at boot.
    pub async fn load(&self, pool: &DbPool) -> CoreResult<usize> {
        let mut conn = pool.get()?;
        let rows: Vec<PermissionOverride> = permission_overrides::table.load(&mut conn)?;

        let mut map = HashMap::new();
        for row in &rows {
            match Self::key_of(row) {
                Some(key) => {
                    map.insert(key, row.allowed);
                }
                None => warn!(
                    "skipping malformed permission override {} ({}/{}/{})",
                    row.id, row.scope, row.module, row.action
                ),
            }
        }

        let count = map.len();
        *self.overrides.write().await = map;
        info!("loaded {} permission overrides", count);
        Ok(count)
    }

    fn key_of(row: &PermissionOverride) -> Option<OverrideKey> {
        let scope = row.scope.parse().ok()?;
        let module = row.module.parse().ok()?;
        let action = row.action.parse().ok()?;
        Some((scope, row.scope_id, module, action))
    }

    /// Resolves a grant for an actor. Lookup order: user-scope override,
    /// agency-scope override, role default, deny.
    pub async fn resolve(
        &self,
        role: Role,
        module: Module,
        action: PermAction,
        user_id: Uuid,
        agency_id: Option<Uuid>,
    ) -> bool {
        let overrides = self.overrides.read().await;

        if let Some(&allowed) = overrides.get(&(OverrideScope::User, user_id, module, action)) {
            return allowed;
        }
        if let Some(agency) = agency_id {
            if let Some(&allowed) = overrides.get(&(OverrideScope::Agency, agency, module, action))
            {
                return allowed;
            }
        }
        role_default(role, module, action)
    }

    /// Upserts an override: database row first, then the snapshot. The
    /// write lock serializes concurrent grant/revoke calls so the snapshot
    /// cannot lose an update.
    pub async fn grant(
        &self,
        pool: &DbPool,
        granted_by: Uuid,
        scope: OverrideScope,
        scope_id: Uuid,
        module: Module,
        action: PermAction,
        allowed: bool,
    ) -> CoreResult<()> {
        let mut guard = self.overrides.write().await;

        let mut conn = pool.get()?;
        let now = Utc::now();
        let row = PermissionOverride {
            id: Uuid::new_v4(),
            scope: scope.as_str().to_string(),
            scope_id,
            module: module.as_str().to_string(),
            action: action.as_str().to_string(),
            allowed,
            granted_by,
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(permission_overrides::table)
            .values(&row)
            .on_conflict((
                permission_overrides::scope,
                permission_overrides::scope_id,
                permission_overrides::module,
                permission_overrides::action,
            ))
            .do_update()
            .set((
                permission_overrides::allowed.eq(allowed),
                permission_overrides::granted_by.eq(granted_by),
                permission_overrides::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        guard.insert((scope, scope_id, module, action), allowed);
        info!(
            "permission override set: {}:{} {}.{} = {}",
            scope.as_str(),
            scope_id,
            module,
            action,
            allowed
        );
        Ok(())
    }

    /// Deletes an override, restoring the role default for that key.
    pub async fn revoke(
        &self,
        pool: &DbPool,
        scope: OverrideScope,
        scope_id: Uuid,
        module: Module,
        action: PermAction,
    ) -> CoreResult<()> {
        let mut guard = self.overrides.write().await;

        let mut conn = pool.get()?;
        let deleted = diesel::delete(
            permission_overrides::table
                .filter(permission_overrides::scope.eq(scope.as_str()))
                .filter(permission_overrides::scope_id.eq(scope_id))
                .filter(permission_overrides::module.eq(module.as_str()))
                .filter(permission_overrides::action.eq(action.as_str())),
        )
        .execute(&mut conn)?;

        if deleted == 0 {
            return Err(CoreError::NotFound("Permission override"));
        }

        guard.remove(&(scope, scope_id, module, action));
        info!(
            "permission override removed: {}:{} {}.{}",
            scope.as_str(),
            scope_id,
            module,
            action
        );
        Ok(())
    }

    /// Test-and-boot helper: seeds the snapshot without touching storage.
    pub async fn insert_unpersisted(
        &self,
        scope: OverrideScope,
        scope_id: Uuid,
        module: Module,
        action: PermAction,
        allowed: bool,
    ) {
        self.overrides
            .write()
            .await
            .insert((scope, scope_id, module, action), allowed);
    }
}

impl Default for PermissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deny_without_grant() {
        assert!(!role_default(Role::Agent, Module::Permissions, PermAction::Edit));
        assert!(!role_default(Role::Customer, Module::Users, PermAction::View));
        assert!(!role_default(Role::Staff, Module::Permissions, PermAction::View));
        assert!(!role_default(Role::Agent, Module::Properties, PermAction::Delete));
    }

    #[test]
    fn test_super_admin_has_everything() {
        for module in Module::ALL {
            for action in PermAction::ALL {
                assert!(role_default(Role::SuperAdmin, module, action));
            }
        }
    }

    #[test]
    fn test_staff_cannot_delete() {
        for module in Module::ALL {
            assert!(!role_default(Role::Staff, module, PermAction::Delete));
        }
    }

    #[test]
    fn test_agent_defaults() {
        assert!(role_default(Role::Agent, Module::Properties, PermAction::Create));
        assert!(role_default(Role::Agent, Module::Leads, PermAction::Edit));
        assert!(!role_default(Role::Agent, Module::Leads, PermAction::Delete));
        assert!(!role_default(Role::Agent, Module::Cms, PermAction::View));
    }

    #[test]
    fn test_role_round_trip() {
        for role in [
            Role::SuperAdmin,
            Role::Staff,
            Role::AgencyAdmin,
            Role::Agent,
            Role::Customer,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("landlord".parse::<Role>().is_err());
    }

    #[test]
    fn test_hierarchy() {
        assert!(Role::SuperAdmin.is_at_least(&Role::AgencyAdmin));
        assert!(Role::AgencyAdmin.is_at_least(&Role::Agent));
        assert!(!Role::Agent.is_at_least(&Role::Staff));
    }

    #[tokio::test]
    async fn test_user_override_beats_agency_override() {
        let registry = PermissionRegistry::new();
        let user_id = Uuid::new_v4();
        let agency_id = Uuid::new_v4();

        registry
            .insert_unpersisted(OverrideScope::Agency, agency_id, Module::Cms, PermAction::Edit, true)
            .await;
        registry
            .insert_unpersisted(OverrideScope::User, user_id, Module::Cms, PermAction::Edit, false)
            .await;

        let resolved = registry
            .resolve(Role::Agent, Module::Cms, PermAction::Edit, user_id, Some(agency_id))
            .await;
        assert!(!resolved);

        let other_user = registry
            .resolve(Role::Agent, Module::Cms, PermAction::Edit, Uuid::new_v4(), Some(agency_id))
            .await;
        assert!(other_user);
    }

    #[tokio::test]
    async fn test_agency_override_beats_role_default() {
        let registry = PermissionRegistry::new();
        let agency_id = Uuid::new_v4();

        assert!(!role_default(Role::Agent, Module::Cms, PermAction::Edit));
        registry
            .insert_unpersisted(OverrideScope::Agency, agency_id, Module::Cms, PermAction::Edit, true)
            .await;

        let resolved = registry
            .resolve(Role::Agent, Module::Cms, PermAction::Edit, Uuid::new_v4(), Some(agency_id))
            .await;
        assert!(resolved);
    }

    #[tokio::test]
    async fn test_no_override_falls_back_to_default() {
        let registry = PermissionRegistry::new();
        let resolved = registry
            .resolve(
                Role::AgencyAdmin,
                Module::Properties,
                PermAction::Delete,
                Uuid::new_v4(),
                Some(Uuid::new_v4()),
            )
            .await;
        assert!(resolved);
    }
}
