use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::security::permissions::Role;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = schema::agencies)]
pub struct Agency {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An authenticated caller. Role is stored as text and parsed on demand;
/// `agency_id` is required for agency-scoped roles (enforced by the
/// access evaluator, not the schema).
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = schema::users)]
pub struct Actor {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub agency_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Actor {
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Customer)
    }

    pub fn is_agency_scoped(&self) -> bool {
        matches!(self.role(), Role::AgencyAdmin | Role::Agent)
    }
}

pub mod schema {
    diesel::table! {
        agencies (id) {
            id -> Uuid,
            name -> Varchar,
            email -> Nullable<Text>,
            phone -> Nullable<Text>,
            is_active -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        users (id) {
            id -> Uuid,
            username -> Varchar,
            email -> Nullable<Text>,
            role -> Varchar,
            agency_id -> Nullable<Uuid>,
            is_active -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        properties (id) {
            id -> Uuid,
            agency_id -> Uuid,
            agent_id -> Nullable<Uuid>,
            created_by -> Uuid,
            creator_role -> Varchar,
            title -> Varchar,
            description -> Nullable<Text>,
            price -> Nullable<Float8>,
            location -> Nullable<Text>,
            specs -> Jsonb,
            status -> Varchar,
            rejection_reason -> Nullable<Text>,
            deleted_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        property_notes (id) {
            id -> Uuid,
            property_id -> Uuid,
            author_id -> Uuid,
            body -> Text,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        leads (id) {
            id -> Uuid,
            contact -> Jsonb,
            property_id -> Nullable<Uuid>,
            agency_id -> Nullable<Uuid>,
            source -> Varchar,
            status -> Varchar,
            priority -> Varchar,
            assigned_agent_id -> Nullable<Uuid>,
            is_approved -> Bool,
            created_by -> Nullable<Uuid>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        lead_entries (id) {
            id -> Uuid,
            lead_id -> Uuid,
            kind -> Varchar,
            author_id -> Uuid,
            body -> Text,
            due_date -> Nullable<Timestamptz>,
            assigned_to -> Nullable<Uuid>,
            reminded_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        permission_overrides (id) {
            id -> Uuid,
            scope -> Varchar,
            scope_id -> Uuid,
            module -> Varchar,
            action -> Varchar,
            allowed -> Bool,
            granted_by -> Uuid,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        notifications (id) {
            id -> Uuid,
            recipient_id -> Uuid,
            kind -> Varchar,
            title -> Varchar,
            message -> Text,
            read -> Bool,
            created_at -> Timestamptz,
        }
    }
}
