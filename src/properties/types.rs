use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::models::schema::{properties, property_notes};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = properties)]
pub struct Property {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub created_by: Uuid,
    /// Role the creator held at creation time; immutable afterwards.
    pub creator_role: String,
    pub title: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub specs: serde_json::Value,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = property_notes)]
pub struct PropertyNote {
    pub id: Uuid,
    pub property_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePropertyRequest {
    pub title: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub specs: Option<serde_json::Value>,
    /// Required for agency-agnostic creators; ignored for agency-scoped
    /// roles, whose own agency always wins.
    pub agency_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePropertyRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub specs: Option<serde_json::Value>,
}

impl UpdatePropertyRequest {
    pub fn changes_content(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.price.is_some()
            || self.location.is_some()
            || self.specs.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct PropertyListQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
