use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::models::schema::{lead_entries, leads};

/// Lead statuses are unordered: any authorized actor may move a lead to
/// any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    SiteVisit,
    Negotiation,
    Closed,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::SiteVisit => "site_visit",
            Self::Negotiation => "negotiation",
            Self::Closed => "closed",
            Self::Lost => "lost",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "site_visit" => Ok(Self::SiteVisit),
            "negotiation" => Ok(Self::Negotiation),
            "closed" | "converted" => Ok(Self::Closed),
            "lost" => Ok(Self::Lost),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl LeadPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl FromStr for LeadPriority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Website,
    Referral,
    WalkIn,
    Phone,
    Social,
    Other,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::Referral => "referral",
            Self::WalkIn => "walk_in",
            Self::Phone => "phone",
            Self::Social => "social",
            Self::Other => "other",
        }
    }
}

impl FromStr for LeadSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "website" => Ok(Self::Website),
            "referral" => Ok(Self::Referral),
            "walk_in" | "walkin" => Ok(Self::WalkIn),
            "phone" => Ok(Self::Phone),
            "social" => Ok(Self::Social),
            "other" => Ok(Self::Other),
            _ => Err(()),
        }
    }
}

/// Discriminator for the append-only lead log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Note,
    Communication,
    Task,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Communication => "communication",
            Self::Task => "task",
        }
    }
}

impl FromStr for EntryKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "note" => Ok(Self::Note),
            "communication" => Ok(Self::Communication),
            "task" => Ok(Self::Task),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = leads)]
pub struct Lead {
    pub id: Uuid,
    /// Contact details are opaque to the engine.
    pub contact: serde_json::Value,
    pub property_id: Option<Uuid>,
    pub agency_id: Option<Uuid>,
    pub source: String,
    pub status: String,
    pub priority: String,
    pub assigned_agent_id: Option<Uuid>,
    pub is_approved: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = lead_entries)]
pub struct LeadEntry {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub kind: String,
    pub author_id: Uuid,
    pub body: String,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Option<Uuid>,
    pub reminded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLeadRequest {
    pub contact: serde_json::Value,
    pub property_id: Option<Uuid>,
    pub source: Option<String>,
    pub priority: Option<String>,
    pub assigned_agent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub agent_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    pub kind: String,
    pub body: String,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LeadListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub approved: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
