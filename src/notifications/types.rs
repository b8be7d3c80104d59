use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::models::schema::notifications;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LeadAssigned,
    LeadStatusChanged,
    PropertyApproved,
    PropertyRejected,
    TaskAssigned,
    FollowUpReminder,
    SiteVisitReminder,
    PaymentReceived,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadAssigned => "lead_assigned",
            Self::LeadStatusChanged => "lead_status_changed",
            Self::PropertyApproved => "property_approved",
            Self::PropertyRejected => "property_rejected",
            Self::TaskAssigned => "task_assigned",
            Self::FollowUpReminder => "follow_up_reminder",
            Self::SiteVisitReminder => "site_visit_reminder",
            Self::PaymentReceived => "payment_received",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead_assigned" => Ok(Self::LeadAssigned),
            "lead_status_changed" => Ok(Self::LeadStatusChanged),
            "property_approved" => Ok(Self::PropertyApproved),
            "property_rejected" => Ok(Self::PropertyRejected),
            "task_assigned" => Ok(Self::TaskAssigned),
            "follow_up_reminder" => Ok(Self::FollowUpReminder),
            "site_visit_reminder" => Ok(Self::SiteVisitReminder),
            "payment_received" => Ok(Self::PaymentReceived),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    pub unread_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}
