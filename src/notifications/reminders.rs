//! Background reminder loop: overdue lead tasks turn into follow-up or
//! site-visit reminder notifications for their assignee, at most once per
//! task.

use chrono::Utc;
use cron::Schedule;
use diesel::prelude::*;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

use crate::leads::{LeadEntry, LeadStatus};
use crate::notifications::NotificationKind;
use crate::shared::errors::CoreResult;
use crate::shared::models::schema::{lead_entries, leads};
use crate::shared::state::AppState;

const TICK_SECONDS: u64 = 30;

pub struct ReminderScheduler {
    state: Arc<AppState>,
    schedule: Schedule,
}

/// Tasks on a lead that is mid site-visit remind as site-visit reminders;
/// everything else is a generic follow-up.
pub fn reminder_kind(lead_status: Option<LeadStatus>) -> NotificationKind {
    match lead_status {
        Some(LeadStatus::SiteVisit) => NotificationKind::SiteVisitReminder,
        _ => NotificationKind::FollowUpReminder,
    }
}

impl ReminderScheduler {
    pub fn new(state: Arc<AppState>, cron_expression: &str) -> Result<Self, cron::error::Error> {
        let schedule = Schedule::from_str(cron_expression)?;
        Ok(Self { state, schedule })
    }

    pub fn start(self) {
        info!("starting reminder scheduler");
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(TICK_SECONDS));
            let mut next_run = self.schedule.upcoming(Utc).next();

            loop {
                interval.tick().await;

                let due = matches!(next_run, Some(at) if at <= Utc::now());
                if !due {
                    continue;
                }
                next_run = self.schedule.upcoming(Utc).next();

                match self.scan().await {
                    Ok(0) => {}
                    Ok(count) => info!("dispatched {} reminders", count),
                    Err(e) => error!("reminder scan failed: {}", e),
                }
            }
        });
    }

    async fn scan(&self) -> CoreResult<usize> {
        let mut conn = self.state.conn.get()?;
        let now = Utc::now();

        let due_tasks: Vec<LeadEntry> = lead_entries::table
            .filter(lead_entries::kind.eq("task"))
            .filter(lead_entries::due_date.le(now))
            .filter(lead_entries::reminded_at.is_null())
            .filter(lead_entries::assigned_to.is_not_null())
            .load(&mut conn)?;

        let mut dispatched = 0;
        for task in due_tasks {
            let Some(assignee) = task.assigned_to else {
                continue;
            };

            let lead_status: Option<String> = leads::table
                .filter(leads::id.eq(task.lead_id))
                .select(leads::status)
                .first(&mut conn)
                .optional()?;
            let kind = reminder_kind(lead_status.and_then(|s| s.parse().ok()));

            let title = match kind {
                NotificationKind::SiteVisitReminder => "Site visit due",
                _ => "Follow-up due",
            };
            self.state
                .notifier
                .dispatch(&mut conn, assignee, kind, title, &task.body)
                .await?;

            diesel::update(lead_entries::table.filter(lead_entries::id.eq(task.id)))
                .set(lead_entries::reminded_at.eq(now))
                .execute(&mut conn)?;
            dispatched += 1;
        }

        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_visit_tasks_get_site_visit_reminders() {
        assert_eq!(
            reminder_kind(Some(LeadStatus::SiteVisit)),
            NotificationKind::SiteVisitReminder
        );
    }

    #[test]
    fn test_other_tasks_get_follow_up_reminders() {
        assert_eq!(
            reminder_kind(Some(LeadStatus::New)),
            NotificationKind::FollowUpReminder
        );
        assert_eq!(reminder_kind(None), NotificationKind::FollowUpReminder);
    }

    #[test]
    fn test_default_cron_parses() {
        assert!(Schedule::from_str("0 */2 * * * *").is_ok());
    }
}
