pub mod reminders;
pub mod types;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::shared::errors::{CoreError, CoreResult};
use crate::shared::models::schema::notifications;
use crate::shared::models::Actor;
use crate::shared::state::AppState;

pub use reminders::ReminderScheduler;
pub use types::{Notification, NotificationKind, NotificationListQuery, UnreadCount};

const CHANNEL_CAPACITY: usize = 32;

/// Durable-first notification fan-out. `dispatch` writes the record and
/// only then offers it to live subscribers, so a crash between the two
/// delays the push but never loses the notification. The persisted feed
/// is the source of truth; the live channel is an accelerator and a slow
/// or absent subscriber never blocks the triggering request.
pub struct NotificationDispatcher {
    channels: RwLock<HashMap<Uuid, Vec<mpsc::Sender<Notification>>>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, recipient: Uuid) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.channels.write().await.entry(recipient).or_default().push(tx);
        debug!(recipient = %recipient, "live notification subscriber attached");
        rx
    }

    pub async fn dispatch(
        &self,
        conn: &mut PgConnection,
        recipient: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> CoreResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            kind: kind.as_str().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            read: false,
            created_at: Utc::now(),
        };

        diesel::insert_into(notifications::table)
            .values(&notification)
            .execute(conn)?;

        info!(recipient = %recipient, kind = %kind, "notification dispatched");
        self.publish(&notification).await;
        Ok(notification)
    }

    /// Best-effort live push. Full channels are skipped (the subscriber
    /// reconciles through the feed), closed ones are pruned.
    async fn publish(&self, notification: &Notification) {
        let mut channels = self.channels.write().await;
        if let Some(senders) = channels.get_mut(&notification.recipient_id) {
            senders.retain(|tx| match tx.try_send(notification.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
            if senders.is_empty() {
                channels.remove(&notification.recipient_id);
            }
        }
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed ops are scoped to the caller's own notifications; no module grant
/// is involved, identity is the boundary.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<Vec<Notification>>, CoreError> {
    let mut conn = state.conn.get()?;
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = notifications::table
        .filter(notifications::recipient_id.eq(actor.id))
        .into_boxed();

    if query.unread_only.unwrap_or(false) {
        q = q.filter(notifications::read.eq(false));
    }

    let rows: Vec<Notification> = q
        .order(notifications::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<UnreadCount>, CoreError> {
    let mut conn = state.conn.get()?;
    let count: i64 = notifications::table
        .filter(notifications::recipient_id.eq(actor.id))
        .filter(notifications::read.eq(false))
        .count()
        .get_result(&mut conn)?;
    Ok(Json(UnreadCount { count }))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, CoreError> {
    let mut conn = state.conn.get()?;
    let affected = diesel::update(
        notifications::table
            .filter(notifications::id.eq(id))
            .filter(notifications::recipient_id.eq(actor.id)),
    )
    .set(notifications::read.eq(true))
    .execute(&mut conn)?;

    if affected == 0 {
        return Err(CoreError::NotFound("Notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<UnreadCount>, CoreError> {
    let mut conn = state.conn.get()?;
    diesel::update(
        notifications::table
            .filter(notifications::recipient_id.eq(actor.id))
            .filter(notifications::read.eq(false)),
    )
    .set(notifications::read.eq(true))
    .execute(&mut conn)?;

    // Idempotent by construction; the fresh count is always 0.
    Ok(Json(UnreadCount { count: 0 }))
}

pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, CoreError> {
    let mut conn = state.conn.get()?;
    let affected = diesel::delete(
        notifications::table
            .filter(notifications::id.eq(id))
            .filter(notifications::recipient_id.eq(actor.id)),
    )
    .execute(&mut conn)?;

    if affected == 0 {
        return Err(CoreError::NotFound("Notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Live push channel. Clients reconstruct full unread state through the
/// feed endpoints after a reconnect; missing a push here is harmless.
pub async fn stream_notifications(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.notifier.subscribe(actor.id).await;
    let stream = ReceiverStream::new(rx).map(|notification| {
        let event = Event::default()
            .event("notification")
            .json_data(&notification)
            .unwrap_or_default();
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn configure_notification_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/stream", get(stream_notifications))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/:id/read", post(mark_read))
        .route("/api/notifications/:id", delete(delete_notification))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(recipient: Uuid) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            kind: NotificationKind::LeadAssigned.as_str().to_string(),
            title: "Lead assigned to you".into(),
            message: "m".into(),
            read: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let dispatcher = NotificationDispatcher::new();
        let recipient = Uuid::new_v4();
        let mut rx = dispatcher.subscribe(recipient).await;

        dispatcher.publish(&sample(recipient)).await;

        let received = rx.try_recv().expect("subscriber should receive the push");
        assert_eq!(received.recipient_id, recipient);
    }

    #[tokio::test]
    async fn test_publish_is_recipient_scoped() {
        let dispatcher = NotificationDispatcher::new();
        let recipient = Uuid::new_v4();
        let mut other_rx = dispatcher.subscribe(Uuid::new_v4()).await;

        dispatcher.publish(&sample(recipient)).await;

        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let dispatcher = NotificationDispatcher::new();
        let recipient = Uuid::new_v4();
        let rx = dispatcher.subscribe(recipient).await;
        drop(rx);

        dispatcher.publish(&sample(recipient)).await;

        let channels = dispatcher.channels.read().await;
        assert!(!channels.contains_key(&recipient));
    }

    #[tokio::test]
    async fn test_full_channel_does_not_block() {
        let dispatcher = NotificationDispatcher::new();
        let recipient = Uuid::new_v4();
        let mut rx = dispatcher.subscribe(recipient).await;

        for _ in 0..(CHANNEL_CAPACITY + 5) {
            dispatcher.publish(&sample(recipient)).await;
        }

        // The subscriber stays registered and drains what fit.
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, CHANNEL_CAPACITY);
        assert!(dispatcher.channels.read().await.contains_key(&recipient));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            NotificationKind::LeadAssigned,
            NotificationKind::LeadStatusChanged,
            NotificationKind::PropertyApproved,
            NotificationKind::PropertyRejected,
            NotificationKind::TaskAssigned,
            NotificationKind::FollowUpReminder,
            NotificationKind::SiteVisitReminder,
            NotificationKind::PaymentReceived,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
        assert!("price_drop".parse::<NotificationKind>().is_err());
    }
}
