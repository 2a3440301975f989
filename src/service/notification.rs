//! Notification service
//!
//! Persists notifications raised by inbound activities and hands them to
//! delivery. Delivery here means marking the row as sent and publishing an
//! event on an in-process broadcast feed; push transports subscribe to the
//! feed.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::data::{
    Actor, ApObject, Database, EntityId, Notification, NotificationId, NotificationKind,
};
use crate::error::AppError;
use crate::federation::{Notice, NotificationDispatcher, PushSettings};
use crate::metrics::NOTIFICATIONS_TOTAL;

/// Event published for every sent notification
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub id: String,
    pub kind: &'static str,
    pub recipient: String,
    pub source: String,
    pub object: Option<String>,
    pub title: String,
    pub body: String,
}

fn display_name(actor: &Actor) -> String {
    actor
        .properties
        .get("name")
        .and_then(|name| name.as_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| actor.preferred_username.clone())
        .unwrap_or_else(|| actor.id.to_string())
}

/// Push message text for a notification
fn message_for(notice: &Notice) -> (String, String) {
    let source = display_name(&notice.source);
    let title = match notice.kind {
        NotificationKind::Mention => format!("{source} mentioned you"),
        NotificationKind::Follow => format!("{source} followed you"),
        NotificationKind::Favourite => format!("{source} favourited your post"),
        NotificationKind::Reblog => format!("{source} boosted your post"),
    };
    let body = notice
        .object
        .as_ref()
        .and_then(|object| object.properties.get("content"))
        .and_then(|content| content.as_str())
        .map(|content| ammonia::Builder::empty().clean(content).to_string())
        .unwrap_or_default();

    (title, body)
}

/// Database-backed notification dispatcher
pub struct Notifier {
    db: Arc<Database>,
    feed: broadcast::Sender<NotificationEvent>,
}

impl Notifier {
    /// Create new notifier
    ///
    /// # Arguments
    /// * `capacity` - Events buffered per subscriber before it lags
    pub fn new(db: Arc<Database>, capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);
        Self { db, feed }
    }

    /// Subscribe to sent notifications
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.feed.subscribe()
    }
}

#[async_trait]
impl NotificationDispatcher for Notifier {
    async fn create(
        &self,
        kind: NotificationKind,
        recipient: &Actor,
        source: &Actor,
        object: Option<&ApObject>,
    ) -> Result<NotificationId, AppError> {
        let notification = Notification {
            id: NotificationId(EntityId::new().0),
            kind,
            recipient: recipient.id.clone(),
            source: source.id.clone(),
            object: object.map(|object| object.id.clone()),
            created_at: Utc::now(),
            sent_at: None,
        };

        self.db.insert_notification(&notification).await?;
        NOTIFICATIONS_TOTAL.with_label_values(&[kind.as_str()]).inc();

        tracing::debug!(
            notification = %notification.id,
            kind = kind.as_str(),
            recipient = %recipient.id,
            source = %source.id,
            "Notification created"
        );

        Ok(notification.id)
    }

    async fn send(&self, notice: &Notice, push: &PushSettings) -> Result<(), AppError> {
        let marked = self
            .db
            .mark_notification_sent(&notice.id.0, Utc::now())
            .await?;
        if !marked {
            tracing::debug!(notification = %notice.id, "Notification already sent");
            return Ok(());
        }

        let (title, body) = message_for(notice);
        let event = NotificationEvent {
            id: notice.id.0.clone(),
            kind: notice.kind.as_str(),
            recipient: notice.recipient.id.to_string(),
            source: notice.source.id.to_string(),
            object: notice.object.as_ref().map(|object| object.id.to_string()),
            title,
            body,
        };

        if push.vapid_public_key.is_none() || push.vapid_private_key.is_none() {
            tracing::debug!(
                notification = %notice.id,
                "VAPID keys not configured; web push disabled"
            );
        }

        // No subscribers is not an error.
        let receivers = self.feed.send(event).unwrap_or(0);

        tracing::info!(
            notification = %notice.id,
            kind = notice.kind.as_str(),
            recipient = %notice.recipient.id,
            subscriber = %push.admin_email,
            receivers,
            "Notification sent"
        );

        Ok(())
    }
}
