//! Notification producer
//!
//! Business modules call [`NotificationService::send_notification`]; the row
//! is persisted first, then pushed to the user's live sessions through the
//! hub. Only persistence failures reach the caller.

pub mod purge;
pub mod repository;

pub use purge::spawn_purge_task;

use sqlx::SqlitePool;
use tracing::{info, warn};

use hris_common::events::{Notification, NotificationType};
use hris_common::{Error, Result};

use crate::hub::{Hub, UserId};

#[derive(Clone)]
pub struct NotificationService {
    pool: SqlitePool,
    hub: Hub,
}

impl NotificationService {
    pub fn new(pool: SqlitePool, hub: Hub) -> Self {
        Self { pool, hub }
    }

    pub async fn send_notification(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        related_id: u64,
    ) -> Result<Notification> {
        let notification = repository::create(
            &self.pool,
            user_id,
            notification_type,
            title,
            message,
            related_id,
        )
        .await?;

        match notification.to_push_payload() {
            Ok(payload) => self.hub.send_to_user(user_id, payload).await,
            Err(e) => warn!(
                notification_id = notification.id,
                error = %e,
                "Failed to encode notification push"
            ),
        }

        info!(
            notification_id = notification.id,
            user_id,
            kind = %notification_type,
            "Notification sent"
        );
        Ok(notification)
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Notification>> {
        repository::list_for_user(&self.pool, user_id).await
    }

    /// Mark a notification read on behalf of its owner
    pub async fn mark_as_read(&self, user_id: UserId, id: i64) -> Result<()> {
        match repository::find_by_id(&self.pool, id).await? {
            Some(notification) if notification.user_id == user_id => {
                repository::mark_as_read(&self.pool, id).await
            }
            _ => Err(Error::NotFound(format!("notification {}", id))),
        }
    }

    pub async fn purge_read_older_than(&self, days: i64) -> Result<u64> {
        repository::delete_read_older_than(&self.pool, days).await
    }
}
