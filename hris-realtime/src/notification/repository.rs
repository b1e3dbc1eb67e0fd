//! Notification database operations

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use hris_common::events::{Notification, NotificationType};
use hris_common::{Error, Result};

/// Fixed-width timestamps so `created_at` compares correctly as TEXT
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    let kind: String = row.get("type");
    let created_at: String = row.get("created_at");
    let user_id: i64 = row.get("user_id");
    let related_id: i64 = row.get("related_id");

    Ok(Notification {
        id: row.get("id"),
        user_id: user_id as u64,
        notification_type: kind.parse::<NotificationType>()?,
        title: row.get("title"),
        message: row.get("message"),
        related_id: related_id as u64,
        is_read: row.get("is_read"),
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Insert an unread notification and return the stored row
pub async fn create(
    pool: &SqlitePool,
    user_id: u64,
    notification_type: NotificationType,
    title: &str,
    message: &str,
    related_id: u64,
) -> Result<Notification> {
    let created_at = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, type, title, message, related_id, is_read, created_at)
        VALUES (?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(user_id as i64)
    .bind(notification_type.as_str())
    .bind(title)
    .bind(message)
    .bind(related_id as i64)
    .bind(format_timestamp(created_at))
    .execute(pool)
    .await?;

    Ok(Notification {
        id: result.last_insert_rowid(),
        user_id,
        notification_type,
        title: title.to_string(),
        message: message.to_string(),
        related_id,
        is_read: false,
        created_at,
    })
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Notification>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, type, title, message, related_id, is_read, created_at
        FROM notifications
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(notification_from_row).transpose()
}

/// All notifications of a user, newest first
pub async fn list_for_user(pool: &SqlitePool, user_id: u64) -> Result<Vec<Notification>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, type, title, message, related_id, is_read, created_at
        FROM notifications
        WHERE user_id = ?
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(user_id as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(notification_from_row).collect()
}

pub async fn mark_as_read(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("notification {}", id)));
    }

    Ok(())
}

/// Delete read notifications created before `now - days`
///
/// Returns the number of rows removed.
pub async fn delete_read_older_than(pool: &SqlitePool, days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(days);

    let result = sqlx::query("DELETE FROM notifications WHERE is_read = 1 AND created_at < ?")
        .bind(format_timestamp(cutoff))
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
