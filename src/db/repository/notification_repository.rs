use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::db::models::{Channel, Notification, NotificationStatus};
use crate::error::{AppError, AppResult};

/// Durable mapping `id -> notification`. All operations are linearizable
/// per id; status writes are single-statement updates so concurrent
/// transitions on the same row cannot lose updates.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Upsert by id. Repeated calls with the same id overwrite all fields.
    async fn store(&self, notification: &Notification) -> AppResult<()>;

    async fn load_by_id(&self, id: &str) -> AppResult<Notification>;

    /// Status-only lookup for the hot path.
    async fn load_status_by_id(&self, id: &str) -> AppResult<NotificationStatus>;

    /// Atomic status write; `retries` is refreshed in the same statement so
    /// observers see dispatch progress. Returns the updated record.
    async fn update_status_by_id(
        &self,
        id: &str,
        status: NotificationStatus,
        retries: i32,
    ) -> AppResult<Notification>;

    /// Sets status to cancelled regardless of the current value. Cancelling
    /// an already-terminal record succeeds silently; an unknown id fails.
    async fn cancel_by_id(&self, id: &str) -> AppResult<()>;
}

pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct NotificationRow {
    id: String,
    payload: String,
    date_created: DateTime<Utc>,
    status: String,
    notification_date: DateTime<Utc>,
    sender_id: String,
    recipient_id: String,
    channel: String,
    retries: i32,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> AppResult<Self> {
        Ok(Notification {
            id: row.id,
            payload: row.payload,
            created_at: row.date_created,
            status: NotificationStatus::parse(&row.status)?,
            scheduled_at: row.notification_date,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            channel: Channel::parse(&row.channel)?,
            retries: row.retries,
        })
    }
}

const NOTIFICATION_COLUMNS: &str = "id, payload, date_created, status, notification_date, sender_id, recipient_id, channel, retries";

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("notification {} not found", id))
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn store(&self, notification: &Notification) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, payload, date_created, status, notification_date, sender_id, recipient_id, channel, retries)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                payload = EXCLUDED.payload,
                status = EXCLUDED.status,
                notification_date = EXCLUDED.notification_date,
                sender_id = EXCLUDED.sender_id,
                recipient_id = EXCLUDED.recipient_id,
                channel = EXCLUDED.channel,
                retries = EXCLUDED.retries
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.payload)
        .bind(notification.created_at)
        .bind(notification.status.as_str())
        .bind(notification.scheduled_at)
        .bind(&notification.sender_id)
        .bind(&notification.recipient_id)
        .bind(notification.channel.as_str())
        .bind(notification.retries)
        .execute(&self.pool)
        .await?;

        tracing::debug!(id = %notification.id, "Notification stored");

        Ok(())
    }

    async fn load_by_id(&self, id: &str) -> AppResult<Notification> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found(id))?;

        row.try_into()
    }

    async fn load_status_by_id(&self, id: &str) -> AppResult<NotificationStatus> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            Some((status,)) => NotificationStatus::parse(&status),
            None => Err(not_found(id)),
        }
    }

    async fn update_status_by_id(
        &self,
        id: &str,
        status: NotificationStatus,
        retries: i32,
    ) -> AppResult<Notification> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            UPDATE notifications
            SET status = $2, retries = $3
            WHERE id = $1
            RETURNING {NOTIFICATION_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(retries)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found(id))?;

        tracing::debug!(id = %id, status = %status.as_str(), "Notification status updated");

        row.try_into()
    }

    async fn cancel_by_id(&self, id: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE notifications SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(NotificationStatus::Cancelled.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }

        tracing::debug!(id = %id, "Notification cancelled");

        Ok(())
    }
}
