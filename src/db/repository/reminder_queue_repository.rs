use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::db::models::{QueueEntry, QueueStatus};
use crate::error::StoreResult;

const QUEUE_COLUMNS: &str = r#"
    id,
    tenant_id,
    appointment_id,
    notification_type,
    scheduled_for,
    status,
    attempts,
    last_error,
    sent_at,
    created_at,
    updated_at
"#;

/// Repository for the `reminder_queue` table.
///
/// Mutating helpers take a connection so the caller can run a
/// read-modify-write sequence inside one transaction. Errors are returned as
/// `StoreError`, which tells a missing table apart from other failures.
pub struct ReminderQueueRepository;

impl ReminderQueueRepository {
    pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> StoreResult<Option<QueueEntry>> {
        let sql = format!("SELECT {} FROM reminder_queue WHERE id = ?", QUEUE_COLUMNS);
        let row = sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(row)
    }

    /// All rows ever stored for a key, oldest first.
    pub async fn find_by_key(
        conn: &mut SqliteConnection,
        appointment_id: &str,
        notification_type: &str,
    ) -> StoreResult<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {} FROM reminder_queue WHERE appointment_id = ? AND notification_type = ? ORDER BY created_at ASC",
            QUEUE_COLUMNS
        );
        let rows = sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(appointment_id)
            .bind(notification_type)
            .fetch_all(conn)
            .await?;
        Ok(rows)
    }

    pub async fn find_by_appointment(
        conn: &mut SqliteConnection,
        appointment_id: &str,
        notification_type: Option<&str>,
    ) -> StoreResult<Vec<QueueEntry>> {
        let rows = match notification_type {
            Some(kind) => {
                let sql = format!(
                    "SELECT {} FROM reminder_queue WHERE appointment_id = ? AND notification_type = ? ORDER BY created_at ASC",
                    QUEUE_COLUMNS
                );
                sqlx::query_as::<_, QueueEntry>(&sql)
                    .bind(appointment_id)
                    .bind(kind)
                    .fetch_all(conn)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM reminder_queue WHERE appointment_id = ? ORDER BY created_at ASC",
                    QUEUE_COLUMNS
                );
                sqlx::query_as::<_, QueueEntry>(&sql)
                    .bind(appointment_id)
                    .fetch_all(conn)
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn insert(conn: &mut SqliteConnection, entry: &QueueEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reminder_queue (
                id,
                tenant_id,
                appointment_id,
                notification_type,
                scheduled_for,
                status,
                attempts,
                last_error,
                sent_at,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id)
        .bind(&entry.appointment_id)
        .bind(&entry.notification_type)
        .bind(entry.scheduled_for)
        .bind(entry.status)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.sent_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Overwrite the mutable columns of an existing row.
    pub async fn update(conn: &mut SqliteConnection, entry: &QueueEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE reminder_queue
            SET scheduled_for = ?,
                status = ?,
                attempts = ?,
                last_error = ?,
                sent_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(entry.scheduled_for)
        .bind(entry.status)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.sent_at)
        .bind(entry.updated_at)
        .bind(&entry.id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Cancel the live (`pending` or `error`) rows of an appointment in a
    /// single conditional statement. Rows that became `sent` or `cancelled`
    /// after the caller last looked at them are left alone.
    pub async fn cancel_live(
        conn: &mut SqliteConnection,
        appointment_id: &str,
        notification_type: Option<&str>,
        tenant_id: Option<&str>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE reminder_queue SET status = 'cancelled', last_error = ");
        builder.push_bind(reason);
        builder.push(", updated_at = ");
        builder.push_bind(now);
        builder.push(" WHERE appointment_id = ");
        builder.push_bind(appointment_id);
        if let Some(kind) = notification_type {
            builder.push(" AND notification_type = ");
            builder.push_bind(kind);
        }
        if let Some(tenant_id) = tenant_id {
            builder.push(" AND tenant_id = ");
            builder.push_bind(tenant_id);
        }
        builder.push(" AND status IN ('pending', 'error')");

        let result = builder.build().execute(conn).await?;
        Ok(result.rows_affected())
    }

    /// Pending rows due at `as_of`, earliest first.
    pub async fn list_due(
        pool: &SqlitePool,
        tenant_id: &str,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<QueueEntry>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM reminder_queue
            WHERE tenant_id = ?
              AND status = 'pending'
              AND scheduled_for <= ?
            ORDER BY scheduled_for ASC, created_at ASC
            "#,
            QUEUE_COLUMNS
        );
        let rows = sqlx::query_as::<_, QueueEntry>(&sql)
            .bind(tenant_id)
            .bind(as_of)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn list_all(
        pool: &SqlitePool,
        tenant_id: &str,
        status: Option<QueueStatus>,
    ) -> StoreResult<Vec<QueueEntry>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM reminder_queue WHERE tenant_id = ? AND status = ? ORDER BY scheduled_for ASC",
                    QUEUE_COLUMNS
                );
                sqlx::query_as::<_, QueueEntry>(&sql)
                    .bind(tenant_id)
                    .bind(status)
                    .fetch_all(pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM reminder_queue WHERE tenant_id = ? ORDER BY scheduled_for ASC",
                    QUEUE_COLUMNS
                );
                sqlx::query_as::<_, QueueEntry>(&sql)
                    .bind(tenant_id)
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(rows)
    }
}
