use sqlx::SqlitePool;

use crate::db::models::MessageLog;
use crate::error::StoreResult;

// ============================================================================
// Message Log Repository
// ============================================================================

pub struct MessageLogRepository;

impl MessageLogRepository {
    /// Insert a batch of records in one transaction.
    pub async fn insert_batch(pool: &SqlitePool, logs: &[MessageLog]) -> StoreResult<()> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut tx = pool.begin().await?;
        for log in logs {
            sqlx::query(
                r#"
                INSERT INTO message_log (
                    id, tenant_id, appointment_id, client_name, client_phone,
                    notification_type, status, message, sent_at, details
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&log.id)
            .bind(&log.tenant_id)
            .bind(&log.appointment_id)
            .bind(&log.client_name)
            .bind(&log.client_phone)
            .bind(&log.notification_type)
            .bind(log.status)
            .bind(&log.message)
            .bind(log.sent_at)
            .bind(&log.details)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Latest records for a tenant, newest first.
    pub async fn find_by_tenant(
        pool: &SqlitePool,
        tenant_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<MessageLog>> {
        let rows = sqlx::query_as::<_, MessageLog>(
            r#"
            SELECT
                id, tenant_id, appointment_id, client_name, client_phone,
                notification_type, status, message, sent_at, details
            FROM message_log
            WHERE tenant_id = ?
            ORDER BY sent_at DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
