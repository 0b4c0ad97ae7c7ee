//! Append-only delivery audit log.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{CreateMessageLog, MessageLog};
use crate::db::repository::MessageLogRepository;
use crate::error::StoreResult;

/// Records kept by the in-memory log.
pub const MEMORY_LOG_CAPACITY: usize = 200;

#[async_trait]
pub trait MessageLogSink: Send + Sync {
    /// Append all records of one delivery run in a single write.
    async fn append_batch(&self, records: Vec<CreateMessageLog>) -> StoreResult<Vec<MessageLog>>;

    /// Latest records of a tenant, newest first.
    async fn list(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<MessageLog>>;
}

fn with_ids(records: Vec<CreateMessageLog>) -> Vec<MessageLog> {
    records
        .into_iter()
        .map(|r| r.into_log(Uuid::new_v4().to_string()))
        .collect()
}

/// Bounded in-memory log, newest record first.
#[derive(Default)]
pub struct MemoryMessageLog {
    records: RwLock<VecDeque<MessageLog>>,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLogSink for MemoryMessageLog {
    async fn append_batch(&self, records: Vec<CreateMessageLog>) -> StoreResult<Vec<MessageLog>> {
        let logs = with_ids(records);
        let mut stored = self.records.write().await;
        for log in &logs {
            stored.push_front(log.clone());
        }
        stored.truncate(MEMORY_LOG_CAPACITY);
        Ok(logs)
    }

    async fn list(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<MessageLog>> {
        let stored = self.records.read().await;
        Ok(stored
            .iter()
            .filter(|l| l.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

pub struct SqliteMessageLog {
    pool: SqlitePool,
}

impl SqliteMessageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageLogSink for SqliteMessageLog {
    async fn append_batch(&self, records: Vec<CreateMessageLog>) -> StoreResult<Vec<MessageLog>> {
        let logs = with_ids(records);
        MessageLogRepository::insert_batch(&self.pool, &logs).await?;
        Ok(logs)
    }

    async fn list(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<MessageLog>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        MessageLogRepository::find_by_tenant(&self.pool, tenant_id, limit).await
    }
}

/// Durable log that switches to the in-memory log while its table is missing.
pub struct FallbackMessageLog {
    primary: Arc<dyn MessageLogSink>,
    fallback: Arc<dyn MessageLogSink>,
}

impl FallbackMessageLog {
    pub fn new(primary: Arc<dyn MessageLogSink>, fallback: Arc<dyn MessageLogSink>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl MessageLogSink for FallbackMessageLog {
    async fn append_batch(&self, records: Vec<CreateMessageLog>) -> StoreResult<Vec<MessageLog>> {
        match self.primary.append_batch(records.clone()).await {
            Err(err) if err.is_unavailable() => {
                tracing::warn!("Message log unavailable ({}); keeping records in memory", err);
                self.fallback.append_batch(records).await
            }
            other => other,
        }
    }

    async fn list(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<MessageLog>> {
        match self.primary.list(tenant_id, limit).await {
            Err(err) if err.is_unavailable() => {
                tracing::warn!("Message log unavailable ({}); reading in-memory records", err);
                self.fallback.list(tenant_id, limit).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::LogStatus;
    use crate::services::testing::{migrated_pool, unmigrated_pool};
    use chrono::{Duration, TimeZone, Utc};

    fn record(tenant: &str, minute: i64) -> CreateMessageLog {
        CreateMessageLog {
            tenant_id: tenant.to_string(),
            appointment_id: Some(format!("a{}", minute)),
            client_name: Some("Ana".to_string()),
            client_phone: Some("5541999990000".to_string()),
            notification_type: Some("Lembrete de Agendamento".to_string()),
            status: LogStatus::Success,
            message: format!("Reminder sent #{}", minute),
            sent_at: Utc.with_ymd_and_hms(2025, 1, 9, 15, 0, 0).unwrap() + Duration::minutes(minute),
            details: None,
        }
    }

    #[tokio::test]
    async fn memory_log_keeps_newest_records_up_to_capacity() {
        let log = MemoryMessageLog::new();
        let batch: Vec<_> = (0..(MEMORY_LOG_CAPACITY as i64 + 10))
            .map(|m| record("shop", m))
            .collect();
        log.append_batch(batch).await.unwrap();

        let listed = log.list("shop", usize::MAX).await.unwrap();
        assert_eq!(listed.len(), MEMORY_LOG_CAPACITY);
        assert_eq!(listed[0].message, format!("Reminder sent #{}", MEMORY_LOG_CAPACITY + 9));
        assert!(log.list("other", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_log_lists_newest_first() {
        let log = SqliteMessageLog::new(migrated_pool().await);
        log.append_batch(vec![record("shop", 1), record("shop", 2), record("other", 3)])
            .await
            .unwrap();

        let listed = log.list("shop", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message, "Reminder sent #2");
        assert_eq!(listed[0].status, LogStatus::Success);
    }

    #[tokio::test]
    async fn fallback_log_uses_memory_when_table_is_missing() {
        let log = FallbackMessageLog::new(
            Arc::new(SqliteMessageLog::new(unmigrated_pool().await)),
            Arc::new(MemoryMessageLog::new()),
        );
        let written = log.append_batch(vec![record("shop", 1)]).await.unwrap();
        assert_eq!(written.len(), 1);

        let listed = log.list("shop", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, written[0].id);
    }
}
