//! Notification queue storage.
//!
//! [`QueueStore`] has two concrete backends, SQLite and in-memory, plus
//! [`FallbackQueueStore`] which routes to the in-memory twin whenever the
//! durable backend reports [`StoreError::Unavailable`]. The upsert rules
//! live in [`plan_upsert`] so every backend applies the same decision table.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::db::models::{plan_upsert, QueueEntry, QueueStatus, QueueUpsert, StatusPatch, UpsertPlan};
use crate::db::repository::ReminderQueueRepository;
use crate::error::{StoreError, StoreResult};
use crate::services::clock::Clock;

/// Reason recorded when an appointment is deleted.
pub const APPOINTMENT_DELETED: &str = "appointment deleted";

/// How long the in-memory store keeps `sent` and `cancelled` rows.
pub const MEMORY_TERMINAL_RETENTION_DAYS: i64 = 30;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Merge the desired state of a key into storage and return the resulting row.
    async fn upsert(&self, upsert: QueueUpsert) -> StoreResult<QueueEntry>;

    /// Pending entries with `scheduled_for <= as_of`, earliest first.
    ///
    /// Entries in `error` are never returned: they stay parked until the
    /// appointment is synchronized again.
    async fn list_due(&self, tenant_id: &str, as_of: DateTime<Utc>) -> StoreResult<Vec<QueueEntry>>;

    async fn list_all(&self, tenant_id: &str, status: Option<QueueStatus>) -> StoreResult<Vec<QueueEntry>>;

    /// Every row ever stored for an appointment, oldest first.
    async fn list_for_appointment(&self, appointment_id: &str) -> StoreResult<Vec<QueueEntry>>;

    /// Apply a patch to the row with `id`. Returns `None` for unknown ids.
    async fn update_status(&self, id: &str, patch: StatusPatch) -> StoreResult<Option<QueueEntry>>;

    /// Cancel the live rows of one key. Returns how many rows changed.
    async fn cancel_by_key(
        &self,
        tenant_id: &str,
        appointment_id: &str,
        notification_type: &str,
        reason: &str,
    ) -> StoreResult<usize>;

    /// Cancel (never delete) the live rows of a deleted appointment.
    async fn remove_for_appointment(
        &self,
        appointment_id: &str,
        notification_type: Option<&str>,
    ) -> StoreResult<usize>;

    /// Cancel one row by id. `sent` rows are returned unchanged.
    async fn cancel_by_id(&self, id: &str, reason: &str) -> StoreResult<Option<QueueEntry>>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local queue. Contents are lost on restart.
///
/// Terminal rows are dropped once they have not changed for
/// [`MEMORY_TERMINAL_RETENTION_DAYS`].
pub struct MemoryQueueStore {
    entries: RwLock<Vec<QueueEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryQueueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            clock,
        }
    }

    async fn cancel_where<F>(&self, reason: &str, mut predicate: F) -> usize
    where
        F: FnMut(&QueueEntry) -> bool + Send,
    {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        entries
            .iter_mut()
            .filter(|e| predicate(&**e))
            .map(|e| e.cancel(reason, now))
            .filter(|changed| *changed)
            .count()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn upsert(&self, upsert: QueueUpsert) -> StoreResult<QueueEntry> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        let cutoff = now - Duration::days(MEMORY_TERMINAL_RETENTION_DAYS);
        entries.retain(|e| e.status.is_live() || e.updated_at > cutoff);

        let existing: Vec<QueueEntry> = entries
            .iter()
            .filter(|e| {
                e.appointment_id == upsert.appointment_id
                    && e.notification_type == upsert.notification_type
            })
            .cloned()
            .collect();

        let plan = plan_upsert(&existing, &upsert, now);
        match &plan {
            UpsertPlan::Keep(_) => {}
            UpsertPlan::Update(updated) => {
                if let Some(slot) = entries.iter_mut().find(|e| e.id == updated.id) {
                    *slot = updated.clone();
                }
            }
            UpsertPlan::Insert(created) => entries.push(created.clone()),
        }

        Ok(plan.into_entry())
    }

    async fn list_due(&self, tenant_id: &str, as_of: DateTime<Utc>) -> StoreResult<Vec<QueueEntry>> {
        let entries = self.entries.read().await;
        let mut due: Vec<QueueEntry> = entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.is_due(as_of))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal times.
        due.sort_by_key(|e| e.scheduled_for);
        Ok(due)
    }

    async fn list_all(&self, tenant_id: &str, status: Option<QueueStatus>) -> StoreResult<Vec<QueueEntry>> {
        let entries = self.entries.read().await;
        let mut all: Vec<QueueEntry> = entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        all.sort_by_key(|e| e.scheduled_for);
        Ok(all)
    }

    async fn list_for_appointment(&self, appointment_id: &str) -> StoreResult<Vec<QueueEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.appointment_id == appointment_id)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: &str, patch: StatusPatch) -> StoreResult<Option<QueueEntry>> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        Ok(entries.iter_mut().find(|e| e.id == id).map(|entry| {
            entry.apply_patch(&patch, now);
            entry.clone()
        }))
    }

    async fn cancel_by_key(
        &self,
        tenant_id: &str,
        appointment_id: &str,
        notification_type: &str,
        reason: &str,
    ) -> StoreResult<usize> {
        Ok(self
            .cancel_where(reason, |e| {
                e.tenant_id == tenant_id
                    && e.appointment_id == appointment_id
                    && e.notification_type == notification_type
            })
            .await)
    }

    async fn remove_for_appointment(
        &self,
        appointment_id: &str,
        notification_type: Option<&str>,
    ) -> StoreResult<usize> {
        Ok(self
            .cancel_where(APPOINTMENT_DELETED, |e| {
                e.appointment_id == appointment_id
                    && notification_type.map_or(true, |t| e.notification_type == t)
            })
            .await)
    }

    async fn cancel_by_id(&self, id: &str, reason: &str) -> StoreResult<Option<QueueEntry>> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        Ok(entries.iter_mut().find(|e| e.id == id).map(|entry| {
            entry.cancel(reason, now);
            entry.clone()
        }))
    }
}

// ============================================================================
// SQLite backend
// ============================================================================

/// Durable queue in the `reminder_queue` table.
///
/// Read-modify-write operations run inside one transaction per call.
/// Cancellations are a single conditional `UPDATE` on live rows.
pub struct SqliteQueueStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn cancel_live(
        &self,
        appointment_id: &str,
        notification_type: Option<&str>,
        tenant_id: Option<&str>,
        reason: &str,
    ) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut conn = self.pool.acquire().await?;
        let changed = ReminderQueueRepository::cancel_live(
            &mut conn,
            appointment_id,
            notification_type,
            tenant_id,
            reason,
            now,
        )
        .await?;
        Ok(changed as usize)
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn upsert(&self, upsert: QueueUpsert) -> StoreResult<QueueEntry> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let existing = ReminderQueueRepository::find_by_key(
            &mut tx,
            &upsert.appointment_id,
            &upsert.notification_type,
        )
        .await?;

        let plan = plan_upsert(&existing, &upsert, now);
        match &plan {
            UpsertPlan::Keep(_) => {}
            UpsertPlan::Update(updated) => ReminderQueueRepository::update(&mut tx, updated).await?,
            UpsertPlan::Insert(created) => ReminderQueueRepository::insert(&mut tx, created).await?,
        }

        tx.commit().await?;
        Ok(plan.into_entry())
    }

    async fn list_due(&self, tenant_id: &str, as_of: DateTime<Utc>) -> StoreResult<Vec<QueueEntry>> {
        ReminderQueueRepository::list_due(&self.pool, tenant_id, as_of).await
    }

    async fn list_all(&self, tenant_id: &str, status: Option<QueueStatus>) -> StoreResult<Vec<QueueEntry>> {
        ReminderQueueRepository::list_all(&self.pool, tenant_id, status).await
    }

    async fn list_for_appointment(&self, appointment_id: &str) -> StoreResult<Vec<QueueEntry>> {
        let mut conn = self.pool.acquire().await?;
        ReminderQueueRepository::find_by_appointment(&mut conn, appointment_id, None).await
    }

    async fn update_status(&self, id: &str, patch: StatusPatch) -> StoreResult<Option<QueueEntry>> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let Some(mut entry) = ReminderQueueRepository::find_by_id(&mut tx, id).await? else {
            return Ok(None);
        };
        entry.apply_patch(&patch, now);
        ReminderQueueRepository::update(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(Some(entry))
    }

    async fn cancel_by_key(
        &self,
        tenant_id: &str,
        appointment_id: &str,
        notification_type: &str,
        reason: &str,
    ) -> StoreResult<usize> {
        self.cancel_live(appointment_id, Some(notification_type), Some(tenant_id), reason)
            .await
    }

    async fn remove_for_appointment(
        &self,
        appointment_id: &str,
        notification_type: Option<&str>,
    ) -> StoreResult<usize> {
        self.cancel_live(appointment_id, notification_type, None, APPOINTMENT_DELETED)
            .await
    }

    async fn cancel_by_id(&self, id: &str, reason: &str) -> StoreResult<Option<QueueEntry>> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let Some(mut entry) = ReminderQueueRepository::find_by_id(&mut tx, id).await? else {
            return Ok(None);
        };
        if entry.cancel(reason, now) {
            ReminderQueueRepository::update(&mut tx, &entry).await?;
        }

        tx.commit().await?;
        Ok(Some(entry))
    }
}

// ============================================================================
// Fallback orchestration
// ============================================================================

/// Durable store that degrades to an in-memory store while the durable
/// backend is unavailable (for example before migrations have run).
///
/// Only [`StoreError::Unavailable`] triggers the fallback; other database
/// errors are returned to the caller.
pub struct FallbackQueueStore {
    primary: Arc<dyn QueueStore>,
    fallback: Arc<dyn QueueStore>,
    degraded: AtomicBool,
}

impl FallbackQueueStore {
    pub fn new(primary: Arc<dyn QueueStore>, fallback: Arc<dyn QueueStore>) -> Self {
        Self {
            primary,
            fallback,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether at least one operation has been served by the fallback store.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn note_fallback(&self, operation: &str, err: &StoreError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "Queue store unavailable during {} ({}); using in-memory queue, entries will not survive a restart",
                operation,
                err
            );
        } else {
            tracing::debug!("Queue store still unavailable during {}: {}", operation, err);
        }
    }
}

macro_rules! with_fallback {
    ($self:ident, $op:literal, |$store:ident| $call:expr) => {{
        let $store = &$self.primary;
        match $call.await {
            Err(err) if err.is_unavailable() => {
                $self.note_fallback($op, &err);
                let $store = &$self.fallback;
                $call.await
            }
            other => other,
        }
    }};
}

#[async_trait]
impl QueueStore for FallbackQueueStore {
    async fn upsert(&self, upsert: QueueUpsert) -> StoreResult<QueueEntry> {
        with_fallback!(self, "upsert", |store| store.upsert(upsert.clone()))
    }

    async fn list_due(&self, tenant_id: &str, as_of: DateTime<Utc>) -> StoreResult<Vec<QueueEntry>> {
        with_fallback!(self, "list_due", |store| store.list_due(tenant_id, as_of))
    }

    async fn list_all(&self, tenant_id: &str, status: Option<QueueStatus>) -> StoreResult<Vec<QueueEntry>> {
        with_fallback!(self, "list_all", |store| store.list_all(tenant_id, status))
    }

    async fn list_for_appointment(&self, appointment_id: &str) -> StoreResult<Vec<QueueEntry>> {
        with_fallback!(self, "list_for_appointment", |store| store
            .list_for_appointment(appointment_id))
    }

    async fn update_status(&self, id: &str, patch: StatusPatch) -> StoreResult<Option<QueueEntry>> {
        with_fallback!(self, "update_status", |store| store.update_status(id, patch.clone()))
    }

    async fn cancel_by_key(
        &self,
        tenant_id: &str,
        appointment_id: &str,
        notification_type: &str,
        reason: &str,
    ) -> StoreResult<usize> {
        with_fallback!(self, "cancel_by_key", |store| store.cancel_by_key(
            tenant_id,
            appointment_id,
            notification_type,
            reason
        ))
    }

    async fn remove_for_appointment(
        &self,
        appointment_id: &str,
        notification_type: Option<&str>,
    ) -> StoreResult<usize> {
        with_fallback!(self, "remove_for_appointment", |store| store
            .remove_for_appointment(appointment_id, notification_type))
    }

    async fn cancel_by_id(&self, id: &str, reason: &str) -> StoreResult<Option<QueueEntry>> {
        with_fallback!(self, "cancel_by_id", |store| store.cancel_by_id(id, reason))
    }
}
