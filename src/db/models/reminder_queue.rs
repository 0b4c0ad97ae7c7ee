use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a queued notification.
///
/// `sent` and `cancelled` are terminal. `error` is not terminal, but it is
/// never picked up again by the due-entry query: an operator fixes the data
/// and re-runs synchronization, which moves the row back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Sent,
    Cancelled,
    Error,
}

impl QueueStatus {
    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(QueueStatus::Pending),
            "sent" => Some(QueueStatus::Sent),
            "cancelled" | "canceled" => Some(QueueStatus::Cancelled),
            "error" => Some(QueueStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Sent => "sent",
            QueueStatus::Cancelled => "cancelled",
            QueueStatus::Error => "error",
        }
    }

    /// Rows in these states may still be rescheduled or cancelled.
    pub fn is_live(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Error)
    }
}

impl TryFrom<&str> for QueueStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        Self::from_str(value).ok_or_else(|| format!("Invalid queue status: {}", value))
    }
}

/// One scheduled notification for an (appointment, notification type) pair.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Primary key (UUID)
    pub id: String,

    pub tenant_id: String,

    pub appointment_id: String,

    /// Template type or name this entry was scheduled for (e.g. "Lembrete de Agendamento").
    pub notification_type: String,

    /// The entry is due once `now >= scheduled_for`.
    pub scheduled_for: DateTime<Utc>,

    pub status: QueueStatus,

    /// Incremented on every delivery attempt, successful or not.
    pub attempts: i32,

    pub last_error: Option<String>,

    /// Set only on successful delivery.
    pub sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Desired state of a queue key, as computed by the schedule synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueUpsert {
    pub tenant_id: String,
    pub appointment_id: String,
    pub notification_type: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: QueueStatus,
    /// Reason recorded alongside the status (used for cancellations).
    pub last_error: Option<String>,
}

impl QueueUpsert {
    pub fn pending(
        tenant_id: &str,
        appointment_id: &str,
        notification_type: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            appointment_id: appointment_id.to_string(),
            notification_type: notification_type.to_string(),
            scheduled_for,
            status: QueueStatus::Pending,
            last_error: None,
        }
    }

    pub fn cancelled(
        tenant_id: &str,
        appointment_id: &str,
        notification_type: &str,
        scheduled_for: DateTime<Utc>,
        reason: &str,
    ) -> Self {
        Self {
            status: QueueStatus::Cancelled,
            last_error: Some(reason.to_string()),
            ..Self::pending(tenant_id, appointment_id, notification_type, scheduled_for)
        }
    }
}

/// Partial status update applied by the delivery worker.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub status: Option<QueueStatus>,
    pub attempts: Option<i32>,
    pub last_error: Option<Option<String>>,
    pub sent_at: Option<Option<DateTime<Utc>>>,
}

impl StatusPatch {
    pub fn sent(attempts: i32, sent_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(QueueStatus::Sent),
            attempts: Some(attempts),
            last_error: Some(None),
            sent_at: Some(Some(sent_at)),
        }
    }

    pub fn error(attempts: i32, reason: impl Into<String>) -> Self {
        Self {
            status: Some(QueueStatus::Error),
            attempts: Some(attempts),
            last_error: Some(Some(reason.into())),
            sent_at: None,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: Some(QueueStatus::Cancelled),
            attempts: None,
            last_error: Some(Some(reason.into())),
            sent_at: None,
        }
    }
}

/// What a store must do to satisfy an upsert for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertPlan {
    /// Leave storage untouched and return this row.
    Keep(QueueEntry),
    /// Overwrite the existing row (same id) with this content.
    Update(QueueEntry),
    /// Insert this freshly created row.
    Insert(QueueEntry),
}

impl UpsertPlan {
    pub fn entry(&self) -> &QueueEntry {
        match self {
            UpsertPlan::Keep(e) | UpsertPlan::Update(e) | UpsertPlan::Insert(e) => e,
        }
    }

    pub fn into_entry(self) -> QueueEntry {
        match self {
            UpsertPlan::Keep(e) | UpsertPlan::Update(e) | UpsertPlan::Insert(e) => e,
        }
    }
}

/// Decide how an upsert merges into the rows already stored for its key.
///
/// Both queue backends run this same function so they cannot drift apart:
/// a `sent` row is never reopened, a live row is updated in place, a
/// cancellation does not duplicate an existing cancelled row, and anything
/// else becomes a new row.
pub fn plan_upsert(existing: &[QueueEntry], upsert: &QueueUpsert, now: DateTime<Utc>) -> UpsertPlan {
    if let Some(sent) = existing.iter().find(|e| e.status == QueueStatus::Sent) {
        return UpsertPlan::Keep(sent.clone());
    }

    if let Some(live) = existing.iter().find(|e| e.status.is_live()) {
        let mut merged = live.clone();
        merged.scheduled_for = upsert.scheduled_for;
        merged.status = upsert.status;
        if upsert.last_error.is_some() {
            merged.last_error = upsert.last_error.clone();
        }
        merged.updated_at = now;
        return UpsertPlan::Update(merged);
    }

    if upsert.status == QueueStatus::Cancelled {
        if let Some(cancelled) = existing
            .iter()
            .filter(|e| e.status == QueueStatus::Cancelled)
            .max_by_key(|e| e.created_at)
        {
            return UpsertPlan::Keep(cancelled.clone());
        }
    }

    UpsertPlan::Insert(QueueEntry {
        id: Uuid::new_v4().to_string(),
        tenant_id: upsert.tenant_id.clone(),
        appointment_id: upsert.appointment_id.clone(),
        notification_type: upsert.notification_type.clone(),
        scheduled_for: upsert.scheduled_for,
        status: upsert.status,
        attempts: 0,
        last_error: upsert.last_error.clone(),
        sent_at: None,
        created_at: now,
        updated_at: now,
    })
}

impl QueueEntry {
    /// Apply a worker status patch in place.
    pub fn apply_patch(&mut self, patch: &StatusPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        if let Some(ref last_error) = patch.last_error {
            self.last_error = last_error.clone();
        }
        if let Some(sent_at) = patch.sent_at {
            self.sent_at = sent_at;
        }
        self.updated_at = now;
    }

    /// Cancel a live row. Returns `false` (and changes nothing) for `sent`
    /// and already-cancelled rows.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if !self.status.is_live() {
            return false;
        }
        self.status = QueueStatus::Cancelled;
        self.last_error = Some(reason.to_string());
        self.updated_at = now;
        true
    }

    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_for <= as_of
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 9, h, 0, 0).unwrap()
    }

    fn row(status: QueueStatus) -> QueueEntry {
        QueueEntry {
            id: format!("row-{}", status.as_str()),
            tenant_id: "shop".to_string(),
            appointment_id: "appt".to_string(),
            notification_type: "Lembrete".to_string(),
            scheduled_for: at(10),
            status,
            attempts: 1,
            last_error: Some("earlier".to_string()),
            sent_at: None,
            created_at: at(1),
            updated_at: at(1),
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(QueueStatus::from_str("Cancelled"), Some(QueueStatus::Cancelled));
        assert_eq!(QueueStatus::from_str("canceled"), Some(QueueStatus::Cancelled));
        assert_eq!(QueueStatus::from_str("bogus"), None);
        assert!(QueueStatus::try_from("sent").is_ok());
        assert!(QueueStatus::Error.is_live());
        assert!(!QueueStatus::Sent.is_live());
    }

    #[test]
    fn upsert_inserts_when_key_is_new() {
        let upsert = QueueUpsert::pending("shop", "appt", "Lembrete", at(15));
        match plan_upsert(&[], &upsert, at(9)) {
            UpsertPlan::Insert(e) => {
                assert_eq!(e.status, QueueStatus::Pending);
                assert_eq!(e.attempts, 0);
                assert_eq!(e.created_at, at(9));
                assert_eq!(e.scheduled_for, at(15));
            }
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn upsert_never_reopens_sent_rows() {
        let mut sent = row(QueueStatus::Sent);
        sent.sent_at = Some(at(10));
        let upsert = QueueUpsert::pending("shop", "appt", "Lembrete", at(20));

        let plan = plan_upsert(&[sent.clone()], &upsert, at(11));
        assert_eq!(plan, UpsertPlan::Keep(sent));
    }

    #[test]
    fn upsert_updates_live_rows_in_place() {
        let existing = row(QueueStatus::Error);
        let upsert = QueueUpsert::pending("shop", "appt", "Lembrete", at(20));

        match plan_upsert(&[existing.clone()], &upsert, at(11)) {
            UpsertPlan::Update(e) => {
                assert_eq!(e.id, existing.id);
                assert_eq!(e.status, QueueStatus::Pending);
                assert_eq!(e.scheduled_for, at(20));
                assert_eq!(e.attempts, 1);
                assert_eq!(e.last_error.as_deref(), Some("earlier"));
                assert_eq!(e.updated_at, at(11));
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn pending_upsert_after_cancellation_creates_a_new_row() {
        let cancelled = row(QueueStatus::Cancelled);
        let upsert = QueueUpsert::pending("shop", "appt", "Lembrete", at(20));

        match plan_upsert(&[cancelled.clone()], &upsert, at(11)) {
            UpsertPlan::Insert(e) => assert_ne!(e.id, cancelled.id),
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn repeated_cancellation_keeps_the_existing_cancelled_row() {
        let cancelled = row(QueueStatus::Cancelled);
        let upsert = QueueUpsert::cancelled("shop", "appt", "Lembrete", at(8), "too late");

        let plan = plan_upsert(&[cancelled.clone()], &upsert, at(11));
        assert_eq!(plan, UpsertPlan::Keep(cancelled));
    }

    #[test]
    fn cancel_only_touches_live_rows() {
        let mut sent = row(QueueStatus::Sent);
        assert!(!sent.cancel("nope", at(12)));
        assert_eq!(sent.status, QueueStatus::Sent);

        let mut pending = row(QueueStatus::Pending);
        assert!(pending.cancel("appointment cancelled", at(12)));
        assert_eq!(pending.status, QueueStatus::Cancelled);
        assert_eq!(pending.last_error.as_deref(), Some("appointment cancelled"));
    }

    #[test]
    fn patch_distinguishes_untouched_from_cleared() {
        let mut entry = row(QueueStatus::Pending);
        entry.apply_patch(&StatusPatch::sent(2, at(15)), at(15) + Duration::seconds(1));
        assert_eq!(entry.status, QueueStatus::Sent);
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.last_error, None);
        assert_eq!(entry.sent_at, Some(at(15)));

        let mut failing = row(QueueStatus::Pending);
        failing.apply_patch(&StatusPatch::error(2, "gateway down"), at(15));
        assert_eq!(failing.last_error.as_deref(), Some("gateway down"));
        assert_eq!(failing.sent_at, None);
    }
}
