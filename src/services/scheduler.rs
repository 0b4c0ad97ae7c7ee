//! Schedule synchronization.
//!
//! Given an appointment and its tenant's templates, computes which queue
//! entries should exist and reconciles the queue with that desired state.
//! Re-running it for an unchanged appointment is a no-op.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::models::{
    Appointment, AppointmentStatus, MessageTemplate, QueueEntry, QueueStatus, QueueUpsert, Tenant,
};
use crate::error::{AppError, AppResult, StoreResult};
use crate::services::clock::Clock;
use crate::services::directory::BookingDirectory;
use crate::services::queue_store::QueueStore;
use crate::services::templates::{MatchOptions, NotificationKind, TemplateCatalog};

/// Surveys go out this long after the appointment starts.
pub const SURVEY_DELAY_HOURS: i64 = 24;

/// Appended to the survey queue type when it would equal the reminder's.
pub const SURVEY_COLLISION_SUFFIX: &str = " (Pesquisa)";

pub const REASON_APPOINTMENT_CANCELLED: &str = "appointment cancelled";
pub const REASON_APPOINTMENT_COMPLETED: &str = "appointment completed";
pub const REASON_REMINDER_WINDOW_PASSED: &str = "reminder window already passed";
pub const REASON_REMINDER_UNAVAILABLE: &str = "reminder disabled or missing window";
pub const REASON_SURVEY_UNAVAILABLE: &str = "survey disabled";
pub const REASON_TEMPLATE_REPLACED: &str = "template replaced";
pub const REASON_MANUAL_CANCEL: &str = "cancelled manually";

/// What synchronization did for one notification slot of an appointment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SlotOutcome {
    /// The entry is pending (or was already sent and left alone).
    Scheduled { entry: QueueEntry },
    Cancelled { reason: String, affected: usize },
    Unchanged,
}

impl SlotOutcome {
    fn cancelled(reason: &str, affected: usize) -> Self {
        if affected == 0 {
            SlotOutcome::Unchanged
        } else {
            SlotOutcome::Cancelled {
                reason: reason.to_string(),
                affected,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub appointment_id: String,
    pub reminder: SlotOutcome,
    pub survey: SlotOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TenantSyncReport {
    pub tenant_id: String,
    pub appointments: usize,
    pub scheduled: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Queue types of one appointment, grouped by kind.
struct KnownTypes {
    reminder: BTreeSet<String>,
    survey: BTreeSet<String>,
}

pub struct ScheduleSynchronizer {
    store: Arc<dyn QueueStore>,
    directory: Arc<dyn BookingDirectory>,
    clock: Arc<dyn Clock>,
    defaults: Vec<MessageTemplate>,
}

impl ScheduleSynchronizer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        directory: Arc<dyn BookingDirectory>,
        clock: Arc<dyn Clock>,
        defaults: Vec<MessageTemplate>,
    ) -> Self {
        Self {
            store,
            directory,
            clock,
            defaults,
        }
    }

    pub fn catalog_for(&self, tenant: &Tenant) -> TemplateCatalog {
        TemplateCatalog::for_tenant(&self.defaults, &tenant.message_templates)
    }

    pub async fn sync_appointment(&self, tenant: &Tenant, appointment: &Appointment) -> AppResult<SyncOutcome> {
        let catalog = self.catalog_for(tenant);
        self.sync_with_catalog(&catalog, appointment).await
    }

    /// Load an appointment and synchronize it.
    pub async fn sync_appointment_by_id(&self, tenant_id: &str, appointment_id: &str) -> AppResult<SyncOutcome> {
        let tenant = self
            .directory
            .find_tenant(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tenant {}", tenant_id)))?;

        let appointment = self
            .directory
            .find_appointment(appointment_id)
            .await?
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or_else(|| AppError::NotFound(format!("appointment {}", appointment_id)))?;

        self.sync_appointment(&tenant, &appointment).await
    }

    /// Resynchronize every appointment of a tenant that can still produce a
    /// notification (started within the survey delay, or later).
    pub async fn sync_tenant(&self, tenant_id: &str) -> AppResult<TenantSyncReport> {
        let tenant = self
            .directory
            .find_tenant(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tenant {}", tenant_id)))?;
        let catalog = self.catalog_for(&tenant);

        let since = self.clock.now() - Duration::hours(SURVEY_DELAY_HOURS);
        let appointments = self.directory.list_appointments_since(tenant_id, since).await?;

        let mut report = TenantSyncReport {
            tenant_id: tenant_id.to_string(),
            appointments: appointments.len(),
            ..TenantSyncReport::default()
        };

        for appointment in &appointments {
            match self.sync_with_catalog(&catalog, appointment).await {
                Ok(outcome) => {
                    for slot in [&outcome.reminder, &outcome.survey] {
                        match slot {
                            SlotOutcome::Scheduled { .. } => report.scheduled += 1,
                            SlotOutcome::Cancelled { .. } => report.cancelled += 1,
                            SlotOutcome::Unchanged => {}
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to synchronize appointment {}: {}", appointment.id, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Synchronized tenant {}: {} appointments, {} scheduled, {} cancelled, {} failed",
            tenant_id,
            report.appointments,
            report.scheduled,
            report.cancelled,
            report.failed
        );

        Ok(report)
    }

    /// Cleanup for a deleted appointment: cancel everything still live.
    pub async fn remove_for_appointment(&self, appointment_id: &str) -> AppResult<usize> {
        let affected = self.store.remove_for_appointment(appointment_id, None).await?;
        tracing::info!("Cancelled {} queue entries of deleted appointment {}", affected, appointment_id);
        Ok(affected)
    }

    /// Operator cancel of one entry. Sent entries are returned unchanged.
    pub async fn cancel_entry(&self, id: &str, reason: Option<&str>) -> AppResult<QueueEntry> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(REASON_MANUAL_CANCEL);

        let entry = self
            .store
            .cancel_by_id(id, reason)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queue entry {}", id)))?;

        tracing::info!("Queue entry {} is now {}", id, entry.status.as_str());
        Ok(entry)
    }

    pub async fn sync_with_catalog(&self, catalog: &TemplateCatalog, appointment: &Appointment) -> AppResult<SyncOutcome> {
        let known = self.known_types(catalog, appointment).await?;

        let reminder_template = catalog.match_by_kind(NotificationKind::Reminder, MatchOptions::schedulable_reminder());
        let reminder_type = reminder_template.map(|t| t.template.queue_type().to_string());

        let survey_template = catalog.match_by_kind(NotificationKind::Survey, MatchOptions::enabled());
        let survey_type = survey_template.map(|t| {
            let base = t.template.queue_type();
            if reminder_type.as_deref() == Some(base) {
                format!("{}{}", base, SURVEY_COLLISION_SUFFIX)
            } else {
                base.to_string()
            }
        });

        let outcome = match appointment.status {
            AppointmentStatus::Cancelled => {
                let reminder = self
                    .cancel_types(appointment, &known.reminder, &[], REASON_APPOINTMENT_CANCELLED)
                    .await?;
                let survey = self
                    .cancel_types(appointment, &known.survey, &[], REASON_APPOINTMENT_CANCELLED)
                    .await?;
                SyncOutcome {
                    appointment_id: appointment.id.clone(),
                    reminder: SlotOutcome::cancelled(REASON_APPOINTMENT_CANCELLED, reminder),
                    survey: SlotOutcome::cancelled(REASON_APPOINTMENT_CANCELLED, survey),
                }
            }
            AppointmentStatus::Completed => {
                let keep: Vec<&str> = survey_type.as_deref().into_iter().collect();
                let reminder = self
                    .cancel_types(appointment, &known.reminder, &keep, REASON_APPOINTMENT_COMPLETED)
                    .await?;
                SyncOutcome {
                    appointment_id: appointment.id.clone(),
                    reminder: SlotOutcome::cancelled(REASON_APPOINTMENT_COMPLETED, reminder),
                    survey: self
                        .sync_survey(appointment, &known, survey_type.as_deref(), reminder_type.as_deref())
                        .await?,
                }
            }
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => SyncOutcome {
                appointment_id: appointment.id.clone(),
                reminder: self
                    .sync_reminder(
                        appointment,
                        &known,
                        reminder_template.and_then(|t| t.template.reminder_hours_before),
                        reminder_type.as_deref(),
                        survey_type.as_deref(),
                    )
                    .await?,
                survey: self
                    .sync_survey(appointment, &known, survey_type.as_deref(), reminder_type.as_deref())
                    .await?,
            },
        };

        tracing::debug!(
            "Synchronized appointment {} ({}): reminder {:?}, survey {:?}",
            appointment.id,
            appointment.status.as_str(),
            outcome.reminder,
            outcome.survey
        );

        Ok(outcome)
    }

    async fn sync_reminder(
        &self,
        appointment: &Appointment,
        known: &KnownTypes,
        hours_before: Option<i64>,
        reminder_type: Option<&str>,
        survey_type: Option<&str>,
    ) -> AppResult<SlotOutcome> {
        let window = hours_before.and_then(|hours| reminder_time(appointment.start_time, hours));
        let (Some(scheduled_for), Some(queue_type)) = (window, reminder_type) else {
            let keep: Vec<&str> = survey_type.into_iter().collect();
            let affected = self
                .cancel_types(appointment, &known.reminder, &keep, REASON_REMINDER_UNAVAILABLE)
                .await?;
            return Ok(SlotOutcome::cancelled(REASON_REMINDER_UNAVAILABLE, affected));
        };

        let keep: Vec<&str> = [Some(queue_type), survey_type].into_iter().flatten().collect();

        if scheduled_for <= self.clock.now() {
            let others = self
                .cancel_types(appointment, &known.reminder, &keep, REASON_REMINDER_WINDOW_PASSED)
                .await?;
            let entry = self
                .store
                .upsert(QueueUpsert::cancelled(
                    &appointment.tenant_id,
                    &appointment.id,
                    queue_type,
                    scheduled_for,
                    REASON_REMINDER_WINDOW_PASSED,
                ))
                .await?;
            if entry.status == QueueStatus::Sent {
                return Ok(SlotOutcome::Scheduled { entry });
            }
            return Ok(SlotOutcome::Cancelled {
                reason: REASON_REMINDER_WINDOW_PASSED.to_string(),
                affected: others + 1,
            });
        }

        self.cancel_types(appointment, &known.reminder, &keep, REASON_TEMPLATE_REPLACED)
            .await?;
        let entry = self
            .store
            .upsert(QueueUpsert::pending(
                &appointment.tenant_id,
                &appointment.id,
                queue_type,
                scheduled_for,
            ))
            .await?;

        Ok(SlotOutcome::Scheduled { entry })
    }

    /// Surveys fire after the appointment, so they are never suppressed as stale.
    async fn sync_survey(
        &self,
        appointment: &Appointment,
        known: &KnownTypes,
        survey_type: Option<&str>,
        reminder_type: Option<&str>,
    ) -> AppResult<SlotOutcome> {
        let window = appointment
            .start_time
            .checked_add_signed(Duration::hours(SURVEY_DELAY_HOURS));
        let (Some(scheduled_for), Some(queue_type)) = (window, survey_type) else {
            let keep: Vec<&str> = reminder_type.into_iter().collect();
            let affected = self
                .cancel_types(appointment, &known.survey, &keep, REASON_SURVEY_UNAVAILABLE)
                .await?;
            return Ok(SlotOutcome::cancelled(REASON_SURVEY_UNAVAILABLE, affected));
        };

        let keep: Vec<&str> = [Some(queue_type), reminder_type].into_iter().flatten().collect();
        self.cancel_types(appointment, &known.survey, &keep, REASON_TEMPLATE_REPLACED)
            .await?;

        let entry = self
            .store
            .upsert(QueueUpsert::pending(
                &appointment.tenant_id,
                &appointment.id,
                queue_type,
                scheduled_for,
            ))
            .await?;

        Ok(SlotOutcome::Scheduled { entry })
    }

    /// Types from the current templates plus every type already stored for
    /// the appointment, so renamed templates leave nothing behind.
    async fn known_types(&self, catalog: &TemplateCatalog, appointment: &Appointment) -> StoreResult<KnownTypes> {
        let mut known = KnownTypes {
            reminder: catalog.queue_types(NotificationKind::Reminder),
            survey: catalog.queue_types(NotificationKind::Survey),
        };

        for entry in self.store.list_for_appointment(&appointment.id).await? {
            let kind = NotificationKind::classify(&entry.notification_type).or_else(|| {
                catalog
                    .templates()
                    .find(|t| t.template.queue_type() == entry.notification_type)
                    .and_then(|t| t.primary_kind())
            });
            // Only reminders and surveys are ever queued; anything unrecognized
            // came from a renamed reminder template.
            match kind {
                Some(NotificationKind::Survey) => known.survey.insert(entry.notification_type),
                _ => known.reminder.insert(entry.notification_type),
            };
        }

        Ok(known)
    }

    async fn cancel_types(
        &self,
        appointment: &Appointment,
        types: &BTreeSet<String>,
        keep: &[&str],
        reason: &str,
    ) -> StoreResult<usize> {
        let mut affected = 0;
        for notification_type in types.iter().filter(|t| !keep.contains(&t.as_str())) {
            affected += self
                .store
                .cancel_by_key(&appointment.tenant_id, &appointment.id, notification_type, reason)
                .await?;
        }
        Ok(affected)
    }
}

/// When a reminder `hours` before `start` fires, or `None` if that instant
/// is not representable.
fn reminder_time(start: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    Duration::try_hours(hours).and_then(|offset| start.checked_sub_signed(offset))
}
