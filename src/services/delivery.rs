//! Delivery of due queue entries.
//!
//! One run per tenant: entries are drained earliest-due first and one at a
//! time, so the gateway never sees parallel sends from the same tenant.
//! Several tenants may run concurrently through [`DeliveryWorker::run_all`].
//! A failing entry never aborts the run; only a tenant that cannot be
//! loaded does.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;

use crate::db::models::{
    Appointment, AppointmentStatus, Barber, CreateMessageLog, GatewayCredentials, LogStatus, MessageTemplate,
    QueueEntry, Service, StatusPatch, Tenant,
};
use crate::error::{AppError, AppResult};
use crate::services::clock::Clock;
use crate::services::directory::BookingDirectory;
use crate::services::gateway::{normalize_phone, MessageGateway};
use crate::services::message_log::MessageLogSink;
use crate::services::queue_store::QueueStore;
use crate::services::render::{render_message, RenderContext};
use crate::services::templates::{CatalogTemplate, NotificationKind, TemplateCatalog};

pub const REASON_TEMPLATE_UNAVAILABLE: &str = "template disabled or not found";
pub const REASON_APPOINTMENT_NOT_FOUND: &str = "appointment not found";
pub const REASON_APPOINTMENT_CANCELLED: &str = "appointment cancelled";
pub const REASON_APPOINTMENT_COMPLETED: &str = "appointment completed";
pub const REASON_MISSING_CONTACT: &str = "missing contact";
pub const REASON_INSUFFICIENT_LEAD_TIME: &str = "insufficient lead time";
pub const REASON_ALREADY_STARTED: &str = "appointment already started";
pub const REASON_NO_CREDENTIALS: &str = "gateway credentials not configured";

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Used when a tenant has no credentials of its own.
    pub default_credentials: Option<GatewayCredentials>,
    pub country_code: String,
    /// Offset used to format dates and times inside messages.
    pub display_offset: FixedOffset,
    /// Tenants processed concurrently by `run_all`.
    pub tenant_concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryResult {
    pub queue_id: String,
    pub appointment_id: String,
    pub notification_type: String,
    pub outcome: DeliveryOutcome,
    pub reason: Option<String>,
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub tenant_id: String,
    pub message: String,
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<EntryResult>,
}

impl RunReport {
    fn new(tenant_id: &str, results: Vec<EntryResult>) -> Self {
        let count = |outcome| results.iter().filter(|r| r.outcome == outcome).count();
        let sent = count(DeliveryOutcome::Sent);
        let failed = count(DeliveryOutcome::Failed);
        let skipped = count(DeliveryOutcome::Skipped);
        let message = if results.is_empty() {
            "No pending messages to send.".to_string()
        } else {
            format!(
                "Processed {} messages: {} sent, {} failed, {} skipped.",
                results.len(),
                sent,
                failed,
                skipped
            )
        };

        Self {
            tenant_id: tenant_id.to_string(),
            message,
            processed: results.len(),
            sent,
            failed,
            skipped,
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantRunSummary {
    pub tenant_id: String,
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunAllReport {
    pub tenants: Vec<TenantRunSummary>,
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Everything loaded once per tenant run.
struct RunContext {
    tenant: Tenant,
    catalog: TemplateCatalog,
    appointments: HashMap<String, Appointment>,
    barbers: HashMap<String, Barber>,
    services: HashMap<String, Service>,
    credentials: Option<GatewayCredentials>,
    now: DateTime<Utc>,
}

/// What happened to one entry, before it is written back.
struct Decision {
    outcome: DeliveryOutcome,
    patch: StatusPatch,
    reason: Option<String>,
    status_code: Option<u16>,
    recipient: Option<String>,
}

impl Decision {
    fn skip(reason: &str) -> Self {
        Self {
            outcome: DeliveryOutcome::Skipped,
            patch: StatusPatch::cancelled(reason),
            reason: Some(reason.to_string()),
            status_code: None,
            recipient: None,
        }
    }

    fn fail(entry: &QueueEntry, reason: impl Into<String>, status_code: Option<u16>) -> Self {
        let reason = reason.into();
        Self {
            outcome: DeliveryOutcome::Failed,
            patch: StatusPatch::error(entry.attempts + 1, reason.clone()),
            reason: Some(reason),
            status_code,
            recipient: None,
        }
    }
}

pub struct DeliveryWorker {
    store: Arc<dyn QueueStore>,
    directory: Arc<dyn BookingDirectory>,
    gateway: Arc<dyn MessageGateway>,
    log: Arc<dyn MessageLogSink>,
    clock: Arc<dyn Clock>,
    settings: DeliverySettings,
    defaults: Vec<MessageTemplate>,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        directory: Arc<dyn BookingDirectory>,
        gateway: Arc<dyn MessageGateway>,
        log: Arc<dyn MessageLogSink>,
        clock: Arc<dyn Clock>,
        settings: DeliverySettings,
        defaults: Vec<MessageTemplate>,
    ) -> Self {
        Self {
            store,
            directory,
            gateway,
            log,
            clock,
            settings,
            defaults,
        }
    }

    /// Deliver every due entry of one tenant.
    pub async fn run_for_tenant(&self, tenant_id: &str) -> AppResult<RunReport> {
        let now = self.clock.now();
        let due = self.store.list_due(tenant_id, now).await?;
        if due.is_empty() {
            tracing::debug!("No due messages for tenant {}", tenant_id);
            return Ok(RunReport::new(tenant_id, Vec::new()));
        }

        let ctx = self.load_context(tenant_id, &due, now).await?;
        tracing::info!("Delivering {} due messages for tenant {}", due.len(), tenant_id);

        let mut results = Vec::with_capacity(due.len());
        let mut logs = Vec::with_capacity(due.len());
        for entry in &due {
            let (result, log) = self.process_entry(&ctx, entry).await;
            results.push(result);
            logs.push(log);
        }

        if let Err(e) = self.log.append_batch(logs).await {
            tracing::warn!("Failed to write delivery log for tenant {}: {}", tenant_id, e);
        }

        let report = RunReport::new(tenant_id, results);
        tracing::info!("Tenant {}: {}", tenant_id, report.message);
        Ok(report)
    }

    /// Run every tenant, a bounded number at a time. A failing tenant is
    /// reported in its summary and does not stop the others.
    pub async fn run_all(&self) -> AppResult<RunAllReport> {
        let tenant_ids = self.directory.list_tenant_ids().await?;
        let concurrency = self.settings.tenant_concurrency.max(1);

        let mut runs: Vec<(String, AppResult<RunReport>)> = stream::iter(tenant_ids)
            .map(|tenant_id| async move {
                let result = self.run_for_tenant(&tenant_id).await;
                (tenant_id, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        runs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = RunAllReport::default();
        for (tenant_id, result) in runs {
            let summary = match result {
                Ok(run) => TenantRunSummary {
                    tenant_id,
                    processed: run.processed,
                    sent: run.sent,
                    failed: run.failed,
                    skipped: run.skipped,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!("Delivery run failed for tenant {}: {}", tenant_id, e);
                    TenantRunSummary {
                        tenant_id,
                        processed: 0,
                        sent: 0,
                        failed: 0,
                        skipped: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.processed += summary.processed;
            report.sent += summary.sent;
            report.failed += summary.failed;
            report.skipped += summary.skipped;
            report.tenants.push(summary);
        }

        Ok(report)
    }

    async fn load_context(&self, tenant_id: &str, due: &[QueueEntry], now: DateTime<Utc>) -> AppResult<RunContext> {
        let tenant = self
            .directory
            .find_tenant(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tenant {}", tenant_id)))?;

        let mut appointment_ids: Vec<String> = due.iter().map(|e| e.appointment_id.clone()).collect();
        appointment_ids.sort();
        appointment_ids.dedup();

        let (appointments, barbers, services) = futures::try_join!(
            self.directory.find_appointments(tenant_id, &appointment_ids),
            self.directory.list_barbers(tenant_id),
            self.directory.list_services(tenant_id),
        )?;

        let catalog = TemplateCatalog::for_tenant(&self.defaults, &tenant.message_templates);
        let credentials = tenant
            .gateway
            .clone()
            .or_else(|| self.settings.default_credentials.clone());

        Ok(RunContext {
            tenant,
            catalog,
            appointments: appointments.into_iter().map(|a| (a.id.clone(), a)).collect(),
            barbers: barbers.into_iter().map(|b| (b.id.clone(), b)).collect(),
            services: services.into_iter().map(|s| (s.id.clone(), s)).collect(),
            credentials,
            now,
        })
    }

    async fn process_entry(&self, ctx: &RunContext, entry: &QueueEntry) -> (EntryResult, CreateMessageLog) {
        let template = ctx.catalog.resolve_for_delivery(&entry.notification_type);
        let kind = NotificationKind::classify(&entry.notification_type)
            .or_else(|| template.and_then(CatalogTemplate::primary_kind));
        let appointment = ctx.appointments.get(&entry.appointment_id);

        let decision = match (template, appointment) {
            (None, _) => Decision::skip(REASON_TEMPLATE_UNAVAILABLE),
            (Some(_), None) => Decision::skip(REASON_APPOINTMENT_NOT_FOUND),
            (Some(template), Some(appointment)) => {
                self.deliver(ctx, entry, kind, &template.template, appointment).await
            }
        };

        tracing::debug!(
            "Queue entry {} ({}): {:?} {}",
            entry.id,
            entry.notification_type,
            decision.outcome,
            decision.reason.as_deref().unwrap_or("")
        );

        if let Err(e) = self.store.update_status(&entry.id, decision.patch.clone()).await {
            tracing::warn!("Failed to update queue entry {}: {}", entry.id, e);
        }

        let label = kind.map_or("Message", NotificationKind::label);
        let client_name = appointment.map(|a| a.client_name.clone());
        let message = match (decision.outcome, &decision.reason) {
            (DeliveryOutcome::Sent, _) => format!(
                "{} sent to {}",
                label,
                client_name.as_deref().unwrap_or("client")
            ),
            (DeliveryOutcome::Failed, reason) => {
                format!("{} failed: {}", label, reason.as_deref().unwrap_or("unknown error"))
            }
            (DeliveryOutcome::Skipped, reason) => {
                format!("{} skipped: {}", label, reason.as_deref().unwrap_or("not deliverable"))
            }
        };
        let details = serde_json::json!({
            "queueId": entry.id,
            "scheduledFor": entry.scheduled_for,
            "statusCode": decision.status_code,
        });

        let log = CreateMessageLog {
            tenant_id: entry.tenant_id.clone(),
            appointment_id: Some(entry.appointment_id.clone()),
            client_name,
            client_phone: decision
                .recipient
                .clone()
                .or_else(|| appointment.and_then(|a| a.client_phone.clone())),
            notification_type: Some(entry.notification_type.clone()),
            status: match decision.outcome {
                DeliveryOutcome::Sent => LogStatus::Success,
                DeliveryOutcome::Failed => LogStatus::Error,
                DeliveryOutcome::Skipped => LogStatus::Skipped,
            },
            message,
            sent_at: ctx.now,
            details: Some(details.to_string()),
        };

        let result = EntryResult {
            queue_id: entry.id.clone(),
            appointment_id: entry.appointment_id.clone(),
            notification_type: entry.notification_type.clone(),
            outcome: decision.outcome,
            reason: decision.reason,
            status_code: decision.status_code,
        };

        (result, log)
    }

    /// Validation short-circuits, then render and send.
    async fn deliver(
        &self,
        ctx: &RunContext,
        entry: &QueueEntry,
        kind: Option<NotificationKind>,
        template: &MessageTemplate,
        appointment: &Appointment,
    ) -> Decision {
        let is_reminder = kind == Some(NotificationKind::Reminder);

        match appointment.status {
            AppointmentStatus::Cancelled => return Decision::skip(REASON_APPOINTMENT_CANCELLED),
            AppointmentStatus::Completed if is_reminder => {
                return Decision::skip(REASON_APPOINTMENT_COMPLETED)
            }
            _ => {}
        }

        let Some(recipient) = appointment
            .contact()
            .and_then(|phone| normalize_phone(phone, &self.settings.country_code))
        else {
            return Decision::fail(entry, REASON_MISSING_CONTACT, None);
        };

        if is_reminder && entry.created_at > entry.scheduled_for {
            return Decision::skip(REASON_INSUFFICIENT_LEAD_TIME);
        }
        if is_reminder && appointment.start_time <= ctx.now {
            return Decision::skip(REASON_ALREADY_STARTED);
        }

        let Some(credentials) = ctx.credentials.as_ref() else {
            return Decision::fail(entry, REASON_NO_CREDENTIALS, None);
        };

        let body = render_message(&template.content, &self.render_context(ctx, appointment));

        let mut decision = match self.gateway.send(credentials, &recipient, &body).await {
            Ok(response) if response.success => Decision {
                outcome: DeliveryOutcome::Sent,
                patch: StatusPatch::sent(entry.attempts + 1, ctx.now),
                reason: None,
                status_code: Some(response.status_code),
                recipient: None,
            },
            Ok(response) => Decision::fail(
                entry,
                response
                    .error
                    .unwrap_or_else(|| format!("gateway responded with status {}", response.status_code)),
                Some(response.status_code),
            ),
            Err(e) => Decision::fail(entry, e.to_string(), None),
        };
        decision.recipient = Some(recipient);
        decision
    }

    fn render_context(&self, ctx: &RunContext, appointment: &Appointment) -> RenderContext {
        let services: Vec<&Service> = appointment
            .service_ids
            .iter()
            .filter_map(|id| ctx.services.get(id))
            .collect();

        RenderContext {
            client_name: appointment.client_name.clone(),
            service_names: services.iter().map(|s| s.name.clone()).collect(),
            total_price: (!services.is_empty()).then(|| services.iter().map(|s| s.price).sum()),
            start_time: appointment.start_time,
            display_offset: self.settings.display_offset,
            barber_name: appointment
                .barber_id
                .as_ref()
                .and_then(|id| ctx.barbers.get(id))
                .map(|b| b.name.clone()),
            shop_name: ctx.tenant.name.clone(),
            shop_address: ctx.tenant.address.as_ref().map(|a| a.formatted()),
        }
    }
}
