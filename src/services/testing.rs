//! Fakes shared by unit tests across the crate.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use http_body_util::BodyExt;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tower::ServiceExt;

use crate::db::models::{
    Appointment, AppointmentStatus, Barber, GatewayCredentials, MessageTemplate, Service, Tenant,
};
use crate::config::Config;
use crate::error::AppResult;
use crate::services::clock::Clock;
use crate::services::delivery::DeliverySettings;
use crate::services::directory::BookingDirectory;
use crate::services::gateway::{GatewayResponse, MessageGateway};
use crate::services::message_log::MemoryMessageLog;
use crate::services::queue_store::MemoryQueueStore;
use crate::AppState;

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Single-connection in-memory database without any tables.
pub async fn unmigrated_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

/// Single-connection in-memory database with the crate's schema.
pub async fn migrated_pool() -> SqlitePool {
    let pool = unmigrated_pool().await;
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Booking records held in memory.
#[derive(Default)]
pub struct InMemoryDirectory {
    pub tenants: Mutex<Vec<Tenant>>,
    pub appointments: Mutex<Vec<Appointment>>,
    pub barbers: Mutex<Vec<Barber>>,
    pub services: Mutex<Vec<Service>>,
}

impl InMemoryDirectory {
    pub fn put_tenant(&self, tenant: Tenant) {
        let mut tenants = self.tenants.lock().unwrap();
        tenants.retain(|t| t.id != tenant.id);
        tenants.push(tenant);
    }

    pub fn put_appointment(&self, appointment: Appointment) {
        let mut appointments = self.appointments.lock().unwrap();
        appointments.retain(|a| a.id != appointment.id);
        appointments.push(appointment);
    }

    pub fn set_status(&self, appointment_id: &str, status: AppointmentStatus) {
        let mut appointments = self.appointments.lock().unwrap();
        if let Some(a) = appointments.iter_mut().find(|a| a.id == appointment_id) {
            a.status = status;
        }
    }

    pub fn set_phone(&self, appointment_id: &str, phone: Option<&str>) {
        let mut appointments = self.appointments.lock().unwrap();
        if let Some(a) = appointments.iter_mut().find(|a| a.id == appointment_id) {
            a.client_phone = phone.map(str::to_string);
        }
    }

    pub fn remove_appointment(&self, appointment_id: &str) {
        self.appointments
            .lock()
            .unwrap()
            .retain(|a| a.id != appointment_id);
    }
}

#[async_trait]
impl BookingDirectory for InMemoryDirectory {
    async fn find_tenant(&self, tenant_id: &str) -> AppResult<Option<Tenant>> {
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == tenant_id)
            .cloned())
    }

    async fn list_tenant_ids(&self) -> AppResult<Vec<String>> {
        Ok(self.tenants.lock().unwrap().iter().map(|t| t.id.clone()).collect())
    }

    async fn find_appointment(&self, appointment_id: &str) -> AppResult<Option<Appointment>> {
        Ok(self
            .appointments
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == appointment_id)
            .cloned())
    }

    async fn find_appointments(&self, tenant_id: &str, ids: &[String]) -> AppResult<Vec<Appointment>> {
        Ok(self
            .appointments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.tenant_id == tenant_id && ids.contains(&a.id))
            .cloned()
            .collect())
    }

    async fn list_appointments_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Appointment>> {
        Ok(self
            .appointments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.start_time >= since)
            .cloned()
            .collect())
    }

    async fn list_barbers(&self, tenant_id: &str) -> AppResult<Vec<Barber>> {
        Ok(self
            .barbers
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_services(&self, tenant_id: &str) -> AppResult<Vec<Service>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub instance_id: String,
    pub recipient: String,
    pub body: String,
}

/// Gateway that records every call and answers with a configurable outcome.
#[derive(Default)]
pub struct RecordingGateway {
    pub sent: Mutex<Vec<SentMessage>>,
    /// Recipients for which the gateway rejects the message.
    pub reject: Mutex<Vec<String>>,
}

impl RecordingGateway {
    pub fn reject_recipient(&self, recipient: &str) {
        self.reject.lock().unwrap().push(recipient.to_string());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageGateway for RecordingGateway {
    async fn send(
        &self,
        credentials: &GatewayCredentials,
        recipient: &str,
        body: &str,
    ) -> AppResult<GatewayResponse> {
        self.sent.lock().unwrap().push(SentMessage {
            instance_id: credentials.instance_id.clone(),
            recipient: recipient.to_string(),
            body: body.to_string(),
        });

        if self.reject.lock().unwrap().iter().any(|r| r == recipient) {
            return Ok(GatewayResponse {
                success: false,
                status_code: 400,
                error: Some("invalid number".to_string()),
            });
        }

        Ok(GatewayResponse {
            success: true,
            status_code: 200,
            error: None,
        })
    }
}

pub fn reminder_template(hours: i64) -> MessageTemplate {
    MessageTemplate::new(
        "rem",
        "Lembrete Padrão",
        "Lembrete de Agendamento",
        "Olá, {cliente}! Seu horário é {data} às {horario} com {barbeiro}. {barbearia}",
        true,
        Some(hours),
    )
}

pub fn survey_template(enabled: bool) -> MessageTemplate {
    MessageTemplate::new(
        "srv",
        "Pesquisa Padrão",
        "Pesquisa de Satisfação",
        "Olá, {cliente}! Como foi o {servico}?",
        enabled,
        None,
    )
}

pub fn tenant(id: &str, templates: Vec<MessageTemplate>) -> Tenant {
    Tenant {
        id: id.to_string(),
        name: "Barbearia Central".to_string(),
        address: None,
        gateway: Some(GatewayCredentials {
            token: "tok".to_string(),
            instance_id: format!("inst-{}", id),
        }),
        message_templates: templates,
    }
}

pub fn appointment(id: &str, tenant_id: &str, start_time: DateTime<Utc>) -> Appointment {
    Appointment {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        status: AppointmentStatus::Confirmed,
        start_time,
        client_name: "Ana".to_string(),
        client_phone: Some("(41) 99999-0000".to_string()),
        barber_id: Some("b1".to_string()),
        service_ids: vec!["s1".to_string()],
    }
}

/// Directory seeded with one tenant, its barber and service.
pub fn directory_with(tenant: Tenant) -> Arc<InMemoryDirectory> {
    let directory = InMemoryDirectory::default();
    directory.barbers.lock().unwrap().push(Barber {
        id: "b1".to_string(),
        tenant_id: tenant.id.clone(),
        name: "João".to_string(),
    });
    directory.services.lock().unwrap().push(Service {
        id: "s1".to_string(),
        tenant_id: tenant.id.clone(),
        name: "Corte".to_string(),
        price: 45.0,
    });
    directory.put_tenant(tenant);
    Arc::new(directory)
}

/// Application state over in-memory stores and the given fakes.
pub fn test_state(
    directory: Arc<InMemoryDirectory>,
    clock: Arc<ManualClock>,
    gateway: Arc<RecordingGateway>,
) -> Arc<AppState> {
    let settings = DeliverySettings {
        default_credentials: None,
        country_code: "55".to_string(),
        display_offset: FixedOffset::west_opt(3 * 3600).unwrap(),
        tenant_concurrency: 2,
    };
    Arc::new(AppState::new(
        Config::default(),
        Arc::new(MemoryQueueStore::new(clock.clone())),
        directory,
        gateway,
        Arc::new(MemoryMessageLog::new()),
        clock,
        settings,
    ))
}

/// Drive one request through a router and decode the JSON response.
pub async fn request(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
