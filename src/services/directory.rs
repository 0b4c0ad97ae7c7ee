//! Read-only access to booking records owned by the surrounding application.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{Appointment, Barber, Service, Tenant};
use crate::db::repository::BookingRepository;
use crate::error::{AppError, AppResult, StoreError};

#[async_trait]
pub trait BookingDirectory: Send + Sync {
    async fn find_tenant(&self, tenant_id: &str) -> AppResult<Option<Tenant>>;

    async fn list_tenant_ids(&self) -> AppResult<Vec<String>>;

    async fn find_appointment(&self, appointment_id: &str) -> AppResult<Option<Appointment>>;

    /// Appointments of a tenant by id; unknown ids are absent from the result.
    async fn find_appointments(&self, tenant_id: &str, ids: &[String]) -> AppResult<Vec<Appointment>>;

    async fn list_appointments_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Appointment>>;

    async fn list_barbers(&self, tenant_id: &str) -> AppResult<Vec<Barber>>;

    async fn list_services(&self, tenant_id: &str) -> AppResult<Vec<Service>>;
}

pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Booking tables missing means the booking schema is not set up yet.
fn unavailable_as_503<T>(result: AppResult<T>) -> AppResult<T> {
    result.map_err(|err| match err {
        AppError::Database(e) => match StoreError::from(e) {
            StoreError::Unavailable(msg) => {
                AppError::ServiceUnavailable(format!("booking records unavailable: {}", msg))
            }
            StoreError::Database(e) => AppError::Database(e),
        },
        other => other,
    })
}

#[async_trait]
impl BookingDirectory for SqliteDirectory {
    async fn find_tenant(&self, tenant_id: &str) -> AppResult<Option<Tenant>> {
        unavailable_as_503(BookingRepository::find_tenant(&self.pool, tenant_id).await)
    }

    async fn list_tenant_ids(&self) -> AppResult<Vec<String>> {
        unavailable_as_503(BookingRepository::list_tenant_ids(&self.pool).await)
    }

    async fn find_appointment(&self, appointment_id: &str) -> AppResult<Option<Appointment>> {
        unavailable_as_503(BookingRepository::find_appointment(&self.pool, appointment_id).await)
    }

    async fn find_appointments(&self, tenant_id: &str, ids: &[String]) -> AppResult<Vec<Appointment>> {
        unavailable_as_503(BookingRepository::find_appointments_by_ids(&self.pool, tenant_id, ids).await)
    }

    async fn list_appointments_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Appointment>> {
        unavailable_as_503(BookingRepository::list_appointments_since(&self.pool, tenant_id, since).await)
    }

    async fn list_barbers(&self, tenant_id: &str) -> AppResult<Vec<Barber>> {
        unavailable_as_503(BookingRepository::list_barbers(&self.pool, tenant_id).await)
    }

    async fn list_services(&self, tenant_id: &str) -> AppResult<Vec<Service>> {
        unavailable_as_503(BookingRepository::list_services(&self.pool, tenant_id).await)
    }
}
