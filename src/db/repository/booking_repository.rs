use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{Appointment, AppointmentRow, Barber, MessageTemplate, Service, Tenant, TenantRow};
use crate::error::{AppError, AppResult};

const APPOINTMENT_COLUMNS: &str =
    "id, tenant_id, status, start_time, client_name, client_phone, barber_id, service_ids";

/// Read-only queries over the booking application's tables.
pub struct BookingRepository;

impl BookingRepository {
    /// Tenant with its template overrides in display order.
    pub async fn find_tenant(pool: &SqlitePool, tenant_id: &str) -> AppResult<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT
                id, name,
                address_street, address_number, address_complement,
                address_neighborhood, address_city, address_state, address_postal_code,
                gateway_token, gateway_instance_id
            FROM tenants
            WHERE id = ?
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let templates = sqlx::query_as::<_, MessageTemplate>(
            r#"
            SELECT id, name, template_type, content, enabled, reminder_hours_before
            FROM message_templates
            WHERE tenant_id = ?
            ORDER BY position ASC, id ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(Some(row.into_tenant(templates)))
    }

    pub async fn list_tenant_ids(pool: &SqlitePool) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT id FROM tenants ORDER BY id ASC")
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn find_appointment(
        pool: &SqlitePool,
        appointment_id: &str,
    ) -> AppResult<Option<Appointment>> {
        let sql = format!("SELECT {} FROM appointments WHERE id = ?", APPOINTMENT_COLUMNS);
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(appointment_id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row.map(Appointment::from))
    }

    /// Appointments of a tenant by id. Unknown ids are simply absent from the result.
    pub async fn find_appointments_by_ids(
        pool: &SqlitePool,
        tenant_id: &str,
        ids: &[String],
    ) -> AppResult<Vec<Appointment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM appointments WHERE tenant_id = ",
            APPOINTMENT_COLUMNS
        ));
        builder.push_bind(tenant_id);
        builder.push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<AppointmentRow>()
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    /// Appointments starting at or after `since`, earliest first.
    pub async fn list_appointments_since(
        pool: &SqlitePool,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Appointment>> {
        let sql = format!(
            "SELECT {} FROM appointments WHERE tenant_id = ? AND start_time >= ? ORDER BY start_time ASC",
            APPOINTMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(tenant_id)
            .bind(since)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    pub async fn list_barbers(pool: &SqlitePool, tenant_id: &str) -> AppResult<Vec<Barber>> {
        sqlx::query_as::<_, Barber>("SELECT id, tenant_id, name FROM barbers WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn list_services(pool: &SqlitePool, tenant_id: &str) -> AppResult<Vec<Service>> {
        sqlx::query_as::<_, Service>(
            "SELECT id, tenant_id, name, price FROM services WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
