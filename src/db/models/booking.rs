//! Records owned by the surrounding booking application.
//!
//! This service only reads them: tenants (barbershops) with their templates
//! and gateway credentials, appointments, barbers and services.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::MessageTemplate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

impl Address {
    /// `street, number complement - neighborhood - city - state`, skipping empty parts.
    pub fn formatted(&self) -> String {
        fn part(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }

        let number_part = [part(&self.number), part(&self.complement)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        let first = [part(&self.street), Some(number_part.as_str()).filter(|s| !s.is_empty())]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");

        [
            Some(first.as_str()).filter(|s| !s.is_empty()),
            part(&self.neighborhood),
            part(&self.city),
            part(&self.state),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" - ")
    }
}

/// Credentials of a messaging gateway instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCredentials {
    pub token: String,
    pub instance_id: String,
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("token", &"[redacted]")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub address: Option<Address>,
    pub gateway: Option<GatewayCredentials>,
    /// Template overrides configured by the tenant, in display order.
    pub message_templates: Vec<MessageTemplate>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: String,
    pub name: String,
    pub address_street: Option<String>,
    pub address_number: Option<String>,
    pub address_complement: Option<String>,
    pub address_neighborhood: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_postal_code: Option<String>,
    pub gateway_token: Option<String>,
    pub gateway_instance_id: Option<String>,
}

impl TenantRow {
    pub fn into_tenant(self, message_templates: Vec<MessageTemplate>) -> Tenant {
        let address = Address {
            street: self.address_street,
            number: self.address_number,
            complement: self.address_complement,
            neighborhood: self.address_neighborhood,
            city: self.address_city,
            state: self.address_state,
            postal_code: self.address_postal_code,
        };
        let address = (address != Address::default()).then_some(address);

        let gateway = match (self.gateway_token, self.gateway_instance_id) {
            (Some(token), Some(instance_id))
                if !token.trim().is_empty() && !instance_id.trim().is_empty() =>
            {
                Some(GatewayCredentials { token, instance_id })
            }
            _ => None,
        };

        Tenant {
            id: self.id,
            name: self.name,
            address,
            gateway,
            message_templates,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Unknown values are treated as `pending`: the appointment is still active.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "confirmed" => AppointmentStatus::Confirmed,
            "cancelled" | "canceled" => AppointmentStatus::Cancelled,
            "completed" => AppointmentStatus::Completed,
            _ => AppointmentStatus::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub tenant_id: String,
    pub status: AppointmentStatus,
    pub start_time: DateTime<Utc>,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub barber_id: Option<String>,
    pub service_ids: Vec<String>,
}

impl Appointment {
    /// Phone number with surrounding whitespace removed, if any digits remain.
    pub fn contact(&self) -> Option<&str> {
        self.client_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| p.chars().any(|c| c.is_ascii_digit()))
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub tenant_id: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub barber_id: Option<String>,
    pub service_ids: sqlx::types::Json<Vec<String>>,
}

impl From<AppointmentRow> for Appointment {
    fn from(row: AppointmentRow) -> Self {
        Appointment {
            id: row.id,
            tenant_id: row.tenant_id,
            status: AppointmentStatus::parse(&row.status),
            start_time: row.start_time,
            client_name: row.client_name,
            client_phone: row.client_phone,
            barber_id: row.barber_id,
            service_ids: row.service_ids.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Barber {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub price: f64,
}
