use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Outcome recorded for one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
    Skipped,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
            LogStatus::Skipped => "skipped",
        }
    }
}

/// Append-only audit record of a delivery attempt.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MessageLog {
    pub id: String,
    pub tenant_id: String,
    pub appointment_id: Option<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub notification_type: Option<String>,
    pub status: LogStatus,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageLog {
    pub tenant_id: String,
    pub appointment_id: Option<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub notification_type: Option<String>,
    pub status: LogStatus,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub details: Option<String>,
}

impl CreateMessageLog {
    pub fn into_log(self, id: String) -> MessageLog {
        MessageLog {
            id,
            tenant_id: self.tenant_id,
            appointment_id: self.appointment_id,
            client_name: self.client_name,
            client_phone: self.client_phone,
            notification_type: self.notification_type,
            status: self.status,
            message: self.message,
            sent_at: self.sent_at,
            details: self.details,
        }
    }
}
