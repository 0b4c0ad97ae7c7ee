use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tenant-configured message template.
///
/// `template_type` is one of a small closed set of display names (for example
/// "Lembrete de Agendamento" or "Pesquisa de Satisfação"); tenants may rename
/// them freely as long as the kind keyword survives.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub template_type: String,

    /// Body with `{placeholder}` tokens.
    pub content: String,

    pub enabled: bool,

    /// Only meaningful for reminder-kind templates.
    pub reminder_hours_before: Option<i64>,
}

impl MessageTemplate {
    pub fn new(
        id: &str,
        name: &str,
        template_type: &str,
        content: &str,
        enabled: bool,
        reminder_hours_before: Option<i64>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            template_type: template_type.to_string(),
            content: content.to_string(),
            enabled,
            reminder_hours_before,
        }
    }

    /// String stored as `notification_type` for queue entries created from this template.
    pub fn queue_type(&self) -> &str {
        if self.template_type.trim().is_empty() {
            &self.name
        } else {
            &self.template_type
        }
    }
}
