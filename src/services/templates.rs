//! Template resolution.
//!
//! Tenants override the built-in templates and rename them freely, so
//! templates are matched to a [`NotificationKind`] by keyword rather than by
//! exact name. Each template's kinds are computed once when a
//! [`TemplateCatalog`] is built.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::db::models::MessageTemplate;

/// Coarse notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Reminder,
    Survey,
    Confirmation,
}

impl NotificationKind {
    /// Classification precedence: a name mentioning both "pesquisa" and
    /// "lembrete" is a survey.
    const PRECEDENCE: [NotificationKind; 3] = [
        NotificationKind::Survey,
        NotificationKind::Reminder,
        NotificationKind::Confirmation,
    ];

    /// Normalized keywords (Portuguese and English).
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            NotificationKind::Reminder => &["lembrete", "reminder"],
            NotificationKind::Survey => &["pesquisa", "survey"],
            NotificationKind::Confirmation => &["confirmacao", "confirmation"],
        }
    }

    /// Label used as prefix of delivery log messages.
    pub fn label(self) -> &'static str {
        match self {
            NotificationKind::Reminder => "Reminder",
            NotificationKind::Survey => "Survey",
            NotificationKind::Confirmation => "Message",
        }
    }

    fn matches_normalized(self, normalized: &str) -> bool {
        self.keywords().iter().any(|k| normalized.contains(k))
    }

    /// Map a raw template type, template name or stored queue type to a kind.
    pub fn classify(raw: &str) -> Option<Self> {
        let normalized = normalize_template_type(raw);
        Self::PRECEDENCE
            .into_iter()
            .find(|kind| kind.matches_normalized(&normalized))
    }
}

/// Lowercase, trim and strip diacritics ("Confirmação" -> "confirmacao").
pub fn normalize_template_type(raw: &str) -> String {
    raw.trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Filters applied by [`TemplateCatalog::match_by_kind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub require_enabled: bool,
    pub require_positive_reminder_window: bool,
}

impl MatchOptions {
    pub fn enabled() -> Self {
        Self {
            require_enabled: true,
            require_positive_reminder_window: false,
        }
    }

    pub fn schedulable_reminder() -> Self {
        Self {
            require_enabled: true,
            require_positive_reminder_window: true,
        }
    }
}

/// A template together with the kinds its type and name mention.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTemplate {
    pub template: MessageTemplate,
    normalized_type: String,
    normalized_name: String,
    kinds: Vec<NotificationKind>,
    primary_kind: Option<NotificationKind>,
}

impl CatalogTemplate {
    fn new(template: MessageTemplate) -> Self {
        let normalized_type = normalize_template_type(&template.template_type);
        let normalized_name = normalize_template_type(&template.name);
        let kinds = NotificationKind::PRECEDENCE
            .into_iter()
            .filter(|k| k.matches_normalized(&normalized_type) || k.matches_normalized(&normalized_name))
            .collect();
        let primary_kind = NotificationKind::classify(&template.template_type)
            .or_else(|| NotificationKind::classify(&template.name));

        Self {
            template,
            normalized_type,
            normalized_name,
            kinds,
            primary_kind,
        }
    }

    pub fn has_kind(&self, kind: NotificationKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn primary_kind(&self) -> Option<NotificationKind> {
        self.primary_kind
    }

    pub fn has_positive_reminder_window(&self) -> bool {
        self.template.reminder_hours_before.is_some_and(|h| h > 0)
    }
}

/// The effective templates of one tenant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateCatalog {
    templates: Vec<CatalogTemplate>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<MessageTemplate>) -> Self {
        Self {
            templates: templates.into_iter().map(CatalogTemplate::new).collect(),
        }
    }

    /// Tenant overrides merged over the built-in defaults.
    pub fn for_tenant(defaults: &[MessageTemplate], overrides: &[MessageTemplate]) -> Self {
        Self::new(resolve_effective_templates(defaults, overrides))
    }

    pub fn templates(&self) -> impl Iterator<Item = &CatalogTemplate> {
        self.templates.iter()
    }

    /// First template (in display order) of the given kind that passes `options`.
    pub fn match_by_kind(&self, kind: NotificationKind, options: MatchOptions) -> Option<&CatalogTemplate> {
        self.templates.iter().find(|t| {
            t.has_kind(kind)
                && (!options.require_enabled || t.template.enabled)
                && (!options.require_positive_reminder_window || t.has_positive_reminder_window())
        })
    }

    /// Best enabled template for a stored queue type.
    ///
    /// Tries an exact match on type or name, then a normalized match, then
    /// falls back to the kind keyword contained in `notification_type`.
    pub fn resolve_for_delivery(&self, notification_type: &str) -> Option<&CatalogTemplate> {
        let enabled = || self.templates.iter().filter(|t| t.template.enabled);

        if let Some(found) = enabled()
            .find(|t| t.template.template_type == notification_type || t.template.name == notification_type)
        {
            return Some(found);
        }

        let normalized = normalize_template_type(notification_type);
        if let Some(found) =
            enabled().find(|t| t.normalized_type == normalized || t.normalized_name == normalized)
        {
            return Some(found);
        }

        let kind = NotificationKind::classify(notification_type)?;
        enabled().find(|t| t.has_kind(kind))
    }

    /// Every queue type any template of `kind` could have produced, enabled or not.
    pub fn queue_types(&self, kind: NotificationKind) -> BTreeSet<String> {
        self.templates
            .iter()
            .filter(|t| t.has_kind(kind))
            .map(|t| t.template.queue_type().to_string())
            .collect()
    }
}

/// Merge tenant overrides over the defaults.
///
/// An override whose normalized type equals a default's replaces it in
/// place; other overrides are appended in their own order.
pub fn resolve_effective_templates(
    defaults: &[MessageTemplate],
    overrides: &[MessageTemplate],
) -> Vec<MessageTemplate> {
    let mut merged: Vec<MessageTemplate> = defaults.to_vec();

    for custom in overrides {
        let key = normalize_template_type(&custom.template_type);
        match merged
            .iter_mut()
            .find(|t| normalize_template_type(&t.template_type) == key)
        {
            Some(slot) => *slot = custom.clone(),
            None => merged.push(custom.clone()),
        }
    }

    merged
}

/// Templates shipped with the product.
pub fn default_templates() -> Vec<MessageTemplate> {
    vec![
        MessageTemplate::new(
            "tmpl1",
            "Lembrete Padrão",
            "Lembrete de Agendamento",
            "Olá, {cliente}!\nPassando para lembrar do seu horário amanhã às {horario} com {barbeiro}.\nAté lá!\nEquipe {barbearia}.",
            true,
            Some(24),
        ),
        MessageTemplate::new(
            "tmpl2",
            "Confirmação Padrão",
            "Confirmação de Agendamento",
            "Olá, {cliente}!\nSeu agendamento para {servico} no dia {data} às {horario} foi confirmado.\nEquipe {barbearia}.",
            true,
            None,
        ),
        MessageTemplate::new(
            "tmpl4",
            "Confirmação Manual",
            "Confirmação Manual",
            "Olá, {cliente}!\nPassando para confirmar seu agendamento para {servico} no dia {data} às {horario} com {barbeiro}.\nPor favor, responda 'SIM' para confirmar.\nEquipe {barbearia}.",
            true,
            None,
        ),
        MessageTemplate::new(
            "tmpl3",
            "Pesquisa Padrão",
            "Pesquisa de Satisfação",
            "Olá, {cliente}!\nAgradecemos a sua visita.\nO que você achou do nosso serviço?\nResponda de 0 a 10.\nEquipe {barbearia}.",
            false,
            None,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_accents_and_case() {
        assert_eq!(normalize_template_type("  Confirmação de Agendamento "), "confirmacao de agendamento");
        assert_eq!(normalize_template_type("Pesquisa de Satisfação"), "pesquisa de satisfacao");
        // Decomposed form: "c" + combining cedilla, "a" + combining tilde.
        assert_eq!(normalize_template_type("Confirmac\u{0327}a\u{0303}o"), "confirmacao");
        assert_eq!(normalize_template_type("Lembrēte"), "lembrete");
        assert_eq!(normalize_template_type("Confirmaçǎo"), "confirmacao");
        assert_eq!(NotificationKind::classify("Pesquīsa Rápida"), Some(NotificationKind::Survey));
        assert_eq!(NotificationKind::classify("LEMBRĚTE"), Some(NotificationKind::Reminder));
    }

    #[test]
    fn classify_prefers_survey_then_reminder() {
        assert_eq!(NotificationKind::classify("Lembrete de Agendamento"), Some(NotificationKind::Reminder));
        assert_eq!(NotificationKind::classify("Satisfaction SURVEY"), Some(NotificationKind::Survey));
        assert_eq!(
            NotificationKind::classify("Lembrete de Agendamento (Pesquisa)"),
            Some(NotificationKind::Survey)
        );
        assert_eq!(NotificationKind::classify("Confirmação Manual"), Some(NotificationKind::Confirmation));
        assert_eq!(NotificationKind::classify("Promoção"), None);
    }

    #[test]
    fn overrides_replace_defaults_by_type() {
        let defaults = default_templates();
        let overrides = vec![
            MessageTemplate::new("c1", "Meu lembrete", "LEMBRETE DE AGENDAMENTO", "Oi {cliente}", true, Some(2)),
            MessageTemplate::new("c2", "Aniversário", "Aniversário", "Parabéns", true, None),
        ];

        let merged = resolve_effective_templates(&defaults, &overrides);

        assert_eq!(merged.len(), defaults.len() + 1);
        assert_eq!(merged[0].id, "c1");
        assert_eq!(merged[1].id, "tmpl2");
        assert_eq!(merged.last().map(|t| t.id.as_str()), Some("c2"));
    }

    #[test]
    fn match_by_kind_applies_filters() {
        let catalog = TemplateCatalog::new(vec![
            MessageTemplate::new("r0", "Lembrete sem janela", "Lembrete", "x", true, Some(0)),
            MessageTemplate::new("r1", "Lembrete off", "Lembrete de Agendamento", "x", false, Some(24)),
            MessageTemplate::new("r2", "Lembrete curto", "Lembrete 2h", "x", true, Some(2)),
        ]);

        let any = catalog.match_by_kind(NotificationKind::Reminder, MatchOptions::default());
        assert_eq!(any.map(|t| t.template.id.as_str()), Some("r0"));

        let enabled = catalog.match_by_kind(NotificationKind::Reminder, MatchOptions::enabled());
        assert_eq!(enabled.map(|t| t.template.id.as_str()), Some("r0"));

        let schedulable =
            catalog.match_by_kind(NotificationKind::Reminder, MatchOptions::schedulable_reminder());
        assert_eq!(schedulable.map(|t| t.template.id.as_str()), Some("r2"));

        assert!(catalog
            .match_by_kind(NotificationKind::Survey, MatchOptions::default())
            .is_none());
    }

    #[test]
    fn resolve_for_delivery_falls_back_step_by_step() {
        let catalog = TemplateCatalog::new(vec![
            MessageTemplate::new("r", "Lembrete Padrão", "Lembrete de Agendamento", "x", true, Some(24)),
            MessageTemplate::new("s", "Pesquisa Padrão", "Pesquisa de Satisfação", "y", true, None),
            MessageTemplate::new("c", "Confirmação Padrão", "Confirmação de Agendamento", "z", false, None),
        ]);

        let exact = catalog.resolve_for_delivery("Pesquisa Padrão");
        assert_eq!(exact.map(|t| t.template.id.as_str()), Some("s"));

        let normalized = catalog.resolve_for_delivery("lembrete de agendamento");
        assert_eq!(normalized.map(|t| t.template.id.as_str()), Some("r"));

        let by_kind = catalog.resolve_for_delivery("Lembrete antigo renomeado");
        assert_eq!(by_kind.map(|t| t.template.id.as_str()), Some("r"));

        // Disabled templates never resolve.
        assert!(catalog.resolve_for_delivery("Confirmação de Agendamento").is_none());
        assert!(catalog.resolve_for_delivery("Promoção").is_none());
    }

    #[test]
    fn queue_types_cover_disabled_templates() {
        let catalog = TemplateCatalog::for_tenant(&default_templates(), &[]);
        let survey_types = catalog.queue_types(NotificationKind::Survey);
        assert!(survey_types.contains("Pesquisa de Satisfação"));

        let reminder = catalog
            .match_by_kind(NotificationKind::Reminder, MatchOptions::schedulable_reminder())
            .map(|t| t.template.queue_type().to_string());
        assert_eq!(reminder.as_deref(), Some("Lembrete de Agendamento"));
    }

    #[test]
    fn labels_follow_kind() {
        assert_eq!(NotificationKind::Reminder.label(), "Reminder");
        assert_eq!(NotificationKind::Survey.label(), "Survey");
        assert_eq!(NotificationKind::Confirmation.label(), "Message");
    }
}
