use chrono::{DateTime, FixedOffset, Utc};

/// Values substituted into a template body.
///
/// Every field that the booking data cannot provide renders as an empty
/// string rather than leaving the literal token in the message.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub client_name: String,
    pub service_names: Vec<String>,
    pub total_price: Option<f64>,
    pub start_time: DateTime<Utc>,
    /// Offset used for the date and time tokens.
    pub display_offset: FixedOffset,
    pub barber_name: Option<String>,
    pub shop_name: String,
    pub shop_address: Option<String>,
}

impl RenderContext {
    fn values(&self) -> [(&'static [&'static str], String); 8] {
        let local = self.start_time.with_timezone(&self.display_offset);
        [
            (&["{cliente}", "{client}"], self.client_name.clone()),
            (&["{servico}", "{serviço}", "{service}"], self.service_names.join(", ")),
            (&["{valor}", "{price}"], self.total_price.map(format_brl).unwrap_or_default()),
            (&["{data}", "{date}"], local.format("%d/%m/%Y").to_string()),
            (&["{horario}", "{horário}", "{time}"], local.format("%H:%M").to_string()),
            (&["{barbeiro}", "{barber}"], self.barber_name.clone().unwrap_or_default()),
            (&["{barbearia}", "{shop}"], self.shop_name.clone()),
            (&["{endereco}", "{endereço}", "{address}"], self.shop_address.clone().unwrap_or_default()),
        ]
    }
}

/// Replace every occurrence of every known placeholder in `content`.
///
/// Substitution is a single pass over `content`, so a value that looks like
/// a placeholder is inserted verbatim.
pub fn render_message(content: &str, ctx: &RenderContext) -> String {
    let values = ctx.values();

    let mut rendered = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let candidate = &rest[open..];
        let token = candidate.find('}').map(|close| &candidate[..=close]);
        match token.and_then(|token| lookup(&values, token).map(|value| (token, value))) {
            Some((token, value)) => {
                rendered.push_str(value);
                rest = &candidate[token.len()..];
            }
            None => {
                rendered.push('{');
                rest = &candidate[1..];
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

fn lookup<'a>(values: &'a [(&'static [&'static str], String)], token: &str) -> Option<&'a str> {
    values
        .iter()
        .find(|(tokens, _)| tokens.iter().any(|t| *t == token))
        .map(|(_, value)| value.as_str())
}

/// Format an amount as Brazilian Real, e.g. `R$ 1.234,50`.
pub fn format_brl(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();

    let digits = (cents / 100).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}R$ {},{:02}", sign, grouped, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn context() -> RenderContext {
        RenderContext {
            client_name: "Ana".to_string(),
            service_names: vec!["Corte".to_string(), "Barba".to_string()],
            total_price: Some(75.0),
            start_time: Utc.with_ymd_and_hms(2025, 1, 10, 15, 0, 0).unwrap(),
            display_offset: FixedOffset::west_opt(3 * 3600).unwrap(),
            barber_name: Some("João".to_string()),
            shop_name: "Barbearia Central".to_string(),
            shop_address: Some("Rua A, 10 - Centro - Curitiba - PR".to_string()),
        }
    }

    #[test]
    fn renders_all_placeholders_in_local_time() {
        let body = render_message(
            "{cliente}: {servico} em {data} às {horario} com {barbeiro} ({valor}) na {barbearia}, {endereco}",
            &context(),
        );
        assert_eq!(
            body,
            "Ana: Corte, Barba em 10/01/2025 às 12:00 com João (R$ 75,00) na Barbearia Central, Rua A, 10 - Centro - Curitiba - PR"
        );
    }

    #[test]
    fn replaces_every_occurrence_and_english_aliases() {
        let body = render_message("{client} {client} {cliente} at {time}", &context());
        assert_eq!(body, "Ana Ana Ana at 12:00");
    }

    #[test]
    fn values_are_not_expanded_again() {
        let mut ctx = context();
        ctx.client_name = "{endereco}".to_string();
        ctx.shop_address = Some("Rua A, 10".to_string());

        assert_eq!(
            render_message("Oi {cliente}, {{endereco}} {desconhecido}", &ctx),
            "Oi {endereco}, {Rua A, 10} {desconhecido}"
        );
    }

    #[test]
    fn missing_values_render_empty() {
        let mut ctx = context();
        ctx.barber_name = None;
        ctx.total_price = None;
        ctx.shop_address = None;

        let body = render_message("[{barbeiro}] [{valor}] [{endereco}] {desconhecido}", &ctx);
        assert_eq!(body, "[] [] [] {desconhecido}");
    }

    #[test]
    fn brl_groups_thousands() {
        assert_eq!(format_brl(0.0), "R$ 0,00");
        assert_eq!(format_brl(45.5), "R$ 45,50");
        assert_eq!(format_brl(1234.5), "R$ 1.234,50");
        assert_eq!(format_brl(1234567.891), "R$ 1.234.567,89");
        assert_eq!(format_brl(-12.0), "-R$ 12,00");
    }
}
