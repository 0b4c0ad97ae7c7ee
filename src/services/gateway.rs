//! Outbound messaging gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::GatewayCredentials;
use crate::error::{AppError, AppResult};

/// Result of one send call as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub success: bool,
    pub status_code: u16,
    pub error: Option<String>,
}

/// The single operation this service needs from a messaging provider.
///
/// `Ok` with `success == false` is a rejection by the provider; `Err` is a
/// transport failure. Callers treat both as a failed delivery.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send(
        &self,
        credentials: &GatewayCredentials,
        recipient: &str,
        body: &str,
    ) -> AppResult<GatewayResponse>;
}

/// Strip everything but digits and prefix the country code when missing.
///
/// Returns `None` when no digits are left.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if digits.starts_with(country_code) {
        Some(digits)
    } else {
        Some(format!("{}{}", country_code, digits))
    }
}

/// Endpoints tried in order; the next one is used only when the previous
/// answers 404.
const SEND_ENDPOINTS: [&str; 3] = ["/disparo/enviar", "/mensagem/disparar", "/mensagem/enviar"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendPayload<'a> {
    id_instancia: &'a str,
    whatsapp: &'a str,
    texto: &'a str,
    envio_imediato: u8,
}

#[derive(Deserialize, Default)]
struct SendReply {
    mensagem: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl SendReply {
    fn text(self) -> Option<String> {
        self.mensagem.or(self.message).or(self.error)
    }
}

/// HTTP client for the BitSafira WhatsApp gateway.
pub struct BitSafiraGateway {
    client: reqwest::Client,
    base_url: String,
}

impl BitSafiraGateway {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Gateway(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MessageGateway for BitSafiraGateway {
    async fn send(
        &self,
        credentials: &GatewayCredentials,
        recipient: &str,
        body: &str,
    ) -> AppResult<GatewayResponse> {
        let payload = SendPayload {
            id_instancia: &credentials.instance_id,
            whatsapp: recipient,
            texto: body,
            envio_imediato: 1,
        };

        let mut last_status = 404;
        for endpoint in SEND_ENDPOINTS {
            let url = format!("{}{}", self.base_url, endpoint);
            let response = self
                .client
                .post(&url)
                .header("Token", &credentials.token)
                .json(&payload)
                .send()
                .await
                .map_err(AppError::Request)?;

            let status = response.status().as_u16();
            if status == 404 {
                tracing::debug!("Gateway endpoint {} not found, trying next", endpoint);
                last_status = status;
                continue;
            }

            let reply: SendReply = response.json().await.unwrap_or_default();
            let success = status == 200 || status == 201;
            let error = if success {
                None
            } else {
                Some(
                    reply
                        .text()
                        .unwrap_or_else(|| format!("gateway responded with status {}", status)),
                )
            };

            return Ok(GatewayResponse {
                success,
                status_code: status,
                error,
            });
        }

        Ok(GatewayResponse {
            success: false,
            status_code: last_status,
            error: Some("no gateway send endpoint available".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> GatewayCredentials {
        GatewayCredentials {
            token: "tok-1".to_string(),
            instance_id: "inst-1".to_string(),
        }
    }

    fn gateway(server: &MockServer) -> BitSafiraGateway {
        BitSafiraGateway::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("(41) 99999-0000", "55").as_deref(), Some("5541999990000"));
        assert_eq!(normalize_phone("+55 41 99999-0000", "55").as_deref(), Some("5541999990000"));
        assert_eq!(normalize_phone("  -  ", "55"), None);
    }

    #[tokio::test]
    async fn sends_payload_with_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/disparo/enviar"))
            .and(header("Token", "tok-1"))
            .and(body_json(serde_json::json!({
                "idInstancia": "inst-1",
                "whatsapp": "5541999990000",
                "texto": "Olá",
                "envioImediato": 1
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"mensagem": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let response = gateway(&server)
            .send(&credentials(), "5541999990000", "Olá")
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.status_code, 201);
        assert_eq!(response.error, None);
    }

    #[tokio::test]
    async fn falls_back_to_next_endpoint_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/disparo/enviar"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mensagem/disparar"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let response = gateway(&server)
            .send(&credentials(), "5541999990000", "Olá")
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.status_code, 200);
    }

    #[tokio::test]
    async fn rejection_carries_gateway_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/disparo/enviar"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"mensagem": "Número inválido"})),
            )
            .mount(&server)
            .await;

        let response = gateway(&server)
            .send(&credentials(), "55123", "Olá")
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.status_code, 400);
        assert_eq!(response.error.as_deref(), Some("Número inválido"));
    }

    #[tokio::test]
    async fn all_endpoints_missing_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let response = gateway(&server)
            .send(&credentials(), "5541999990000", "Olá")
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.status_code, 404);
    }
}
