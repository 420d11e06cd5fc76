//! WhatsApp notification sink via the Twilio Messages API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::SinkError;
use crate::pipeline::dispatch::ItemSink;
use crate::pipeline::types::{Item, SubmissionMetadata};

const TWILIO_BASE_URL: &str = "https://api.twilio.com";

/// Twilio WhatsApp sandbox sender.
const DEFAULT_FROM: &str = "+14155238886";

/// Twilio rejects WhatsApp bodies longer than this.
pub const MAX_MESSAGE_CHARS: usize = 1600;

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Recipient in E.164 format.
    pub to: String,
    pub from: String,
    pub base_url: String,
}

impl WhatsAppConfig {
    /// Returns `None` unless `TWILIO_SID`, `TWILIO_AUTH_TOKEN` and
    /// `WHATSAPP_NUMBER` are all set.
    pub fn from_env() -> Option<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|s| !s.trim().is_empty());

        let account_sid = var("TWILIO_SID")?;
        let auth_token = var("TWILIO_AUTH_TOKEN")?;
        let to = var("WHATSAPP_NUMBER")?;
        let from = var("WHATSAPP_FROM").unwrap_or_else(|| DEFAULT_FROM.to_string());

        Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            to,
            from,
            base_url: TWILIO_BASE_URL.to_string(),
        })
    }
}

/// Render the notification body, truncated to `MAX_MESSAGE_CHARS` characters.
pub fn format_message(items: &[Item]) -> String {
    let lines: Vec<String> = items
        .iter()
        .map(|item| {
            let qty = item
                .quantity
                .map(|q| q.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let description = if item.description.trim().is_empty() {
                "No description"
            } else {
                item.description.as_str()
            };
            format!("- {} (Qty: {})\n  {}", item.name, qty, description)
        })
        .collect();

    let message = format!("🧾 *RFQ Detected*\n{}", lines.join("\n"));
    match message.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message,
    }
}

pub struct WhatsAppNotifier {
    client: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppNotifier {
    pub fn new(client: reqwest::Client, config: WhatsAppConfig) -> Self {
        Self { client, config }
    }

    /// Send an arbitrary message body.
    pub async fn send(&self, body: &str) -> Result<(), SinkError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        );
        let from = format!("whatsapp:{}", self.config.from);
        let to = format!("whatsapp:{}", self.config.to);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(self.config.auth_token.expose_secret()))
            .form(&[("From", from.as_str()), ("To", to.as_str()), ("Body", body)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SinkError::Delivery {
                sink: self.name().to_string(),
                reason: format!("Twilio returned {status}: {detail}"),
            });
        }

        debug!(to = %self.config.to, chars = body.chars().count(), "WhatsApp message accepted");
        Ok(())
    }
}

#[async_trait]
impl ItemSink for WhatsAppNotifier {
    fn name(&self) -> &str {
        "notify"
    }

    async fn deliver(&self, items: &[Item], _metadata: &SubmissionMetadata) -> Result<(), SinkError> {
        self.send(&format_message(items)).await?;
        info!(items = items.len(), "WhatsApp notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> WhatsAppConfig {
        WhatsAppConfig {
            account_sid: "AC123".into(),
            auth_token: SecretString::from("token"),
            to: "+15551234567".into(),
            from: DEFAULT_FROM.into(),
            base_url,
        }
    }

    #[test]
    fn message_format() {
        let items = vec![
            Item::new("Ball valve", Some(12), "DN50"),
            Item::new("Gasket", None, ""),
        ];
        assert_eq!(
            format_message(&items),
            "🧾 *RFQ Detected*\n- Ball valve (Qty: 12)\n  DN50\n- Gasket (Qty: N/A)\n  No description"
        );
    }

    #[test]
    fn message_truncated_to_limit() {
        let items: Vec<Item> = (0..200)
            .map(|i| Item::new(format!("Item number {i}"), Some(1), "A fairly long description"))
            .collect();
        let message = format_message(&items);
        assert_eq!(message.chars().count(), MAX_MESSAGE_CHARS);
        assert!(message.starts_with("🧾 *RFQ Detected*"));
    }

    #[tokio::test]
    async fn posts_form_to_twilio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=whatsapp%3A%2B15551234567"))
            .and(body_string_contains("From=whatsapp%3A%2B14155238886"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "SM1"})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WhatsAppNotifier::new(reqwest::Client::new(), config(server.uri()));
        notifier
            .deliver(&[Item::new("Pump", Some(2), "")], &SubmissionMetadata::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_is_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Authenticate"))
            .mount(&server)
            .await;

        let notifier = WhatsAppNotifier::new(reqwest::Client::new(), config(server.uri()));
        let err = notifier
            .deliver(&[Item::new("Pump", Some(2), "")], &SubmissionMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Delivery { .. }));
        assert!(err.to_string().contains("401"));
    }
}
