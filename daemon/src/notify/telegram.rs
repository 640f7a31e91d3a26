use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::Notifier;
use crate::config::TelegramSettings;
use crate::error::DeliveryError;

/// Sends chat messages through the Bot API; recipients are chat ids.
pub struct TelegramNotifier {
    http: Client,
    settings: TelegramSettings,
}

impl TelegramNotifier {
    pub fn new(http: Client, settings: TelegramSettings) -> Self {
        Self { http, settings }
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.bot_token
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, recipient: &str, message: &str) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(self.send_message_url())
            .json(&json!({ "chat_id": recipient, "text": message }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}
