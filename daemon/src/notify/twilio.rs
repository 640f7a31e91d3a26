use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::{Alert, Notifier};
use crate::config::TwilioSettings;
use crate::error::DeliveryError;
use crate::transition::Transition;

/// Minimal Twilio REST client: form-encoded POSTs under the account resource.
pub struct TwilioClient {
    http: Client,
    settings: TwilioSettings,
}

impl TwilioClient {
    pub fn new(http: Client, settings: TwilioSettings) -> Self {
        Self { http, settings }
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{resource}.json",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.account_sid
        )
    }

    async fn create(&self, resource: &str, form: &[(&str, &str)]) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(self.resource_url(resource))
            .basic_auth(&self.settings.account_sid, Some(&self.settings.auth_token))
            .form(form)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

pub struct SmsNotifier {
    client: TwilioClient,
}

impl SmsNotifier {
    pub fn new(client: TwilioClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn deliver(&self, recipient: &str, message: &str) -> Result<(), DeliveryError> {
        let from = self.client.settings.from_number.as_str();
        self.client
            .create("Messages", &[("To", recipient), ("From", from), ("Body", message)])
            .await
    }
}

/// Places a call whose TwiML document reads the message aloud. The message is
/// passed to the TwiML endpoint as the `message` query parameter.
pub struct VoiceNotifier {
    client: TwilioClient,
    twiml_url: Url,
}

impl VoiceNotifier {
    pub fn new(client: TwilioClient, twiml_url: Url) -> Self {
        Self { client, twiml_url }
    }

    fn call_url(&self, message: &str) -> Url {
        let mut url = self.twiml_url.clone();
        url.query_pairs_mut().append_pair("message", message);
        url
    }
}

#[async_trait]
impl Notifier for VoiceNotifier {
    fn name(&self) -> &'static str {
        "voice"
    }

    /// Spoken phrasing: names the presenter rather than reading out a URL.
    fn render(&self, alert: &Alert) -> String {
        let who = alert.presenter().or_else(|| alert.title.clone());
        match (alert.transition, who) {
            (Transition::WentLive, Some(who)) => format!("{who} has just posted a poll. Go check it out!"),
            (Transition::NowAccepting, Some(who)) => {
                format!("{who} poll is now accepting responses. Go check it out!")
            }
            (Transition::WentDown, Some(who)) => format!("{who} has closed the poll."),
            (Transition::WentLive, None) => "A new poll has just been posted. Go check it out!".into(),
            (Transition::NowAccepting, None) => {
                "A poll is now accepting responses. Go check it out!".into()
            }
            (Transition::WentDown, None) => "The poll has closed.".into(),
            (Transition::None, _) => alert.reason().into(),
        }
    }

    async fn deliver(&self, recipient: &str, message: &str) -> Result<(), DeliveryError> {
        let from = self.client.settings.from_number.as_str();
        let url = self.call_url(message);
        self.client
            .create(
                "Calls",
                &[("To", recipient), ("From", from), ("Url", url.as_str()), ("Method", "GET")],
            )
            .await
    }
}
