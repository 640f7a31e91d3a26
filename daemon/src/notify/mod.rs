/// Notification fan-out.
///
/// A [`Dispatcher`] sends one rendered message to every recipient of a watch
/// through the configured [`Notifier`]. Each recipient is its own task with its
/// own timeout, so a slow or failing gateway call only affects that recipient.
/// Nothing is retried within a tick.
mod telegram;
mod twilio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{info, warn};
use url::Url;

use crate::config::ChannelSettings;
use crate::error::DeliveryError;
use crate::transition::Transition;

use telegram::TelegramNotifier;
use twilio::{SmsNotifier, TwilioClient, VoiceNotifier};

/// Everything a channel needs to phrase one alert.
#[derive(Debug, Clone)]
pub struct Alert {
    pub transition: Transition,
    pub activity_id: Option<String>,
    pub title: Option<String>,
    pub target: Url,
}

impl Alert {
    pub fn reason(&self) -> &'static str {
        match self.transition {
            Transition::WentLive => "New activity is live",
            Transition::NowAccepting => "Activity is now accepting responses",
            Transition::WentDown => "Activity has closed",
            Transition::None => "No change",
        }
    }

    /// Presenter handle taken from the last path segment, e.g. `alice` for
    /// `https://pe.app/alice`.
    pub fn presenter(&self) -> Option<String> {
        self.target
            .path_segments()?
            .filter(|s| !s.is_empty())
            .last()
            .map(str::to_string)
    }
}

/// Plain text used by the SMS and chat channels.
pub fn render_text(alert: &Alert) -> String {
    let snippet = match (&alert.title, &alert.activity_id) {
        (Some(title), _) => format!("“{title}”"),
        (None, Some(id)) => format!("ID {id}"),
        (None, None) => String::new(),
    };
    [
        format!("Poll Everywhere: {}", alert.reason()),
        snippet,
        alert.target.to_string(),
    ]
    .into_iter()
    .filter(|line| !line.is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs.
    fn name(&self) -> &'static str;

    fn render(&self, alert: &Alert) -> String {
        render_text(alert)
    }

    async fn deliver(&self, recipient: &str, message: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug)]
pub struct DeliveryOutcome {
    pub recipient: String,
    pub result: Result<(), DeliveryError>,
}

#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    pub fn channel(&self) -> &'static str {
        self.notifier.name()
    }

    pub fn render(&self, alert: &Alert) -> String {
        self.notifier.render(alert)
    }

    /// Delivers `message` to all `recipients` concurrently. Outcomes are returned
    /// in recipient order.
    pub async fn dispatch(&self, message: &str, recipients: &[String]) -> Vec<DeliveryOutcome> {
        let handles = recipients.iter().map(|recipient| {
            let notifier = Arc::clone(&self.notifier);
            let recipient = recipient.clone();
            let message = message.to_string();
            let timeout = self.timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, notifier.deliver(&recipient, &message)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(timeout)),
                }
            })
        });
        let joined = join_all(handles).await;

        recipients
            .iter()
            .zip(joined)
            .map(|(recipient, joined)| {
                let result = joined.unwrap_or_else(|e| Err(DeliveryError::Aborted(e.to_string())));
                match &result {
                    Ok(()) => info!(channel = self.channel(), recipient = %recipient, "alert delivered"),
                    Err(e) => warn!(channel = self.channel(), recipient = %recipient, error = %e, "alert delivery failed"),
                }
                DeliveryOutcome {
                    recipient: recipient.clone(),
                    result,
                }
            })
            .collect()
    }
}

/// Builds the notifier for a validated channel configuration.
pub fn build_notifier(
    settings: ChannelSettings,
    request_timeout: Duration,
) -> Result<Arc<dyn Notifier>, reqwest::Error> {
    let http = reqwest::Client::builder().timeout(request_timeout).build()?;
    let notifier: Arc<dyn Notifier> = match settings {
        ChannelSettings::Sms(twilio) => Arc::new(SmsNotifier::new(TwilioClient::new(http, twilio))),
        ChannelSettings::Voice { twilio, twiml_url } => {
            Arc::new(VoiceNotifier::new(TwilioClient::new(http, twilio), twiml_url))
        }
        ChannelSettings::Telegram(telegram) => Arc::new(TelegramNotifier::new(http, telegram)),
    };
    Ok(notifier)
}
