use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::extract::Profile;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_BIND: &str = "127.0.0.1:5001";
pub const TWILIO_API_BASE: &str = "https://api.twilio.com";
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Root configuration structure. Deserialized from `<config dir>/pollwatch/config.toml`
/// and then overlaid with environment variables.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub channel: Option<ChannelConfig>,
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Settings shared by every watch.
#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    /// Seconds between ticks of one watch.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound for a single gateway call to one recipient.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
    /// Whether an activity disappearing is announced too.
    #[serde(default = "default_true")]
    pub notify_on_down: bool,
    /// Identifier pattern set used by the extractor.
    #[serde(default)]
    pub profile: Profile,
    /// Shared watch state file. Defaults to the app data directory.
    pub state_file: Option<PathBuf>,
    /// Daemon status file. Defaults to the app data directory.
    pub status_file: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT_SECS,
            notify_on_down: true,
            profile: Profile::default(),
            state_file: None,
            status_file: None,
        }
    }
}

impl GlobalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

/// Transport settings for page fetches.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// Notification channel as written in the file. Credentials are optional here so
/// that missing ones can be reported by name in [`Config::validate`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelConfig {
    Sms(TwilioConfig),
    Voice(TwilioConfig),
    Telegram(TelegramConfig),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    /// Voice only: TwiML endpoint that reads the `message` query parameter aloud.
    pub twiml_url: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub api_base: Option<String>,
}

/// One monitored page and who to alert about it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WatchConfig {
    pub target: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// A channel with every required credential present.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSettings {
    Sms(TwilioSettings),
    Voice { twilio: TwilioSettings, twiml_url: Url },
    Telegram(TelegramSettings),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TwilioSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub api_base: String,
}

impl Config {
    /// Overlays the environment variables understood by the standalone watchers
    /// (`POLL_URL`, `INTERVAL_SEC`, `TWILIO_*`, `TELEGRAM_*`). Values already in
    /// the file win, except `INTERVAL_SEC`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = var("INTERVAL_SEC").and_then(|v| v.trim().parse().ok()) {
            self.global.poll_interval_secs = secs;
        }

        if self.channel.is_none() {
            self.channel = if var("TELEGRAM_BOT_TOKEN").is_some() {
                Some(ChannelConfig::Telegram(TelegramConfig::default()))
            } else if var("TWILIO_TWIML_URL").is_some() {
                Some(ChannelConfig::Voice(TwilioConfig::default()))
            } else if var("TWILIO_ACCOUNT_SID").is_some() {
                Some(ChannelConfig::Sms(TwilioConfig::default()))
            } else {
                None
            };
        }

        let fill = |slot: &mut Option<String>, name: &str| {
            if slot.is_none() {
                *slot = var(name);
            }
        };
        let recipients_var = match &mut self.channel {
            Some(ChannelConfig::Sms(t)) | Some(ChannelConfig::Voice(t)) => {
                fill(&mut t.account_sid, "TWILIO_ACCOUNT_SID");
                fill(&mut t.auth_token, "TWILIO_AUTH_TOKEN");
                fill(&mut t.from_number, "TWILIO_FROM_NUMBER");
                fill(&mut t.twiml_url, "TWILIO_TWIML_URL");
                "TWILIO_TO_NUMBER"
            }
            Some(ChannelConfig::Telegram(t)) => {
                fill(&mut t.bot_token, "TELEGRAM_BOT_TOKEN");
                "TELEGRAM_CHAT_ID"
            }
            None => return,
        };

        if let Some(target) = var("POLL_URL") {
            let target = target.trim().to_string();
            if !target.is_empty() && !self.watches.iter().any(|w| w.target == target) {
                let recipients = var(recipients_var)
                    .map(|v| split_list(&v))
                    .unwrap_or_default();
                self.watches.push(WatchConfig { target, recipients });
            }
        }
    }

    /// Checks everything a watch needs before any watch starts and resolves the
    /// channel credentials. `require_watches` is false for modes where watches
    /// can be registered later.
    pub fn validate(&self, require_watches: bool) -> Result<ChannelSettings, ConfigError> {
        if self.global.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        if self.global.delivery_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("delivery_timeout_secs"));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("timeout_secs"));
        }
        if require_watches && self.watches.is_empty() {
            return Err(ConfigError::NoWatches);
        }
        for watch in &self.watches {
            parse_target(&watch.target)?;
            if watch.recipients.iter().all(|r| r.trim().is_empty()) {
                return Err(ConfigError::NoRecipients(watch.target.clone()));
            }
        }

        match self.channel.as_ref().ok_or(ConfigError::MissingChannel)? {
            ChannelConfig::Sms(t) => Ok(ChannelSettings::Sms(twilio_settings("sms", t)?)),
            ChannelConfig::Voice(t) => {
                let twilio = twilio_settings("voice", t)?;
                let raw = required(&t.twiml_url, "voice", "twiml_url")?;
                let twiml_url = Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
                    field: "twiml_url",
                    reason: e.to_string(),
                })?;
                Ok(ChannelSettings::Voice { twilio, twiml_url })
            }
            ChannelConfig::Telegram(t) => Ok(ChannelSettings::Telegram(TelegramSettings {
                bot_token: required(&t.bot_token, "telegram", "bot_token")?,
                api_base: t.api_base.clone().unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
            })),
        }
    }
}

/// Parses a watch target, accepting only absolute http(s) URLs with a host.
pub fn parse_target(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidTarget {
        target: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn twilio_settings(channel: &'static str, t: &TwilioConfig) -> Result<TwilioSettings, ConfigError> {
    Ok(TwilioSettings {
        account_sid: required(&t.account_sid, channel, "account_sid")?,
        auth_token: required(&t.auth_token, channel, "auth_token")?,
        from_number: required(&t.from_number, channel, "from_number")?,
        api_base: t.api_base.clone().unwrap_or_else(|| TWILIO_API_BASE.to_string()),
    })
}

fn required(
    value: &Option<String>,
    channel: &'static str,
    field: &'static str,
) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::MissingField { channel, field })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_delivery_timeout() -> u64 {
    DEFAULT_DELIVERY_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("pollwatch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn sms_config() -> Config {
        Config {
            channel: Some(ChannelConfig::Sms(TwilioConfig {
                account_sid: Some("AC1".into()),
                auth_token: Some("tok".into()),
                from_number: Some("+1000".into()),
                ..Default::default()
            })),
            watches: vec![WatchConfig {
                target: "https://pe.app/alice".into(),
                recipients: vec!["+1555".into()],
            }],
            ..Default::default()
        }
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn global_config_default_values() {
        let g = GlobalConfig::default();
        assert_eq!(g.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(g.delivery_timeout_secs, DEFAULT_DELIVERY_TIMEOUT_SECS);
        assert!(g.notify_on_down);
        assert_eq!(g.profile, Profile::Full);
        assert_eq!(g.poll_interval(), Duration::from_secs(30));
    }

    #[test]
    fn http_and_server_defaults() {
        let h = HttpConfig::default();
        assert!(h.user_agent.starts_with("pollwatch/"));
        assert_eq!(h.timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);
        assert_eq!(ServerConfig::default().bind, DEFAULT_BIND);
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config.global.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert!(config.channel.is_none());
        assert!(config.watches.is_empty());
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[global]
poll_interval_secs = 5
profile = "standard"
notify_on_down = false

[channel]
kind = "voice"
account_sid = "AC1"
auth_token = "tok"
from_number = "+1000"
twiml_url = "https://example.ngrok.app/twiml"

[[watches]]
target = "https://pe.app/alice"
recipients = ["+1555", "+1666"]
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.global.poll_interval_secs, 5);
        assert_eq!(config.global.profile, Profile::Standard);
        assert!(!config.global.notify_on_down);
        assert!(matches!(config.channel, Some(ChannelConfig::Voice(_))));
        assert_eq!(config.watches[0].recipients.len(), 2);
        assert!(matches!(
            config.validate(true).unwrap(),
            ChannelSettings::Voice { .. }
        ));
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[global]\npoll_interval_secs = 60\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.global.poll_interval_secs, 60);
        assert_eq!(config.global.delivery_timeout_secs, DEFAULT_DELIVERY_TIMEOUT_SECS);
        assert_eq!(config.http.max_redirects, DEFAULT_MAX_REDIRECTS);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn unknown_channel_kind_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[channel]\nkind = \"pager\"\n").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    // ── validate ──────────────────────────────────────────────────────────────

    #[test]
    fn validate_resolves_sms_settings() {
        let settings = sms_config().validate(true).unwrap();
        assert_eq!(
            settings,
            ChannelSettings::Sms(TwilioSettings {
                account_sid: "AC1".into(),
                auth_token: "tok".into(),
                from_number: "+1000".into(),
                api_base: TWILIO_API_BASE.into(),
            })
        );
    }

    #[test]
    fn validate_reports_missing_credential_by_name() {
        let mut config = sms_config();
        if let Some(ChannelConfig::Sms(t)) = &mut config.channel {
            t.auth_token = Some("   ".into());
        }
        assert_eq!(
            config.validate(true),
            Err(ConfigError::MissingField {
                channel: "sms",
                field: "auth_token"
            })
        );
    }

    #[test]
    fn validate_voice_requires_twiml_url() {
        let mut config = sms_config();
        if let Some(ChannelConfig::Sms(t)) = config.channel.take() {
            config.channel = Some(ChannelConfig::Voice(t));
        }
        assert_eq!(
            config.validate(true),
            Err(ConfigError::MissingField {
                channel: "voice",
                field: "twiml_url"
            })
        );
    }

    #[test]
    fn validate_requires_channel() {
        let mut config = sms_config();
        config.channel = None;
        assert_eq!(config.validate(true), Err(ConfigError::MissingChannel));
    }

    #[test]
    fn validate_requires_watches_only_when_asked() {
        let mut config = sms_config();
        config.watches.clear();
        assert_eq!(config.validate(true), Err(ConfigError::NoWatches));
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn validate_rejects_bad_targets_and_empty_recipients() {
        let mut config = sms_config();
        config.watches[0].target = "ftp://pe.app/alice".into();
        assert!(matches!(config.validate(true), Err(ConfigError::InvalidTarget { .. })));

        let mut config = sms_config();
        config.watches[0].recipients = vec![" ".into()];
        assert!(matches!(config.validate(true), Err(ConfigError::NoRecipients(_))));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = sms_config();
        config.global.poll_interval_secs = 0;
        assert_eq!(config.validate(true), Err(ConfigError::InvalidInterval));
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = sms_config();
        config.global.delivery_timeout_secs = 0;
        assert_eq!(
            config.validate(false),
            Err(ConfigError::InvalidTimeout("delivery_timeout_secs"))
        );

        let mut config = sms_config();
        config.http.timeout_secs = 0;
        assert_eq!(config.validate(false), Err(ConfigError::InvalidTimeout("timeout_secs")));
    }

    #[test]
    fn parse_target_accepts_http_urls_only() {
        assert!(parse_target("https://pe.app/alice").is_ok());
        assert!(parse_target("http://localhost:8080/room").is_ok());
        assert!(parse_target("pe.app/alice").is_err());
        assert!(parse_target("mailto:someone@example.com").is_err());
    }

    // ── apply_env ─────────────────────────────────────────────────────────────

    #[test]
    fn env_builds_telegram_watch_from_scratch() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("POLL_URL", "https://pe.app/alice"),
            ("TELEGRAM_BOT_TOKEN", "123:ABC"),
            ("TELEGRAM_CHAT_ID", "42"),
            ("INTERVAL_SEC", "15"),
        ]));

        assert_eq!(config.global.poll_interval_secs, 15);
        assert_eq!(
            config.watches,
            vec![WatchConfig {
                target: "https://pe.app/alice".into(),
                recipients: vec!["42".into()],
            }]
        );
        assert!(matches!(
            config.validate(true).unwrap(),
            ChannelSettings::Telegram(TelegramSettings { ref bot_token, .. }) if bot_token == "123:ABC"
        ));
    }

    #[test]
    fn env_twiml_url_selects_voice_and_splits_numbers() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("POLL_URL", "https://pe.app/alice"),
            ("TWILIO_ACCOUNT_SID", "AC1"),
            ("TWILIO_AUTH_TOKEN", "tok"),
            ("TWILIO_FROM_NUMBER", "+1000"),
            ("TWILIO_TO_NUMBER", "+1555, +1666,"),
            ("TWILIO_TWIML_URL", "https://example.ngrok.app/twiml"),
        ]));
        assert!(matches!(config.channel, Some(ChannelConfig::Voice(_))));
        assert_eq!(config.watches[0].recipients, vec!["+1555", "+1666"]);
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn file_values_win_over_env() {
        let mut config = sms_config();
        config.apply_env(env(&[
            ("TWILIO_ACCOUNT_SID", "ACenv"),
            ("POLL_URL", "https://pe.app/alice"),
        ]));
        if let Some(ChannelConfig::Sms(t)) = &config.channel {
            assert_eq!(t.account_sid.as_deref(), Some("AC1"));
        }
        assert_eq!(config.watches.len(), 1);
    }

    #[test]
    fn env_without_channel_leaves_config_alone() {
        let mut config = Config::default();
        config.apply_env(env(&[("POLL_URL", "https://pe.app/alice")]));
        assert!(config.channel.is_none());
        assert!(config.watches.is_empty());
    }
}
