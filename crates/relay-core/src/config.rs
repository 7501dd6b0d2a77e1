//! Relay configuration.
//!
//! Loaded from a YAML file (`frigate-relay.yml` by default). Every tunable has
//! a default, so a minimal file only needs the Telegram chat and Frigate URL:
//!
//! ```yaml
//! telegram:
//!   chat_id: -1001234567890
//! frigate:
//!   url: http://frigate.local:5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Environment variable consulted when `telegram.bot_token` is not set.
pub const BOT_TOKEN_ENV: &str = "FRIGATE_RELAY_BOT_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub telegram: TelegramConfig,
    pub frigate: FrigateConfig,
    pub mqtt: MqttConfig,
    pub http: HttpConfig,
    pub relay: PipelineConfig,
    pub digest: DigestConfig,
}

/// Chat destination and ephemeral-message retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token. Falls back to `FRIGATE_RELAY_BOT_TOKEN`.
    pub bot_token: Option<String>,
    pub chat_id: i64,
    /// How long snapshot alerts stay in the chat before being deleted.
    pub retention_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: 0,
            retention_secs: 300,
        }
    }
}

/// Frigate media API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrigateConfig {
    pub url: String,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Wait before fetching a clip so Frigate can finish writing it.
    pub clip_delay_secs: u64,
    /// Clips at or below this size are treated as not ready.
    pub min_clip_bytes: usize,
}

impl Default for FrigateConfig {
    fn default() -> Self {
        Self {
            url: "http://frigate.local:5000".to_string(),
            timeout_secs: 60,
            clip_delay_secs: 5,
            min_clip_bytes: 1024,
        }
    }
}

/// MQTT broker carrying `frigate/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            topic: "frigate/events".to_string(),
            client_id: "frigate_events_worker".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
        }
    }
}

/// Outbound HTTP settings for the chat platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Proxy URL for Telegram traffic (`http://` or `https://`).
    pub proxy: Option<String>,
}

/// Pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// IANA zone used for caption timestamps. Unknown zones fall back to UTC.
    pub timezone: String,
    /// Object labels that trigger alerts and clips.
    pub labels: Vec<String>,
    /// Camera allow-list; empty means every camera.
    pub cameras: Vec<String>,
    pub queue_capacity: usize,
    /// Pause between clip deliveries.
    pub pacing_ms: u64,
    /// Length of the window opened by `/mute`.
    pub mute_secs: u64,
    /// Fixed backoff between broker and bot connection attempts.
    pub reconnect_secs: u64,
    /// How long shutdown waits for in-flight alerts.
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            labels: vec!["person".to_string()],
            cameras: Vec::new(),
            queue_capacity: 1000,
            pacing_ms: 100,
            mute_secs: 300,
            reconnect_secs: 5,
            shutdown_grace_secs: 10,
        }
    }
}

/// Hourly recording digest (`frigate-relay digest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Root of Frigate's recordings, laid out as `YYYY-MM/DD/HH/<camera>/`.
    pub recordings_dir: String,
    /// Cameras to digest. Empty falls back to `relay.cameras`.
    pub cameras: Vec<String>,
    /// ffmpeg executable, looked up on `PATH` unless absolute.
    pub ffmpeg: String,
    pub ffmpeg_timeout_secs: u64,
    /// Bot API upload ceiling. Larger digests are skipped.
    pub max_upload_bytes: u64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            recordings_dir: "/media/frigate/recordings".to_string(),
            cameras: Vec::new(),
            ffmpeg: "ffmpeg".to_string(),
            ffmpeg_timeout_secs: 600,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl RelayConfig {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RelayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without validating it.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check the values the relay cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.chat_id == 0 {
            return Err(RelayError::Config(
                "telegram.chat_id must be set to the destination chat".to_string(),
            ));
        }

        let base = url::Url::parse(&self.frigate.url).map_err(|e| {
            RelayError::Config(format!("frigate.url `{}` is invalid: {e}", self.frigate.url))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "frigate.url must use http or https, got `{}`",
                base.scheme()
            )));
        }

        if let Some(proxy) = &self.http.proxy {
            url::Url::parse(proxy)
                .map_err(|e| RelayError::Config(format!("http.proxy `{proxy}` is invalid: {e}")))?;
        }

        if self.mqtt.host.trim().is_empty() {
            return Err(RelayError::Config("mqtt.host must not be empty".to_string()));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(RelayError::Config("mqtt.topic must not be empty".to_string()));
        }
        if self.relay.queue_capacity == 0 {
            return Err(RelayError::Config(
                "relay.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.relay.labels.is_empty() {
            return Err(RelayError::Config(
                "relay.labels must name at least one object label".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the bot token from config or the `FRIGATE_RELAY_BOT_TOKEN` env var.
    pub fn bot_token(&self) -> Result<String> {
        self.resolve_bot_token(std::env::var(BOT_TOKEN_ENV).ok())
    }

    /// Config value first, then `env_token`. Blank values count as unset.
    fn resolve_bot_token(&self, env_token: Option<String>) -> Result<String> {
        self.telegram
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or(env_token)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                RelayError::Config(format!(
                    "telegram bot token not found: set {BOT_TOKEN_ENV} or telegram.bot_token"
                ))
            })
    }

    /// Cameras covered by the hourly digest.
    pub fn digest_cameras(&self) -> Vec<String> {
        if self.digest.cameras.is_empty() {
            self.relay.cameras.clone()
        } else {
            self.digest.cameras.clone()
        }
    }
}

impl DigestConfig {
    pub fn ffmpeg_timeout(&self) -> Duration {
        Duration::from_secs(self.ffmpeg_timeout_secs)
    }
}

impl TelegramConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl FrigateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn clip_delay(&self) -> Duration {
        Duration::from_secs(self.clip_delay_secs)
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl PipelineConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn mute_window(&self) -> Duration {
        Duration::from_secs(self.mute_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = "telegram:\n  chat_id: -100123\nfrigate:\n  url: http://frigate:5000\n";

    #[test]
    fn minimal_config_fills_defaults() {
        let config = RelayConfig::from_yaml(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.telegram.chat_id, -100_123);
        assert_eq!(config.telegram.retention_secs, 300);
        assert_eq!(config.frigate.clip_delay_secs, 5);
        assert_eq!(config.frigate.min_clip_bytes, 1024);
        assert_eq!(config.mqtt.topic, "frigate/events");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.relay.labels, vec!["person".to_string()]);
        assert_eq!(config.relay.queue_capacity, 1000);
        assert_eq!(config.relay.pacing(), Duration::from_millis(100));
        assert_eq!(config.relay.mute_window(), Duration::from_secs(300));
    }

    #[test]
    fn full_config_overrides_defaults() {
        let yaml = r#"
telegram:
  bot_token: "123:abc"
  chat_id: 42
  retention_secs: 120
frigate:
  url: https://nvr.example
  clip_delay_secs: 8
mqtt:
  host: mqtt
  port: 8883
  username: relay
  password: secret
http:
  proxy: http://127.0.0.1:3128
relay:
  timezone: Asia/Shanghai
  labels: [person, car]
  cameras: [front-door]
  queue_capacity: 10
"#;
        let config = RelayConfig::from_yaml(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bot_token().unwrap(), "123:abc");
        assert_eq!(config.telegram.retention(), Duration::from_secs(120));
        assert_eq!(config.frigate.clip_delay(), Duration::from_secs(8));
        assert_eq!(config.mqtt.host, "mqtt");
        assert_eq!(config.mqtt.username.as_deref(), Some("relay"));
        assert_eq!(config.http.proxy.as_deref(), Some("http://127.0.0.1:3128"));
        assert_eq!(config.relay.timezone, "Asia/Shanghai");
        assert_eq!(config.relay.cameras, vec!["front-door".to_string()]);
        assert_eq!(config.relay.queue_capacity, 10);
    }

    #[test]
    fn example_config_is_valid() {
        let example = include_str!("../../../frigate-relay.example.yml");
        let config = RelayConfig::from_yaml(example).unwrap();
        config.validate().unwrap();
        assert_eq!(config.telegram.chat_id, -1_001_234_567_890);
        assert_eq!(config.http.proxy, None);
        assert!(config.relay.cameras.is_empty());
    }

    #[test]
    fn missing_chat_id_is_rejected() {
        let config = RelayConfig::from_yaml("frigate:\n  url: http://frigate\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chat_id"));
    }

    #[test]
    fn invalid_frigate_url_is_rejected() {
        let yaml = "telegram:\n  chat_id: 1\nfrigate:\n  url: not a url\n";
        let config = RelayConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn non_http_frigate_url_is_rejected() {
        let yaml = "telegram:\n  chat_id: 1\nfrigate:\n  url: ftp://frigate\n";
        let config = RelayConfig::from_yaml(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let yaml = format!("{MINIMAL}relay:\n  queue_capacity: 0\n");
        let config = RelayConfig::from_yaml(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = RelayConfig::from_yaml("telegram: [unclosed").unwrap_err();
        assert!(matches!(err, RelayError::ConfigParse(_)));
    }

    #[test]
    fn load_reads_and_validates_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.frigate.url, "http://frigate:5000");
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = RelayConfig::load(Path::new("/nonexistent/frigate-relay.yml")).unwrap_err();
        assert!(matches!(err, RelayError::ConfigRead { .. }));
        assert!(err.to_string().contains("/nonexistent/frigate-relay.yml"));
    }

    #[test]
    fn blank_token_is_not_accepted_from_config() {
        let yaml = "telegram:\n  chat_id: 1\n  bot_token: \"  \"\n";
        let config = RelayConfig::from_yaml(yaml).unwrap();

        let err = config.resolve_bot_token(None).unwrap_err();
        assert!(err.to_string().contains(BOT_TOKEN_ENV));
        assert!(config.resolve_bot_token(Some(" ".to_string())).is_err());
    }

    #[test]
    fn env_token_fills_in_for_missing_config_token() {
        let config = RelayConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(
            config.resolve_bot_token(Some("456:def".to_string())).unwrap(),
            "456:def"
        );
    }

    #[test]
    fn config_token_wins_over_env() {
        let yaml = "telegram:\n  chat_id: 1\n  bot_token: \"123:abc\"\n";
        let config = RelayConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.resolve_bot_token(Some("456:def".to_string())).unwrap(),
            "123:abc"
        );
    }

    #[test]
    fn digest_cameras_fall_back_to_relay_cameras() {
        let yaml = format!("{MINIMAL}relay:\n  cameras: [porch]\n");
        let config = RelayConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.digest_cameras(), vec!["porch".to_string()]);
        assert_eq!(config.digest.ffmpeg, "ffmpeg");

        let yaml = format!("{MINIMAL}relay:\n  cameras: [porch]\ndigest:\n  cameras: [yard]\n");
        let config = RelayConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.digest_cameras(), vec!["yard".to_string()]);
    }
}
