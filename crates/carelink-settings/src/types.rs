use std::path::PathBuf;
use std::time::Duration;

use carelink_core::security::ApiKey;
use carelink_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CarelinkSettings {
    pub server: ServerSettings,
    pub assistant: AssistantSettings,
    pub logging: LoggingSettings,
}

/// Network, connection liveness and storage settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound mailbox size per connection; a full mailbox drops the client.
    pub mailbox_capacity: usize,
    /// Upper bound on a single transport write.
    pub write_timeout_ms: u64,
    /// Read deadline window, extended on every pong.
    pub pong_wait_ms: u64,
    /// Probe interval. Must be shorter than `pong_wait_ms`.
    pub ping_interval_ms: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    pub database_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let pong_wait_ms = 60_000;
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            mailbox_capacity: 256,
            write_timeout_ms: 10_000,
            pong_wait_ms,
            ping_interval_ms: pong_wait_ms * 9 / 10,
            max_message_size: 512,
            database_path: default_database_path(),
        }
    }
}

impl ServerSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_database_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".carelink")
        .join("carelink.db")
        .to_string_lossy()
        .into_owned()
}

/// Which OpenAI-compatible backend serves completions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-3.5-turbo",
            Self::DeepSeek => "deepseek-chat",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
        }
    }

    /// Environment variable holding this provider's key.
    pub fn key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Suggestion pipeline and provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantSettings {
    pub provider: ProviderKind,
    /// Model name; the provider default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Deadline for a suggestion completion.
    pub timeout_ms: u64,
    /// Deadline for the reading extraction completion.
    pub extraction_timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    /// Number of prior chat turns given to the provider.
    pub history_window: usize,
    /// Max clinical and follow-up records each.
    pub record_limit: usize,
    pub extract_readings: bool,
    pub max_retries: u32,
    #[serde(skip)]
    pub openai_api_key: Option<ApiKey>,
    #[serde(skip)]
    pub deepseek_api_key: Option<ApiKey>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: None,
            base_url: None,
            timeout_ms: 30_000,
            extraction_timeout_ms: 15_000,
            temperature: 0.7,
            max_tokens: 2000,
            top_p: 1.0,
            history_window: 5,
            record_limit: 5,
            extract_readings: true,
            max_retries: 1,
            openai_api_key: None,
            deepseek_api_key: None,
        }
    }
}

impl AssistantSettings {
    pub fn resolved_model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn resolved_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    /// Key for the active provider.
    pub fn api_key(&self) -> Option<&ApiKey> {
        match self.provider {
            ProviderKind::OpenAi => self.openai_api_key.as_ref(),
            ProviderKind::DeepSeek => self.deepseek_api_key.as_ref(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl CarelinkSettings {
    /// Check cross-field constraints: probe interval and write timeout both
    /// shorter than the pong window, and a key for the active provider.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.ping_interval_ms >= server.pong_wait_ms {
            return Err(SettingsError::InvalidValue(format!(
                "pingIntervalMs ({}) must be less than pongWaitMs ({})",
                server.ping_interval_ms, server.pong_wait_ms
            )));
        }
        if server.write_timeout_ms >= server.pong_wait_ms {
            return Err(SettingsError::InvalidValue(format!(
                "writeTimeoutMs ({}) must be less than pongWaitMs ({})",
                server.write_timeout_ms, server.pong_wait_ms
            )));
        }
        if server.ping_interval_ms == 0 || server.write_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "liveness intervals must be non-zero".into(),
            ));
        }
        if server.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "mailboxCapacity must be at least 1".into(),
            ));
        }
        if server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "maxMessageSize must be at least 1".into(),
            ));
        }

        let assistant = &self.assistant;
        for (name, value) in [
            ("timeoutMs", assistant.timeout_ms),
            ("extractionTimeoutMs", assistant.extraction_timeout_ms),
        ] {
            if !(1_000..=120_000).contains(&value) {
                return Err(SettingsError::InvalidValue(format!(
                    "{name} ({value}) must be between 1000 and 120000"
                )));
            }
        }
        if assistant.history_window == 0 {
            return Err(SettingsError::InvalidValue(
                "historyWindow must be at least 1".into(),
            ));
        }
        if assistant.api_key().is_none() {
            return Err(SettingsError::InvalidValue(format!(
                "{} is required when provider is {}",
                assistant.provider.key_env(),
                assistant.provider
            )));
        }
        Ok(())
    }
}
