use crate::sessions::SessionStore;
use anyhow::{Context, Result};
use everything_core::SubscriptionRegistry;
use everything_mcp::{NotificationConfig, RequestHandler, SamplingConfig, SessionHost};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub sampling: SamplingSettings,

    #[serde(default)]
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_subscription_interval")]
    pub subscription_interval_secs: u64,

    #[serde(default = "default_logging_interval")]
    pub logging_interval_secs: u64,
}

fn default_subscription_interval() -> u64 {
    5
}

fn default_logging_interval() -> u64 {
    15
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            subscription_interval_secs: default_subscription_interval(),
            logging_interval_secs: default_logging_interval(),
        }
    }
}

impl NotificationSettings {
    pub fn to_config(&self) -> NotificationConfig {
        NotificationConfig {
            subscription_interval: Duration::from_secs(self.subscription_interval_secs.max(1)),
            logging_interval: Duration::from_secs(self.logging_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sampling_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_true() -> bool {
    true
}

fn default_sampling_timeout() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    100
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            timeout_secs: default_sampling_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl SamplingSettings {
    pub fn to_config(&self) -> SamplingConfig {
        SamplingConfig {
            enabled: self.enabled,
            timeout: Duration::from_secs(self.timeout_secs),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Route serving the MCP endpoint
    #[serde(default = "default_path")]
    pub path: String,

    /// Serve without sessions: no `Mcp-Session-Id`, no SSE stream
    #[serde(default)]
    pub stateless: bool,

    /// Accept browser requests whose `Origin` is not a loopback host
    #[serde(default)]
    pub allow_remote_origins: bool,

    /// Messages buffered per session while no SSE stream is attached
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Close sessions with no SSE stream and no requests for this long; 0 keeps them forever
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_path() -> String {
    "/mcp".to_string()
}

fn default_channel_capacity() -> usize {
    64
}

fn default_idle_timeout() -> u64 {
    2 * 60 * 60
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            path: default_path(),
            stateless: false,
            allow_remote_origins: false,
            channel_capacity: default_channel_capacity(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl TransportSettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        let config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!(
                path = %config_path.display(),
                "Configuration file not found, using defaults"
            );
            Self::default()
        };

        if !config.transport.path.starts_with('/') {
            anyhow::bail!(
                "transport.path must start with '/', got {:?}",
                config.transport.path
            );
        }

        Ok(config)
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub host: SessionHost,
    pub handler: RequestHandler,
    pub sessions: SessionStore,
    pub transport: TransportSettings,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());

        Self {
            host: SessionHost::new(registry.clone(), config.notifications.to_config()),
            handler: RequestHandler::new(registry, config.sampling.to_config()),
            sessions: SessionStore::new(),
            transport: config.transport.clone(),
            shutdown: CancellationToken::new(),
            started_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [notifications]
            subscription_interval_secs = 2

            [transport]
            stateless = true
            "#,
        )
        .unwrap();

        assert_eq!(config.notifications.subscription_interval_secs, 2);
        assert_eq!(config.notifications.logging_interval_secs, 15);
        assert!(config.sampling.enabled);
        assert_eq!(config.sampling.max_tokens, 100);
        assert!(config.transport.stateless);
        assert_eq!(config.transport.path, "/mcp");
        assert_eq!(config.transport.channel_capacity, 64);
        assert_eq!(config.transport.idle_timeout(), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_idle_timeout_can_be_disabled() {
        let config: ServerConfig = toml::from_str("[transport]\nidle_timeout_secs = 0\n").unwrap();
        assert_eq!(config.transport.idle_timeout(), None);
    }

    #[test]
    fn test_settings_convert_to_runtime_config() {
        let settings = NotificationSettings {
            subscription_interval_secs: 0,
            logging_interval_secs: 15,
        };
        let config = settings.to_config();
        assert_eq!(config.subscription_interval, Duration::from_secs(1));
        assert_eq!(config.logging_interval, Duration::from_secs(15));

        let sampling = SamplingSettings::default().to_config();
        assert_eq!(sampling.timeout, Duration::from_secs(30));
        assert!((sampling.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::load(Path::new("/nonexistent/everything.toml")).unwrap();
        assert!(!config.transport.stateless);
        assert_eq!(config.sampling.timeout_secs, 30);
    }
}
