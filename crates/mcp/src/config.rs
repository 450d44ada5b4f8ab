use std::time::Duration;

/// Periods of the per-session background notification loops
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// How often `notifications/resources/updated` is sent for each subscription
    pub subscription_interval: Duration,
    /// How often a `notifications/message` log entry is considered
    pub logging_interval: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            subscription_interval: Duration::from_secs(5),
            logging_interval: Duration::from_secs(15),
        }
    }
}

/// Sampling request issued to the client when a new subscription starts
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub enabled: bool,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(30),
            max_tokens: 100,
            temperature: 0.7,
        }
    }
}

impl SamplingConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}
