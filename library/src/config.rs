//! Configuration for libclock contexts

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable prefix used by [`ClockConfig::from_env`].
pub const ENV_PREFIX: &str = "CLOCK_";

/// Configuration for a clock context
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClockConfig {
    /// Maximum number of alarms pending at once
    #[serde(default = "default_max_pending_alarms")]
    pub max_pending_alarms: usize,

    /// Maximum alarm message size in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Longest accepted alarm delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Name given to the dispatcher worker thread
    #[serde(default = "default_dispatcher_thread_name")]
    pub dispatcher_thread_name: String,
}

impl ClockConfig {
    /// Load configuration from `CLOCK_*` environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env()
    }

    /// [`ClockConfig::from_env`], falling back to defaults with a warning
    /// when a `CLOCK_*` value does not parse.
    pub fn from_env_or_default() -> Self {
        Self::from_env().unwrap_or_else(|e| {
            warn!("Invalid {}* configuration, using defaults: {}", ENV_PREFIX, e);
            Self::default()
        })
    }

    /// Load configuration from a properties map (embedders that carry their
    /// own settings store). Unknown or unparsable values fall back to defaults.
    pub fn from_properties(
        props: &std::collections::HashMap<String, String>,
    ) -> Result<Self, String> {
        let max_pending_alarms = props
            .get("max_pending_alarms")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_max_pending_alarms);

        let max_message_bytes = props
            .get("max_message_bytes")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_max_message_bytes);

        let max_delay_ms = props
            .get("max_delay_ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_max_delay_ms);

        let dispatcher_thread_name = props
            .get("dispatcher_thread_name")
            .cloned()
            .unwrap_or_else(default_dispatcher_thread_name);

        let config = Self {
            max_pending_alarms,
            max_message_bytes,
            max_delay_ms,
            dispatcher_thread_name,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_pending_alarms == 0 {
            return Err("max_pending_alarms must be greater than zero".to_string());
        }
        if self.max_message_bytes > u32::MAX as usize {
            return Err("max_message_bytes must fit the u32 length prefix".to_string());
        }
        if self.max_delay_ms > i64::MAX as u64 {
            return Err("max_delay_ms must fit in a signed 64-bit delay".to_string());
        }
        if self.dispatcher_thread_name.trim().is_empty() {
            return Err("dispatcher_thread_name must not be empty".to_string());
        }
        if self.dispatcher_thread_name.contains('\0') {
            return Err("dispatcher_thread_name must not contain NUL".to_string());
        }
        Ok(())
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_pending_alarms: 50_000,
            max_message_bytes: 64 * 1024,
            max_delay_ms: 30 * 24 * 60 * 60 * 1000, // 30 days
            dispatcher_thread_name: "clock-dispatcher".to_string(),
        }
    }
}

fn default_max_pending_alarms() -> usize {
    50_000
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_max_delay_ms() -> u64 {
    30 * 24 * 60 * 60 * 1000
}

fn default_dispatcher_thread_name() -> String {
    "clock-dispatcher".to_string()
}
