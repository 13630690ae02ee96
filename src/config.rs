//! Agent configuration parameters
//!
//! Build-time constants (API key, owner, firmware identity, fallback WiFi
//! credentials) are baked in through `DEVLINK_*` environment variables at
//! compile time. Everything else is a tunable with a sane default.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Default registration endpoint port.
pub const DEFAULT_API_PORT: u16 = 7442;
/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;
/// API keys and owner ids longer than this are rejected.
pub const MAX_KEY_LEN: usize = 64;

const fn or_default(value: Option<&'static str>, default: &'static str) -> &'static str {
    match value {
        Some(v) => v,
        None => default,
    }
}

fn flag(value: Option<&'static str>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v, "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn port(value: Option<&'static str>, default: u16) -> u16 {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    // --- Identity defaults (used when no record is persisted) ---
    pub api_key: String,
    pub owner: String,
    pub udid: String,
    pub alias: String,

    // --- Endpoints ---
    /// Registration service host
    pub cloud_host: String,
    /// MQTT broker host
    pub mqtt_host: String,
    pub api_port: u16,
    pub mqtt_port: u16,

    // --- Update policy ---
    /// Apply firmware updates without asking
    pub auto_update: bool,
    /// Apply firmware updates even when auto-update is off
    pub forced_update: bool,

    // --- Firmware identity ---
    /// Long firmware description, e.g. `devlink-esp32-0.3.0:2024-05-01`
    pub firmware_version: String,
    /// Short version, e.g. `0.3.0`
    pub firmware_version_short: String,
    pub commit_id: String,
    pub platform: String,
    pub user_agent: String,

    // --- WiFi ---
    /// Station credentials compiled into the image
    pub env_ssid: String,
    pub env_pass: String,
    /// Accept credential migration from configuration pushes
    pub wifi_migration: bool,
    /// Connect steps before falling back to access-point mode
    pub wifi_retry_limit: u32,
    pub ap_ssid: String,
    pub ap_password: String,

    // --- Discovery ---
    pub discovery_service: String,
    pub discovery_proto: String,

    // --- Timing ---
    /// Checkin response deadline (milliseconds)
    pub checkin_timeout_ms: u32,
    /// WiFi migration connect deadline (milliseconds)
    pub migration_timeout_ms: u32,
    /// MQTT keepalive (seconds)
    pub mqtt_keepalive_secs: u16,
    /// Minimum spacing between MQTT reconnect attempts (milliseconds)
    pub mqtt_reconnect_interval_ms: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let cloud_host = or_default(option_env!("DEVLINK_CLOUD_HOST"), "thinx.cloud");
        Self {
            api_key: or_default(option_env!("DEVLINK_API_KEY"), "").into(),
            owner: or_default(option_env!("DEVLINK_OWNER"), "").into(),
            udid: or_default(option_env!("DEVLINK_UDID"), "").into(),
            alias: or_default(option_env!("DEVLINK_ALIAS"), "").into(),

            cloud_host: cloud_host.into(),
            mqtt_host: or_default(option_env!("DEVLINK_MQTT_HOST"), cloud_host).into(),
            api_port: port(option_env!("DEVLINK_API_PORT"), DEFAULT_API_PORT),
            mqtt_port: port(option_env!("DEVLINK_MQTT_PORT"), DEFAULT_MQTT_PORT),

            auto_update: flag(option_env!("DEVLINK_AUTO_UPDATE"), true),
            forced_update: flag(option_env!("DEVLINK_FORCED_UPDATE"), false),

            firmware_version: or_default(
                option_env!("DEVLINK_FIRMWARE_VERSION"),
                concat!("devlink-", env!("CARGO_PKG_VERSION")),
            )
            .into(),
            firmware_version_short: or_default(
                option_env!("DEVLINK_FIRMWARE_VERSION_SHORT"),
                env!("CARGO_PKG_VERSION"),
            )
            .into(),
            commit_id: or_default(option_env!("DEVLINK_COMMIT_ID"), "").into(),
            platform: or_default(option_env!("DEVLINK_PLATFORM"), "esp32").into(),
            user_agent: concat!("devlink-agent/", env!("CARGO_PKG_VERSION")).into(),

            env_ssid: or_default(option_env!("DEVLINK_ENV_SSID"), "").into(),
            env_pass: or_default(option_env!("DEVLINK_ENV_PASS"), "").into(),
            wifi_migration: flag(option_env!("DEVLINK_WIFI_MIGRATION"), false),
            wifi_retry_limit: 1000,
            ap_ssid: "DEVLINK-AP".into(),
            ap_password: "PASSWORD".into(),

            discovery_service: "thinx".into(),
            discovery_proto: "tcp".into(),

            checkin_timeout_ms: 30_000,
            migration_timeout_ms: 20_000,
            mqtt_keepalive_secs: 30,
            mqtt_reconnect_interval_ms: 5_000,
        }
    }
}

/// A configuration field failed range validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigError(pub &'static str);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: {}", self.0)
    }
}

impl AgentConfig {
    /// Range-check every field the agent depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cloud_host.is_empty() {
            return Err(ConfigError("cloud_host must not be empty"));
        }
        if self.api_port == 0 || self.mqtt_port == 0 {
            return Err(ConfigError("ports must be non-zero"));
        }
        if self.api_key.len() > MAX_KEY_LEN || self.owner.len() > MAX_KEY_LEN {
            return Err(ConfigError("api_key and owner must be at most 64 bytes"));
        }
        if self.wifi_retry_limit == 0 {
            return Err(ConfigError("wifi_retry_limit must be non-zero"));
        }
        if !(1_000..=120_000).contains(&self.checkin_timeout_ms) {
            return Err(ConfigError("checkin_timeout_ms must be 1000–120000"));
        }
        if !(1_000..=60_000).contains(&self.migration_timeout_ms) {
            return Err(ConfigError("migration_timeout_ms must be 1000–60000"));
        }
        if self.ap_password.len() > 64 || (!self.ap_password.is_empty() && self.ap_password.len() < 8)
        {
            return Err(ConfigError("ap_password must be empty or 8–64 bytes"));
        }
        Ok(())
    }
}
