//! Relay configuration, loaded once from the environment and passed
//! explicitly to whoever needs it. No ambient globals.

use std::env;

/// Config for the relay's outbound transports and dispatch pool.
///
/// Credential absence is not a startup failure; it becomes an error on
/// the first send that needs the missing credential, so a relay with only
/// queue routes runs fine without modem credentials.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Mobile-terminated message endpoint of the satellite gateway
    pub modem_gateway_url: String,
    pub modem_username: Option<String>,
    pub modem_password: Option<String>,
    /// Message endpoint of the legacy messenger gateway; the device
    /// serial is appended per request
    pub legacy_gateway_url: String,
    pub legacy_username: Option<String>,
    pub legacy_password: Option<String>,
    /// Dispatcher worker pool size
    pub dispatch_workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            modem_gateway_url: "https://core.rock7.com/rockblock/MT".to_string(),
            modem_username: None,
            modem_password: None,
            legacy_gateway_url: "https://core.rock7.com/API2/SendMessage".to_string(),
            legacy_username: None,
            legacy_password: None,
            dispatch_workers: 4,
        }
    }
}

impl RelayConfig {
    /// Load config from `SKUA_*` environment variables, with defaults for
    /// everything but credentials.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            modem_gateway_url: env::var("SKUA_MODEM_GATEWAY_URL")
                .unwrap_or(defaults.modem_gateway_url),
            modem_username: env::var("SKUA_MODEM_USERNAME").ok(),
            modem_password: env::var("SKUA_MODEM_PASSWORD").ok(),
            legacy_gateway_url: env::var("SKUA_LEGACY_GATEWAY_URL")
                .unwrap_or(defaults.legacy_gateway_url),
            legacy_username: env::var("SKUA_LEGACY_USERNAME").ok(),
            legacy_password: env::var("SKUA_LEGACY_PASSWORD").ok(),
            dispatch_workers: env::var("SKUA_DISPATCH_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dispatch_workers),
        }
    }
}
