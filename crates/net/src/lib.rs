//! Wi-Fi Station Controller, AP Controller, and the Fallback Supervisor
//! state machine that drives them.

mod ap;
mod capability;
mod fallback;
mod station;

pub use ap::ApController;
pub use capability::{ApBackend, FakeApBackend, FakeWifiBackend, ShellApBackend, ShellWifiBackend, WifiBackend};
pub use fallback::{Event, FallbackSupervisor};
pub use station::StationController;

pub use types::{
    ApClient, ApConfig, FallbackConfig, FallbackState, FallbackStats, NetworkStatus, RoamingConfig,
    ScanResult, Security, SignalQuality, WifiStats,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid SSID: {0}")]
    InvalidSsid(String),
    #[error("password does not meet the security floor: {0}")]
    WeakPassword(String),
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("wifi connection failed: {0}")]
    WifiConnectionFailed(String),
    #[error("wifi authentication failed")]
    WifiAuthFailed,
    #[error("wifi scan failed: {0}")]
    WifiScanFailed(String),
    #[error("operation timed out")]
    Timeout,

    #[error("supervisor is not running")]
    NotRunning,
    #[error("supervisor is already running")]
    AlreadyRunning,
    #[error("wifi manager failed: {0}")]
    WifiManagerFailed(String),
    #[error("ap manager failed: {0}")]
    ApManagerFailed(String),
}

pub type Result<T> = std::result::Result<T, NetError>;

/// Validate an `ApConfig` per §3.2: SSID 1-32 chars of `[A-Za-z0-9_-]`,
/// password 8-64 chars (for WPA2/WPA3, at least 3 of {upper, lower, digit,
/// special}), channel in `[1, 13]`, max_clients in `[1, 50]`.
pub fn validate_ap_config(cfg: &ApConfig) -> Result<()> {
    if cfg.ssid.is_empty() || cfg.ssid.len() > 32 {
        return Err(NetError::InvalidSsid(format!("length {} not in [1, 32]", cfg.ssid.len())));
    }
    if !cfg.ssid.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(NetError::InvalidSsid("must be [A-Za-z0-9_-]".to_string()));
    }
    if !(8..=64).contains(&cfg.password.len()) {
        return Err(NetError::WeakPassword(format!("length {} not in [8, 64]", cfg.password.len())));
    }
    if matches!(cfg.security, Security::Wpa2 | Security::Wpa3) {
        let classes = [
            cfg.password.chars().any(|c| c.is_ascii_uppercase()),
            cfg.password.chars().any(|c| c.is_ascii_lowercase()),
            cfg.password.chars().any(|c| c.is_ascii_digit()),
            cfg.password.chars().any(|c| !c.is_ascii_alphanumeric()),
        ];
        if classes.iter().filter(|present| **present).count() < 3 {
            return Err(NetError::WeakPassword(
                "WPA2/WPA3 passwords need at least 3 of {upper, lower, digit, special}".to_string(),
            ));
        }
    }
    if !(1..=13).contains(&cfg.channel) {
        return Err(NetError::InvalidParameter(format!("channel {} not in [1, 13]", cfg.channel)));
    }
    if !(1..=50).contains(&cfg.max_clients) {
        return Err(NetError::InvalidParameter(format!("max_clients {} not in [1, 50]", cfg.max_clients)));
    }
    cfg.ip_address
        .parse::<std::net::Ipv4Addr>()
        .map_err(|_| NetError::InvalidParameter(format!("invalid ip_address {}", cfg.ip_address)))?;
    cfg.netmask
        .parse::<std::net::Ipv4Addr>()
        .map_err(|_| NetError::InvalidParameter(format!("invalid netmask {}", cfg.netmask)))?;
    Ok(())
}

/// Validate a `RoamingConfig` per §3.2: threshold in `[-100, -30]`.
pub fn validate_roaming_config(cfg: &RoamingConfig) -> Result<()> {
    if !cfg.threshold_in_range() {
        return Err(NetError::InvalidThreshold(format!(
            "signal_threshold_dbm {} not in [-100, -30]",
            cfg.signal_threshold_dbm
        )));
    }
    Ok(())
}

/// Validate a `FallbackConfig` per §3.2's ranges.
pub fn validate_fallback_config(cfg: &FallbackConfig) -> Result<()> {
    if !(1_000..=300_000).contains(&cfg.connection_timeout_ms) {
        return Err(NetError::InvalidTimeout("connection_timeout_ms not in [1000, 300000]".to_string()));
    }
    if !(1_000..=60_000).contains(&cfg.retry_interval_ms) {
        return Err(NetError::InvalidTimeout("retry_interval_ms not in [1000, 60000]".to_string()));
    }
    if !(1..=10).contains(&cfg.max_retry_attempts) {
        return Err(NetError::InvalidParameter("max_retry_attempts not in [1, 10]".to_string()));
    }
    if !(5_000..=60_000).contains(&cfg.ap_startup_timeout_ms) {
        return Err(NetError::InvalidTimeout("ap_startup_timeout_ms not in [5000, 60000]".to_string()));
    }
    if !(5_000..=300_000).contains(&cfg.recovery_check_interval_ms) {
        return Err(NetError::InvalidTimeout(
            "recovery_check_interval_ms not in [5000, 300000]".to_string(),
        ));
    }
    if !(-100..=-30).contains(&cfg.signal_strength_threshold_dbm) {
        return Err(NetError::InvalidThreshold(
            "signal_strength_threshold_dbm not in [-100, -30]".to_string(),
        ));
    }
    Ok(())
}

/// dBm derived from a Wi-Fi signal percent, per §6.3: `-100 + percent`.
pub fn percent_to_dbm(percent: u8) -> i32 {
    -100 + percent as i32
}
