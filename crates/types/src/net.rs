//! Data model for the network resilience core.

use serde::{Deserialize, Serialize};

/// Observed state of the station-mode (client) link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub connected: bool,
    pub current_ssid: Option<String>,
    pub signal_strength_dbm: i32,
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
    pub dns: Option<String>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub latency_ms: u32,
    pub roaming_active: bool,
}

/// Qualitative signal bucket, mapped from dBm bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalQuality {
    None,
    Weak,
    Fair,
    Good,
    Excellent,
}

impl SignalQuality {
    /// `<= -85` None, `<= -70` Weak, `<= -50` Fair, `<= -30` Good, else Excellent.
    pub fn from_dbm(dbm: i32) -> Self {
        if dbm <= -85 {
            SignalQuality::None
        } else if dbm <= -70 {
            SignalQuality::Weak
        } else if dbm <= -50 {
            SignalQuality::Fair
        } else if dbm <= -30 {
            SignalQuality::Good
        } else {
            SignalQuality::Excellent
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    Open,
    Wep,
    Wpa,
    Wpa2,
    Wpa3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    Band2_4Ghz,
    Band5Ghz,
}

/// One entry from a Wi-Fi scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub ssid: String,
    pub bssid: String,
    pub signal_dbm: i32,
    pub quality: SignalQuality,
    pub frequency_mhz: u32,
    pub channel: u8,
    pub security: Security,
    pub band: Band,
    pub hidden: bool,
    pub connected: bool,
}

/// Roaming trigger configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoamingConfig {
    pub enabled: bool,
    pub signal_threshold_dbm: i32,
    pub scan_interval_ms: u32,
    pub handover_timeout_ms: u32,
    pub aggressive: bool,
}

impl Default for RoamingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            signal_threshold_dbm: -75,
            scan_interval_ms: 10_000,
            handover_timeout_ms: 5_000,
            aggressive: false,
        }
    }
}

impl RoamingConfig {
    pub fn threshold_in_range(&self) -> bool {
        (-100..=-30).contains(&self.signal_threshold_dbm)
    }
}

/// Hosted access point configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApConfig {
    pub ssid: String,
    pub password: String,
    pub security: Security,
    pub ip_address: String,
    pub netmask: String,
    pub channel: u8,
    pub max_clients: u8,
    pub auto_fallback: bool,
    pub fallback_timeout_ms: u32,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            ssid: "OHT50-Fallback".to_string(),
            password: "oht50-setup".to_string(),
            security: Security::Wpa2,
            ip_address: "192.168.4.1".to_string(),
            netmask: "255.255.255.0".to_string(),
            channel: 6,
            max_clients: 8,
            auto_fallback: true,
            fallback_timeout_ms: 30_000,
        }
    }
}

/// A station associated to the hosted AP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApClient {
    pub mac: String,
    pub ip: String,
    pub hostname: Option<String>,
    pub signal_dbm: i32,
    pub connected_time_s: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub authenticated: bool,
}

/// Fallback supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FallbackState {
    #[default]
    Disabled,
    Monitoring,
    Triggered,
    Recovering,
    Error,
}

/// Fallback supervisor timing and threshold configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub auto_fallback: bool,
    pub connection_timeout_ms: u32,
    pub retry_interval_ms: u32,
    pub max_retry_attempts: u8,
    pub ap_startup_timeout_ms: u32,
    pub recovery_check_interval_ms: u32,
    pub signal_strength_threshold_dbm: i32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            auto_fallback: true,
            connection_timeout_ms: 30_000,
            retry_interval_ms: 5_000,
            max_retry_attempts: 3,
            ap_startup_timeout_ms: 15_000,
            recovery_check_interval_ms: 60_000,
            signal_strength_threshold_dbm: -75,
        }
    }
}

/// Accumulated station-controller counters (§4.F statistics).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WifiStats {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub roaming_events: u32,
    pub disconnects: u32,
    pub success_rate: f32,
    pub uptime_s: u64,
    pub average_dbm: f32,
}

/// Accumulated fallback-supervisor counters (§4.H counters).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FallbackStats {
    pub total_triggers: u32,
    pub recovery_attempts: u32,
    pub successful_recoveries: u32,
    pub failed_recoveries: u32,
    pub ap_uptime_s: u64,
    pub wifi_uptime_s: u64,
}

impl FallbackStats {
    /// `successful_recoveries / total_triggers`, guarding the zero-trigger case.
    pub fn fallback_success_rate(&self) -> f32 {
        if self.total_triggers == 0 {
            0.0
        } else {
            self.successful_recoveries as f32 / self.total_triggers as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_quality_bands() {
        assert_eq!(SignalQuality::from_dbm(-90), SignalQuality::None);
        assert_eq!(SignalQuality::from_dbm(-85), SignalQuality::None);
        assert_eq!(SignalQuality::from_dbm(-80), SignalQuality::Weak);
        assert_eq!(SignalQuality::from_dbm(-60), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_dbm(-40), SignalQuality::Good);
        assert_eq!(SignalQuality::from_dbm(-10), SignalQuality::Excellent);
    }

    #[test]
    fn roaming_threshold_range() {
        let mut cfg = RoamingConfig { signal_threshold_dbm: -30, ..Default::default() };
        assert!(cfg.threshold_in_range());
        cfg.signal_threshold_dbm = -100;
        assert!(cfg.threshold_in_range());
        cfg.signal_threshold_dbm = -29;
        assert!(!cfg.threshold_in_range());
        cfg.signal_threshold_dbm = -101;
        assert!(!cfg.threshold_in_range());
    }

    #[test]
    fn fallback_success_rate_guards_zero() {
        let stats = FallbackStats::default();
        assert_eq!(stats.fallback_success_rate(), 0.0);
        let stats = FallbackStats { total_triggers: 2, successful_recoveries: 1, ..Default::default() };
        assert_eq!(stats.fallback_success_rate(), 0.5);
    }
}
