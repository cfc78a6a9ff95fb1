//! §4.I: the persistent config store for `network.conf` and
//! `roaming.conf` — line-oriented `key=value` files, case-sensitive
//! keys, unknown keys ignored for forward compatibility.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum NetconfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config line {line_no}: {line:?}")]
    ConfigParse { line_no: usize, line: String },
    #[error("validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, NetconfigError>;

/// A network station configuration as persisted in `network.conf`.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkFileConfig {
    pub wifi_enabled: bool,
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub wifi_security_type: u8,
    pub signal_strength: i32,
    pub roaming_enabled: bool,
    pub mobile_app_enabled: bool,
    pub last_update_time: u32,
}

impl Default for NetworkFileConfig {
    fn default() -> Self {
        Self {
            wifi_enabled: false,
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            wifi_security_type: 3,
            signal_strength: -100,
            roaming_enabled: false,
            mobile_app_enabled: false,
            last_update_time: 0,
        }
    }
}

/// A roaming configuration as persisted in `roaming.conf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoamingFileConfig {
    pub enabled: bool,
    pub signal_threshold_dbm: i32,
    pub scan_interval_ms: u32,
    pub handover_timeout_ms: u32,
    pub aggressive_roaming: bool,
}

impl Default for RoamingFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            signal_threshold_dbm: -75,
            scan_interval_ms: 10_000,
            handover_timeout_ms: 5_000,
            aggressive_roaming: false,
        }
    }
}

/// Parses `# comment` / `key=value` text into an ordered map. Blank and
/// comment lines are skipped; a non-blank line without `=` is an error.
fn parse_kv(contents: &str) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(NetconfigError::ConfigParse { line_no: idx + 1, line: raw_line.to_string() });
        };
        let key = key.trim().to_string();
        let value = value.trim().trim_matches('"').to_string();
        map.insert(key, value);
    }
    Ok(map)
}

fn get_bool(map: &BTreeMap<String, String>, key: &str, default: bool) -> bool {
    map.get(key).map(|v| v == "true").unwrap_or(default)
}

fn get_parsed<T: std::str::FromStr>(map: &BTreeMap<String, String>, key: &str, default: T) -> T {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_string(map: &BTreeMap<String, String>, key: &str, default: &str) -> String {
    map.get(key).cloned().unwrap_or_else(|| default.to_string())
}

impl NetworkFileConfig {
    fn from_map(map: &BTreeMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            wifi_enabled: get_bool(map, "wifi_enabled", defaults.wifi_enabled),
            wifi_ssid: get_string(map, "wifi_ssid", &defaults.wifi_ssid),
            wifi_password: get_string(map, "wifi_password", &defaults.wifi_password),
            wifi_security_type: get_parsed(map, "wifi_security_type", defaults.wifi_security_type),
            signal_strength: get_parsed(map, "signal_strength", defaults.signal_strength),
            roaming_enabled: get_bool(map, "roaming_enabled", defaults.roaming_enabled),
            mobile_app_enabled: get_bool(map, "mobile_app_enabled", defaults.mobile_app_enabled),
            last_update_time: get_parsed(map, "last_update_time", defaults.last_update_time),
        }
    }

    fn render(&self) -> String {
        format!(
            "# network.conf\nwifi_enabled           = {}\nwifi_ssid              = {}\nwifi_password          = {}\nwifi_security_type     = {}\nsignal_strength        = {}\nroaming_enabled        = {}\nmobile_app_enabled     = {}\nlast_update_time       = {}\n",
            self.wifi_enabled,
            self.wifi_ssid,
            self.wifi_password,
            self.wifi_security_type,
            self.signal_strength,
            self.roaming_enabled,
            self.mobile_app_enabled,
            self.last_update_time,
        )
    }
}

/// §3.2 domain ranges for `network.conf`.
pub fn validate_network_config(cfg: &NetworkFileConfig) -> Result<()> {
    if !cfg.wifi_ssid.is_empty() && !(1..=32).contains(&cfg.wifi_ssid.len()) {
        return Err(NetconfigError::Validation(format!("wifi_ssid length {} not in [1, 32]", cfg.wifi_ssid.len())));
    }
    if !cfg.wifi_password.is_empty() && !(8..=64).contains(&cfg.wifi_password.len()) {
        return Err(NetconfigError::Validation(format!(
            "wifi_password length {} not in [8, 64]",
            cfg.wifi_password.len()
        )));
    }
    if !(-100..=0).contains(&cfg.signal_strength) {
        return Err(NetconfigError::Validation(format!("signal_strength {} not in [-100, 0]", cfg.signal_strength)));
    }
    Ok(())
}

impl RoamingFileConfig {
    fn from_map(map: &BTreeMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: get_bool(map, "enabled", defaults.enabled),
            signal_threshold_dbm: get_parsed(map, "signal_threshold_dbm", defaults.signal_threshold_dbm),
            scan_interval_ms: get_parsed(map, "scan_interval_ms", defaults.scan_interval_ms),
            handover_timeout_ms: get_parsed(map, "handover_timeout_ms", defaults.handover_timeout_ms),
            aggressive_roaming: get_bool(map, "aggressive_roaming", defaults.aggressive_roaming),
        }
    }

    fn render(&self) -> String {
        format!(
            "# roaming.conf\nenabled                 = {}\nsignal_threshold_dbm    = {}\nscan_interval_ms        = {}\nhandover_timeout_ms     = {}\naggressive_roaming      = {}\n",
            self.enabled,
            self.signal_threshold_dbm,
            self.scan_interval_ms,
            self.handover_timeout_ms,
            self.aggressive_roaming,
        )
    }
}

/// §6.2 domain ranges for `roaming.conf`.
pub fn validate_roaming_config(cfg: &RoamingFileConfig) -> Result<()> {
    if !(-100..=-30).contains(&cfg.signal_threshold_dbm) {
        return Err(NetconfigError::Validation(format!(
            "signal_threshold_dbm {} not in [-100, -30]",
            cfg.signal_threshold_dbm
        )));
    }
    if !(1_000..=60_000).contains(&cfg.scan_interval_ms) {
        return Err(NetconfigError::Validation(format!(
            "scan_interval_ms {} not in [1000, 60000]",
            cfg.scan_interval_ms
        )));
    }
    if !(500..=10_000).contains(&cfg.handover_timeout_ms) {
        return Err(NetconfigError::Validation(format!(
            "handover_timeout_ms {} not in [500, 10000]",
            cfg.handover_timeout_ms
        )));
    }
    Ok(())
}

/// Writes `contents` to `path` atomically: a sibling `.tmp` file is
/// written and `fsync`'d, then renamed over the destination. The config
/// directory is created (mode 0755) if absent; the final file is
/// `chmod`'d 0644.
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    let mut tmp = std::fs::File::create(&tmp_path)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.sync_all()?;
    drop(tmp);
    std::fs::rename(&tmp_path, path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
    }
    Ok(())
}

/// Loads `network.conf` from `path`, writing defaults first if the file
/// is absent.
pub fn load_network_config(path: &Path) -> Result<NetworkFileConfig> {
    if !path.exists() {
        info!(?path, "network.conf absent, writing defaults");
        save_network_config(path, &NetworkFileConfig::default())?;
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(NetworkFileConfig::from_map(&parse_kv(&contents)?))
}

pub fn save_network_config(path: &Path, cfg: &NetworkFileConfig) -> Result<()> {
    atomic_write(path, &cfg.render())
}

pub fn load_roaming_config(path: &Path) -> Result<RoamingFileConfig> {
    if !path.exists() {
        info!(?path, "roaming.conf absent, writing defaults");
        save_roaming_config(path, &RoamingFileConfig::default())?;
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(RoamingFileConfig::from_map(&parse_kv(&contents)?))
}

pub fn save_roaming_config(path: &Path, cfg: &RoamingFileConfig) -> Result<()> {
    atomic_write(path, &cfg.render())
}

/// Plain file copy.
pub fn backup_file(path: &Path, backup_path: &Path) -> Result<()> {
    std::fs::copy(path, backup_path)?;
    Ok(())
}

/// Restores `network.conf` from a backup, validating it before the
/// overwrite takes effect.
pub fn restore_network_config(backup_path: &Path, path: &Path) -> Result<NetworkFileConfig> {
    let contents = std::fs::read_to_string(backup_path)?;
    let cfg = NetworkFileConfig::from_map(&parse_kv(&contents)?);
    validate_network_config(&cfg)?;
    save_network_config(path, &cfg)?;
    warn!(?backup_path, ?path, "restored network.conf from backup");
    Ok(cfg)
}

/// Restores `roaming.conf` from a backup, validating it before the
/// overwrite takes effect.
pub fn restore_roaming_config(backup_path: &Path, path: &Path) -> Result<RoamingFileConfig> {
    let contents = std::fs::read_to_string(backup_path)?;
    let cfg = RoamingFileConfig::from_map(&parse_kv(&contents)?);
    validate_roaming_config(&cfg)?;
    save_roaming_config(path, &cfg)?;
    warn!(?backup_path, ?path, "restored roaming.conf from backup");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_comments_and_whitespace() {
        let text = "# a comment\n\nwifi_enabled = true\nwifi_ssid=home\n";
        let map = parse_kv(text).unwrap();
        assert_eq!(map.get("wifi_enabled").unwrap(), "true");
        assert_eq!(map.get("wifi_ssid").unwrap(), "home");
    }

    #[test]
    fn malformed_line_aborts_the_parse() {
        let text = "wifi_enabled true\n";
        assert!(matches!(parse_kv(text), Err(NetconfigError::ConfigParse { line_no: 1, .. })));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let text = "wifi_enabled = true\nsome_future_key = 42\n";
        let cfg = NetworkFileConfig::from_map(&parse_kv(text).unwrap());
        assert!(cfg.wifi_enabled);
    }

    #[test]
    fn absent_file_gets_defaults_written_before_first_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("network.conf");
        assert!(!path.exists());
        let cfg = load_network_config(&path).unwrap();
        assert_eq!(cfg, NetworkFileConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("network.conf");
        let cfg = NetworkFileConfig {
            wifi_enabled: true,
            wifi_ssid: "office".to_string(),
            wifi_password: "supersecret".to_string(),
            ..Default::default()
        };
        save_network_config(&path, &cfg).unwrap();
        let loaded = load_network_config(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn validate_rejects_out_of_range_signal_strength() {
        let cfg = NetworkFileConfig { signal_strength: 10, ..Default::default() };
        assert!(validate_network_config(&cfg).is_err());
    }

    #[test]
    fn backup_and_restore_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roaming.conf");
        let backup_path = dir.path().join("roaming.conf.bak");
        let cfg = RoamingFileConfig { signal_threshold_dbm: -60, ..Default::default() };
        save_roaming_config(&path, &cfg).unwrap();
        backup_file(&path, &backup_path).unwrap();

        save_roaming_config(&path, &RoamingFileConfig::default()).unwrap();
        let restored = restore_roaming_config(&backup_path, &path).unwrap();
        assert_eq!(restored, cfg);
        assert_eq!(load_roaming_config(&path).unwrap(), cfg);
    }

    #[test]
    fn restore_refuses_an_invalid_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roaming.conf");
        let backup_path = dir.path().join("roaming.conf.bak");
        save_roaming_config(&path, &RoamingFileConfig::default()).unwrap();
        std::fs::write(&backup_path, "signal_threshold_dbm = 10\n").unwrap();
        assert!(restore_roaming_config(&backup_path, &path).is_err());
    }
}
