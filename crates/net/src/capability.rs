//! §6.3: the abstract OS interface, isolated behind small capability
//! traits so tests substitute a fake instead of shelling out for real.
//! Real implementations are synchronous (they block on a child process)
//! and are expected to be called through `tokio::task::spawn_blocking`.

use crate::{NetError, Result};
use std::process::Command;
use std::sync::Mutex;
use types::{ApClient, ApConfig, NetworkStatus, ScanResult, Security, SignalQuality};

pub trait WifiBackend: Send + Sync {
    fn list_networks(&self) -> Result<Vec<ScanResult>>;
    fn connect(&self, ssid: &str, password: &str) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn query_active_link(&self) -> Result<Option<NetworkStatus>>;
}

pub trait ApBackend: Send + Sync {
    fn start(&self, cfg: &ApConfig) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn list_clients(&self) -> Result<Vec<ApClient>>;
    fn kick(&self, mac: &str) -> Result<()>;
    fn is_running(&self) -> bool;
}

/// Shells out to `nmcli` to drive the station interface. The capability
/// set (list/connect/disconnect/query) is what §6.3 requires; the
/// specific utility is not mandated and may be swapped for a native
/// netlink client without touching callers.
pub struct ShellWifiBackend {
    interface: String,
}

impl ShellWifiBackend {
    pub fn new(interface: impl Into<String>) -> Self {
        Self { interface: interface.into() }
    }
}

impl WifiBackend for ShellWifiBackend {
    fn list_networks(&self) -> Result<Vec<ScanResult>> {
        let output = Command::new("nmcli")
            .args(["-t", "-f", "SSID,BSSID,SIGNAL,FREQ,SECURITY,ACTIVE", "dev", "wifi", "list"])
            .output()
            .map_err(|e| NetError::WifiScanFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(NetError::WifiScanFailed(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_scan_line).collect())
    }

    fn connect(&self, ssid: &str, password: &str) -> Result<()> {
        let output = Command::new("nmcli")
            .args(["dev", "wifi", "connect", ssid, "password", password])
            .output()
            .map_err(|e| NetError::WifiConnectionFailed(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("successfully activated") {
            Ok(())
        } else if stdout.trim_start().starts_with("Error:") || stdout.trim_start().starts_with("error:") {
            if stdout.to_lowercase().contains("auth") || stdout.to_lowercase().contains("secret") {
                Err(NetError::WifiAuthFailed)
            } else {
                Err(NetError::WifiConnectionFailed(stdout.trim().to_string()))
            }
        } else {
            Err(NetError::WifiConnectionFailed(stdout.trim().to_string()))
        }
    }

    fn disconnect(&self) -> Result<()> {
        let _ = Command::new("nmcli").args(["dev", "disconnect", &self.interface]).output();
        Ok(())
    }

    fn query_active_link(&self) -> Result<Option<NetworkStatus>> {
        let output = Command::new("nmcli")
            .args(["-t", "-f", "ACTIVE,SSID,SIGNAL", "dev", "wifi", "list"])
            .output()
            .map_err(|e| NetError::WifiScanFailed(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            let fields = split_nmcli_fields(line);
            if fields.len() >= 3 && fields[0] == "yes" {
                let percent: u8 = fields[2].parse().unwrap_or(0);
                return Ok(Some(NetworkStatus {
                    connected: true,
                    current_ssid: Some(fields[1].clone()),
                    signal_strength_dbm: crate::percent_to_dbm(percent),
                    ..Default::default()
                }));
            }
        }
        Ok(None)
    }
}

/// Splits one line of `nmcli -t` terse output on unescaped `:`, un-escaping
/// `\:` (and any other `\x`-escaped character) within a field. nmcli
/// backslash-escapes colons embedded in a field's own value — a BSSID's
/// MAC octets, or an SSID that happens to contain a colon — so a plain
/// `line.split(':')` shifts every field after the first embedded colon.
fn split_nmcli_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn parse_scan_line(line: &str) -> Option<ScanResult> {
    let fields = split_nmcli_fields(line);
    if fields.len() < 6 {
        return None;
    }
    let percent: u8 = fields[2].parse().ok()?;
    let signal_dbm = crate::percent_to_dbm(percent);
    let frequency_mhz: u32 = fields[3].parse().unwrap_or(0);
    Some(ScanResult {
        ssid: fields[0].clone(),
        bssid: fields[1].clone(),
        signal_dbm,
        quality: SignalQuality::from_dbm(signal_dbm),
        frequency_mhz,
        channel: frequency_to_channel(frequency_mhz),
        security: parse_security(&fields[4]),
        band: if frequency_mhz >= 5_000 { types::Band::Band5Ghz } else { types::Band::Band2_4Ghz },
        hidden: fields[0].is_empty(),
        connected: fields[5] == "yes",
    })
}

fn parse_security(raw: &str) -> Security {
    let raw = raw.to_uppercase();
    if raw.contains("WPA3") {
        Security::Wpa3
    } else if raw.contains("WPA2") {
        Security::Wpa2
    } else if raw.contains("WPA") {
        Security::Wpa
    } else if raw.contains("WEP") {
        Security::Wep
    } else {
        Security::Open
    }
}

fn frequency_to_channel(freq_mhz: u32) -> u8 {
    if (2_412..=2_484).contains(&freq_mhz) {
        ((freq_mhz - 2_407) / 5) as u8
    } else if freq_mhz >= 5_000 {
        ((freq_mhz - 5_000) / 5) as u8
    } else {
        0
    }
}

/// Brings up the hosting daemon (`hostapd`) and its DHCP server
/// (`dnsmasq`), tracking both PID files to later terminate them with
/// `SIGTERM`, escalating to `SIGKILL` after a grace period.
pub struct ShellApBackend {
    hostapd_pid_file: std::path::PathBuf,
    dnsmasq_pid_file: std::path::PathBuf,
    config_dir: std::path::PathBuf,
    grace_period: std::time::Duration,
    clients: Mutex<Vec<ApClient>>,
}

impl ShellApBackend {
    pub fn new(config_dir: impl Into<std::path::PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            hostapd_pid_file: config_dir.join("hostapd.pid"),
            dnsmasq_pid_file: config_dir.join("dnsmasq.pid"),
            config_dir,
            grace_period: std::time::Duration::from_secs(3),
            clients: Mutex::new(Vec::new()),
        }
    }

    fn kill_pid_file(&self, pid_file: &std::path::Path) {
        let Ok(contents) = std::fs::read_to_string(pid_file) else {
            return;
        };
        let Ok(pid) = contents.trim().parse::<i32>() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let target = Pid::from_raw(pid);
            let _ = kill(target, Signal::SIGTERM);
            std::thread::sleep(self.grace_period);
            if kill(target, None).is_ok() {
                let _ = kill(target, Signal::SIGKILL);
            }
        }

        let _ = std::fs::remove_file(pid_file);
    }
}

impl ApBackend for ShellApBackend {
    fn start(&self, cfg: &ApConfig) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir)
            .map_err(|e| NetError::ApManagerFailed(e.to_string()))?;

        let hostapd_path = self.config_dir.join("hostapd.conf");
        std::fs::write(&hostapd_path, render_hostapd_config(cfg))
            .map_err(|e| NetError::ApManagerFailed(e.to_string()))?;
        let dnsmasq_path = self.config_dir.join("dnsmasq.conf");
        std::fs::write(&dnsmasq_path, render_dnsmasq_config(cfg))
            .map_err(|e| NetError::ApManagerFailed(e.to_string()))?;

        let hostapd = Command::new("hostapd")
            .arg("-B") // daemonize; the daemon writes its own PID file
            .arg(&hostapd_path)
            .spawn()
            .map_err(|e| NetError::ApManagerFailed(format!("failed to spawn hostapd: {e}")))?;
        std::fs::write(&self.hostapd_pid_file, hostapd.id().to_string())
            .map_err(|e| NetError::ApManagerFailed(e.to_string()))?;

        let dnsmasq = Command::new("dnsmasq")
            .arg("--conf-file")
            .arg(&dnsmasq_path)
            .arg("--pid-file")
            .arg(&self.dnsmasq_pid_file)
            .spawn()
            .map_err(|e| NetError::ApManagerFailed(format!("failed to spawn dnsmasq: {e}")))?;
        std::fs::write(&self.dnsmasq_pid_file, dnsmasq.id().to_string())
            .map_err(|e| NetError::ApManagerFailed(e.to_string()))?;

        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.kill_pid_file(&self.dnsmasq_pid_file);
        self.kill_pid_file(&self.hostapd_pid_file);
        self.clients.lock().unwrap().clear();
        Ok(())
    }

    fn list_clients(&self) -> Result<Vec<ApClient>> {
        Ok(self.clients.lock().unwrap().clone())
    }

    fn kick(&self, mac: &str) -> Result<()> {
        self.clients.lock().unwrap().retain(|c| c.mac != mac);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.hostapd_pid_file.exists()
    }
}

fn render_hostapd_config(cfg: &ApConfig) -> String {
    let mut out = format!("interface=wlan0\nssid={}\nchannel={}\n", cfg.ssid, cfg.channel);
    match cfg.security {
        Security::Open => {}
        Security::Wep => {
            out.push_str(&format!("wep_key0={}\n", cfg.password));
        }
        Security::Wpa => {
            out.push_str("wpa=1\nwpa_key_mgmt=WPA-PSK\nwpa_pairwise=TKIP\n");
            out.push_str(&format!("wpa_passphrase={}\n", cfg.password));
        }
        Security::Wpa2 => {
            out.push_str("wpa=2\nwpa_key_mgmt=WPA-PSK\nrsn_pairwise=CCMP\n");
            out.push_str(&format!("wpa_passphrase={}\n", cfg.password));
        }
        Security::Wpa3 => {
            out.push_str("wpa=2\nwpa_key_mgmt=SAE\nrsn_pairwise=CCMP\nieee80211w=2\n");
            out.push_str(&format!("wpa_passphrase={}\n", cfg.password));
        }
    }
    out
}

/// Renders the companion `dnsmasq` config for the hosted AP: the
/// interface's own address as the DHCP listen address, and a small
/// lease range from `ip + .2` through `ip + .20`, per §4.G.
fn render_dnsmasq_config(cfg: &ApConfig) -> String {
    let (range_start, range_end) = dhcp_range(&cfg.ip_address);
    format!(
        "interface=wlan0\nlisten-address={}\nbind-interfaces\ndhcp-range={},{},{},12h\n",
        cfg.ip_address, range_start, range_end, cfg.netmask
    )
}

/// `ip + .2` through `ip + .20`, varying only the last octet of a dotted
/// IPv4 address.
fn dhcp_range(ip_address: &str) -> (String, String) {
    let octets: Vec<&str> = ip_address.split('.').collect();
    match octets.as_slice() {
        [a, b, c, _] => (format!("{a}.{b}.{c}.2"), format!("{a}.{b}.{c}.20")),
        _ => (ip_address.to_string(), ip_address.to_string()),
    }
}

/// Scripted backend for tests: no shell-out, state is entirely in memory.
pub struct FakeWifiBackend {
    pub networks: Mutex<Vec<ScanResult>>,
    pub connect_results: Mutex<std::collections::VecDeque<Result<()>>>,
    pub active_link: Mutex<Option<NetworkStatus>>,
}

impl Default for FakeWifiBackend {
    fn default() -> Self {
        Self {
            networks: Mutex::new(Vec::new()),
            connect_results: Mutex::new(std::collections::VecDeque::new()),
            active_link: Mutex::new(None),
        }
    }
}

impl WifiBackend for FakeWifiBackend {
    fn list_networks(&self) -> Result<Vec<ScanResult>> {
        Ok(self.networks.lock().unwrap().clone())
    }

    fn connect(&self, _ssid: &str, _password: &str) -> Result<()> {
        self.connect_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn disconnect(&self) -> Result<()> {
        *self.active_link.lock().unwrap() = None;
        Ok(())
    }

    fn query_active_link(&self) -> Result<Option<NetworkStatus>> {
        Ok(self.active_link.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeApBackend {
    pub running: Mutex<bool>,
    pub start_should_fail: Mutex<bool>,
    pub clients: Mutex<Vec<ApClient>>,
}

impl ApBackend for FakeApBackend {
    fn start(&self, _cfg: &ApConfig) -> Result<()> {
        if *self.start_should_fail.lock().unwrap() {
            return Err(NetError::ApManagerFailed("simulated failure".to_string()));
        }
        *self.running.lock().unwrap() = true;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        *self.running.lock().unwrap() = false;
        Ok(())
    }

    fn list_clients(&self) -> Result<Vec<ApClient>> {
        Ok(self.clients.lock().unwrap().clone())
    }

    fn kick(&self, mac: &str) -> Result<()> {
        self.clients.lock().unwrap().retain(|c| c.mac != mac);
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }
}
