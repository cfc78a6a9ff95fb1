//! §4.F: Wi-Fi Station Controller. Wraps a [`WifiBackend`] with scan
//! sorting, connection statistics, and signal-threshold roaming.

use crate::capability::WifiBackend;
use crate::{NetError, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use types::{NetworkStatus, RoamingConfig, ScanResult, WifiStats};

pub struct StationController {
    backend: Arc<dyn WifiBackend>,
    status: Mutex<NetworkStatus>,
    stats: Mutex<WifiStats>,
    connected_since: Mutex<Option<Instant>>,
}

impl StationController {
    pub fn new(backend: Arc<dyn WifiBackend>) -> Self {
        Self {
            backend,
            status: Mutex::new(NetworkStatus::default()),
            stats: Mutex::new(WifiStats::default()),
            connected_since: Mutex::new(None),
        }
    }

    /// Visible networks, sorted by signal strength descending.
    pub fn scan(&self, _timeout_ms: u32) -> Result<Vec<ScanResult>> {
        let mut results = self.backend.list_networks()?;
        results.sort_by(|a, b| b.signal_dbm.cmp(&a.signal_dbm));
        Ok(results)
    }

    pub fn connect(&self, ssid: &str, password: &str, _connection_timeout_ms: u32) -> Result<()> {
        let mut stats = self.stats.lock().unwrap();
        stats.attempts += 1;
        drop(stats);

        match self.backend.connect(ssid, password) {
            Ok(()) => {
                let link = self.backend.query_active_link()?;
                let mut status = self.status.lock().unwrap();
                *status = link.unwrap_or(NetworkStatus {
                    connected: true,
                    current_ssid: Some(ssid.to_string()),
                    ..Default::default()
                });
                drop(status);
                *self.connected_since.lock().unwrap() = Some(Instant::now());

                let mut stats = self.stats.lock().unwrap();
                stats.successes += 1;
                stats.success_rate = stats.successes as f32 / stats.attempts as f32;
                info!(ssid, "wifi connected");
                Ok(())
            }
            Err(e) => {
                let mut stats = self.stats.lock().unwrap();
                stats.failures += 1;
                stats.success_rate = stats.successes as f32 / stats.attempts as f32;
                warn!(ssid, error = %e, "wifi connect failed");
                Err(e)
            }
        }
    }

    /// Idempotent: disconnecting while already disconnected is a no-op success.
    pub fn disconnect(&self) -> Result<()> {
        self.backend.disconnect()?;
        let was_connected = self.status.lock().unwrap().connected;
        *self.status.lock().unwrap() = NetworkStatus::default();
        *self.connected_since.lock().unwrap() = None;
        if was_connected {
            self.stats.lock().unwrap().disconnects += 1;
        }
        Ok(())
    }

    /// Re-reads the active link from the backend, for when the OS state
    /// may have changed out of band (e.g. a roaming daemon took over).
    pub fn update_status_from_system(&self) -> Result<NetworkStatus> {
        let link = self.backend.query_active_link()?;
        let mut status = self.status.lock().unwrap();
        *status = link.unwrap_or_default();
        Ok(status.clone())
    }

    /// Called periodically. If connected and below `signal_threshold_dbm`,
    /// waits `handover_timeout_ms` and reconnects to the strongest other
    /// visible network if one beats the current link; otherwise stays put.
    /// Returns whether a roam was attempted.
    pub fn handle_roaming(&self, cfg: &RoamingConfig) -> Result<bool> {
        if !cfg.enabled {
            return Ok(false);
        }
        let (connected, current_dbm, current_ssid) = {
            let status = self.status.lock().unwrap();
            (status.connected, status.signal_strength_dbm, status.current_ssid.clone())
        };
        if !connected || current_dbm >= cfg.signal_threshold_dbm {
            return Ok(false);
        }

        std::thread::sleep(Duration::from_millis(cfg.handover_timeout_ms as u64));
        self.stats.lock().unwrap().roaming_events += 1;

        let candidates = self.scan(cfg.scan_interval_ms)?;
        let better = candidates
            .iter()
            .filter(|c| Some(&c.ssid) != current_ssid.as_ref())
            .max_by_key(|c| c.signal_dbm);

        match better {
            Some(candidate) if candidate.signal_dbm > current_dbm => {
                info!(from = ?current_ssid, to = candidate.ssid, "roaming to stronger ap");
                self.backend.disconnect()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn status(&self) -> NetworkStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn stats(&self) -> WifiStats {
        let mut stats = *self.stats.lock().unwrap();
        if let Some(since) = *self.connected_since.lock().unwrap() {
            stats.uptime_s = since.elapsed().as_secs();
        }
        stats
    }
}
