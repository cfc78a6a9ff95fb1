//! §4.H: the Fallback Supervisor. Observes the Wi-Fi station link; on
//! sustained degradation it stops the station and brings up the hosted
//! access point, then periodically retries the station and tears the AP
//! back down on success.

use crate::ap::ApController;
use crate::station::StationController;
use crate::{NetError, Result};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};
use types::{ApConfig, FallbackConfig, FallbackState, FallbackStats};

/// Drives of the state machine. Each tick of `handle_monitoring` computes
/// the relevant predicate and feeds at most one event through
/// [`FallbackSupervisor::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Enable,
    Disable,
    WifiUnhealthy,
    RecoveryWindowElapsed,
    WifiRecovered,
    WifiStillDown,
    Fault,
}

pub struct FallbackSupervisor {
    station: Arc<StationController>,
    ap: Arc<ApController>,
    ap_config: ApConfig,
    target_ssid: String,
    target_password: String,
    config: FallbackConfig,

    state: Mutex<FallbackState>,
    stats: Mutex<FallbackStats>,
    last_fallback_time: Mutex<Option<Instant>>,
    ap_started_at: Mutex<Option<Instant>>,
    retry_count: Mutex<u8>,
}

impl FallbackSupervisor {
    pub fn new(
        station: Arc<StationController>,
        ap: Arc<ApController>,
        ap_config: ApConfig,
        target_ssid: impl Into<String>,
        target_password: impl Into<String>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            station,
            ap,
            ap_config,
            target_ssid: target_ssid.into(),
            target_password: target_password.into(),
            config,
            state: Mutex::new(FallbackState::Disabled),
            stats: Mutex::new(FallbackStats::default()),
            last_fallback_time: Mutex::new(None),
            ap_started_at: Mutex::new(None),
            retry_count: Mutex::new(0),
        }
    }

    pub fn state(&self) -> FallbackState {
        *self.state.lock().unwrap()
    }

    pub fn stats(&self) -> FallbackStats {
        let mut stats = *self.stats.lock().unwrap();
        if let Some(since) = *self.ap_started_at.lock().unwrap() {
            stats.ap_uptime_s = since.elapsed().as_secs();
        }
        stats
    }

    pub fn enable(&self) -> FallbackState {
        self.transition(Event::Enable)
    }

    pub fn disable(&self) -> FallbackState {
        let _ = self.ap.stop();
        self.transition(Event::Disable)
    }

    /// Applies an event and returns the resulting state. Re-entering the
    /// current state (no matching arm) is a no-op, matching the spec's
    /// idempotence requirement.
    fn transition(&self, event: Event) -> FallbackState {
        let mut state = self.state.lock().unwrap();
        let old = *state;

        *state = match (old, event) {
            (FallbackState::Disabled, Event::Enable) => FallbackState::Monitoring,

            (FallbackState::Monitoring, Event::WifiUnhealthy) if self.config.auto_fallback => {
                FallbackState::Triggered
            }

            (FallbackState::Triggered, Event::RecoveryWindowElapsed) => FallbackState::Recovering,

            (FallbackState::Recovering, Event::WifiRecovered) => FallbackState::Monitoring,
            (FallbackState::Recovering, Event::WifiStillDown) => FallbackState::Triggered,

            (_, Event::Disable) => FallbackState::Disabled,
            (_, Event::Fault) => FallbackState::Error,

            (state, _) => state,
        };

        if *state != old {
            info!(?old, new = ?*state, ?event, "fallback state transition");
        }
        *state
    }

    fn wifi_unhealthy(&self) -> bool {
        let status = self.station.update_status_from_system().unwrap_or_default();
        let retries_exhausted = !status.connected && *self.retry_count.lock().unwrap() >= self.config.max_retry_attempts;
        let weak_signal = status.connected && status.signal_strength_dbm < self.config.signal_strength_threshold_dbm;
        retries_exhausted || weak_signal
    }

    fn recovery_window_elapsed(&self) -> bool {
        let elapsed = self
            .last_fallback_time
            .lock()
            .unwrap()
            .map(|t| t.elapsed().as_millis() as u64 >= self.config.recovery_check_interval_ms as u64)
            .unwrap_or(true);
        let attempts_left = *self.retry_count.lock().unwrap() < self.config.max_retry_attempts;
        elapsed && attempts_left
    }

    /// Invoked externally at a cadence at most `retry_interval_ms`.
    /// Effects at most one state transition.
    pub fn handle_monitoring(&self) -> Result<FallbackState> {
        match self.state() {
            FallbackState::Disabled | FallbackState::Error => Ok(self.state()),
            FallbackState::Monitoring => {
                if self.wifi_unhealthy() {
                    self.stats.lock().unwrap().total_triggers += 1;
                    *self.last_fallback_time.lock().unwrap() = Some(Instant::now());
                    let _ = self.station.disconnect();
                    self.ap.start(self.ap_config.clone())?;
                    *self.ap_started_at.lock().unwrap() = Some(Instant::now());
                    warn!("wifi unhealthy, fallback access point started");
                    Ok(self.transition(Event::WifiUnhealthy))
                } else {
                    Ok(FallbackState::Monitoring)
                }
            }
            FallbackState::Triggered => {
                if self.recovery_window_elapsed() {
                    Ok(self.transition(Event::RecoveryWindowElapsed))
                } else {
                    Ok(FallbackState::Triggered)
                }
            }
            FallbackState::Recovering => {
                *self.retry_count.lock().unwrap() += 1;
                self.stats.lock().unwrap().recovery_attempts += 1;

                match self.station.connect(&self.target_ssid, &self.target_password, self.config.connection_timeout_ms) {
                    Ok(()) => {
                        self.ap.stop()?;
                        *self.ap_started_at.lock().unwrap() = None;
                        *self.retry_count.lock().unwrap() = 0;
                        self.stats.lock().unwrap().successful_recoveries += 1;
                        info!("wifi recovered, fallback access point stopped");
                        Ok(self.transition(Event::WifiRecovered))
                    }
                    Err(e) => {
                        self.stats.lock().unwrap().failed_recoveries += 1;
                        *self.last_fallback_time.lock().unwrap() = Some(Instant::now());
                        warn!(error = %e, "wifi recovery attempt failed, restarting access point");
                        let new_state = self.transition(Event::WifiStillDown);
                        self.ap.start(self.ap_config.clone())?;
                        Ok(new_state)
                    }
                }
            }
        }
    }

    /// Bypasses predicates but keeps stop/start ordering. Only valid from
    /// `Disabled`, `Monitoring`, or `Triggered`.
    pub fn force_wifi(&self) -> Result<()> {
        if !matches!(self.state(), FallbackState::Disabled | FallbackState::Monitoring | FallbackState::Triggered) {
            return Err(NetError::InvalidParameter("force_wifi only valid from Disabled, Monitoring, or Triggered".to_string()));
        }
        self.ap.stop()?;
        self.station.connect(&self.target_ssid, &self.target_password, self.config.connection_timeout_ms)?;
        self.transition(Event::WifiRecovered);
        Ok(())
    }

    pub fn force_ap(&self) -> Result<()> {
        if !matches!(self.state(), FallbackState::Disabled | FallbackState::Monitoring | FallbackState::Triggered) {
            return Err(NetError::InvalidParameter("force_ap only valid from Disabled, Monitoring, or Triggered".to_string()));
        }
        let _ = self.station.disconnect();
        self.ap.start(self.ap_config.clone())?;
        *self.ap_started_at.lock().unwrap() = Some(Instant::now());
        self.transition(Event::WifiUnhealthy);
        Ok(())
    }

    /// Drives `handle_monitoring` at `retry_interval_ms` cadence until
    /// `shutdown` resolves. Each tick runs on a blocking-task thread since
    /// the underlying backend calls may shell out.
    pub async fn run_monitoring_loop(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.config.retry_interval_ms as u64));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let supervisor = Arc::clone(&self);
                    if let Err(e) = tokio::task::spawn_blocking(move || supervisor.handle_monitoring()).await.unwrap() {
                        warn!(error = %e, "fallback monitoring tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// 0-100, per §4.H: AP mode is a flat 60; station mode scales with
    /// signal; disconnected is 0.
    pub fn connection_quality_score(&self) -> u8 {
        if self.ap.is_running() {
            return 60;
        }
        let status = self.station.status();
        if !status.connected {
            return 0;
        }
        let dbm = status.signal_strength_dbm;
        if dbm > -50 {
            100
        } else if dbm > -60 {
            90
        } else if dbm > -70 {
            80
        } else if dbm > -80 {
            70
        } else if dbm > -90 {
            60
        } else {
            50
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{FakeApBackend, FakeWifiBackend};
    use types::NetworkStatus;

    fn supervisor(config: FallbackConfig) -> (FallbackSupervisor, Arc<FakeWifiBackend>, Arc<FakeApBackend>) {
        let wifi_backend = Arc::new(FakeWifiBackend::default());
        let ap_backend = Arc::new(FakeApBackend::default());
        let station = Arc::new(StationController::new(wifi_backend.clone()));
        let ap = Arc::new(ApController::new(ap_backend.clone()));
        let supervisor = FallbackSupervisor::new(station, ap, ApConfig::default(), "home", "password123", config);
        (supervisor, wifi_backend, ap_backend)
    }

    #[test]
    fn enable_moves_disabled_to_monitoring() {
        let (supervisor, _, _) = supervisor(FallbackConfig::default());
        assert_eq!(supervisor.state(), FallbackState::Disabled);
        assert_eq!(supervisor.enable(), FallbackState::Monitoring);
    }

    #[test]
    fn disabled_and_error_ignore_monitoring_ticks() {
        let (supervisor, _, _) = supervisor(FallbackConfig::default());
        assert_eq!(supervisor.handle_monitoring().unwrap(), FallbackState::Disabled);
    }

    #[test]
    fn unhealthy_wifi_triggers_fallback_access_point() {
        let config = FallbackConfig { max_retry_attempts: 1, ..Default::default() };
        let (supervisor, wifi_backend, ap_backend) = supervisor(config);
        supervisor.enable();
        *wifi_backend.active_link.lock().unwrap() = Some(NetworkStatus {
            connected: true,
            signal_strength_dbm: -95,
            ..Default::default()
        });

        let state = supervisor.handle_monitoring().unwrap();
        assert_eq!(state, FallbackState::Triggered);
        assert!(ap_backend.is_running());
        assert_eq!(supervisor.stats().total_triggers, 1);
    }

    #[test]
    fn successful_recovery_returns_to_monitoring_and_stops_ap() {
        let config = FallbackConfig { recovery_check_interval_ms: 0, ..Default::default() };
        let (supervisor, wifi_backend, ap_backend) = supervisor(config);
        supervisor.enable();
        *wifi_backend.active_link.lock().unwrap() =
            Some(NetworkStatus { connected: true, signal_strength_dbm: -95, ..Default::default() });
        supervisor.handle_monitoring().unwrap();
        assert_eq!(supervisor.state(), FallbackState::Triggered);

        assert_eq!(supervisor.handle_monitoring().unwrap(), FallbackState::Recovering);

        wifi_backend.connect_results.lock().unwrap().push_back(Ok(()));
        let state = supervisor.handle_monitoring().unwrap();
        assert_eq!(state, FallbackState::Monitoring);
        assert!(!ap_backend.is_running());
        assert_eq!(supervisor.stats().successful_recoveries, 1);
    }

    #[test]
    fn failed_recovery_restarts_the_access_point() {
        let config = FallbackConfig { recovery_check_interval_ms: 0, ..Default::default() };
        let (supervisor, wifi_backend, ap_backend) = supervisor(config);
        supervisor.enable();
        *wifi_backend.active_link.lock().unwrap() =
            Some(NetworkStatus { connected: true, signal_strength_dbm: -95, ..Default::default() });
        supervisor.handle_monitoring().unwrap();
        supervisor.handle_monitoring().unwrap();

        wifi_backend
            .connect_results
            .lock()
            .unwrap()
            .push_back(Err(NetError::WifiAuthFailed));
        let state = supervisor.handle_monitoring().unwrap();
        assert_eq!(state, FallbackState::Triggered);
        assert!(ap_backend.is_running());
        assert_eq!(supervisor.stats().failed_recoveries, 1);
    }

    #[test]
    fn disable_is_reachable_from_any_state() {
        let (supervisor, wifi_backend, _) = supervisor(FallbackConfig::default());
        supervisor.enable();
        *wifi_backend.active_link.lock().unwrap() =
            Some(NetworkStatus { connected: true, signal_strength_dbm: -95, ..Default::default() });
        supervisor.handle_monitoring().unwrap();
        assert_eq!(supervisor.state(), FallbackState::Triggered);
        assert_eq!(supervisor.disable(), FallbackState::Disabled);
    }

    #[test]
    fn connection_quality_score_bands() {
        let (supervisor, wifi_backend, _) = supervisor(FallbackConfig::default());
        *wifi_backend.active_link.lock().unwrap() =
            Some(NetworkStatus { connected: true, signal_strength_dbm: -40, ..Default::default() });
        supervisor.station.update_status_from_system().unwrap();
        assert_eq!(supervisor.connection_quality_score(), 100);

        *wifi_backend.active_link.lock().unwrap() = None;
        supervisor.station.update_status_from_system().unwrap();
        assert_eq!(supervisor.connection_quality_score(), 0);
    }
}
