//! §4.G: AP Controller. Lifecycle `Disabled -> Starting -> Running ->
//! Stopping -> Disabled`, with `Error` reachable from any intermediate
//! failure. A configuration change while `Running` induces a
//! stop-then-restart.

use crate::capability::ApBackend;
use crate::{validate_ap_config, NetError, Result};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info};
use types::{ApClient, ApConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApState {
    Disabled,
    Starting,
    Running,
    Stopping,
    Error,
}

pub struct ApController {
    backend: Arc<dyn ApBackend>,
    state: Mutex<ApState>,
    config: Mutex<Option<ApConfig>>,
    started_at: Mutex<Option<Instant>>,
}

impl ApController {
    pub fn new(backend: Arc<dyn ApBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(ApState::Disabled),
            config: Mutex::new(None),
            started_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ApState {
        *self.state.lock().unwrap()
    }

    pub fn start(&self, cfg: ApConfig) -> Result<()> {
        validate_ap_config(&cfg)?;

        let current = self.state();
        if current == ApState::Running {
            self.stop()?;
        }

        *self.state.lock().unwrap() = ApState::Starting;
        match self.backend.start(&cfg) {
            Ok(()) => {
                *self.config.lock().unwrap() = Some(cfg);
                *self.started_at.lock().unwrap() = Some(Instant::now());
                *self.state.lock().unwrap() = ApState::Running;
                info!("access point running");
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap() = ApState::Error;
                error!(error = %e, "access point failed to start");
                Err(e)
            }
        }
    }

    pub fn stop(&self) -> Result<()> {
        if self.state() == ApState::Disabled {
            return Ok(());
        }
        *self.state.lock().unwrap() = ApState::Stopping;
        self.backend.stop()?;
        *self.config.lock().unwrap() = None;
        *self.started_at.lock().unwrap() = None;
        *self.state.lock().unwrap() = ApState::Disabled;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state() == ApState::Running && self.backend.is_running()
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.lock().unwrap().map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn list_clients(&self) -> Result<Vec<ApClient>> {
        if self.state() != ApState::Running {
            return Ok(Vec::new());
        }
        self.backend.list_clients()
    }

    pub fn kick(&self, mac: &str) -> Result<()> {
        if self.state() != ApState::Running {
            return Err(NetError::NotRunning);
        }
        self.backend.kick(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FakeApBackend;

    #[test]
    fn start_stop_cycles_through_running_and_back_to_disabled() {
        let backend = Arc::new(FakeApBackend::default());
        let controller = ApController::new(backend);
        assert_eq!(controller.state(), ApState::Disabled);

        controller.start(ApConfig::default()).unwrap();
        assert_eq!(controller.state(), ApState::Running);
        assert!(controller.is_running());

        controller.stop().unwrap();
        assert_eq!(controller.state(), ApState::Disabled);
        assert!(!controller.is_running());
    }

    #[test]
    fn failed_start_lands_in_error() {
        let backend = Arc::new(FakeApBackend::default());
        *backend.start_should_fail.lock().unwrap() = true;
        let controller = ApController::new(backend);
        assert!(controller.start(ApConfig::default()).is_err());
        assert_eq!(controller.state(), ApState::Error);
    }

    #[test]
    fn rejects_invalid_config_without_touching_backend() {
        let backend = Arc::new(FakeApBackend::default());
        let controller = ApController::new(backend.clone());
        let bad = ApConfig { ssid: "".to_string(), ..ApConfig::default() };
        assert!(controller.start(bad).is_err());
        assert_eq!(controller.state(), ApState::Disabled);
        assert!(!backend.is_running());
    }

    #[test]
    fn restart_while_running_stops_first() {
        let backend = Arc::new(FakeApBackend::default());
        let controller = ApController::new(backend);
        controller.start(ApConfig::default()).unwrap();
        controller.start(ApConfig { channel: 11, ..ApConfig::default() }).unwrap();
        assert_eq!(controller.state(), ApState::Running);
    }

    #[test]
    fn kick_requires_running() {
        let backend = Arc::new(FakeApBackend::default());
        let controller = ApController::new(backend);
        assert!(matches!(controller.kick("AA:BB:CC:DD:EE:FF"), Err(NetError::NotRunning)));
    }
}
