//! End-to-end scenarios across the Wi-Fi station controller, AP controller,
//! and fallback supervisor state machine.

use net::{ApConfig, ApController, FallbackConfig, FallbackState, FakeApBackend, FakeWifiBackend, NetError, StationController};
use std::sync::Arc;
use std::time::Duration;
use types::NetworkStatus;

/// `recovery_check_interval_ms` is scaled down from the spec's 10_000ms so
/// the test suite doesn't spend ten seconds asleep; the elapsed-time
/// predicate it exercises is identical at any magnitude.
const RECOVERY_CHECK_INTERVAL_MS: u32 = 40;

fn rig(config: FallbackConfig) -> (net::FallbackSupervisor, Arc<FakeWifiBackend>, Arc<FakeApBackend>) {
    let wifi_backend = Arc::new(FakeWifiBackend::default());
    let ap_backend = Arc::new(FakeApBackend::default());
    let station = Arc::new(StationController::new(wifi_backend.clone()));
    let ap = Arc::new(ApController::new(ap_backend.clone()));
    let supervisor =
        net::FallbackSupervisor::new(station, ap, ApConfig::default(), "home-wifi", "correct-horse-battery", config);
    (supervisor, wifi_backend, ap_backend)
}

fn weak_link(dbm: i32) -> NetworkStatus {
    NetworkStatus { connected: true, signal_strength_dbm: dbm, ..Default::default() }
}

#[test]
fn fallback_trigger_after_exhausting_retries() {
    let config = FallbackConfig {
        max_retry_attempts: 2,
        signal_strength_threshold_dbm: -70,
        ..Default::default()
    };
    let (supervisor, wifi_backend, ap_backend) = rig(config);
    supervisor.enable();
    assert_eq!(supervisor.state(), FallbackState::Monitoring);

    *wifi_backend.active_link.lock().unwrap() = Some(weak_link(-85));

    let state = supervisor.handle_monitoring().unwrap();
    assert_eq!(state, FallbackState::Triggered);
    assert!(ap_backend.is_running(), "access point must come up exactly once on the triggering tick");
    assert_eq!(supervisor.stats().total_triggers, 1);

    // Further ticks while still in Triggered must not start the AP again.
    supervisor.handle_monitoring().unwrap();
    assert_eq!(supervisor.stats().total_triggers, 1);
}

#[test]
fn recovery_succeeds_and_returns_to_monitoring() {
    let config = FallbackConfig {
        max_retry_attempts: 2,
        signal_strength_threshold_dbm: -70,
        recovery_check_interval_ms: RECOVERY_CHECK_INTERVAL_MS,
        ..Default::default()
    };
    let (supervisor, wifi_backend, ap_backend) = rig(config);
    supervisor.enable();
    *wifi_backend.active_link.lock().unwrap() = Some(weak_link(-85));

    assert_eq!(supervisor.handle_monitoring().unwrap(), FallbackState::Triggered);

    std::thread::sleep(Duration::from_millis(RECOVERY_CHECK_INTERVAL_MS as u64 + 10));
    assert_eq!(supervisor.handle_monitoring().unwrap(), FallbackState::Recovering);

    wifi_backend.connect_results.lock().unwrap().push_back(Ok(()));
    let state = supervisor.handle_monitoring().unwrap();

    assert_eq!(state, FallbackState::Monitoring);
    assert!(!ap_backend.is_running(), "ap must be torn down once the station link is restored");
    assert_eq!(supervisor.stats().successful_recoveries, 1);
}

#[test]
fn failed_recovery_restarts_the_access_point() {
    let config = FallbackConfig {
        max_retry_attempts: 2,
        signal_strength_threshold_dbm: -70,
        recovery_check_interval_ms: RECOVERY_CHECK_INTERVAL_MS,
        ..Default::default()
    };
    let (supervisor, wifi_backend, ap_backend) = rig(config);
    supervisor.enable();
    *wifi_backend.active_link.lock().unwrap() = Some(weak_link(-85));

    supervisor.handle_monitoring().unwrap();
    std::thread::sleep(Duration::from_millis(RECOVERY_CHECK_INTERVAL_MS as u64 + 10));
    supervisor.handle_monitoring().unwrap();

    wifi_backend.connect_results.lock().unwrap().push_back(Err(NetError::WifiAuthFailed));
    let state = supervisor.handle_monitoring().unwrap();

    assert_eq!(state, FallbackState::Triggered);
    assert!(ap_backend.is_running(), "a failed recovery attempt must bring the access point back up");
    assert_eq!(supervisor.stats().failed_recoveries, 1);
}

#[test]
fn force_wifi_and_force_ap_restore_observable_state() {
    let (supervisor, wifi_backend, ap_backend) = rig(FallbackConfig::default());
    supervisor.enable();
    *wifi_backend.active_link.lock().unwrap() = Some(weak_link(-40));

    supervisor.force_ap().unwrap();
    assert!(ap_backend.is_running());
    assert_eq!(supervisor.state(), FallbackState::Triggered);

    wifi_backend.connect_results.lock().unwrap().push_back(Ok(()));
    supervisor.force_wifi().unwrap();
    assert!(!ap_backend.is_running());
    assert_eq!(supervisor.state(), FallbackState::Monitoring);
}

#[test]
fn total_state_transitions_observed_across_a_full_fallback_and_recovery_cycle() {
    let config = FallbackConfig {
        max_retry_attempts: 2,
        signal_strength_threshold_dbm: -70,
        recovery_check_interval_ms: RECOVERY_CHECK_INTERVAL_MS,
        ..Default::default()
    };
    let (supervisor, wifi_backend, _ap_backend) = rig(config);

    let mut observed = vec![supervisor.state()];
    observed.push(supervisor.enable());

    *wifi_backend.active_link.lock().unwrap() = Some(weak_link(-85));
    observed.push(supervisor.handle_monitoring().unwrap());

    std::thread::sleep(Duration::from_millis(RECOVERY_CHECK_INTERVAL_MS as u64 + 10));
    observed.push(supervisor.handle_monitoring().unwrap());

    wifi_backend.connect_results.lock().unwrap().push_back(Ok(()));
    observed.push(supervisor.handle_monitoring().unwrap());

    assert_eq!(
        observed,
        vec![
            FallbackState::Disabled,
            FallbackState::Monitoring,
            FallbackState::Triggered,
            FallbackState::Recovering,
            FallbackState::Monitoring,
        ]
    );
}
