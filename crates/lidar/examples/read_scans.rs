//! Example: bring up the lidar facade and print completed scans and the
//! derived safety verdict.
//!
//! Usage:
//!   cargo run --example read_scans
//!   cargo run --example read_scans -- /dev/ttyUSB1

use lidar::LidarFacade;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use types::LidarConfig;

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let device_path = std::env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let cfg = LidarConfig { device_path, ..LidarConfig::default() };

    let facade = Arc::new(LidarFacade::new());
    facade.init(cfg).expect("failed to initialize lidar facade");
    facade.start_scanning().expect("failed to start scanning");

    info!("waiting for scans... (Ctrl+C to stop)");

    let mut last_timestamp = 0u64;
    loop {
        std::thread::sleep(Duration::from_millis(100));
        let scan = facade.get_scan_data().expect("facade initialized");
        if !scan.scan_complete || scan.scan_timestamp_us == last_timestamp {
            continue;
        }
        last_timestamp = scan.scan_timestamp_us;

        let verdict = facade.check_safety().expect("facade initialized");
        info!(
            points = scan.point_count(),
            min_mm = verdict.min_distance_mm,
            min_angle = verdict.min_distance_angle,
            emergency_stop = verdict.emergency_stop_triggered,
            warning = verdict.warning_triggered,
            "scan received"
        );
    }
}
