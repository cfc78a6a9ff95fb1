//! ohtd — main daemon for the OHT-50's lidar perception and network
//! resilience cores.

use anyhow::Result;
use clap::Parser;
use lidar::{LidarConfig, LidarFacade};
use net::{ApController, FallbackSupervisor, ShellApBackend, ShellWifiBackend, StationController};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use types::{ApConfig, FallbackConfig, RoamingConfig};

/// Configuration file structure (`ohtd.toml`).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    identity: IdentityConfig,
    lidar: LidarFileConfig,
    network: NetworkFileConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct IdentityConfig {
    unit_id: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { unit_id: "oht-50-01".to_string() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LidarFileConfig {
    device_path: String,
    scan_rate_hz: u8,
}

impl Default for LidarFileConfig {
    fn default() -> Self {
        Self { device_path: "/dev/ttyUSB0".to_string(), scan_rate_hz: 10 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    interface: String,
    config_dir: PathBuf,
    ap_ssid: String,
    ap_password: String,
}

impl Default for NetworkFileConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            config_dir: PathBuf::from("/etc/oht50"),
            ap_ssid: "OHT50-Fallback".to_string(),
            ap_password: "oht50-setup".to_string(),
        }
    }
}

impl FileConfig {
    fn load(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(FileConfig::default())
        }
    }
}

#[derive(Parser)]
#[command(name = "ohtd", about = "OHT-50 lidar and network resilience daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "config/ohtd.toml")]
    config: PathBuf,

    /// Lidar serial device path. Overrides config file.
    #[arg(long)]
    lidar_device: Option<String>,

    /// Run the lidar core against an in-memory simulated transport
    /// instead of real hardware.
    #[arg(long)]
    sim_lidar: bool,

    /// Network config directory (network.conf, roaming.conf). Overrides config file.
    #[arg(long)]
    network_config_dir: Option<PathBuf>,

    /// Log directory for rolling file logs.
    #[arg(long, default_value = "/var/log/oht50")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args.log_dir, &args.log_level)?;

    let file_config = FileConfig::load(&args.config)?;
    info!(unit = %file_config.identity.unit_id, "starting ohtd");

    let lidar_config = LidarConfig {
        device_path: args.lidar_device.clone().unwrap_or(file_config.lidar.device_path.clone()),
        scan_rate_hz: file_config.lidar.scan_rate_hz,
        ..LidarConfig::default()
    };
    lidar::validate_config(&lidar_config)?;

    let facade = if args.sim_lidar {
        warn!("lidar core running against a simulated transport (--sim-lidar)");
        Arc::new(LidarFacade::with_transport_opener(Box::new(|_cfg| {
            Ok(Box::new(lidar::SimulatedTransport::new(Vec::new())) as Box<dyn lidar::Transport>)
        })))
    } else {
        Arc::new(LidarFacade::new())
    };
    facade.init(lidar_config)?;
    facade.start_scanning()?;
    info!("lidar scan thread running");

    let lidar_monitor = Arc::clone(&facade);
    std::thread::spawn(move || lidar_monitor_loop(lidar_monitor));

    let network_config_dir = args
        .network_config_dir
        .clone()
        .unwrap_or(file_config.network.config_dir.clone());
    let network_conf_path = network_config_dir.join("network.conf");
    let roaming_conf_path = network_config_dir.join("roaming.conf");

    let network_file = netconfig::load_network_config(&network_conf_path)?;
    netconfig::validate_network_config(&network_file)?;
    let roaming_file = netconfig::load_roaming_config(&roaming_conf_path)?;
    netconfig::validate_roaming_config(&roaming_file)?;

    let roaming_config = RoamingConfig {
        enabled: roaming_file.enabled,
        signal_threshold_dbm: roaming_file.signal_threshold_dbm,
        scan_interval_ms: roaming_file.scan_interval_ms,
        handover_timeout_ms: roaming_file.handover_timeout_ms,
        aggressive: roaming_file.aggressive_roaming,
    };
    net::validate_roaming_config(&roaming_config)?;

    let ap_config = ApConfig {
        ssid: file_config.network.ap_ssid.clone(),
        password: file_config.network.ap_password.clone(),
        ..ApConfig::default()
    };
    net::validate_ap_config(&ap_config)?;

    let fallback_config = FallbackConfig {
        signal_strength_threshold_dbm: roaming_file.signal_threshold_dbm,
        ..FallbackConfig::default()
    };
    net::validate_fallback_config(&fallback_config)?;

    let wifi_backend = Arc::new(ShellWifiBackend::new(file_config.network.interface.clone()));
    let ap_backend = Arc::new(ShellApBackend::new(network_config_dir.join("ap")));
    let station = Arc::new(StationController::new(wifi_backend));
    let ap = Arc::new(ApController::new(ap_backend));
    let supervisor = Arc::new(FallbackSupervisor::new(
        Arc::clone(&station),
        ap,
        ap_config,
        network_file.wifi_ssid.clone(),
        network_file.wifi_password.clone(),
        fallback_config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if network_file.wifi_enabled {
        supervisor.enable();
        info!("fallback supervisor enabled");

        let monitor = Arc::clone(&supervisor);
        tokio::spawn(monitor.run_monitoring_loop(shutdown_rx.clone()));

        if roaming_config.enabled {
            let roaming_station = Arc::clone(&station);
            let roaming_shutdown = shutdown_rx.clone();
            tokio::spawn(async move { roaming_loop(roaming_station, roaming_config, roaming_shutdown).await });
        }
    } else {
        info!("wifi disabled in network.conf, fallback supervisor stays disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    supervisor.disable();
    facade.stop_scanning()?;
    info!("ohtd stopped");
    Ok(())
}

/// Polls the published scan and safety verdict, logging edge-triggered
/// transitions rather than every tick.
fn lidar_monitor_loop(facade: Arc<LidarFacade>) {
    let mut last_timestamp = 0u64;
    let mut was_emergency = false;
    let mut was_warning = false;

    loop {
        std::thread::sleep(Duration::from_millis(50));
        let Ok(scan) = facade.get_scan_data() else { break };
        if !scan.scan_complete || scan.scan_timestamp_us == last_timestamp {
            continue;
        }
        last_timestamp = scan.scan_timestamp_us;

        let Ok(verdict) = facade.check_safety() else { break };
        if verdict.emergency_stop_triggered && !was_emergency {
            error!(
                min_mm = verdict.min_distance_mm,
                angle = verdict.min_distance_angle,
                "emergency stop threshold crossed"
            );
        } else if !verdict.emergency_stop_triggered && verdict.warning_triggered && !was_warning {
            warn!(min_mm = verdict.min_distance_mm, angle = verdict.min_distance_angle, "obstacle warning");
        } else if !verdict.obstacle_detected && (was_emergency || was_warning) {
            info!("obstacle cleared");
        }
        was_emergency = verdict.emergency_stop_triggered;
        was_warning = verdict.warning_triggered;
    }
}

/// Drives `handle_roaming` at `scan_interval_ms` cadence until shutdown.
async fn roaming_loop(station: Arc<StationController>, cfg: RoamingConfig, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.scan_interval_ms as u64));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let station = Arc::clone(&station);
                let cfg = cfg;
                if let Err(e) = tokio::task::spawn_blocking(move || station.handle_roaming(&cfg)).await.unwrap() {
                    warn!(error = %e, "roaming check failed");
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

/// Initialize logging with stdout and rolling file output. The returned
/// guard must be held for the process lifetime to ensure logs flush.
fn init_logging(log_dir: &std::path::Path, level: &str) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "ohtd.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("ohtd={level},lidar={level},net={level}")));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false);
    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking_file).with_ansi(false).with_target(true);

    tracing_subscriber::registry().with(filter).with(stdout_layer).with(file_layer).init();

    Ok(guard)
}
