//! Component E: Lidar Facade — lifecycle, configuration, shared-state
//! locking, and the dedicated scan thread that runs B -> C -> D.

use crate::assembler::ScanAssembler;
use crate::calibration;
use crate::pipeline::QualityPipeline;
use crate::safety::evaluate_safety;
use crate::transport::{self, SerialTransport, Transport};
use crate::{LidarError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use types::{
    AdaptiveResolutionConfig, Calibration, DeviceInfo, LidarConfig, LidarStats, MultiSampleConfig,
    SafetyVerdict, Scan,
};

const MAX_CONSECUTIVE_ERRORS: u32 = 20;
const RESET_SETTLE: Duration = Duration::from_secs(2);
const INFO_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// `Uninitialized -> Initialized -> Scanning -> Initialized -> Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeState {
    Uninitialized,
    Initialized,
    Scanning,
    Error,
}

#[derive(Clone)]
struct Published {
    scan: Scan,
    verdict: SafetyVerdict,
}

impl Default for Published {
    fn default() -> Self {
        Self { scan: Scan::default(), verdict: SafetyVerdict::no_data() }
    }
}

type BoxedTransport = Box<dyn Transport>;
pub type TransportOpener = Box<dyn Fn(&LidarConfig) -> Result<BoxedTransport> + Send + Sync>;

struct ScanThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the Serial Transport, the double-buffered `Scan`, the quality
/// pipeline configuration, the calibration state, and the scan thread
/// handle. Intended to be shared as `Arc<LidarFacade>`; `start_scanning`
/// and `reset` take `&Arc<Self>` since they hand a clone to the scan
/// thread.
pub struct LidarFacade {
    state: Mutex<FacadeState>,
    config: Mutex<Option<LidarConfig>>,
    pipeline_config: Mutex<MultiSampleConfig>,
    adaptive_resolution: Mutex<AdaptiveResolutionConfig>,
    calibration: Mutex<Calibration>,
    published: Mutex<Published>,
    stats: Mutex<LidarStats>,
    transport: Arc<Mutex<Option<BoxedTransport>>>,
    thread: Mutex<Option<ScanThread>>,
    opener: TransportOpener,
}

impl Default for LidarFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl LidarFacade {
    /// Production facade: opens a real `SerialTransport` on `init`.
    pub fn new() -> Self {
        Self::with_transport_opener(Box::new(|cfg: &LidarConfig| {
            Ok(Box::new(SerialTransport::open(&cfg.device_path, cfg.baud_rate)?) as BoxedTransport)
        }))
    }

    /// Test/simulation facade: `opener` is invoked in place of opening
    /// hardware. This is the explicit injection point the design notes
    /// require instead of a silent "pretend to be hardware" fallback.
    pub fn with_transport_opener(opener: TransportOpener) -> Self {
        Self {
            state: Mutex::new(FacadeState::Uninitialized),
            config: Mutex::new(None),
            pipeline_config: Mutex::new(MultiSampleConfig::default()),
            adaptive_resolution: Mutex::new(AdaptiveResolutionConfig::default()),
            calibration: Mutex::new(Calibration::default()),
            published: Mutex::new(Published::default()),
            stats: Mutex::new(LidarStats::default()),
            transport: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
            opener,
        }
    }

    pub fn state(&self) -> FacadeState {
        *self.state.lock().unwrap()
    }

    pub fn init(&self, cfg: LidarConfig) -> Result<()> {
        crate::validate_config(&cfg)?;

        let mut state = self.state.lock().unwrap();
        if *state != FacadeState::Uninitialized {
            return Err(LidarError::AlreadyInitialized);
        }

        let opened = (self.opener)(&cfg)?;
        *self.transport.lock().unwrap() = Some(opened);
        *self.calibration.lock().unwrap() = Calibration::default();
        *self.pipeline_config.lock().unwrap() = MultiSampleConfig::default();
        *self.adaptive_resolution.lock().unwrap() = AdaptiveResolutionConfig::default();
        *self.config.lock().unwrap() = Some(cfg);
        *state = FacadeState::Initialized;
        info!("lidar facade initialized");
        Ok(())
    }

    pub fn start_scanning(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match *state {
            FacadeState::Uninitialized | FacadeState::Error => return Err(LidarError::NotInitialized),
            FacadeState::Scanning => return Err(LidarError::AlreadyActive),
            FacadeState::Initialized => {}
        }

        let transport = self
            .transport
            .lock()
            .unwrap()
            .take()
            .ok_or(LidarError::NotInitialized)?;

        let stop = Arc::new(AtomicBool::new(false));
        let facade = Arc::clone(self);
        let stop_clone = Arc::clone(&stop);
        let handle = std::thread::spawn(move || scan_loop(facade, transport, stop_clone));

        *self.thread.lock().unwrap() = Some(ScanThread { stop, handle });
        *state = FacadeState::Scanning;
        info!("lidar scan thread started");
        Ok(())
    }

    /// Always returns `Ok` if not currently scanning.
    pub fn stop_scanning(&self) -> Result<()> {
        let running = self.thread.lock().unwrap().take();
        let Some(running) = running else {
            return Ok(());
        };

        running.stop.store(true, Ordering::Relaxed);
        let _ = running.handle.join();

        let mut state = self.state.lock().unwrap();
        if *state == FacadeState::Scanning {
            *state = FacadeState::Initialized;
        }
        info!("lidar scan thread stopped");
        Ok(())
    }

    pub fn get_scan_data(&self) -> Result<Scan> {
        self.require_initialized()?;
        Ok(self.published.lock().unwrap().scan.clone())
    }

    pub fn check_safety(&self) -> Result<SafetyVerdict> {
        self.require_initialized()?;
        Ok(self.published.lock().unwrap().verdict)
    }

    pub fn get_statistics(&self) -> Result<LidarStats> {
        self.require_initialized()?;
        Ok(*self.stats.lock().unwrap())
    }

    pub fn get_config(&self) -> Result<(MultiSampleConfig, Calibration)> {
        self.require_initialized()?;
        Ok((*self.pipeline_config.lock().unwrap(), self.calibration.lock().unwrap().clone()))
    }

    /// Takes effect on the next scan (never mid-scan): the scan thread
    /// reads this under its own lock acquisition each revolution.
    pub fn set_pipeline_config(&self, cfg: MultiSampleConfig) -> Result<()> {
        self.require_initialized()?;
        *self.pipeline_config.lock().unwrap() = cfg;
        Ok(())
    }

    pub fn set_calibration(&self, calibration: Calibration) -> Result<()> {
        self.require_initialized()?;
        *self.calibration.lock().unwrap() = calibration;
        Ok(())
    }

    pub fn get_adaptive_resolution(&self) -> Result<AdaptiveResolutionConfig> {
        self.require_initialized()?;
        Ok(*self.adaptive_resolution.lock().unwrap())
    }

    /// Rejects a focus window finer-priority-than-base contradiction
    /// (`focus_resolution_deg > base_resolution_deg`) per the type's own
    /// `is_coherent` invariant; the sensor has no protocol command to act
    /// on this beyond validation, so the facade only stores and reports it.
    pub fn set_adaptive_resolution(&self, cfg: AdaptiveResolutionConfig) -> Result<()> {
        self.require_initialized()?;
        if !cfg.is_coherent() {
            return Err(LidarError::InvalidParameter(format!(
                "focus_resolution_deg ({}) must be <= base_resolution_deg ({})",
                cfg.focus_resolution_deg, cfg.base_resolution_deg
            )));
        }
        *self.adaptive_resolution.lock().unwrap() = cfg;
        Ok(())
    }

    pub fn get_device_info(&self) -> Result<DeviceInfo> {
        if self.state() != FacadeState::Initialized {
            return Err(LidarError::NotInitialized);
        }
        let mut slot = self.transport.lock().unwrap();
        let transport = slot.as_mut().ok_or(LidarError::NotInitialized)?;

        transport.send_command(&transport::CMD_GET_INFO)?;
        let raw = read_response(&mut **transport, 8, INFO_RESPONSE_TIMEOUT)?;

        Ok(DeviceInfo {
            model: raw[0],
            firmware_version: raw[1],
            hardware_version: raw[2],
            serial: [raw[3], raw[4], raw[5], raw[6]],
            healthy: raw[7] == 0,
        })
    }

    pub fn health_check(&self) -> Result<()> {
        if self.state() != FacadeState::Initialized {
            return Err(LidarError::NotInitialized);
        }
        let mut slot = self.transport.lock().unwrap();
        let transport = slot.as_mut().ok_or(LidarError::NotInitialized)?;

        transport.send_command(&transport::CMD_GET_HEALTH)?;
        let raw = read_response(&mut **transport, 1, INFO_RESPONSE_TIMEOUT)?;
        if raw[0] == 0 {
            Ok(())
        } else {
            Err(LidarError::Unhealthy(raw[0]))
        }
    }

    /// May be issued from `Initialized` or `Scanning`; if scanning, it is
    /// stopped first and restarted after the device settles.
    pub fn reset(self: &Arc<Self>) -> Result<()> {
        if self.state() == FacadeState::Uninitialized {
            return Err(LidarError::NotInitialized);
        }
        let was_scanning = self.state() == FacadeState::Scanning;
        if was_scanning {
            self.stop_scanning()?;
        }

        {
            let mut slot = self.transport.lock().unwrap();
            let transport = slot.as_mut().ok_or(LidarError::NotInitialized)?;
            transport.send_command(&transport::CMD_RESET)?;
        }
        std::thread::sleep(RESET_SETTLE);

        if was_scanning {
            self.start_scanning()?;
        }
        Ok(())
    }

    /// Stops scanning, closes the transport, and resets state to
    /// `Uninitialized`, preserving the facade object itself (and its lock
    /// primitives) for a subsequent `init`.
    pub fn deinit(&self) -> Result<()> {
        if self.state() == FacadeState::Uninitialized {
            return Err(LidarError::NotInitialized);
        }
        self.stop_scanning()?;
        *self.transport.lock().unwrap() = None;
        *self.config.lock().unwrap() = None;
        *self.published.lock().unwrap() = Published::default();
        *self.state.lock().unwrap() = FacadeState::Uninitialized;
        info!("lidar facade deinitialized");
        Ok(())
    }

    fn require_initialized(&self) -> Result<()> {
        match self.state() {
            FacadeState::Uninitialized => Err(LidarError::NotInitialized),
            _ => Ok(()),
        }
    }
}

fn read_response(transport: &mut dyn Transport, min_len: usize, timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut buf = Vec::new();
    let mut scratch = [0u8; 32];
    while buf.len() < min_len {
        if Instant::now() >= deadline {
            return Err(LidarError::ProtocolShortResponse(buf.len()));
        }
        let n = transport.read_bytes(&mut scratch)?;
        if n == 0 {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        buf.extend_from_slice(&scratch[..n]);
    }
    Ok(buf)
}

fn scan_loop(facade: Arc<LidarFacade>, mut transport: BoxedTransport, stop: Arc<AtomicBool>) {
    let _ = transport.send_command(&transport::CMD_START_SCAN);

    let mut assembler = ScanAssembler::new();
    let mut pipeline = QualityPipeline::new();
    let mut consecutive_errors: u32 = 0;
    let mut buf = [0u8; 256];
    let mut revolution_start = Instant::now();

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        match transport.read_bytes(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                consecutive_errors = 0;
                let now_us = monotonic_us();
                if let Some(raw_scan) = assembler.feed(&buf[..n], now_us) {
                    let duration_us = revolution_start.elapsed().as_micros() as u64;
                    revolution_start = Instant::now();
                    publish(&facade, &mut pipeline, raw_scan, duration_us);
                }
                let dropped = assembler.take_dropped();
                if dropped > 0 {
                    facade.stats.lock().unwrap().scans_dropped += dropped as u64;
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                facade.stats.lock().unwrap().error_count += 1;
                warn!(?e, consecutive_errors, "lidar transport read error");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    *facade.state.lock().unwrap() = FacadeState::Error;
                    error!(consecutive_errors, "lidar core entering Error state");
                    break;
                }
            }
        }
    }

    let _ = transport.send_command(&transport::CMD_STOP_SCAN);
    *facade.transport.lock().unwrap() = Some(transport);
}

fn publish(facade: &Arc<LidarFacade>, pipeline: &mut QualityPipeline, raw_scan: Scan, duration_us: u64) {
    let calibration = facade.calibration.lock().unwrap().clone();
    let pipeline_cfg = *facade.pipeline_config.lock().unwrap();
    let cfg = facade.config.lock().unwrap().clone().unwrap_or_default();

    let point_count = raw_scan.point_count();
    let processed = pipeline.process(raw_scan, &calibration, &pipeline_cfg);
    let verdict = evaluate_safety(&processed, &cfg);

    {
        let mut published = facade.published.lock().unwrap();
        published.scan = processed;
        published.verdict = verdict;
    }

    let scans_completed = {
        let mut stats = facade.stats.lock().unwrap();
        stats.scans_completed += 1;
        stats.points_processed += point_count as u64;
        stats.last_scan_duration_us = duration_us;
        stats.scans_completed
    };

    check_calibration_drift(facade, &calibration, scans_completed);
}

/// Re-derives the calibration fit every `check_interval_scans` completed
/// revolutions when dynamic calibration is enabled, logging a warning if
/// the live fit has drifted past `drift_threshold_pct`.
fn check_calibration_drift(facade: &Arc<LidarFacade>, calibration: &Calibration, scans_completed: u64) {
    if !calibration.dynamic_enabled {
        return;
    }
    let interval = calibration.check_interval_scans.max(1) as u64;
    if scans_completed % interval != 0 {
        return;
    }

    if let Some(report) = calibration::detect_drift(calibration) {
        if report.drifted {
            warn!(
                factor = report.factor,
                offset = report.offset,
                confidence = report.confidence,
                "lidar calibration drift detected"
            );
        } else {
            tracing::trace!(confidence = report.confidence, "lidar calibration drift check: stable");
        }
    }
}

fn monotonic_us() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}
