//! Serial transport, scan assembly, quality pipeline, and safety evaluation
//! for the rotating-laser rangefinder.

mod assembler;
mod calibration;
mod facade;
mod pipeline;
mod safety;
mod transport;

pub use assembler::ScanAssembler;
pub use calibration::{detect_drift, fit, DriftReport};
pub use facade::{FacadeState, LidarFacade, TransportOpener};
pub use pipeline::QualityPipeline;
pub use safety::evaluate_safety;
pub use transport::{SerialTransport, SimulatedTransport, Transport};

pub use types::{
    AdaptiveResolutionConfig, Calibration, CalibrationPoint, DeviceInfo, LidarConfig, LidarStats,
    MultiSampleConfig, Point, SafetyVerdict, Scan, MAX_SCAN_POINTS, MIN_SCAN_POINTS,
};

use thiserror::Error;

/// Error kinds surfaced by the lidar core. Validation errors are reported
/// synchronously; transport/protocol errors are counted and retried inside
/// the scan loop before the facade ever escalates to `Error`.
#[derive(Error, Debug)]
pub enum LidarError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("lidar facade already initialized")]
    AlreadyInitialized,

    #[error("lidar facade not initialized")]
    NotInitialized,

    #[error("scan thread already active")]
    AlreadyActive,

    #[error("I/O error communicating with lidar transport: {0}")]
    TransportIo(#[from] std::io::Error),

    #[error("wrote {written} of {requested} bytes to transport")]
    TransportWriteShort { written: usize, requested: usize },

    #[error("device info response too short ({0} bytes, need at least 8)")]
    ProtocolShortResponse(usize),

    #[error("device reports unhealthy status (code {0})")]
    Unhealthy(u8),

    #[error("operation timed out")]
    Timeout,

    #[error("lidar core entered error state after {0} consecutive transport failures")]
    Error(u32),
}

pub type Result<T> = std::result::Result<T, LidarError>;

/// Validate a `LidarConfig` per the §3.1 invariants: baud must equal
/// 460 800, scan rate in `[8, 12]` Hz, and the three safety thresholds
/// must be strictly ordered.
pub fn validate_config(cfg: &LidarConfig) -> Result<()> {
    if cfg.baud_rate != 460_800 {
        return Err(LidarError::InvalidParameter(format!(
            "baud_rate must be 460800, got {}",
            cfg.baud_rate
        )));
    }
    if !(8..=12).contains(&cfg.scan_rate_hz) {
        return Err(LidarError::InvalidParameter(format!(
            "scan_rate_hz must be in [8, 12], got {}",
            cfg.scan_rate_hz
        )));
    }
    if !(cfg.emergency_stop_mm < cfg.warning_mm && cfg.warning_mm < cfg.safe_mm) {
        return Err(LidarError::InvalidParameter(format!(
            "thresholds must satisfy emergency < warning < safe, got {} < {} < {}",
            cfg.emergency_stop_mm, cfg.warning_mm, cfg.safe_mm
        )));
    }
    Ok(())
}
