//! Data model for the lidar perception core.

use serde::{Deserialize, Serialize};

/// Maximum number of points a single complete scan may hold.
pub const MAX_SCAN_POINTS: usize = 500;
/// Minimum number of valid points required for a scan to be complete.
pub const MIN_SCAN_POINTS: usize = 360;

/// A single angular measurement emitted by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub distance_mm: u16,
    pub angle_deg: u16,
    pub quality: u8,
    pub timestamp_us: u64,
}

impl Point {
    /// A point with `distance_mm == 0` or `quality == 0` carries no signal.
    pub fn is_valid(&self) -> bool {
        self.distance_mm > 0 && self.quality > 0
    }
}

/// One full (or in-progress) revolution of angular points.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scan {
    pub points: Vec<Point>,
    pub scan_complete: bool,
    pub scan_timestamp_us: u64,
    pub scan_quality: u8,
}

impl Scan {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// True when `scan_complete` holds and the point count invariant
    /// (`[MIN_SCAN_POINTS, MAX_SCAN_POINTS]`) is satisfied.
    pub fn is_well_formed(&self) -> bool {
        if !self.scan_complete {
            return true;
        }
        (MIN_SCAN_POINTS..=MAX_SCAN_POINTS).contains(&self.points.len())
    }
}

/// Derived pass/warn/stop decision for the motion controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub min_distance_mm: u16,
    pub min_distance_angle: u16,
    pub max_distance_mm: u16,
    pub max_distance_angle: u16,
    pub obstacle_detected: bool,
    pub warning_triggered: bool,
    pub emergency_stop_triggered: bool,
    pub timestamp_us: u64,
}

impl SafetyVerdict {
    /// The verdict for "no data": `min = MAX_DISTANCE, max = 0`, all clear.
    /// Callers must distinguish this from an actually-safe reading via
    /// `Scan::scan_complete`.
    pub fn no_data() -> Self {
        Self {
            min_distance_mm: u16::MAX,
            min_distance_angle: 0,
            max_distance_mm: 0,
            max_distance_angle: 0,
            obstacle_detected: false,
            warning_triggered: false,
            emergency_stop_triggered: false,
            timestamp_us: 0,
        }
    }
}

impl Default for SafetyVerdict {
    fn default() -> Self {
        Self::no_data()
    }
}

/// Static configuration for the serial transport and safety thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarConfig {
    pub device_path: String,
    pub baud_rate: u32,
    pub scan_rate_hz: u8,
    pub angular_resolution_deg: f32,
    pub sample_rate_hz: u32,
    pub emergency_stop_mm: u16,
    pub warning_mm: u16,
    pub safe_mm: u16,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/ttyUSB0".to_string(),
            baud_rate: 460_800,
            scan_rate_hz: 10,
            angular_resolution_deg: 1.0,
            sample_rate_hz: 4_000,
            emergency_stop_mm: 500,
            warning_mm: 1_000,
            safe_mm: 2_000,
        }
    }
}

/// Narrow angular window sampled at finer resolution than the rest of a scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveResolutionConfig {
    pub enabled: bool,
    pub base_resolution_deg: f32,
    pub focus_start_deg: u16,
    pub focus_end_deg: u16,
    pub focus_resolution_deg: f32,
    pub priority: u8,
}

impl Default for AdaptiveResolutionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_resolution_deg: 1.0,
            focus_start_deg: 0,
            focus_end_deg: 90,
            focus_resolution_deg: 0.5,
            priority: 1,
        }
    }
}

impl AdaptiveResolutionConfig {
    /// Whether `focus_resolution_deg <= base_resolution_deg` (the focus
    /// window must be at least as fine as the base sweep).
    pub fn is_coherent(&self) -> bool {
        self.focus_resolution_deg <= self.base_resolution_deg
    }

    /// Whether `angle` (normalized `[0, 360)`) falls in the focus window,
    /// accounting for windows that wrap across zero.
    pub fn contains_angle(&self, angle_deg: u16) -> bool {
        let angle = angle_deg % 360;
        if self.focus_start_deg <= self.focus_end_deg {
            (self.focus_start_deg..=self.focus_end_deg).contains(&angle)
        } else {
            angle >= self.focus_start_deg || angle <= self.focus_end_deg
        }
    }
}

/// Multi-sample statistical enhancement stage configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MultiSampleConfig {
    pub sample_count: u8,
    pub sample_interval_ms: u32,
    pub outlier_filter_enabled: bool,
    pub outlier_threshold_pct: f32,
    pub smoothing_window: u8,
    pub statistical_averaging_enabled: bool,
    pub confidence_level_pct: f32,
    pub weighted_averaging_enabled: bool,
    pub temporal_filter_enabled: bool,
    pub temporal_window: u8,
    /// Points with `quality < quality_threshold` are dropped by the quality
    /// gate. Wider than `u8` so callers can express "drop everything" (256)
    /// even though `Point::quality` itself tops out at 255.
    pub quality_threshold: u16,
}

impl Default for MultiSampleConfig {
    fn default() -> Self {
        Self {
            sample_count: 3,
            sample_interval_ms: 50,
            outlier_filter_enabled: true,
            outlier_threshold_pct: 15.0,
            smoothing_window: 3,
            statistical_averaging_enabled: false,
            confidence_level_pct: 95.0,
            weighted_averaging_enabled: false,
            temporal_filter_enabled: false,
            temporal_window: 3,
            quality_threshold: 0,
        }
    }
}

/// One `(reference, measured)` pair used to fit the calibration line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub reference_mm: u16,
    pub measured_mm: u16,
}

/// Global linear correction applied to raw distances: `corrected = raw *
/// scale_factor + distance_offset_mm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calibration {
    pub scale_factor: f32,
    pub distance_offset_mm: f32,
    pub reference_distance_mm: u16,
    pub dynamic_enabled: bool,
    pub adaptive_enabled: bool,
    pub points: Vec<CalibrationPoint>,
    pub confidence_pct: f32,
    pub drift_threshold_pct: f32,
    /// Scans between re-derivations of the fit when `dynamic_enabled`.
    pub check_interval_scans: u32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            distance_offset_mm: 0.0,
            reference_distance_mm: 1_000,
            dynamic_enabled: false,
            adaptive_enabled: false,
            points: Vec::new(),
            confidence_pct: 100.0,
            drift_threshold_pct: 2.0,
            check_interval_scans: 100,
        }
    }
}

impl Calibration {
    /// Identity calibration: `factor = 1.0`, `offset = 0`.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        (self.scale_factor - 1.0).abs() < f32::EPSILON && self.distance_offset_mm.abs() < f32::EPSILON
    }
}

/// Response to `get_device_info`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: u8,
    pub firmware_version: u8,
    pub hardware_version: u8,
    pub serial: [u8; 4],
    pub healthy: bool,
}

/// Running counters accumulated by the lidar facade over its lifetime.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LidarStats {
    pub scans_completed: u64,
    pub scans_dropped: u64,
    pub points_processed: u64,
    pub error_count: u64,
    pub last_scan_duration_us: u64,
}
