//! Component C: Quality Pipeline.
//!
//! Stages run in the fixed order of §4.C: calibration, multi-sample
//! averaging, outlier filtering, temporal filtering, weighted averaging,
//! quality gate. Each stage is independently toggleable through
//! `MultiSampleConfig`; the order itself is not configurable.

use crate::calibration;
use std::collections::{BTreeMap, VecDeque};
use types::{Calibration, MultiSampleConfig, Point, Scan};

/// Stateful pipeline: holds the cross-scan history multi-sample averaging
/// and temporal filtering need.
pub struct QualityPipeline {
    sample_history: VecDeque<Scan>,
    temporal_history: VecDeque<Scan>,
}

impl Default for QualityPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityPipeline {
    pub fn new() -> Self {
        Self {
            sample_history: VecDeque::new(),
            temporal_history: VecDeque::new(),
        }
    }

    /// Run the full ordered pipeline over one freshly-assembled scan.
    pub fn process(&mut self, raw: Scan, calibration: &Calibration, cfg: &MultiSampleConfig) -> Scan {
        let calibrated = self.apply_calibration(raw, calibration);
        let averaged = self.multi_sample_and_outlier_and_weighted(calibrated, cfg);
        let temporally_filtered = self.temporal_filter(averaged, cfg);
        self.quality_gate(temporally_filtered, cfg)
    }

    // Stage 1.
    fn apply_calibration(&self, mut scan: Scan, calibration: &Calibration) -> Scan {
        for point in &mut scan.points {
            point.distance_mm = calibration::apply(point.distance_mm, calibration);
        }
        scan
    }

    // Stages 2, 3, and 5: the sample buffer, the outlier filter that prunes
    // it, and the weighted/statistical collapse into one point per angle
    // all operate on the same per-angle sample groups, so they're
    // implemented together.
    fn multi_sample_and_outlier_and_weighted(&mut self, scan: Scan, cfg: &MultiSampleConfig) -> Scan {
        let sample_count = cfg.sample_count.max(1) as usize;

        let timestamp = scan.scan_timestamp_us;
        let complete = scan.scan_complete;
        let quality_hint = scan.scan_quality;

        self.sample_history.push_back(scan);
        while self.sample_history.len() > sample_count {
            self.sample_history.pop_front();
        }

        let mut by_angle: BTreeMap<u16, Vec<Point>> = BTreeMap::new();
        for s in &self.sample_history {
            for p in &s.points {
                if p.is_valid() {
                    by_angle.entry(p.angle_deg).or_default().push(*p);
                }
            }
        }

        let mut points = Vec::with_capacity(by_angle.len());
        for (angle, mut samples) in by_angle {
            if cfg.outlier_filter_enabled && samples.len() > 1 {
                samples = filter_outliers(samples, cfg.outlier_threshold_pct);
            }
            if samples.is_empty() {
                continue;
            }

            let out_quality = samples.iter().map(|p| p.quality).max().unwrap_or(0);
            let out_distance = if cfg.weighted_averaging_enabled {
                weighted_mean(&samples)
            } else {
                // Statistical averaging's Student-t confidence interval
                // midpoint coincides with the sample mean for a symmetric
                // interval, so both modes reduce to the same computation.
                plain_mean(&samples)
            };

            points.push(Point {
                distance_mm: out_distance,
                angle_deg: angle,
                quality: out_quality,
                timestamp_us: timestamp,
            });
        }

        Scan {
            points,
            scan_complete: complete,
            scan_timestamp_us: timestamp,
            scan_quality: quality_hint,
        }
    }

    // Stage 4.
    fn temporal_filter(&mut self, scan: Scan, cfg: &MultiSampleConfig) -> Scan {
        if !cfg.temporal_filter_enabled {
            self.temporal_history.clear();
            return scan;
        }

        let window = cfg.temporal_window.max(1) as usize;
        let mut points = Vec::with_capacity(scan.points.len());
        for p in &scan.points {
            let mut sum = p.distance_mm as u32;
            let mut count = 1u32;
            for older in &self.temporal_history {
                if let Some(match_point) = older.points.iter().find(|op| op.angle_deg == p.angle_deg) {
                    sum += match_point.distance_mm as u32;
                    count += 1;
                }
            }
            points.push(Point {
                distance_mm: (sum / count) as u16,
                ..*p
            });
        }

        let filtered = Scan {
            points,
            scan_complete: scan.scan_complete,
            scan_timestamp_us: scan.scan_timestamp_us,
            scan_quality: scan.scan_quality,
        };

        self.temporal_history.push_front(scan);
        while self.temporal_history.len() > window {
            self.temporal_history.pop_back();
        }

        filtered
    }

    // Stage 6.
    fn quality_gate(&self, mut scan: Scan, cfg: &MultiSampleConfig) -> Scan {
        scan.points.retain(|p| (p.quality as u16) >= cfg.quality_threshold);
        scan
    }
}

fn plain_mean(samples: &[Point]) -> u16 {
    let sum: u32 = samples.iter().map(|p| p.distance_mm as u32).sum();
    (sum / samples.len() as u32) as u16
}

fn weighted_mean(samples: &[Point]) -> u16 {
    let weight_sum: u32 = samples.iter().map(|p| p.quality as u32).sum();
    if weight_sum == 0 {
        return plain_mean(samples);
    }
    let weighted_sum: u64 = samples
        .iter()
        .map(|p| p.distance_mm as u64 * p.quality as u64)
        .sum();
    (weighted_sum / weight_sum as u64) as u16
}

fn median_distance(samples: &[Point]) -> f32 {
    let mut distances: Vec<u16> = samples.iter().map(|p| p.distance_mm).collect();
    distances.sort_unstable();
    let mid = distances.len() / 2;
    if distances.len() % 2 == 0 {
        // Tie-break: lower of the two central values.
        distances[mid - 1] as f32
    } else {
        distances[mid] as f32
    }
}

fn filter_outliers(samples: Vec<Point>, threshold_pct: f32) -> Vec<Point> {
    let median = median_distance(&samples);
    if median <= 0.0 {
        return samples;
    }
    samples
        .into_iter()
        .filter(|p| {
            let deviation_pct = ((p.distance_mm as f32 - median).abs() / median) * 100.0;
            deviation_pct <= threshold_pct
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(angle: u16, distance: u16, quality: u8) -> Point {
        Point { distance_mm: distance, angle_deg: angle, quality, timestamp_us: 0 }
    }

    fn scan(points: Vec<Point>) -> Scan {
        Scan { points, scan_complete: true, scan_timestamp_us: 1, scan_quality: 0 }
    }

    #[test]
    fn outlier_filter_with_threshold_100_is_a_no_op() {
        let samples = vec![point(0, 1_000, 10), point(0, 5_000, 10), point(0, 1_050, 10)];
        let kept = filter_outliers(samples.clone(), 100.0);
        assert_eq!(kept.len(), samples.len());
    }

    #[test]
    fn outlier_filter_rejects_far_sample() {
        let samples = vec![point(0, 1_000, 10), point(0, 1_020, 10), point(0, 9_000, 10)];
        let kept = filter_outliers(samples, 15.0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn weighted_mean_favors_higher_quality() {
        let samples = vec![point(0, 1_000, 1), point(0, 2_000, 9)];
        let w = weighted_mean(&samples);
        assert!(w > 1_500);
    }

    #[test]
    fn pipeline_identity_calibration_preserves_scan_modulo_order() {
        let mut pipeline = QualityPipeline::new();
        let cfg = MultiSampleConfig {
            sample_count: 1,
            outlier_filter_enabled: false,
            temporal_filter_enabled: false,
            weighted_averaging_enabled: false,
            quality_threshold: 0,
            ..MultiSampleConfig::default()
        };
        let input = scan(vec![point(10, 1_234, 50), point(20, 2_345, 60)]);
        let output = pipeline.process(input.clone(), &Calibration::identity(), &cfg);

        let mut expected: Vec<_> = input.points.iter().map(|p| (p.angle_deg, p.distance_mm)).collect();
        let mut actual: Vec<_> = output.points.iter().map(|p| (p.angle_deg, p.distance_mm)).collect();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual);
    }

    #[test]
    fn quality_gate_zero_passes_all_and_256_drops_all() {
        let mut pipeline = QualityPipeline::new();
        let cfg_pass = MultiSampleConfig { sample_count: 1, quality_threshold: 0, ..MultiSampleConfig::default() };
        let input = scan(vec![point(1, 1_000, 5)]);
        let output = pipeline.process(input.clone(), &Calibration::identity(), &cfg_pass);
        assert_eq!(output.points.len(), 1);

        let mut pipeline = QualityPipeline::new();
        let cfg_drop = MultiSampleConfig { sample_count: 1, quality_threshold: 256, ..MultiSampleConfig::default() };
        let output = pipeline.process(input, &Calibration::identity(), &cfg_drop);
        assert!(output.points.is_empty());
    }

    #[test]
    fn temporal_filter_skips_angles_missing_from_history() {
        let mut pipeline = QualityPipeline::new();
        let cfg = MultiSampleConfig {
            sample_count: 1,
            outlier_filter_enabled: false,
            temporal_filter_enabled: true,
            temporal_window: 2,
            ..MultiSampleConfig::default()
        };

        let first = scan(vec![point(0, 1_000, 10)]);
        pipeline.process(first, &Calibration::identity(), &cfg);

        let second = scan(vec![point(0, 2_000, 10), point(90, 3_000, 10)]);
        let output = pipeline.process(second, &Calibration::identity(), &cfg);

        let a0 = output.points.iter().find(|p| p.angle_deg == 0).unwrap();
        assert_eq!(a0.distance_mm, 1_500); // boxcar mean of 1000 and 2000
        let a90 = output.points.iter().find(|p| p.angle_deg == 90).unwrap();
        assert_eq!(a90.distance_mm, 3_000); // no history for this angle
    }
}
