//! Component D: Safety Evaluator.

use types::{LidarConfig, SafetyVerdict, Scan};

/// Derive the safety verdict from the latest scan and the configured
/// thresholds. Never blocks or retries. A scan that isn't `scan_complete`
/// yields `SafetyVerdict::no_data()` — callers must check `scan_complete`
/// themselves to tell "no data" apart from "safe".
pub fn evaluate_safety(scan: &Scan, cfg: &LidarConfig) -> SafetyVerdict {
    if !scan.scan_complete {
        return SafetyVerdict::no_data();
    }

    let mut min_distance_mm = u16::MAX;
    let mut min_distance_angle = 0u16;
    let mut max_distance_mm = 0u16;
    let mut max_distance_angle = 0u16;

    for point in scan.points.iter().filter(|p| p.is_valid()) {
        if point.distance_mm < min_distance_mm {
            min_distance_mm = point.distance_mm;
            min_distance_angle = point.angle_deg;
        }
        if point.distance_mm > max_distance_mm {
            max_distance_mm = point.distance_mm;
            max_distance_angle = point.angle_deg;
        }
    }

    let warning_triggered = min_distance_mm < cfg.warning_mm;
    let emergency_stop_triggered = min_distance_mm < cfg.emergency_stop_mm;

    SafetyVerdict {
        min_distance_mm,
        min_distance_angle,
        max_distance_mm,
        max_distance_angle,
        obstacle_detected: warning_triggered,
        warning_triggered,
        emergency_stop_triggered,
        timestamp_us: scan.scan_timestamp_us,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Point;

    fn uniform_scan(default_mm: u16, offending_angle: u16, offending_mm: u16) -> Scan {
        let points = (0..360u16)
            .map(|angle| Point {
                distance_mm: if angle == offending_angle { offending_mm } else { default_mm },
                angle_deg: angle,
                quality: 50,
                timestamp_us: 7,
            })
            .collect();
        Scan { points, scan_complete: true, scan_timestamp_us: 7, scan_quality: 100 }
    }

    #[test]
    fn emergency_stop_scenario() {
        let scan = uniform_scan(1_500, 90, 400);
        let verdict = evaluate_safety(&scan, &LidarConfig::default());
        assert_eq!(verdict.min_distance_mm, 400);
        assert_eq!(verdict.min_distance_angle, 90);
        assert!(verdict.emergency_stop_triggered);
        assert!(verdict.warning_triggered);
        assert!(verdict.obstacle_detected);
    }

    #[test]
    fn warning_only_scenario() {
        let scan = uniform_scan(1_500, 90, 800);
        let verdict = evaluate_safety(&scan, &LidarConfig::default());
        assert!(!verdict.emergency_stop_triggered);
        assert!(verdict.warning_triggered);
        assert!(verdict.obstacle_detected);
    }

    #[test]
    fn incomplete_scan_yields_no_data() {
        let mut scan = uniform_scan(1_500, 90, 400);
        scan.scan_complete = false;
        let verdict = evaluate_safety(&scan, &LidarConfig::default());
        assert_eq!(verdict, SafetyVerdict::no_data());
    }

    #[test]
    fn invariant_emergency_implies_warning_implies_obstacle() {
        for offending in [100u16, 400, 600, 800, 1_200, 3_000] {
            let scan = uniform_scan(1_500, 0, offending);
            let verdict = evaluate_safety(&scan, &LidarConfig::default());
            if verdict.emergency_stop_triggered {
                assert!(verdict.warning_triggered);
            }
            if verdict.warning_triggered {
                assert!(verdict.obstacle_detected);
            }
        }
    }
}
