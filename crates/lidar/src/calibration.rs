//! Calibration stage: linear correction fit over `(reference, measured)`
//! pairs, applied as `corrected = raw * factor + offset`.

use types::{Calibration, CalibrationPoint};

/// Apply the calibration's current `(scale_factor, distance_offset_mm)` to
/// one raw distance, clamped to `[0, 12000]` mm.
pub fn apply(raw_mm: u16, calibration: &Calibration) -> u16 {
    let corrected = raw_mm as f32 * calibration.scale_factor + calibration.distance_offset_mm;
    corrected.clamp(0.0, 12_000.0).round() as u16
}

/// Least-squares fit of `measured = factor * reference + offset` over the
/// stored calibration points, plus the resulting confidence percentage.
/// Returns `None` when fewer than 2 points are stored (identity is kept).
pub fn fit(points: &[CalibrationPoint]) -> Option<(f32, f32, f32)> {
    let n = points.len();
    if n < 2 {
        return None;
    }

    let xs: Vec<f32> = points.iter().map(|p| p.reference_mm as f32).collect();
    let ys: Vec<f32> = points.iter().map(|p| p.measured_mm as f32).collect();

    let n_f = n as f32;
    let sum_x: f32 = xs.iter().sum();
    let sum_y: f32 = ys.iter().sum();
    let sum_xy: f32 = xs.iter().zip(&ys).map(|(x, y)| x * y).sum();
    let sum_xx: f32 = xs.iter().map(|x| x * x).sum();

    let denom = n_f * sum_xx - sum_x * sum_x;
    if denom.abs() < f32::EPSILON {
        return None;
    }

    let factor = (n_f * sum_xy - sum_x * sum_y) / denom;
    let offset = (sum_y - factor * sum_x) / n_f;

    let mean_relative_error: f32 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| {
            let predicted = factor * x + offset;
            if *y == 0.0 {
                0.0
            } else {
                ((predicted - y) / y).abs()
            }
        })
        .sum::<f32>()
        / n_f;

    let confidence = (100.0 * (1.0 - mean_relative_error)).clamp(0.0, 100.0);

    Some((factor, offset, confidence))
}

/// Re-derive `(factor, offset)` from the stored points and report whether
/// either differs from the currently applied values by more than
/// `drift_threshold_pct`%.
pub fn detect_drift(calibration: &Calibration) -> Option<DriftReport> {
    let (factor, offset, confidence) = fit(&calibration.points)?;

    let factor_drift_pct = if calibration.scale_factor.abs() > f32::EPSILON {
        ((factor - calibration.scale_factor) / calibration.scale_factor).abs() * 100.0
    } else {
        0.0
    };
    let offset_drift_pct = if calibration.distance_offset_mm.abs() > f32::EPSILON {
        ((offset - calibration.distance_offset_mm) / calibration.distance_offset_mm).abs() * 100.0
    } else if offset.abs() > f32::EPSILON {
        100.0
    } else {
        0.0
    };

    let drifted = factor_drift_pct > calibration.drift_threshold_pct
        || offset_drift_pct > calibration.drift_threshold_pct;

    Some(DriftReport {
        factor,
        offset,
        confidence,
        drifted,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftReport {
    pub factor: f32,
    pub offset: f32,
    pub confidence: f32,
    pub drifted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_calibration_is_a_no_op() {
        let cal = Calibration::identity();
        assert_eq!(apply(3_000, &cal), 3_000);
    }

    #[test]
    fn fits_the_worked_example() {
        let points = vec![
            CalibrationPoint { reference_mm: 1_000, measured_mm: 1_050 },
            CalibrationPoint { reference_mm: 2_000, measured_mm: 2_100 },
            CalibrationPoint { reference_mm: 5_000, measured_mm: 5_250 },
        ];
        let (factor, offset, confidence) = fit(&points).unwrap();
        assert!((factor - 1.05).abs() < 0.01);
        assert!(offset.abs() < 1.0);
        assert!(confidence > 99.0);

        let cal = Calibration { scale_factor: factor, distance_offset_mm: offset, ..Calibration::default() };
        let corrected = apply(3_000, &cal);
        assert!((corrected as i32 - 3_150).abs() <= 1);
    }

    #[test]
    fn clamps_out_of_range() {
        let cal = Calibration { scale_factor: 10.0, distance_offset_mm: 0.0, ..Calibration::default() };
        assert_eq!(apply(60_000u16.min(u16::MAX), &cal), 12_000);
    }

    #[test]
    fn fewer_than_two_points_yields_no_fit() {
        assert!(fit(&[]).is_none());
        assert!(fit(&[CalibrationPoint { reference_mm: 1000, measured_mm: 1050 }]).is_none());
    }

    #[test]
    fn drift_detection_flags_large_deviation() {
        let cal = Calibration {
            scale_factor: 1.0,
            distance_offset_mm: 0.0,
            drift_threshold_pct: 2.0,
            points: vec![
                CalibrationPoint { reference_mm: 1_000, measured_mm: 1_200 },
                CalibrationPoint { reference_mm: 2_000, measured_mm: 2_400 },
            ],
            ..Calibration::default()
        };
        let report = detect_drift(&cal).unwrap();
        assert!(report.drifted);
    }
}
