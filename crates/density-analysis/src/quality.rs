//! Image-quality metrics from global intensity statistics

use cbct_common::QualityMetrics;
use cbct_voxel_extractor::VoxelGrid;
use tracing::debug;

/// Derive bounded quality metrics from the grid's variance and SNR
///
/// Unlike the density average, the statistics here run over *all* samples,
/// zeros included: air and padding count against image quality.
#[must_use]
pub fn calculate_quality_metrics(grid: &VoxelGrid) -> QualityMetrics {
    let plane = grid.plane();
    let count = plane.len() as f64;

    let mean = plane.iter().map(|&s| f64::from(s)).sum::<f64>() / count;
    let variance = plane
        .iter()
        .map(|&s| {
            let diff = f64::from(s) - mean;
            diff * diff
        })
        .sum::<f64>()
        / count;

    // A flat plane has zero variance; floor the denominator instead of
    // dividing by zero.
    let noise = if variance == 0.0 { 1.0 } else { variance.sqrt() };
    let snr = mean / noise;

    let metrics = QualityMetrics {
        image_quality: (snr * 10.0).clamp(0.0, 100.0),
        artifact_level: (variance / 1000.0).clamp(0.0, 100.0),
        diagnostic_value: (80.0 + (snr - 5.0) * 2.0).clamp(0.0, 100.0),
    };

    debug!(
        snr,
        variance,
        image_quality = metrics.image_quality,
        "quality metrics computed"
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbct_voxel_extractor::SampleWidth;

    fn grid_from(samples: Vec<u16>, width: usize, height: usize) -> VoxelGrid {
        VoxelGrid::new(width, height, SampleWidth::Sixteen, samples).unwrap()
    }

    #[test]
    fn test_flat_plane_has_no_noise() {
        let grid = grid_from(vec![500; 16], 4, 4);
        let metrics = calculate_quality_metrics(&grid);

        // Zero variance: SNR falls back to the raw mean, capped at 100.
        assert_eq!(metrics.image_quality, 100.0);
        assert_eq!(metrics.artifact_level, 0.0);
        assert_eq!(metrics.diagnostic_value, 100.0);
    }

    #[test]
    fn test_metrics_stay_bounded() {
        let noisy: Vec<u16> = (0..256)
            .map(|i| if i % 2 == 0 { 0 } else { u16::MAX })
            .collect();
        let grid = grid_from(noisy, 16, 16);

        let metrics = calculate_quality_metrics(&grid);

        for value in [
            metrics.image_quality,
            metrics.artifact_level,
            metrics.diagnostic_value,
        ] {
            assert!((0.0..=100.0).contains(&value), "out of bounds: {value}");
        }
    }

    #[test]
    fn test_reference_grid_statistics() {
        let grid = grid_from(
            vec![
                1000, 1000, 1000, 1000,
                1200, 1200, 1200, 1200,
                800, 800, 800, 800,
                1500, 1500, 1500, 1500,
            ],
            4,
            4,
        );

        let metrics = calculate_quality_metrics(&grid);

        // mean = 1125, variance = 66875, sd ~ 258.6, snr ~ 4.35
        let snr = 1125.0 / 66875.0_f64.sqrt();
        assert!((metrics.image_quality - (snr * 10.0)).abs() < 1e-9);
        assert!((metrics.artifact_level - 66.875).abs() < 1e-9);
        assert!((metrics.diagnostic_value - (80.0 + (snr - 5.0) * 2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_zeros_count_toward_variance() {
        let with_zeros = grid_from(vec![0, 0, 1000, 1000], 2, 2);
        let without = grid_from(vec![1000; 4], 2, 2);

        let noisy = calculate_quality_metrics(&with_zeros);
        let clean = calculate_quality_metrics(&without);

        assert!(noisy.artifact_level > clean.artifact_level);
    }
}
