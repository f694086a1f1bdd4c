//! Bone-density analysis: positive-sample mean, per-region densities, and
//! intensity distributions

use std::collections::HashMap;

use cbct_common::{BoneDensityReport, PipelineError, Result};
use cbct_voxel_extractor::VoxelGrid;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::integral::IntegralImage;
use crate::regions::AnatomicalRegion;

const DISTRIBUTION_BUCKETS: usize = 10;

/// Affine intensity-to-density mapping
///
/// A pluggable transform, not a physical constant: the default offsets raw
/// intensities by 1000 at unit scale, analogous to a Hounsfield rescale but
/// uncalibrated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityCalibration {
    pub offset: f64,
    pub scale: f64,
}

impl DensityCalibration {
    /// Map a mean intensity to density units
    #[must_use]
    pub fn apply(self, mean_intensity: f64) -> f64 {
        (mean_intensity - self.offset) * self.scale
    }
}

impl Default for DensityCalibration {
    fn default() -> Self {
        Self {
            offset: 1000.0,
            scale: 1.0,
        }
    }
}

/// Analyze bone density over the grid's first plane
///
/// The average covers strictly-positive samples only; per-region densities
/// come from clamped rectangle sums over the integral image; the
/// distribution buckets positive samples linearly between their observed
/// minimum and maximum, as percentages.
///
/// # Errors
///
/// Returns `Analysis` when the plane contains no positive samples.
pub fn analyze_bone_density(
    grid: &VoxelGrid,
    integral: &IntegralImage,
    calibration: DensityCalibration,
) -> Result<BoneDensityReport> {
    let positives: Vec<u16> = grid.plane().iter().copied().filter(|&s| s > 0).collect();
    if positives.is_empty() {
        return Err(PipelineError::Analysis(
            "no positive samples in voxel grid".to_string(),
        ));
    }

    let sum: u64 = positives.iter().map(|&s| u64::from(s)).sum();
    let average = calibration.apply(sum as f64 / positives.len() as f64);

    let mut regions = HashMap::with_capacity(AnatomicalRegion::ALL.len());
    for region in AnatomicalRegion::ALL {
        let rect = region.resolve(grid.width(), grid.height());
        let density = if rect.area() == 0 {
            0.0
        } else {
            let region_sum = integral.region_sum(rect.x, rect.y, rect.w, rect.h);
            calibration.apply(region_sum as f64 / rect.area() as f64)
        };
        regions.insert(region.label().to_string(), density.round() as i64);
    }

    let distribution = positive_distribution(&positives);

    debug!(
        average,
        positives = positives.len(),
        "bone density analyzed"
    );

    Ok(BoneDensityReport {
        average,
        distribution,
        regions,
    })
}

/// 10-bucket percentage distribution over positive samples
fn positive_distribution(positives: &[u16]) -> Vec<f64> {
    let min = u64::from(*positives.iter().min().expect("non-empty"));
    let max = u64::from(*positives.iter().max().expect("non-empty"));
    let range = max - min;

    let mut counts = [0u64; DISTRIBUTION_BUCKETS];
    for &sample in positives {
        // All-equal positives collapse into bucket 0 rather than dividing
        // by a zero range.
        let bucket = if range == 0 {
            0
        } else {
            (((u64::from(sample) - min) * DISTRIBUTION_BUCKETS as u64) / (range + 1)) as usize
        };
        counts[bucket.min(DISTRIBUTION_BUCKETS - 1)] += 1;
    }

    let total = positives.len() as f64;
    counts.iter().map(|&c| c as f64 / total * 100.0).collect()
}

/// Linear histogram over all first-plane samples
///
/// Buckets span the observed minimum to maximum sample value; a zero range
/// routes every sample to bucket 0. The bucket counts always sum to the
/// plane's sample count.
#[must_use]
pub fn calculate_histogram(grid: &VoxelGrid, bins: usize) -> Vec<u64> {
    let bins = bins.max(1);
    let plane = grid.plane();

    let min = f64::from(*plane.iter().min().expect("plane is non-empty"));
    let max = f64::from(*plane.iter().max().expect("plane is non-empty"));
    let range = max - min;

    let mut counts = vec![0u64; bins];
    for &sample in plane {
        let index = if range == 0.0 {
            0
        } else {
            (((f64::from(sample) - min) / range) * bins as f64).floor() as usize
        };
        counts[index.min(bins - 1)] += 1;
    }

    counts
}
