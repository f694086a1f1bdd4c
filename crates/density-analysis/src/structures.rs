//! Anatomical structure detection (interface contract)
//!
//! Placeholder detector: each zone reports its characteristic structure
//! with a confidence derived deterministically from the zone's mean
//! density. The output shape is the contract; the values are not a
//! clinical detection.

use cbct_common::AnatomicalStructure;
use cbct_voxel_extractor::VoxelGrid;
use tracing::debug;

use crate::analyzer::DensityCalibration;
use crate::integral::IntegralImage;
use crate::regions::AnatomicalRegion;

fn structure_name(region: AnatomicalRegion) -> &'static str {
    match region {
        AnatomicalRegion::Anterior => "incisive canal",
        AnatomicalRegion::Posterior => "cortical plate",
        AnatomicalRegion::Maxilla => "maxillary sinus floor",
        AnatomicalRegion::Mandible => "inferior alveolar canal",
    }
}

/// Detect the characteristic structure of each zone
///
/// Zones whose clamped rectangle has zero area are skipped.
#[must_use]
pub fn detect_structures(
    grid: &VoxelGrid,
    integral: &IntegralImage,
    calibration: DensityCalibration,
) -> Vec<AnatomicalStructure> {
    let mut structures = Vec::with_capacity(AnatomicalRegion::ALL.len());

    for region in AnatomicalRegion::ALL {
        let rect = region.resolve(grid.width(), grid.height());
        if rect.area() == 0 {
            continue;
        }

        let mean = integral.region_sum(rect.x, rect.y, rect.w, rect.h) as f64 / rect.area() as f64;
        let density = calibration.apply(mean);
        let confidence = (0.5 + density / 2000.0).clamp(0.05, 0.95);

        structures.push(AnatomicalStructure {
            name: structure_name(region).to_string(),
            region: region.label().to_string(),
            confidence,
        });
    }

    debug!(count = structures.len(), "structures detected");
    structures
}
