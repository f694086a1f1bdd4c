//! Implant placement recommendation synthesizer
//!
//! Produces placeholder candidates: deterministic offsets, angles, and
//! confidences pending a real planning model. What is binding is the
//! candidate shape (position label, offsets, angle, confidence) and the
//! threshold-based risk classification law.

use cbct_common::{BoneDensityReport, ImplantRecommendation, RiskLevel};
use cbct_voxel_extractor::VoxelGrid;
use tracing::debug;

/// Canonical candidate positions, FDI notation, with the jaw region whose
/// density informs the candidate
const CANDIDATE_POSITIONS: [(&str, &str); 6] = [
    ("16", "maxilla"),
    ("13", "maxilla"),
    ("21", "anterior"),
    ("24", "maxilla"),
    ("36", "mandible"),
    ("44", "mandible"),
];

/// Assumed isotropic voxel pitch for offset synthesis, millimetres
const VOXEL_PITCH_MM: f64 = 0.25;

/// Produce one placement candidate per canonical position
///
/// Offsets spread the candidates across the arch deterministically; the
/// confidence grows with the informing region's density and the risk tier
/// applies the fixed `>600 / >400` cutoffs.
#[must_use]
pub fn recommend(grid: &VoxelGrid, report: &BoneDensityReport) -> Vec<ImplantRecommendation> {
    let extent_x = grid.width() as f64 * VOXEL_PITCH_MM;
    let extent_y = grid.height() as f64 * VOXEL_PITCH_MM;

    let recommendations: Vec<ImplantRecommendation> = CANDIDATE_POSITIONS
        .iter()
        .enumerate()
        .map(|(index, (position, region))| {
            let density = report
                .regions
                .get(*region)
                .copied()
                .unwrap_or(report.average.round() as i64) as f64;

            let spread = (index as f64 + 0.5) / CANDIDATE_POSITIONS.len() as f64;
            let x = extent_x * spread;
            let y = if index < 4 { extent_y * 0.3 } else { extent_y * 0.7 };
            let z = 4.0 + 2.0 * (index % 3) as f64;
            let angle = -6.0 + 3.0 * index as f64;
            let confidence = (0.6 + density / 4000.0).clamp(0.1, 0.95);

            ImplantRecommendation {
                position: (*position).to_string(),
                x,
                y,
                z,
                angle,
                confidence,
                risk: RiskLevel::from_density(density),
            }
        })
        .collect();

    debug!(count = recommendations.len(), "placement candidates synthesized");
    recommendations
}
