//! Region and histogram analysis over extracted voxel grids
//!
//! Builds the integral-image acceleration structure once per grid, then
//! derives bone-density regions, intensity distributions, and image-quality
//! metrics from it. All analysis reads the grid's first plane.

mod analyzer;
mod integral;
mod quality;
mod regions;
mod structures;

pub use analyzer::{analyze_bone_density, calculate_histogram, DensityCalibration};
pub use integral::IntegralImage;
pub use quality::calculate_quality_metrics;
pub use regions::{AnatomicalRegion, PixelRect};
pub use structures::detect_structures;
