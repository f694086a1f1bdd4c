/// Common types and utilities for CBCT volumetric analysis
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("No pixel data element found in container")]
    MissingPixelData,

    #[error("Degenerate voxel grid: {width}x{height}, {slice_count} slices")]
    DegenerateGrid {
        width: usize,
        height: usize,
        slice_count: usize,
    },

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Classification model initialization failed: {0}")]
    ModelInitialization(String),

    #[error("Analysis run cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Image quality metrics derived from the voxel grid, each in `[0, 100]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub image_quality: f64,
    pub artifact_level: f64,
    pub diagnostic_value: f64,
}

/// Bone density report for one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoneDensityReport {
    /// Mean density over strictly-positive samples, in density units
    pub average: f64,

    /// 10-bucket distribution of positive samples, in percent
    pub distribution: Vec<f64>,

    /// Per-region density, in density units
    pub regions: HashMap<String, i64>,
}

/// Risk tier for an implant placement candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    /// Classify a bone density value against the fixed cutoffs
    #[must_use]
    pub fn from_density(density: f64) -> Self {
        if density > 600.0 {
            Self::Low
        } else if density > 400.0 {
            Self::Moderate
        } else {
            Self::High
        }
    }
}

/// One implant placement candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplantRecommendation {
    /// Tooth position in FDI notation (e.g. "16")
    pub position: String,

    /// Offset from the volume origin, millimetres
    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Insertion angle relative to the occlusal plane, degrees
    pub angle: f64,

    /// Placement confidence in `[0, 1]`
    pub confidence: f64,

    /// Risk tier from the density thresholds
    pub risk: RiskLevel,
}

/// Opaque result of the external tissue classification model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TissueClassification {
    pub label: String,
    pub score: f32,
}

/// Detected anatomical structure (interface contract; values are a
/// deterministic placeholder, not a clinical detection)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnatomicalStructure {
    pub name: String,
    pub region: String,
    pub confidence: f64,
}

/// Packaged output of one completed analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Unique run identifier
    pub run_id: String,

    /// Source grid dimensions
    pub width: usize,
    pub height: usize,
    pub slice_count: usize,

    pub bone_density: BoneDensityReport,
    pub quality_metrics: QualityMetrics,
    pub structures: Vec<AnatomicalStructure>,
    pub implant_recommendations: Vec<ImplantRecommendation>,

    /// Wall-clock duration of the run
    pub elapsed_ms: u64,
}

impl AnalysisResult {
    /// Find a recommendation by FDI position
    #[must_use]
    pub fn recommendation(&self, position: &str) -> Option<&ImplantRecommendation> {
        self.implant_recommendations
            .iter()
            .find(|r| r.position == position)
    }

    /// Density for a named region, if analyzed
    #[must_use]
    pub fn region_density(&self, region: &str) -> Option<i64> {
        self.bone_density.regions.get(region).copied()
    }
}
