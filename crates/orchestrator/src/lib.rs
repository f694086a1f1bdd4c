//! CBCT Analysis Orchestrator
//!
//! Sequences one analysis run: parse the container, extract the voxel
//! grid, run the density/quality analyzers, synthesize placement
//! candidates, and package the result. Progress is reported as a monotonic
//! percentage at stage boundaries; a failure at any stage aborts the run
//! with the originating error and no partial result.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cbct_common::{AnalysisResult, PipelineError, Result};
use cbct_container_parser::parse;
use cbct_density_analysis::{
    analyze_bone_density, calculate_quality_metrics, detect_structures, DensityCalibration,
    IntegralImage,
};
use cbct_implant_planning::recommend;
use cbct_tissue_classification::{
    ClassifierConfig, DevicePreference, OnnxTissueClassifier, TissueClassifier,
};
use cbct_voxel_extractor::{extract, VoxelGrid};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Idle,
    Parsing,
    Extracting,
    Analyzing,
    Recommending,
    Done,
    Failed,
}

impl AnalysisStage {
    /// Human-readable stage name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Parsing => "parsing",
            Self::Extracting => "extracting",
            Self::Analyzing => "analyzing",
            Self::Recommending => "recommending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Whether the pipeline stops at this stage
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// One progress report, emitted at stage boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: AnalysisStage,
    pub percent: u8,
}

/// Cooperative cancellation handle, checked between stages
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the run aborts at the next stage boundary
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What to do when the classification model fails
///
/// `Abort` fails the whole run, blocking the otherwise-independent
/// density analysis; `Continue` decouples them and only omits the
/// (informational) classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFailurePolicy {
    Abort,
    Continue,
}

impl Default for ModelFailurePolicy {
    fn default() -> Self {
        Self::Abort
    }
}

/// Analysis run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Intensity-to-density calibration
    #[serde(default)]
    pub calibration: DensityCalibration,

    /// Path to the tissue classification model; `None` skips the
    /// classification stage entirely
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Device-preference hint for the model runtime
    #[serde(default)]
    pub device: DevicePreference,

    /// Policy applied when the classification model fails
    #[serde(default)]
    pub on_model_failure: ModelFailurePolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            calibration: DensityCalibration::default(),
            model_path: None,
            device: DevicePreference::default(),
            on_model_failure: ModelFailurePolicy::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file cannot be read and `Config` when it does
    /// not parse as an `AnalysisConfig`.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&contents)
            .map_err(|e| PipelineError::Config(format!("failed to parse config YAML: {e}")))
    }
}

/// One-file analysis pipeline
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    classifier: Option<Arc<dyn TissueClassifier>>,
}

impl AnalysisPipeline {
    /// Build a pipeline; a configured model path wires up the ONNX
    /// classifier automatically
    #[must_use]
    pub fn new(config: AnalysisConfig) -> Self {
        let classifier: Option<Arc<dyn TissueClassifier>> =
            config.model_path.as_ref().map(|path| {
                let mut classifier_config = ClassifierConfig::new(path.clone());
                classifier_config.device = config.device;
                Arc::new(OnnxTissueClassifier::new(classifier_config))
                    as Arc<dyn TissueClassifier>
            });

        Self { config, classifier }
    }

    /// Replace the classification collaborator
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn TissueClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Run the pipeline with default progress and cancellation handling
    ///
    /// # Errors
    ///
    /// Propagates the first stage error; see [`PipelineError`].
    pub async fn run(&self, path: &Path) -> Result<AnalysisResult> {
        self.run_with_progress(path, &CancellationToken::new(), |_| {})
            .await
    }

    /// Run the pipeline, reporting progress at stage boundaries
    ///
    /// # Errors
    ///
    /// Propagates the first stage error; `Cancelled` when the token was
    /// triggered between stages. No partial result is ever produced.
    pub async fn run_with_progress<F>(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<AnalysisResult>
    where
        F: Fn(ProgressUpdate),
    {
        let started = Instant::now();
        let report = |stage: AnalysisStage, percent: u8| {
            on_progress(ProgressUpdate { stage, percent });
        };

        ensure_active(cancel)?;
        report(AnalysisStage::Parsing, 10);
        info!(file = %path.display(), "reading scan");
        let bytes = tokio::fs::read(path).await?;
        let dataset = parse(&bytes)?;

        ensure_active(cancel)?;
        report(AnalysisStage::Extracting, 20);
        let grid = Arc::new(extract(&dataset, &bytes)?);
        info!(
            width = grid.width(),
            height = grid.height(),
            slices = grid.slice_count(),
            "voxel grid extracted"
        );

        self.classify(&grid).await?;

        ensure_active(cancel)?;
        report(AnalysisStage::Analyzing, 40);
        let integral = Arc::new(IntegralImage::build(&grid));
        let calibration = self.config.calibration;

        let quality_task = {
            let grid = Arc::clone(&grid);
            tokio::task::spawn_blocking(move || calculate_quality_metrics(&grid))
        };
        let structures_task = {
            let grid = Arc::clone(&grid);
            let integral = Arc::clone(&integral);
            tokio::task::spawn_blocking(move || detect_structures(&grid, &integral, calibration))
        };

        let (quality_metrics, structures) = tokio::join!(quality_task, structures_task);
        let quality_metrics = quality_metrics
            .map_err(|e| PipelineError::Analysis(format!("quality task failed: {e}")))?;
        let structures = structures
            .map_err(|e| PipelineError::Analysis(format!("structure task failed: {e}")))?;

        ensure_active(cancel)?;
        report(AnalysisStage::Analyzing, 60);
        let bone_density = analyze_bone_density(&grid, &integral, calibration)?;

        ensure_active(cancel)?;
        report(AnalysisStage::Recommending, 80);
        let implant_recommendations = recommend(&grid, &bone_density);

        let result = AnalysisResult {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            width: grid.width(),
            height: grid.height(),
            slice_count: grid.slice_count(),
            bone_density,
            quality_metrics,
            structures,
            implant_recommendations,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        report(AnalysisStage::Done, 100);
        info!(run_id = %result.run_id, elapsed_ms = result.elapsed_ms, "analysis complete");

        Ok(result)
    }

    /// Invoke the external classification model, honoring the failure
    /// policy; the result is logged only
    async fn classify(&self, grid: &VoxelGrid) -> Result<()> {
        let Some(classifier) = &self.classifier else {
            return Ok(());
        };

        match classifier.classify(grid).await {
            Ok(classification) => {
                info!(
                    classifier = classifier.name(),
                    label = %classification.label,
                    score = classification.score,
                    "tissue classification (informational only)"
                );
                Ok(())
            }
            Err(err) => match self.config.on_model_failure {
                ModelFailurePolicy::Abort => Err(err),
                ModelFailurePolicy::Continue => {
                    warn!(error = %err, "classification failed; continuing without it");
                    Ok(())
                }
            },
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}
