//! External tissue classification collaborator
//!
//! Wraps the opaque bone-quality classification model behind the
//! [`TissueClassifier`] trait. The orchestrator only logs the returned
//! label/score; it is not folded into the analysis result. Any model
//! failure surfaces as `ModelInitialization` and the caller's policy
//! decides whether it aborts the run.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use cbct_common::{PipelineError, Result, TissueClassification};
use cbct_voxel_extractor::window::{DisplayWindow, WindowLut};
use cbct_voxel_extractor::VoxelGrid;
use ndarray::{Array, ShapeBuilder};
use once_cell::sync::OnceCell;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Bone-quality classes (Misch classification)
const TISSUE_LABELS: [&str; 4] = ["D1", "D2", "D3", "D4"];

/// Execution device hint for the model runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Try hardware acceleration first, fall back to CPU
    Auto,
    /// GPU acceleration only (with CPU fallback)
    Gpu,
    /// CPU only
    Cpu,
}

impl DevicePreference {
    fn providers(self) -> Vec<ExecutionProviderDispatch> {
        match self {
            Self::Auto => vec![
                CoreMLExecutionProvider::default().build(),
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            Self::Gpu => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            Self::Cpu => vec![CPUExecutionProvider::default().build()],
        }
    }
}

impl Default for DevicePreference {
    fn default() -> Self {
        Self::Auto
    }
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Path to the ONNX model
    pub model_path: PathBuf,

    /// Device-preference hint
    #[serde(default)]
    pub device: DevicePreference,

    /// Model input size (square)
    #[serde(default = "default_input_size")]
    pub input_size: u32,
}

fn default_input_size() -> u32 {
    224
}

impl ClassifierConfig {
    #[must_use]
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            device: DevicePreference::default(),
            input_size: default_input_size(),
        }
    }
}

/// Collaborator interface to the classification model
#[async_trait]
pub trait TissueClassifier: Send + Sync {
    /// Classifier identifier for logging
    fn name(&self) -> &str;

    /// Classify the dominant tissue quality of a voxel grid
    async fn classify(&self, grid: &VoxelGrid) -> Result<TissueClassification>;
}

fn model_error(err: impl ToString) -> PipelineError {
    PipelineError::ModelInitialization(err.to_string())
}

/// Create an ONNX Runtime session honoring the device preference
///
/// # Errors
///
/// Returns `ModelInitialization` when the model file is missing or session
/// creation fails.
pub fn create_session(model_path: &Path, device: DevicePreference) -> Result<Session> {
    if !model_path.exists() {
        return Err(model_error(format!(
            "model file not found: {}",
            model_path.display()
        )));
    }

    let num_threads = num_cpus::get_physical();

    Session::builder()
        .map_err(model_error)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(model_error)?
        .with_intra_threads(num_threads)
        .map_err(model_error)?
        .with_memory_pattern(true)
        .map_err(model_error)?
        .with_execution_providers(device.providers())
        .map_err(model_error)?
        .commit_from_file(model_path)
        .map_err(model_error)
}

/// ONNX-backed tissue classifier with a lazily loaded, cached session
pub struct OnnxTissueClassifier {
    config: ClassifierConfig,
    /// Loaded once and reused across runs; Mutex because `Session::run`
    /// takes `&mut self`
    cached_session: OnceCell<Mutex<Session>>,
}

impl OnnxTissueClassifier {
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            cached_session: OnceCell::new(),
        }
    }

    fn get_or_load_session(&self) -> Result<&Mutex<Session>> {
        self.cached_session.get_or_try_init(|| {
            info!(
                model = %self.config.model_path.display(),
                device = ?self.config.device,
                "loading tissue classification model (first time only)"
            );
            let session = create_session(&self.config.model_path, self.config.device)?;
            Ok(Mutex::new(session))
        })
    }

    /// Convert the grid's first plane to the model's normalized input
    fn preprocess(&self, grid: &VoxelGrid) -> Array<f32, ndarray::IxDyn> {
        let size = self.config.input_size;

        // Windowed 8-bit rendering, resized to the model input square.
        let lut = WindowLut::build(DisplayWindow::bone(), grid.sample_width());
        let preview = cbct_voxel_extractor::window::render_preview(grid, &lut);
        let resized =
            image::imageops::resize(&preview, size, size, image::imageops::FilterType::Triangle);

        // Replicate the single channel into CHW RGB, scaled to [0, 1].
        let mut array = Array::zeros((1, 3, size as usize, size as usize).f());
        for (x, y, pixel) in resized.enumerate_pixels() {
            let value = f32::from(pixel[0]) / 255.0;
            for channel in 0..3 {
                array[[0, channel, y as usize, x as usize]] = value;
            }
        }

        array.into_dyn()
    }
}

#[async_trait]
impl TissueClassifier for OnnxTissueClassifier {
    fn name(&self) -> &str {
        "onnx_tissue_classifier"
    }

    async fn classify(&self, grid: &VoxelGrid) -> Result<TissueClassification> {
        let session_mutex = self.get_or_load_session()?;
        let input = self.preprocess(grid);

        let mut session = session_mutex
            .lock()
            .map_err(|e| model_error(format!("session mutex poisoned: {e}")))?;

        let input_tensor = TensorRef::from_array_view(input.view()).map_err(model_error)?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(model_error)?;

        let (_, scores) = outputs
            .iter()
            .next()
            .ok_or_else(|| model_error("model produced no outputs"))?;
        let (_shape, scores) = scores.try_extract_tensor::<f32>().map_err(model_error)?;

        let classification = classify_scores(scores)?;

        debug!(
            label = %classification.label,
            score = classification.score,
            "tissue classified"
        );

        Ok(classification)
    }
}

/// Pick the winning class from raw model scores (softmax-normalized)
fn classify_scores(scores: &[f32]) -> Result<TissueClassification> {
    if scores.is_empty() {
        return Err(model_error("model produced an empty score vector"));
    }

    let max_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp_sum: f32 = scores.iter().map(|&s| (s - max_score).exp()).sum();

    let (index, &best) = scores
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .expect("non-empty scores");

    let label = TISSUE_LABELS
        .get(index)
        .map_or_else(|| format!("class_{index}"), |&l| l.to_string());

    Ok(TissueClassification {
        label,
        score: (best - max_score).exp() / exp_sum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbct_voxel_extractor::SampleWidth;

    #[test]
    fn test_classify_scores_picks_argmax() {
        let result = classify_scores(&[0.1, 2.5, 0.3, 0.2]).unwrap();
        assert_eq!(result.label, "D2");
        assert!(result.score > 0.5);
    }

    #[test]
    fn test_classify_scores_out_of_label_range() {
        let result = classify_scores(&[0.0, 0.0, 0.0, 0.0, 9.0]).unwrap();
        assert_eq!(result.label, "class_4");
    }

    #[test]
    fn test_classify_scores_empty_is_error() {
        let err = classify_scores(&[]).unwrap_err();
        assert!(matches!(err, PipelineError::ModelInitialization(_)));
    }

    #[test]
    fn test_preprocess_shape() {
        let grid =
            VoxelGrid::new(8, 8, SampleWidth::Sixteen, vec![1400; 64]).unwrap();
        let classifier = OnnxTissueClassifier::new(ClassifierConfig::new("unused.onnx"));

        let input = classifier.preprocess(&grid);
        assert_eq!(input.shape(), &[1, 3, 224, 224]);
    }

    #[tokio::test]
    async fn test_missing_model_is_initialization_error() {
        let classifier =
            OnnxTissueClassifier::new(ClassifierConfig::new("nonexistent_model.onnx"));
        let grid =
            VoxelGrid::new(4, 4, SampleWidth::Sixteen, vec![1000; 16]).unwrap();

        let err = classifier.classify(&grid).await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelInitialization(_)));
    }

    #[test]
    fn test_device_preference_serde() {
        let config: ClassifierConfig =
            serde_json::from_str(r#"{"model_path": "models/tissue.onnx", "device": "cpu"}"#)
                .unwrap();
        assert_eq!(config.device, DevicePreference::Cpu);
        assert_eq!(config.input_size, 224);
    }
}
