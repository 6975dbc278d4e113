use crate::error::{ExplorerError, Result};
use crate::record::ClassificationCandidate;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use log::{debug, error, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

/// Leading provider taxonomy code such as `n01234567 `.
static TAXONOMY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]\d+\s+").expect("taxonomy code pattern is valid"));

/// Where the classifier is running. Only interactive clients may load the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    Interactive,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// One label as emitted by the model, before post-processing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPrediction {
    pub label: String,
    pub score: f32,
}

/// Image decoded and resized to the model's square input.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub pixels: RgbImage,
}

impl ImageInput {
    /// Rejects anything that does not decode as an image.
    pub fn from_bytes(bytes: &[u8], edge: u32) -> Result<Self> {
        let format = image::guess_format(bytes)
            .map_err(|_| ExplorerError::InvalidInput("not a recognized image format".to_string()))?;
        let decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| ExplorerError::InvalidInput(e.to_string()))?;

        debug!(
            "Decoded {:?} image {}x{}, resizing to {}x{}",
            format,
            decoded.width(),
            decoded.height(),
            edge,
            edge
        );
        let pixels = decoded.resize_exact(edge, edge, FilterType::Triangle).to_rgb8();
        Ok(Self { pixels })
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.pixels
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| ExplorerError::InvalidInput(e.to_string()))?;
        Ok(buffer.into_inner())
    }
}

/// A loaded classification model.
#[async_trait]
pub trait ClassificationPipeline: Send + Sync {
    /// Labels in confidence-descending order.
    async fn run(&self, input: &ImageInput) -> Result<Vec<RawPrediction>>;
}

/// Builds a pipeline for a model identifier.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn ClassificationPipeline>>;
}

type SharedLoad =
    Shared<BoxFuture<'static, std::result::Result<Arc<dyn ClassificationPipeline>, String>>>;

enum ModelState {
    Unloaded,
    Loading(SharedLoad),
    Ready(Arc<dyn ClassificationPipeline>),
    Failed(String),
}

/// Loads its pipeline at most once. Concurrent callers await the same load,
/// and a failed load is re-raised to every later caller without retrying.
pub struct ImageClassifier {
    loader: Arc<dyn ModelLoader>,
    model_id: String,
    context: ExecutionContext,
    input_edge: u32,
    state: Mutex<ModelState>,
}

impl ImageClassifier {
    pub fn new(loader: Arc<dyn ModelLoader>, model_id: &str, context: ExecutionContext) -> Self {
        Self {
            loader,
            model_id: model_id.to_string(),
            context,
            input_edge: 224,
            state: Mutex::new(ModelState::Unloaded),
        }
    }

    pub fn with_input_edge(mut self, edge: u32) -> Self {
        self.input_edge = edge;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn status(&self) -> ModelStatus {
        match &*self.lock_state() {
            ModelState::Unloaded => ModelStatus::Unloaded,
            ModelState::Loading(_) => ModelStatus::Loading,
            ModelState::Ready(_) => ModelStatus::Ready,
            ModelState::Failed(_) => ModelStatus::Failed,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_load(&self) -> SharedLoad {
        let loader = Arc::clone(&self.loader);
        let model_id = self.model_id.clone();
        info!("Loading image classifier model {}...", model_id);
        async move {
            loader.load(&model_id).await.map_err(|e| match e {
                ExplorerError::ModelLoadFailed(message) => message,
                other => other.to_string(),
            })
        }
        .boxed()
        .shared()
    }

    /// Returns the loaded pipeline, loading it on first use.
    pub async fn pipeline(&self) -> Result<Arc<dyn ClassificationPipeline>> {
        if self.context != ExecutionContext::Interactive {
            return Err(ExplorerError::UnsupportedContext);
        }

        let pending = {
            let mut state = self.lock_state();
            if matches!(*state, ModelState::Unloaded) {
                *state = ModelState::Loading(self.start_load());
            }
            match &*state {
                ModelState::Ready(pipeline) => return Ok(Arc::clone(pipeline)),
                ModelState::Failed(message) => {
                    return Err(ExplorerError::ModelLoadFailed(message.clone()));
                }
                ModelState::Loading(load) => load.clone(),
                ModelState::Unloaded => unreachable!("load started above"),
            }
        };

        let outcome = pending.await;
        let mut state = self.lock_state();
        match outcome {
            Ok(pipeline) => {
                if matches!(*state, ModelState::Loading(_)) {
                    info!("Image classifier model {} loaded", self.model_id);
                    *state = ModelState::Ready(Arc::clone(&pipeline));
                }
                Ok(pipeline)
            }
            Err(message) => {
                if matches!(*state, ModelState::Loading(_)) {
                    error!("Error loading model {}: {}", self.model_id, message);
                    *state = ModelState::Failed(message.clone());
                }
                Err(ExplorerError::ModelLoadFailed(message))
            }
        }
    }

    /// Classifies an encoded image and returns candidates in model order.
    pub async fn classify(&self, image_bytes: &[u8]) -> Result<Vec<ClassificationCandidate>> {
        if self.context != ExecutionContext::Interactive {
            return Err(ExplorerError::UnsupportedContext);
        }

        let input = ImageInput::from_bytes(image_bytes, self.input_edge)?;
        let pipeline = self.pipeline().await?;

        info!("Running classification on image...");
        let predictions = pipeline.run(&input).await?;
        debug!("Classification results: {:?}", predictions);

        let mut candidates = Vec::with_capacity(predictions.len());
        for prediction in predictions {
            candidates.push(ClassificationCandidate {
                display_name: normalize_label(&prediction.label),
                confidence: clamp_confidence(prediction.score),
                raw_label: prediction.label,
            });
        }
        Ok(candidates)
    }
}

fn clamp_confidence(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// `n01234567 Great_Blue_Heron` becomes `Great Blue Heron`.
pub fn normalize_label(raw: &str) -> String {
    let spaced = raw.replace('_', " ");
    let stripped = TAXONOMY_CODE.replace(&spaced, "");
    stripped
        .trim()
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Operation;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedPipeline {
        predictions: Vec<RawPrediction>,
    }

    #[async_trait]
    impl ClassificationPipeline for FixedPipeline {
        async fn run(&self, input: &ImageInput) -> Result<Vec<RawPrediction>> {
            assert_eq!(input.pixels.dimensions(), (224, 224));
            Ok(self.predictions.clone())
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
        fail: bool,
    }

    impl CountingLoader {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, _model_id: &str) -> Result<Arc<dyn ClassificationPipeline>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(ExplorerError::ModelLoadFailed("could not locate file".to_string()));
            }
            Ok(Arc::new(FixedPipeline {
                predictions: vec![
                    RawPrediction {
                        label: "n01234567 Great_Blue_Heron".to_string(),
                        score: 0.91,
                    },
                    RawPrediction {
                        label: "crane".to_string(),
                        score: 0.05,
                    },
                    RawPrediction {
                        label: "spoonbill".to_string(),
                        score: 0.07,
                    },
                ],
            }))
        }
    }

    struct UnavailablePipeline;

    #[async_trait]
    impl ClassificationPipeline for UnavailablePipeline {
        async fn run(&self, _input: &ImageInput) -> Result<Vec<RawPrediction>> {
            Err(ExplorerError::HttpStatus {
                status: 503,
                endpoint: "models/test/model".to_string(),
            })
        }
    }

    struct UnavailableLoader;

    #[async_trait]
    impl ModelLoader for UnavailableLoader {
        async fn load(&self, _model_id: &str) -> Result<Arc<dyn ClassificationPipeline>> {
            Ok(Arc::new(UnavailablePipeline))
        }
    }

    fn png_bytes() -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 6, Rgb([40, 90, 160]));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("n01234567 Great_Blue_Heron"), "Great Blue Heron");
        assert_eq!(normalize_label("bald_eagle"), "Bald Eagle");
        assert_eq!(normalize_label("  snowy owl "), "Snowy Owl");
        assert_eq!(normalize_label("n02009912 american egret"), "American Egret");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let loader = CountingLoader::new(false);
        let classifier =
            ImageClassifier::new(loader.clone(), "test/model", ExecutionContext::Interactive);

        let results = futures::future::join_all((0..5).map(|_| classifier.pipeline())).await;
        let pipelines: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(pipelines.iter().all(|p| Arc::ptr_eq(p, &pipelines[0])));
        assert_eq!(classifier.status(), ModelStatus::Ready);
    }

    #[tokio::test]
    async fn test_load_failure_is_permanent() {
        let loader = CountingLoader::new(true);
        let classifier =
            ImageClassifier::new(loader.clone(), "test/model", ExecutionContext::Interactive);

        assert!(matches!(
            classifier.pipeline().await,
            Err(ExplorerError::ModelLoadFailed(_))
        ));
        assert_eq!(classifier.status(), ModelStatus::Failed);
        assert!(matches!(
            classifier.classify(&png_bytes()).await,
            Err(ExplorerError::ModelLoadFailed(_))
        ));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_classify_keeps_model_order() {
        let loader = CountingLoader::new(false);
        let classifier =
            ImageClassifier::new(loader, "test/model", ExecutionContext::Interactive);

        let candidates = classifier.classify(&png_bytes()).await.unwrap();
        let names: Vec<_> = candidates.iter().map(|c| c.display_name.as_str()).collect();
        assert_eq!(names, vec!["Great Blue Heron", "Crane", "Spoonbill"]);
        assert_eq!(candidates[0].raw_label, "n01234567 Great_Blue_Heron");
        assert!((candidates[0].confidence - 0.91).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_server_context_never_loads() {
        let loader = CountingLoader::new(false);
        let classifier = ImageClassifier::new(loader.clone(), "test/model", ExecutionContext::Server);

        assert!(matches!(
            classifier.classify(&png_bytes()).await,
            Err(ExplorerError::UnsupportedContext)
        ));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
        assert_eq!(classifier.status(), ModelStatus::Unloaded);
    }

    #[tokio::test]
    async fn test_non_image_rejected_before_load() {
        let loader = CountingLoader::new(false);
        let classifier =
            ImageClassifier::new(loader.clone(), "test/model", ExecutionContext::Interactive);

        assert!(matches!(
            classifier.classify(b"%PDF-1.7 not a picture").await,
            Err(ExplorerError::InvalidInput(_))
        ));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inference_failure_reports_classification_error() {
        let classifier = ImageClassifier::new(
            Arc::new(UnavailableLoader),
            "test/model",
            ExecutionContext::Interactive,
        );

        let err = classifier.classify(&png_bytes()).await.unwrap_err();
        assert!(matches!(err, ExplorerError::HttpStatus { status: 503, .. }));
        assert_eq!(classifier.status(), ModelStatus::Ready);
        assert_eq!(
            err.user_message(Operation::Classify),
            "Error classifying the image. Please try again."
        );
    }

    #[test]
    fn test_image_input_round_trips_to_png() {
        let input = ImageInput::from_bytes(&png_bytes(), 32).unwrap();
        assert_eq!(input.pixels.dimensions(), (32, 32));
        assert!(image::guess_format(&input.to_png().unwrap()).is_ok());
    }
}
