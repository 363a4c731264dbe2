//! Request-level glue between preprocessing, the classifier and the explainers.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bcd_core::{BcdError, ImageTensor};
use bcd_explain::{ExplanationImage, SaliencyExplainer, SurrogateExplainer};
use bcd_models::Classifier;
use bcd_transforms::Preprocessor;
use burn::tensor::backend::AutodiffBackend;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ServeConfig;
use crate::error::Result;
use crate::session::{Session, SessionStore};

/// Whether a classifier could be initialized at startup.
#[derive(Debug, Clone)]
pub enum ModelState<B: AutodiffBackend> {
    /// Classifier loaded.
    Ready(Arc<Classifier<B>>),
    /// Initialization failed; every request reports `reason`.
    Unavailable {
        /// Why the classifier could not be loaded.
        reason: String,
    },
}

/// Both explanation images for one session.
#[derive(Debug, Clone)]
pub struct Explanations {
    /// Session the images belong to.
    pub session_id: Uuid,
    /// Grad-CAM overlay.
    pub saliency: ExplanationImage,
    /// LIME superpixel image.
    pub surrogate: ExplanationImage,
}

/// Shared, read-only inference state behind the HTTP handlers and the CLI.
pub struct InferenceService<B: AutodiffBackend> {
    model: ModelState<B>,
    preprocessor: Preprocessor,
    saliency: SaliencyExplainer,
    surrogate: SurrogateExplainer,
    sessions: SessionStore,
}

impl<B: AutodiffBackend> InferenceService<B> {
    /// Build the service, loading the configured weight archive.
    ///
    /// A failed model load is not an error here: the service starts with
    /// [`ModelState::Unavailable`] and answers requests accordingly. Invalid
    /// preprocessing or explainer settings are.
    pub fn from_config(config: &ServeConfig, device: &B::Device) -> Result<Self> {
        let model = match &config.model.weights_path {
            Some(path) => match Classifier::load(
                config.model.architecture.clone(),
                path,
                config.model.load_mode,
                device,
            ) {
                Ok(classifier) => ModelState::Ready(Arc::new(classifier)),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to initialize classifier");
                    ModelState::Unavailable {
                        reason: e.to_string(),
                    }
                }
            },
            None => ModelState::Unavailable {
                reason: "no weight archive configured".to_string(),
            },
        };
        Self::assemble(model, config)
    }

    /// Serve an already initialized classifier.
    pub fn with_classifier(classifier: Classifier<B>, config: &ServeConfig) -> Result<Self> {
        Self::assemble(ModelState::Ready(Arc::new(classifier)), config)
    }

    fn assemble(model: ModelState<B>, config: &ServeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            preprocessor: Preprocessor::new(config.preprocess.clone())?,
            saliency: SaliencyExplainer::new(config.saliency.clone()),
            surrogate: SurrogateExplainer::new(config.surrogate.clone())?,
            sessions: SessionStore::new(config.sessions.capacity),
        })
    }

    /// Current model state.
    pub fn model_state(&self) -> &ModelState<B> {
        &self.model
    }

    /// Whether a classifier is loaded.
    pub fn is_ready(&self) -> bool {
        matches!(self.model, ModelState::Ready(_))
    }

    /// Open prediction sessions.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The classifier, or [`BcdError::NotInitialized`].
    pub fn classifier(&self) -> bcd_core::Result<&Arc<Classifier<B>>> {
        match &self.model {
            ModelState::Ready(classifier) => Ok(classifier),
            ModelState::Unavailable { reason } => Err(BcdError::not_initialized(reason.clone())),
        }
    }

    /// Classify an encoded image and open a session for it.
    pub fn predict_bytes(&self, bytes: &[u8]) -> bcd_core::Result<Session> {
        self.classifier()?;
        let tensor = self.preprocessor.preprocess_bytes(bytes)?;
        self.predict_tensor(tensor)
    }

    /// Classify the image file at `path` and open a session for it.
    pub fn predict_path(&self, path: impl AsRef<Path>) -> bcd_core::Result<Session> {
        self.classifier()?;
        let tensor = self.preprocessor.preprocess(path)?;
        self.predict_tensor(tensor)
    }

    fn predict_tensor(&self, tensor: ImageTensor) -> bcd_core::Result<Session> {
        let started = Instant::now();
        let prediction = self.classifier()?.predict(&tensor)?;
        let session = self.sessions.insert(tensor, prediction);
        info!(
            session_id = %session.id,
            label = %prediction.label,
            confidence = prediction.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "prediction"
        );
        Ok(session)
    }

    /// Grad-CAM and surrogate images for the tensor of a previous prediction.
    pub fn explain(&self, session_id: &Uuid) -> bcd_core::Result<Explanations> {
        let classifier = self.classifier()?;
        let session = self.sessions.require(session_id)?;

        let started = Instant::now();
        let saliency = self.saliency.explain(classifier.as_ref(), &session.tensor)?;
        let surrogate = self.surrogate.explain(classifier.as_ref(), &session.tensor)?;
        info!(
            session_id = %session.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "explanations rendered"
        );

        Ok(Explanations {
            session_id: session.id,
            saliency,
            surrogate,
        })
    }
}
