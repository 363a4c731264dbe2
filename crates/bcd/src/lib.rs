//! # bcd
//!
//! Breast ultrasound classification with visual explanations, in Rust.
//!
//! bcd-rs classifies ultrasound images as benign, malignant or normal with a
//! ResNet-50 network and explains each prediction twice:
//!
//! - **Preprocessing**: grayscale decode, CLAHE, resize to 224×224, channel replication
//! - **Models**: named computation graph, ResNet-50 backbone, verified weight archives
//! - **Explainability**: Grad-CAM overlays and LIME superpixel masks
//! - **Serving**: an axum API with per-prediction sessions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bcd::prelude::*;
//!
//! let device = NdArrayDevice::default();
//! let classifier = Classifier::<InferenceBackend>::load(
//!     ClassifierConfig::default(),
//!     "model.weights.mpk",
//!     LoadMode::Strict,
//!     &device,
//! )?;
//!
//! let image = Preprocessor::new(PreprocessConfig::default())?.preprocess("scan.png")?;
//! let prediction = classifier.predict(&image)?;
//! let gradcam = SaliencyExplainer::default().explain(&classifier, &image)?;
//! let lime = SurrogateExplainer::new(SurrogateConfig::default())?.explain(&classifier, &image)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use bcd_core as core;
pub use bcd_explain as explain;
pub use bcd_models as models;
pub use bcd_serve as serve;
pub use bcd_transforms as transforms;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use bcd::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use bcd_core::backend::{InferenceBackend, NdArray, NdArrayDevice};
    pub use bcd_core::{
        BcdError, ClassLabel, ErrorKind, ImageTensor, PredictionResult, Result, Seed,
    };

    // Preprocessing
    pub use bcd_transforms::{PreprocessConfig, Preprocessor};

    // Models
    pub use bcd_models::{
        Classifier, ClassifierConfig, LoadMode, ResNetConfig, WeightArchive, WeightManifest,
    };

    // Explain
    pub use bcd_explain::{
        EncodeFormat, ExplanationImage, SaliencyConfig, SaliencyExplainer, SurrogateConfig,
        SurrogateExplainer,
    };
}
