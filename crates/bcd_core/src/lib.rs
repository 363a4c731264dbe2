//! # bcd_core
//!
//! Core types shared by every bcd-rs crate.
//!
//! This crate provides:
//! - [`ClassLabel`] and [`PredictionResult`] for the fixed three-class problem
//! - [`ImageTensor`], the validated 224×224×3 preprocessed image
//! - [`Seed`] for reproducible explanations
//! - [`BcdError`], the error taxonomy surfaced at every component boundary
//!
//! ## Layout Convention
//!
//! Preprocessed images are stored row-major as `(H, W, C)` with pixel values
//! in `[0, 255]`. The network consumes `(B, C, H, W)` batches; conversion
//! happens in [`ImageTensor::to_tensor`] and [`ImageTensor::batch_to_tensor`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use bcd_core::{ClassLabel, PredictionResult};
//!
//! let result = PredictionResult::from_probabilities([0.1, 0.7, 0.2])?;
//! assert_eq!(result.label, ClassLabel::Malignant);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod image_tensor;
mod label;
mod seed;

pub use error::{BcdError, ErrorKind, Result};
pub use image_tensor::{ImageTensor, CHANNELS, TARGET_HEIGHT, TARGET_WIDTH};
pub use label::{ClassLabel, PredictionResult, NUM_CLASSES};
pub use seed::Seed;

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::{NdArray, NdArrayDevice};

    /// CPU backend with autodiff, able to run both prediction and Grad-CAM.
    #[cfg(feature = "backend-ndarray")]
    pub type InferenceBackend = burn_autodiff::Autodiff<NdArray>;
}
