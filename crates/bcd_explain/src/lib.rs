//! # bcd_explain
//!
//! Visual explanations for bcd-rs classifications.
//!
//! This crate provides:
//! - Gradient capture at a named backbone layer
//! - Grad-CAM heatmaps blended over the input with a JET colormap
//! - Quickshift superpixels and a weighted ridge surrogate (LIME)
//! - JPEG/PNG encoding of the rendered explanations

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod activation;
mod attribution;
mod colormap;
mod error;
mod render;
mod ridge;
mod saliency;
mod segmentation;
mod surrogate;

pub use activation::{capture_max_gradient, GradientCapture};
pub use attribution::{grad_cam, AttributionMap, Heatmap};
pub use colormap::jet;
pub use error::{ExplainError, Result};
pub use render::{EncodeFormat, ExplanationImage, ExplanationKind};
pub use ridge::{fit_weighted_ridge, RidgeFit};
pub use saliency::{SaliencyConfig, SaliencyExplainer};
pub use segmentation::{quickshift, QuickshiftConfig, Segmentation};
pub use surrogate::{LabelExplanation, SurrogateConfig, SurrogateExplainer, SurrogateExplanation};
