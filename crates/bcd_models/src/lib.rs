//! # bcd_models
//!
//! The classification network for bcd-rs.
//!
//! This crate provides:
//! - [`Graph`]: a named computation graph with nested models, gradient taps
//!   and parameter access by path
//! - [`ResNetConfig`]: ResNet v1 backbones with Keras layer names
//! - [`Classifier`]: ResNet-50 → pooling → dense head with three softmax outputs
//! - [`WeightArchive`] and [`load_weights`]: named MessagePack weights, loaded
//!   against the architecture manifest with a checksum guard
//!
//! ## Example
//!
//! ```rust,ignore
//! use bcd_core::backend::InferenceBackend;
//! use bcd_models::{Classifier, ClassifierConfig, LoadMode};
//!
//! let device = Default::default();
//! let classifier = Classifier::<InferenceBackend>::load(
//!     ClassifierConfig::default(),
//!     "model.weights.mpk",
//!     LoadMode::Strict,
//!     &device,
//! )?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod classifier;
pub mod graph;
pub mod layers;
pub mod normalize;
pub mod resnet;

pub use checkpoint::{
    load_weights, verify_checksum, ArrayRecord, CheckpointError, LoadMode, LoadReport,
    WeightArchive, WeightManifest,
};
pub use classifier::{Classifier, ClassifierConfig, OUTPUT_LAYER};
pub use graph::{Activation, Graph, GraphError, Node, NodeId, Op};
pub use layers::{BatchNormLayer, Conv2dLayer, DenseActivation, DenseLayer, MaxPool2dSpec};
pub use normalize::CaffeNormalize;
pub use resnet::{ResNetConfig, StageConfig};
