//! The three-class ultrasound classifier.
//!
//! ```text
//! input_layer ─ preprocess_input ─ resnet50 ─ global_avg_pool ─ dense_128 (ReLU)
//!                                              ─ dropout_0.5 ─ output_layer (softmax, 3)
//! ```

use std::path::Path;

use bcd_core::{BcdError, ImageTensor, PredictionResult, Result, Seed, NUM_CLASSES};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkpoint::{load_weights, verify_checksum, LoadMode, LoadReport, WeightArchive};
use crate::graph::{Activation, Graph, GraphError, Op};
use crate::layers::{DenseActivation, DenseLayer};
use crate::normalize::CaffeNormalize;
use crate::resnet::ResNetConfig;

/// Name of the graph input node.
pub const INPUT_LAYER: &str = "input_layer";
/// Name of the normalization node.
pub const PREPROCESS_LAYER: &str = "preprocess_input";
/// Name of the pooling node.
pub const POOL_LAYER: &str = "global_avg_pool";
/// Name of the hidden dense node.
pub const HIDDEN_LAYER: &str = "dense_128";
/// Name of the dropout node.
pub const DROPOUT_LAYER: &str = "dropout_0.5";
/// Name of the softmax output node, whose checksum guards weight loading.
pub const OUTPUT_LAYER: &str = "output_layer";

/// Classifier architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Backbone architecture.
    pub backbone: ResNetConfig,
    /// Width of the hidden dense layer.
    pub hidden_units: usize,
    /// Dropout rate; inactive at inference.
    pub dropout: f64,
    /// Seed for the random initialization that archive weights replace.
    pub init_seed: Seed,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backbone: ResNetConfig::resnet50(),
            hidden_units: 128,
            dropout: 0.5,
            init_seed: Seed::default(),
        }
    }
}

impl ClassifierConfig {
    /// Narrow variant over [`ResNetConfig::tiny`].
    pub fn tiny() -> Self {
        Self {
            backbone: ResNetConfig::tiny(),
            hidden_units: 8,
            ..Self::default()
        }
    }

    /// Build the full graph with freshly initialized parameters.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidConfig`] for an invalid backbone or a zero
    /// hidden width.
    pub fn build<B: Backend>(&self, device: &B::Device) -> std::result::Result<Graph<B>, GraphError> {
        if self.hidden_units == 0 {
            return Err(GraphError::InvalidConfig("hidden_units must be positive".into()));
        }
        let mut rng = self.init_seed.derive("init").to_rng();
        let backbone = self.backbone.build(&mut rng, device)?;

        let mut g = Graph::new("model");
        let x = g.add(INPUT_LAYER, Op::Input, &[])?;
        let x = g.add(PREPROCESS_LAYER, Op::Normalize(CaffeNormalize::default()), &[x])?;
        let x = g.add(self.backbone.name.clone(), Op::Model(Box::new(backbone)), &[x])?;
        let x = g.add(POOL_LAYER, Op::GlobalAvgPool, &[x])?;
        let x = g.add(
            HIDDEN_LAYER,
            Op::Dense(DenseLayer::new(
                self.backbone.out_channels(),
                self.hidden_units,
                DenseActivation::Relu,
                &mut rng,
                device,
            )),
            &[x],
        )?;
        let x = g.add(DROPOUT_LAYER, Op::Dropout(self.dropout), &[x])?;
        let x = g.add(
            OUTPUT_LAYER,
            Op::Dense(DenseLayer::new(
                self.hidden_units,
                NUM_CLASSES,
                DenseActivation::Softmax,
                &mut rng,
                device,
            )),
            &[x],
        )?;
        g.set_output(x)?;
        Ok(g)
    }
}

/// ResNet-50 classifier over preprocessed ultrasound images.
///
/// Inference is read-only, so a loaded classifier can be shared between
/// threads behind an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// use bcd_models::{Classifier, ClassifierConfig, LoadMode};
///
/// let classifier = Classifier::<InferenceBackend>::load(
///     ClassifierConfig::default(),
///     "model.weights.mpk",
///     LoadMode::Strict,
///     &device,
/// )?;
/// let result = classifier.predict(&image)?;
/// println!("{} ({:.2}%)", result.label, result.confidence_percent());
/// ```
#[derive(Debug, Clone)]
pub struct Classifier<B: Backend> {
    config: ClassifierConfig,
    graph: Graph<B>,
    device: B::Device,
}

impl<B: Backend> Classifier<B> {
    /// Build a classifier with random weights.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Initialization`] for an invalid architecture.
    pub fn new(config: ClassifierConfig, device: &B::Device) -> Result<Self> {
        let graph = config
            .build(device)
            .map_err(|e| BcdError::initialization(e.to_string()))?;
        Ok(Self {
            config,
            graph,
            device: device.clone(),
        })
    }

    /// Build a classifier and load `archive` into it.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Initialization`] if the archive does not match in
    /// the given mode or the load left the output layer unchanged.
    pub fn from_archive(
        config: ClassifierConfig,
        archive: &WeightArchive,
        mode: LoadMode,
        device: &B::Device,
    ) -> Result<(Self, LoadReport)> {
        let mut classifier = Self::new(config, device)?;
        let report = classifier.load_archive(archive, mode)?;
        Ok((classifier, report))
    }

    /// Build a classifier from a weight archive file.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Initialization`] if the file cannot be read or
    /// does not match the architecture.
    pub fn load(
        config: ClassifierConfig,
        path: impl AsRef<Path>,
        mode: LoadMode,
        device: &B::Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let archive = WeightArchive::load(path)?;
        let (classifier, report) = Self::from_archive(config, &archive, mode, device)?;
        info!(
            path = %path.display(),
            arch = %archive.arch,
            layers = report.matched.len(),
            "classifier weights loaded"
        );
        Ok(classifier)
    }

    /// Load `archive` into this classifier, guarded by the output checksum.
    ///
    /// # Errors
    ///
    /// See [`Classifier::from_archive`].
    pub fn load_archive(&mut self, archive: &WeightArchive, mode: LoadMode) -> Result<LoadReport> {
        let before = self.output_checksum()?;
        let report = load_weights(&mut self.graph, archive, mode)?;
        let after = self.output_checksum()?;
        verify_checksum(OUTPUT_LAYER, before, after)?;
        Ok(report)
    }

    /// Export all parameters.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Computation`] if a parameter cannot be read.
    pub fn export_archive(&self) -> Result<WeightArchive> {
        WeightArchive::from_graph(&self.graph, self.config.backbone.name.clone())
            .map_err(|e| BcdError::computation(e.to_string()))
    }

    /// The architecture.
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// The full graph.
    pub fn graph(&self) -> &Graph<B> {
        &self.graph
    }

    /// The device tensors live on.
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// The nested backbone graph.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Computation`] if the graph has no backbone node.
    pub fn backbone(&self) -> Result<&Graph<B>> {
        self.graph
            .sub_graph(&self.config.backbone.name)
            .ok_or_else(|| {
                BcdError::computation(format!("no backbone named {}", self.config.backbone.name))
            })
    }

    /// Name of the last convolutional block, the default saliency target.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Computation`] for a backbone without stages.
    pub fn target_layer(&self) -> Result<String> {
        self.config
            .backbone
            .last_block_name()
            .ok_or_else(|| BcdError::computation("backbone has no convolutional blocks"))
    }

    /// The input normalization.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Computation`] if the normalization node is missing.
    pub fn normalizer(&self) -> Result<CaffeNormalize> {
        match self.graph.node(PREPROCESS_LAYER).map(|node| node.op()) {
            Some(Op::Normalize(norm)) => Ok(*norm),
            _ => Err(BcdError::computation(format!("no {PREPROCESS_LAYER} node"))),
        }
    }

    /// Stack images and apply the input normalization, producing the
    /// backbone's input.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] for an empty batch.
    pub fn backbone_input(&self, images: &[ImageTensor]) -> Result<Tensor<B, 4>> {
        let x = ImageTensor::batch_to_tensor::<B>(images, &self.device)?;
        Ok(self.normalizer()?.apply(x)?)
    }

    /// Sum of the output layer parameters.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Computation`] if the output layer is missing.
    pub fn output_checksum(&self) -> Result<f64> {
        self.graph
            .checksum(OUTPUT_LAYER)
            .ok_or_else(|| BcdError::computation(format!("no parameters on {OUTPUT_LAYER}")))
    }

    /// Classify one image.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Computation`] if the forward pass fails or yields
    /// an invalid distribution.
    pub fn predict(&self, image: &ImageTensor) -> Result<PredictionResult> {
        let probabilities = self.predict_batch(std::slice::from_ref(image))?;
        let first = probabilities
            .into_iter()
            .next()
            .ok_or_else(|| BcdError::computation("empty prediction batch"))?;
        PredictionResult::from_probabilities(first)
            .map_err(|e| BcdError::computation(e.to_string()))
    }

    /// Class probabilities for a batch, one row per image.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Input`] for an empty batch and
    /// [`BcdError::Computation`] if the forward pass fails.
    pub fn predict_batch(&self, images: &[ImageTensor]) -> Result<Vec<[f32; NUM_CLASSES]>> {
        let x = ImageTensor::batch_to_tensor::<B>(images, &self.device)?;
        self.predict_tensor(x)
    }

    /// Class probabilities for a raw `(N, 3, 224, 224)` pixel batch.
    ///
    /// # Errors
    ///
    /// Returns [`BcdError::Computation`] if the forward pass fails.
    pub fn predict_tensor(&self, x: Tensor<B, 4>) -> Result<Vec<[f32; NUM_CLASSES]>> {
        let output = self.graph.forward(Activation::Spatial(x))?;
        let probs = output
            .into_flat()
            .ok_or_else(|| BcdError::computation("classifier output is not a vector"))?;
        let [_, classes] = probs.dims();
        if classes != NUM_CLASSES {
            return Err(BcdError::computation(format!(
                "expected {NUM_CLASSES} class scores, got {classes}"
            )));
        }
        let values: Vec<f32> = probs
            .into_data()
            .to_vec()
            .map_err(|e| BcdError::computation(format!("{e:?}")))?;
        Ok(values
            .chunks_exact(NUM_CLASSES)
            .map(|row| [row[0], row[1], row[2]])
            .collect())
    }
}
