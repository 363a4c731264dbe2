//! ResNet v1 backbones with Keras layer names.
//!
//! Node names follow the Keras `ResNet50` application exactly
//! (`conv1_conv`, `conv2_block1_0_conv`, …, `conv5_block3_out`) so weight
//! archives exported from it line up one-to-one.
//!
//! ## Block Structure
//!
//! ```text
//! x ─┬─ 1x1 conv (stride) ─ BN ─ ReLU ─ 3x3 conv ─ BN ─ ReLU ─ 1x1 conv ─ BN ─┐
//!    └─ [1x1 conv (stride) ─ BN]  (first block of each stage) ─────────────── add ─ ReLU
//! ```

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use burn::prelude::*;

use crate::graph::{Graph, GraphError, NodeId, Op};
use crate::layers::{BatchNormLayer, Conv2dLayer, MaxPool2dSpec};

/// One stage of bottleneck blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Bottleneck width; the stage outputs `filters * expansion` channels.
    pub filters: usize,
    /// Number of blocks.
    pub blocks: usize,
    /// Stride of the first block.
    pub stride: usize,
}

/// Configuration for a ResNet v1 backbone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResNetConfig {
    /// Name of the backbone graph.
    pub name: String,
    /// Channels of the 7x7 stem convolution.
    pub stem_filters: usize,
    /// Stages, named `conv2`, `conv3`, … in order.
    pub stages: Vec<StageConfig>,
    /// Channel expansion of the last 1x1 convolution in each block.
    pub expansion: usize,
    /// Batch-norm epsilon.
    pub bn_epsilon: f64,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self::resnet50()
    }
}

impl ResNetConfig {
    /// ResNet-50: stages of 3, 4, 6 and 3 blocks.
    pub fn resnet50() -> Self {
        Self {
            name: "resnet50".to_string(),
            stem_filters: 64,
            stages: vec![
                StageConfig { filters: 64, blocks: 3, stride: 1 },
                StageConfig { filters: 128, blocks: 4, stride: 2 },
                StageConfig { filters: 256, blocks: 6, stride: 2 },
                StageConfig { filters: 512, blocks: 3, stride: 2 },
            ],
            expansion: 4,
            bn_epsilon: 1.001e-5,
        }
    }

    /// A narrow ResNet-50 with the same node names and strides but a
    /// fraction of the channels. Useful for tests and smoke runs.
    pub fn tiny() -> Self {
        Self {
            stem_filters: 4,
            stages: vec![
                StageConfig { filters: 2, blocks: 3, stride: 1 },
                StageConfig { filters: 2, blocks: 4, stride: 2 },
                StageConfig { filters: 4, blocks: 6, stride: 2 },
                StageConfig { filters: 4, blocks: 3, stride: 2 },
            ],
            ..Self::resnet50()
        }
    }

    /// Channels of the backbone output.
    pub fn out_channels(&self) -> usize {
        self.stages
            .last()
            .map_or(self.stem_filters, |s| s.filters * self.expansion)
    }

    /// Name of the last block output, e.g. `conv5_block3_out`.
    pub fn last_block_name(&self) -> Option<String> {
        let stage = self.stages.len().checked_sub(1)?;
        let blocks = self.stages[stage].blocks;
        Some(format!("conv{}_block{blocks}_out", stage + 2))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidConfig`] for empty stages or zero sizes.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::InvalidConfig("ResNet needs at least one stage".into()));
        }
        if self.stem_filters == 0 || self.expansion == 0 {
            return Err(GraphError::InvalidConfig(
                "stem filters and expansion must be positive".into(),
            ));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.filters == 0 || stage.blocks == 0 || stage.stride == 0 {
                return Err(GraphError::InvalidConfig(format!(
                    "stage conv{} has a zero size: {stage:?}",
                    i + 2
                )));
            }
        }
        Ok(())
    }

    /// Build the backbone graph. Input is a `(N, 3, H, W)` normalized
    /// batch; output is the last block's feature maps.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidConfig`] if validation fails.
    pub fn build<B: Backend>(
        &self,
        rng: &mut ChaCha8Rng,
        device: &B::Device,
    ) -> Result<Graph<B>, GraphError> {
        self.validate()?;
        let eps = self.bn_epsilon;
        let mut g = Graph::new(self.name.clone());

        let input = g.add("input_1", Op::Input, &[])?;
        let x = g.add(
            "conv1_conv",
            Op::Conv2d(Conv2dLayer::new(3, self.stem_filters, [7, 7], [2, 2], [3, 3], true, rng, device)),
            &[input],
        )?;
        let x = g.add(
            "conv1_bn",
            Op::BatchNorm(BatchNormLayer::new(self.stem_filters, eps, device)),
            &[x],
        )?;
        let x = g.add("conv1_relu", Op::Relu, &[x])?;
        let mut x = g.add(
            "pool1_pool",
            Op::MaxPool2d(MaxPool2dSpec {
                kernel: [3, 3],
                stride: [2, 2],
                padding: [1, 1],
            }),
            &[x],
        )?;

        let mut channels = self.stem_filters;
        for (i, stage) in self.stages.iter().enumerate() {
            for b in 0..stage.blocks {
                let block = Bottleneck {
                    name: format!("conv{}_block{}", i + 2, b + 1),
                    in_channels: channels,
                    filters: stage.filters,
                    expansion: self.expansion,
                    stride: if b == 0 { stage.stride } else { 1 },
                    shortcut_conv: b == 0,
                    epsilon: eps,
                };
                x = block.append(&mut g, x, rng, device)?;
                channels = stage.filters * self.expansion;
            }
        }

        g.set_output(x)?;
        Ok(g)
    }
}

struct Bottleneck {
    name: String,
    in_channels: usize,
    filters: usize,
    expansion: usize,
    stride: usize,
    shortcut_conv: bool,
    epsilon: f64,
}

impl Bottleneck {
    fn append<B: Backend>(
        &self,
        g: &mut Graph<B>,
        input: NodeId,
        rng: &mut ChaCha8Rng,
        device: &B::Device,
    ) -> Result<NodeId, GraphError> {
        let name = &self.name;
        let out_channels = self.filters * self.expansion;
        let stride = [self.stride, self.stride];

        let shortcut = if self.shortcut_conv {
            let s = g.add(
                format!("{name}_0_conv"),
                Op::Conv2d(Conv2dLayer::new(self.in_channels, out_channels, [1, 1], stride, [0, 0], true, rng, device)),
                &[input],
            )?;
            g.add(
                format!("{name}_0_bn"),
                Op::BatchNorm(BatchNormLayer::new(out_channels, self.epsilon, device)),
                &[s],
            )?
        } else {
            input
        };

        let x = g.add(
            format!("{name}_1_conv"),
            Op::Conv2d(Conv2dLayer::new(self.in_channels, self.filters, [1, 1], stride, [0, 0], true, rng, device)),
            &[input],
        )?;
        let x = g.add(
            format!("{name}_1_bn"),
            Op::BatchNorm(BatchNormLayer::new(self.filters, self.epsilon, device)),
            &[x],
        )?;
        let x = g.add(format!("{name}_1_relu"), Op::Relu, &[x])?;

        let x = g.add(
            format!("{name}_2_conv"),
            Op::Conv2d(Conv2dLayer::new(self.filters, self.filters, [3, 3], [1, 1], [1, 1], true, rng, device)),
            &[x],
        )?;
        let x = g.add(
            format!("{name}_2_bn"),
            Op::BatchNorm(BatchNormLayer::new(self.filters, self.epsilon, device)),
            &[x],
        )?;
        let x = g.add(format!("{name}_2_relu"), Op::Relu, &[x])?;

        let x = g.add(
            format!("{name}_3_conv"),
            Op::Conv2d(Conv2dLayer::new(self.filters, out_channels, [1, 1], [1, 1], [0, 0], true, rng, device)),
            &[x],
        )?;
        let x = g.add(
            format!("{name}_3_bn"),
            Op::BatchNorm(BatchNormLayer::new(out_channels, self.epsilon, device)),
            &[x],
        )?;

        let x = g.add(format!("{name}_add"), Op::Add, &[shortcut, x])?;
        g.add(format!("{name}_out"), Op::Relu, &[x])
    }
}
