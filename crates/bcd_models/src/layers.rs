//! Parameterized layers built on `burn::nn` modules.
//!
//! Each layer wraps a burn module and exposes its parameters under
//! Keras-style names (`kernel`, `bias`, `gamma`, …) so weight archives can be
//! matched layer by layer. Parameters are frozen: gradients only flow through
//! activations.

use burn::module::{Ignored, Param, ParamId, RunningState};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::{relu, softmax};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::graph::GraphError;

/// Name and shape of one parameter tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name within its layer.
    pub name: &'static str,
    /// Tensor shape.
    pub shape: Vec<usize>,
}

/// A layer whose parameters can be listed, read and replaced by name.
pub trait ParamLayer<B: Backend> {
    /// Parameters in a stable order.
    fn param_specs(&self) -> Vec<ParamSpec>;

    /// Current value of a parameter.
    fn param(&self, name: &str) -> Option<TensorData>;

    /// Replace a parameter. The shape must match exactly.
    fn set_param(&mut self, name: &str, data: TensorData) -> Result<(), GraphError>;
}

fn check_shape(name: &str, expected: &[usize], data: &TensorData) -> Result<(), GraphError> {
    if data.shape != expected {
        return Err(GraphError::ParamShape {
            param: name.to_string(),
            expected: expected.to_vec(),
            got: data.shape.clone(),
        });
    }
    Ok(())
}

fn unknown_param(name: &str) -> GraphError {
    GraphError::UnknownParam(name.to_string())
}

/// Wrap a tensor as a parameter that does not require gradients.
fn frozen<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Param<Tensor<B, D>> {
    Param::initialized(ParamId::new(), tensor)
}

/// Shape-checked replacement of a frozen parameter.
fn replace<B: Backend, const D: usize>(
    slot: &mut Param<Tensor<B, D>>,
    name: &str,
    data: TensorData,
) -> Result<(), GraphError> {
    let current = slot.val();
    check_shape(name, &current.dims(), &data)?;
    *slot = frozen(Tensor::from_data(data, &current.device()));
    Ok(())
}

/// Glorot-uniform tensor: `U(-l, l)` with `l = sqrt(6 / (fan_in + fan_out))`.
fn glorot_uniform<B: Backend, const D: usize>(
    shape: [usize; D],
    fan_in: usize,
    fan_out: usize,
    rng: &mut ChaCha8Rng,
    device: &B::Device,
) -> Tensor<B, D> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt() as f32;
    let count = shape.iter().product();
    let values: Vec<f32> = (0..count).map(|_| rng.gen_range(-limit..limit)).collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// 2D convolution with optional bias. Weights are `[out, in, kh, kw]`.
#[derive(Module, Debug)]
pub struct Conv2dLayer<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> Conv2dLayer<B> {
    /// Create a Glorot-initialized convolution.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
        bias: bool,
        rng: &mut ChaCha8Rng,
        device: &B::Device,
    ) -> Self {
        let mut conv = Conv2dConfig::new([in_channels, out_channels], kernel)
            .with_stride(stride)
            .with_padding(PaddingConfig2d::Explicit(padding[0], padding[1]))
            .with_bias(bias)
            .with_initializer(Initializer::Zeros)
            .init(device);

        let receptive = kernel[0] * kernel[1];
        conv.weight = frozen(glorot_uniform(
            [out_channels, in_channels, kernel[0], kernel[1]],
            in_channels * receptive,
            out_channels * receptive,
            rng,
            device,
        ));
        conv.bias = bias.then(|| frozen(Tensor::zeros([out_channels], device)));
        Self { conv }
    }

    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        self.conv.weight.val().dims()[0]
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(x)
    }
}

impl<B: Backend> ParamLayer<B> for Conv2dLayer<B> {
    fn param_specs(&self) -> Vec<ParamSpec> {
        let mut specs = vec![ParamSpec {
            name: "kernel",
            shape: self.conv.weight.val().dims().to_vec(),
        }];
        if let Some(bias) = &self.conv.bias {
            specs.push(ParamSpec {
                name: "bias",
                shape: bias.val().dims().to_vec(),
            });
        }
        specs
    }

    fn param(&self, name: &str) -> Option<TensorData> {
        match name {
            "kernel" => Some(self.conv.weight.val().to_data()),
            "bias" => self.conv.bias.as_ref().map(|b| b.val().to_data()),
            _ => None,
        }
    }

    fn set_param(&mut self, name: &str, data: TensorData) -> Result<(), GraphError> {
        match name {
            "kernel" => replace(&mut self.conv.weight, name, data),
            "bias" => {
                let bias = self.conv.bias.as_mut().ok_or_else(|| unknown_param(name))?;
                replace(bias, name, data)
            }
            _ => Err(unknown_param(name)),
        }
    }
}

/// Batch normalization in inference mode (moving statistics).
#[derive(Module, Debug)]
pub struct BatchNormLayer<B: Backend> {
    norm: BatchNorm<B, 2>,
}

const BATCH_NORM_PARAMS: [&str; 4] = ["gamma", "beta", "moving_mean", "moving_variance"];

impl<B: Backend> BatchNormLayer<B> {
    /// Create an identity-initialized batch norm.
    pub fn new(channels: usize, epsilon: f64, device: &B::Device) -> Self {
        let mut norm = BatchNormConfig::new(channels)
            .with_epsilon(epsilon)
            .init(device);
        norm.gamma = frozen(Tensor::ones([channels], device));
        norm.beta = frozen(Tensor::zeros([channels], device));
        Self { norm }
    }

    fn channels(&self) -> usize {
        self.norm.gamma.val().dims()[0]
    }

    /// Forward pass over `(N, C, H, W)`.
    ///
    /// Always uses the moving statistics. `BatchNorm::forward` switches to
    /// batch statistics on autodiff backends, which Grad-CAM runs on.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let channels = self.channels();
        let scale = self.norm.gamma.val()
            / self
                .norm
                .running_var
                .value()
                .add_scalar(self.norm.epsilon)
                .sqrt();
        let shift = self.norm.beta.val() - self.norm.running_mean.value() * scale.clone();
        x * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }
}

impl<B: Backend> ParamLayer<B> for BatchNormLayer<B> {
    fn param_specs(&self) -> Vec<ParamSpec> {
        let shape = vec![self.channels()];
        BATCH_NORM_PARAMS
            .into_iter()
            .map(|name| ParamSpec {
                name,
                shape: shape.clone(),
            })
            .collect()
    }

    fn param(&self, name: &str) -> Option<TensorData> {
        let value = match name {
            "gamma" => self.norm.gamma.val(),
            "beta" => self.norm.beta.val(),
            "moving_mean" => self.norm.running_mean.value(),
            "moving_variance" => self.norm.running_var.value(),
            _ => return None,
        };
        Some(value.to_data())
    }

    fn set_param(&mut self, name: &str, data: TensorData) -> Result<(), GraphError> {
        match name {
            "gamma" => replace(&mut self.norm.gamma, name, data),
            "beta" => replace(&mut self.norm.beta, name, data),
            "moving_mean" | "moving_variance" => {
                let slot = if name == "moving_mean" {
                    &mut self.norm.running_mean
                } else {
                    &mut self.norm.running_var
                };
                let current = slot.value();
                check_shape(name, &current.dims(), &data)?;
                *slot = RunningState::new(Tensor::from_data(data, &current.device()));
                Ok(())
            }
            _ => Err(unknown_param(name)),
        }
    }
}

/// Activation fused into a [`DenseLayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenseActivation {
    /// No activation.
    Linear,
    /// Rectified linear unit.
    Relu,
    /// Softmax over the feature axis.
    Softmax,
}

/// Fully connected layer. Kernel is `[in, out]`.
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    linear: Linear<B>,
    activation: Ignored<DenseActivation>,
}

impl<B: Backend> DenseLayer<B> {
    /// Create a Glorot-initialized dense layer with zero bias.
    pub fn new(
        inputs: usize,
        outputs: usize,
        activation: DenseActivation,
        rng: &mut ChaCha8Rng,
        device: &B::Device,
    ) -> Self {
        let mut linear = LinearConfig::new(inputs, outputs)
            .with_initializer(Initializer::Zeros)
            .init(device);
        linear.weight = frozen(glorot_uniform([inputs, outputs], inputs, outputs, rng, device));
        linear.bias = Some(frozen(Tensor::zeros([outputs], device)));
        Self {
            linear,
            activation: Ignored(activation),
        }
    }

    /// Forward pass over `(N, in)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let out = self.linear.forward(x);
        match self.activation.0 {
            DenseActivation::Linear => out,
            DenseActivation::Relu => relu(out),
            DenseActivation::Softmax => softmax(out, 1),
        }
    }
}

impl<B: Backend> ParamLayer<B> for DenseLayer<B> {
    fn param_specs(&self) -> Vec<ParamSpec> {
        let mut specs = vec![ParamSpec {
            name: "kernel",
            shape: self.linear.weight.val().dims().to_vec(),
        }];
        if let Some(bias) = &self.linear.bias {
            specs.push(ParamSpec {
                name: "bias",
                shape: bias.val().dims().to_vec(),
            });
        }
        specs
    }

    fn param(&self, name: &str) -> Option<TensorData> {
        match name {
            "kernel" => Some(self.linear.weight.val().to_data()),
            "bias" => self.linear.bias.as_ref().map(|b| b.val().to_data()),
            _ => None,
        }
    }

    fn set_param(&mut self, name: &str, data: TensorData) -> Result<(), GraphError> {
        match name {
            "kernel" => replace(&mut self.linear.weight, name, data),
            "bias" => {
                let bias = self.linear.bias.as_mut().ok_or_else(|| unknown_param(name))?;
                replace(bias, name, data)
            }
            _ => Err(unknown_param(name)),
        }
    }
}

/// Max pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPool2dSpec {
    /// Window size.
    pub kernel: [usize; 2],
    /// Step between windows.
    pub stride: [usize; 2],
    /// Implicit padding on each side.
    pub padding: [usize; 2],
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcd_core::backend::NdArray;
    use bcd_core::Seed;

    type TestBackend = NdArray;

    #[test]
    fn test_conv_shapes() {
        let device = Default::default();
        let mut rng = Seed::new(1).to_rng();
        let conv = Conv2dLayer::<TestBackend>::new(3, 8, [7, 7], [2, 2], [3, 3], true, &mut rng, &device);

        let x = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        assert_eq!(conv.forward(x).dims(), [2, 8, 16, 16]);
        assert_eq!(conv.out_channels(), 8);

        let specs = conv.param_specs();
        assert_eq!(specs[0].shape, vec![8, 3, 7, 7]);
        assert_eq!(specs[1].shape, vec![8]);
    }

    #[test]
    fn test_conv_set_param_checks_shape() {
        let device = Default::default();
        let mut rng = Seed::new(1).to_rng();
        let mut conv =
            Conv2dLayer::<TestBackend>::new(2, 4, [1, 1], [1, 1], [0, 0], false, &mut rng, &device);

        let bad = TensorData::new(vec![0.0f32; 4], [4]);
        assert!(matches!(
            conv.set_param("bias", bad),
            Err(GraphError::UnknownParam(_))
        ));

        let wrong = TensorData::new(vec![0.0f32; 6], [3, 2, 1, 1]);
        assert!(matches!(
            conv.set_param("kernel", wrong),
            Err(GraphError::ParamShape { .. })
        ));

        let ok = TensorData::new(vec![0.5f32; 8], [4, 2, 1, 1]);
        conv.set_param("kernel", ok).unwrap();
        let values: Vec<f32> = conv.param("kernel").unwrap().to_vec().unwrap();
        assert!(values.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_batch_norm_inference() {
        let device = Default::default();
        let mut bn = BatchNormLayer::<TestBackend>::new(2, 0.0, &device);
        bn.set_param("moving_mean", TensorData::new(vec![1.0f32, 2.0], [2]))
            .unwrap();
        bn.set_param("moving_variance", TensorData::new(vec![4.0f32, 1.0], [2]))
            .unwrap();
        bn.set_param("beta", TensorData::new(vec![0.5f32, 0.0], [2]))
            .unwrap();

        let x = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![3.0f32, 5.0], [1, 2, 1, 1]),
            &device,
        );
        let y: Vec<f32> = bn.forward(x).into_data().to_vec().unwrap();
        // (3 - 1) / 2 + 0.5 and (5 - 2) / 1
        assert!((y[0] - 1.5).abs() < 1e-6);
        assert!((y[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_dense_softmax() {
        let device = Default::default();
        let mut rng = Seed::new(3).to_rng();
        let dense = DenseLayer::<TestBackend>::new(4, 3, DenseActivation::Softmax, &mut rng, &device);

        let x = Tensor::<TestBackend, 2>::ones([5, 4], &device);
        let y = dense.forward(x);
        assert_eq!(y.dims(), [5, 3]);
        let values: Vec<f32> = y.into_data().to_vec().unwrap();
        for row in values.chunks(3) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_glorot_is_seeded() {
        let device = Default::default();
        let a = DenseLayer::<TestBackend>::new(8, 8, DenseActivation::Linear, &mut Seed::new(9).to_rng(), &device);
        let b = DenseLayer::<TestBackend>::new(8, 8, DenseActivation::Linear, &mut Seed::new(9).to_rng(), &device);
        assert_eq!(a.param("kernel"), b.param("kernel"));
    }

    #[test]
    fn test_batch_norm_uses_moving_statistics_under_autodiff() {
        type Ad = bcd_core::backend::InferenceBackend;
        let device = Default::default();
        let mut bn = BatchNormLayer::<Ad>::new(1, 0.0, &device);
        bn.set_param("moving_mean", TensorData::new(vec![1.0f32], [1]))
            .unwrap();
        bn.set_param("moving_variance", TensorData::new(vec![4.0f32], [1]))
            .unwrap();

        let x = Tensor::<Ad, 4>::from_data(
            TensorData::new(vec![3.0f32, 7.0], [2, 1, 1, 1]),
            &device,
        );
        let y: Vec<f32> = bn.forward(x).into_data().to_vec().unwrap();
        assert!((y[0] - 1.0).abs() < 1e-6);
        assert!((y[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_params_are_frozen() {
        type Ad = bcd_core::backend::InferenceBackend;
        let device = Default::default();
        let mut rng = Seed::new(4).to_rng();
        let mut conv = Conv2dLayer::<Ad>::new(1, 2, [1, 1], [1, 1], [0, 0], true, &mut rng, &device);
        assert!(!conv.conv.weight.val().is_require_grad());

        conv.set_param("kernel", TensorData::new(vec![1.0f32, 2.0], [2, 1, 1, 1]))
            .unwrap();
        assert!(!conv.conv.weight.val().is_require_grad());
        let bias = conv.conv.bias.as_ref().unwrap();
        assert!(!bias.val().is_require_grad());
    }
}
