//! Dense (fully connected) layer implementation.

use crate::layers::Activation;
use burn::{
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{Tensor, backend::Backend},
};

/// Configuration for a Dense layer.
#[derive(Debug, Clone)]
pub struct DenseConfig {
    /// Number of input features.
    pub input_size: usize,
    /// Number of output features.
    pub output_size: usize,
    /// Whether the layer learns an additive bias.
    pub bias: bool,
    /// Activation function to apply after the linear transformation.
    pub activation: Activation,
}

impl DenseConfig {
    /// Creates a new DenseConfig with bias and no activation.
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            output_size,
            bias: true,
            activation: Activation::None,
        }
    }

    /// Sets whether a bias is learned.
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Sets the activation function.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Initializes the Dense layer with the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Dense<B> {
        let linear = LinearConfig::new(self.input_size, self.output_size)
            .with_bias(self.bias)
            .init(device);

        Dense {
            linear,
            input_size: self.input_size,
            output_size: self.output_size,
            activation_id: self.activation.to_id(),
        }
    }
}

/// A dense (fully connected) layer with optional activation.
///
/// It performs: output = activation(input @ weights + bias)
#[derive(Module, Debug)]
pub struct Dense<B: Backend> {
    /// The underlying linear transformation.
    linear: Linear<B>,
    /// Input size (constant metadata).
    input_size: usize,
    /// Output size (constant metadata).
    output_size: usize,
    /// Activation function ID, see [`Activation::to_id`].
    activation_id: u8,
}

impl<B: Backend> Dense<B> {
    /// Performs the forward pass.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = self.linear.forward(input);
        Activation::from_id(self.activation_id).apply(output)
    }

    /// Returns the input size of this layer.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Returns the output size of this layer.
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Returns the activation function.
    pub fn activation(&self) -> Activation {
        Activation::from_id(self.activation_id)
    }

    /// Returns true if the layer has a bias vector.
    pub fn has_bias(&self) -> bool {
        self.linear.bias.is_some()
    }
}
