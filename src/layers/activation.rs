//! Activation functions for neural network layers.

use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

/// Supported activation functions.
///
/// Used both as standalone operation blocks (`ReLU`, `Sigmoid`, ...) and as the
/// optional `activation` parameter of a `Linear` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Activation {
    /// No activation (identity function).
    #[default]
    None,
    /// Rectified Linear Unit: f(x) = max(0, x)
    Relu,
    /// Sigmoid: f(x) = 1 / (1 + exp(-x))
    Sigmoid,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
    /// Softmax normalization (across last dimension)
    Softmax,
    /// Gaussian Error Linear Unit: f(x) = x * 0.5 * (1 + erf(x / sqrt(2)))
    Gelu,
}

impl Activation {
    /// Applies the activation function to a tensor.
    pub fn apply<B: Backend, const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::None => tensor,
            Activation::Relu => burn::tensor::activation::relu(tensor),
            Activation::Sigmoid => burn::tensor::activation::sigmoid(tensor),
            Activation::Tanh => burn::tensor::activation::tanh(tensor),
            Activation::Softmax => burn::tensor::activation::softmax(tensor, D - 1),
            Activation::Gelu => burn::tensor::activation::gelu(tensor),
        }
    }

    /// Creates an Activation from a block name, ignoring case (`"ReLU"`, `"gelu"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "NONE" | "IDENTITY" => Some(Activation::None),
            "RELU" => Some(Activation::Relu),
            "SIGMOID" => Some(Activation::Sigmoid),
            "TANH" => Some(Activation::Tanh),
            "SOFTMAX" => Some(Activation::Softmax),
            "GELU" => Some(Activation::Gelu),
            _ => None,
        }
    }

    /// Converts activation to a numeric ID for storage in Module.
    pub fn to_id(&self) -> u8 {
        match self {
            Activation::None => 0,
            Activation::Relu => 1,
            Activation::Sigmoid => 2,
            Activation::Tanh => 3,
            Activation::Softmax => 4,
            Activation::Gelu => 5,
        }
    }

    /// Creates an Activation from a numeric ID.
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Activation::Relu,
            2 => Activation::Sigmoid,
            3 => Activation::Tanh,
            4 => Activation::Softmax,
            5 => Activation::Gelu,
            _ => Activation::None,
        }
    }
}
