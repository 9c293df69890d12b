//! Operations for the computation graph.
//!
//! Uses a simple enum instead of trait objects for clarity. An `Operation` is
//! the backend-independent description a registry constructor produces from a
//! block's parameters; weights are only created when the model is assembled.

use crate::errors::ModelError;
use crate::layers::Activation;

/// How many data inputs an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly one input (the model input when the block has no predecessor).
    Single,
    /// At least this many inputs.
    AtLeast(usize),
}

/// A computation operation in the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Dense (fully connected) layer.
    Dense {
        input_size: Option<usize>,
        output_size: usize,
        bias: bool,
        activation: Activation,
    },
    /// Batch normalization layer with trainable parameters.
    BatchNorm {
        num_features: Option<usize>,
        epsilon: f64,
        momentum: f64,
    },
    /// Dropout, active only during the training pass.
    Dropout { prob: f64 },
    /// Element-wise activation.
    Activation(Activation),
    /// Passes its input through unchanged.
    Identity,
    /// Element-wise sum of the inputs.
    Add,
    /// Element-wise product of the inputs.
    Multiply,
    /// Concatenates the inputs along the feature dimension.
    Concat,
}

impl Operation {
    /// Creates a new Dense operation with bias.
    pub fn dense(output_size: usize, activation: Activation) -> Self {
        Self::Dense {
            input_size: None,
            output_size,
            bias: true,
            activation,
        }
    }

    /// Returns how many inputs this operation takes.
    pub fn arity(&self) -> Arity {
        match self {
            Self::Add | Self::Multiply => Arity::AtLeast(2),
            Self::Concat => Arity::AtLeast(1),
            _ => Arity::Single,
        }
    }

    /// Returns true if assembling this operation creates trainable parameters.
    pub fn is_trainable(&self) -> bool {
        matches!(self, Self::Dense { .. } | Self::BatchNorm { .. })
    }

    /// Returns the output size for this operation given input sizes.
    ///
    /// Fails when declared sizes disagree with the inferred ones.
    pub fn output_size(&self, input_sizes: &[usize]) -> Result<usize, ModelError> {
        let Some(&first) = input_sizes.first() else {
            return Err(mismatch("operation has no inputs".to_string()));
        };
        match self {
            Self::Dense {
                input_size,
                output_size,
                ..
            } => {
                if let Some(declared) = input_size {
                    if *declared != first {
                        return Err(mismatch(format!(
                            "Linear declares in_features={declared} but receives {first} features"
                        )));
                    }
                }
                Ok(*output_size)
            }
            Self::BatchNorm { num_features, .. } => {
                if let Some(declared) = num_features {
                    if *declared != first {
                        return Err(mismatch(format!(
                            "BatchNorm1d declares num_features={declared} but receives {first} features"
                        )));
                    }
                }
                Ok(first)
            }
            Self::Add | Self::Multiply => {
                if let Some(other) = input_sizes.iter().find(|&&size| size != first) {
                    return Err(mismatch(format!(
                        "element-wise inputs must have the same size, got {first} and {other}"
                    )));
                }
                Ok(first)
            }
            Self::Concat => Ok(input_sizes.iter().sum()),
            Self::Dropout { .. } | Self::Activation(_) | Self::Identity => Ok(first),
        }
    }
}

fn mismatch(message: String) -> ModelError {
    ModelError::InvalidGraphConfiguration(message)
}
