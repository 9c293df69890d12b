//! Neural network layer implementations.
//!
//! This module contains the building blocks that trainable blocks are
//! initialized into: dense (fully connected) layers, batch normalization and
//! activation functions.

pub mod activation;
pub mod batch_norm;
pub mod dense;

pub use activation::Activation;
pub use batch_norm::BatchNormLayer;
pub use dense::{Dense, DenseConfig};
