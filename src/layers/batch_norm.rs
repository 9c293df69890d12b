//! Batch normalization over the feature dimension of a `[batch, features]` tensor.

use burn::{
    module::Module,
    nn::{BatchNorm, BatchNormConfig},
    tensor::{Tensor, backend::Backend},
};

/// Batch normalization layer wrapping Burn's `BatchNorm`.
///
/// Burn normalizes `[batch, channels, length]` inputs, so the 2D input is viewed
/// as a length-one sequence. Running statistics are updated only on autodiff
/// backends, i.e. during the training pass.
#[derive(Module, Debug)]
pub struct BatchNormLayer<B: Backend> {
    batch_norm: BatchNorm<B, 1>,
    num_features: usize,
}

impl<B: Backend> BatchNormLayer<B> {
    pub fn new(num_features: usize, epsilon: f64, momentum: f64, device: &B::Device) -> Self {
        let batch_norm = BatchNormConfig::new(num_features)
            .with_epsilon(epsilon)
            .with_momentum(momentum)
            .init(device);
        Self {
            batch_norm,
            num_features,
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, features] = input.dims();
        let input_3d = input.reshape([batch, features, 1]);
        let output_3d = self.batch_norm.forward(input_3d);
        output_3d.reshape([batch, features])
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }
}
