//! Loss functions for training.

use burn::tensor::{Tensor, backend::Backend};

/// Supported loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    /// Mean Squared Error loss.
    Mse,
    /// Mean Absolute Error loss.
    L1,
    /// Binary Cross Entropy loss over probabilities.
    BinaryCrossEntropy,
    /// Cross entropy over logits with one-hot (or probability) targets.
    CrossEntropy,
}

impl Loss {
    /// Computes the loss between predictions and targets.
    pub fn compute<B: Backend>(
        &self,
        predictions: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        match self {
            Loss::Mse => {
                let diff = predictions - targets;
                let squared = diff.clone() * diff;
                squared.mean()
            }
            Loss::L1 => (predictions - targets).abs().mean(),
            Loss::BinaryCrossEntropy => {
                // BCE = -mean(y * log(p) + (1-y) * log(1-p))
                let epsilon = 1e-7;
                let ones = Tensor::ones_like(&predictions);
                let p_clipped = predictions.clone().clamp(epsilon, 1.0 - epsilon);
                let log_p = p_clipped.clone().log();
                let log_1_minus_p = (ones.clone() - p_clipped).log();
                let bce = targets.clone() * log_p + (ones - targets) * log_1_minus_p;
                bce.neg().mean()
            }
            Loss::CrossEntropy => {
                // CE = -mean_over_batch(sum_over_classes(y * log_softmax(x)))
                let log_probs = burn::tensor::activation::log_softmax(predictions, 1);
                (targets * log_probs).sum_dim(1).mean().neg()
            }
        }
    }
}
