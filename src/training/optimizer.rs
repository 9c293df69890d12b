//! Optimizer configuration and runtime binding.
//!
//! Burn optimizers are statically typed per algorithm, while the algorithm here
//! is chosen at runtime by an optimizer block. [`OptimizerConfig::init`] erases
//! the concrete adaptor behind [`ParameterUpdate`].

use burn::{
    module::AutodiffModule,
    optim::{
        AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig,
        decay::WeightDecayConfig, momentum::MomentumConfig,
    },
    tensor::backend::AutodiffBackend,
};

/// Momentum settings for SGD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdMomentum {
    pub momentum: f64,
    pub dampening: f64,
    pub nesterov: bool,
}

/// Backend-independent description of the parameter update rule.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerConfig {
    Adam {
        learning_rate: f64,
        betas: (f64, f64),
        epsilon: f64,
        weight_decay: Option<f64>,
    },
    AdamW {
        learning_rate: f64,
        betas: (f64, f64),
        epsilon: f64,
        weight_decay: f64,
    },
    Sgd {
        learning_rate: f64,
        momentum: Option<SgdMomentum>,
        weight_decay: Option<f64>,
    },
}

impl OptimizerConfig {
    /// Adam with the given learning rate and default moments.
    pub fn adam(learning_rate: f64) -> Self {
        Self::Adam {
            learning_rate,
            betas: (0.9, 0.999),
            epsilon: 1e-8,
            weight_decay: None,
        }
    }

    /// Plain SGD with the given learning rate.
    pub fn sgd(learning_rate: f64) -> Self {
        Self::Sgd {
            learning_rate,
            momentum: None,
            weight_decay: None,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Adam { learning_rate, .. }
            | Self::AdamW { learning_rate, .. }
            | Self::Sgd { learning_rate, .. } => *learning_rate,
        }
    }

    /// Instantiates the optimizer for module type `M`.
    pub fn init<B, M>(&self) -> Box<dyn ParameterUpdate<B, M>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + 'static,
    {
        let learning_rate = self.learning_rate();
        match self {
            Self::Adam {
                betas,
                epsilon,
                weight_decay,
                ..
            } => {
                let config = AdamConfig::new()
                    .with_beta_1(betas.0 as f32)
                    .with_beta_2(betas.1 as f32)
                    .with_epsilon(*epsilon as f32)
                    .with_weight_decay(weight_decay.map(|p| WeightDecayConfig::new(p as f32)));
                bind(config.init(), learning_rate)
            }
            Self::AdamW {
                betas,
                epsilon,
                weight_decay,
                ..
            } => {
                let config = AdamWConfig::new()
                    .with_beta_1(betas.0 as f32)
                    .with_beta_2(betas.1 as f32)
                    .with_epsilon(*epsilon as f32)
                    .with_weight_decay(*weight_decay as f32);
                bind(config.init(), learning_rate)
            }
            Self::Sgd {
                momentum,
                weight_decay,
                ..
            } => {
                let momentum = momentum.map(|m| {
                    MomentumConfig::new()
                        .with_momentum(m.momentum)
                        .with_dampening(m.dampening)
                        .with_nesterov(m.nesterov)
                });
                let config = SgdConfig::new()
                    .with_momentum(momentum)
                    .with_weight_decay(weight_decay.map(|p| WeightDecayConfig::new(p as f32)));
                bind(config.init(), learning_rate)
            }
        }
    }
}

/// An optimizer bound to a learning rate, applied once per training batch.
pub trait ParameterUpdate<B: AutodiffBackend, M: AutodiffModule<B>> {
    /// Applies one update step and returns the updated module.
    fn step(&mut self, module: M, grads: GradientsParams) -> M;

    fn learning_rate(&self) -> f64;
}

struct BoundOptimizer<O> {
    optimizer: O,
    learning_rate: f64,
}

impl<B, M, O> ParameterUpdate<B, M> for BoundOptimizer<O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn step(&mut self, module: M, grads: GradientsParams) -> M {
        self.optimizer.step(self.learning_rate, module, grads)
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

fn bind<B, M, O>(optimizer: O, learning_rate: f64) -> Box<dyn ParameterUpdate<B, M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + 'static,
    O: Optimizer<M, B> + 'static,
{
    Box::new(BoundOptimizer {
        optimizer,
        learning_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Dense, DenseConfig};
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Tensor, backend::Backend};

    type TestBackend = Autodiff<NdArray>;

    fn single_step(config: &OptimizerConfig) -> (Vec<f32>, Vec<f32>) {
        let device = <TestBackend as Backend>::Device::default();
        let layer: Dense<TestBackend> = DenseConfig::new(2, 1).init(&device);
        let input = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);

        let before: Vec<f32> = layer
            .forward(input.clone())
            .into_data()
            .to_vec()
            .unwrap();

        let mut optimizer = config.init::<TestBackend, Dense<TestBackend>>();
        let loss = layer.forward(input.clone()).powf_scalar(2.0).mean();
        let grads = GradientsParams::from_grads(loss.backward(), &layer);
        let layer = optimizer.step(layer, grads);

        let after: Vec<f32> = layer.forward(input).into_data().to_vec().unwrap();
        (before, after)
    }

    #[test]
    fn test_learning_rate_accessor() {
        assert_eq!(OptimizerConfig::adam(0.01).learning_rate(), 0.01);
        assert_eq!(OptimizerConfig::sgd(0.5).learning_rate(), 0.5);
    }

    #[test]
    fn test_each_optimizer_updates_parameters() {
        let configs = [
            OptimizerConfig::adam(0.1),
            OptimizerConfig::AdamW {
                learning_rate: 0.1,
                betas: (0.9, 0.999),
                epsilon: 1e-8,
                weight_decay: 1e-2,
            },
            OptimizerConfig::sgd(0.1),
            OptimizerConfig::Sgd {
                learning_rate: 0.1,
                momentum: Some(SgdMomentum {
                    momentum: 0.9,
                    dampening: 0.0,
                    nesterov: true,
                }),
                weight_decay: Some(1e-4),
            },
        ];

        for config in &configs {
            let (before, after) = single_step(config);
            assert_ne!(before, after, "{config:?} should change the outputs");
        }
    }

    #[test]
    fn test_bound_optimizer_reports_rate() {
        let optimizer = OptimizerConfig::sgd(0.25).init::<TestBackend, Dense<TestBackend>>();
        assert_eq!(optimizer.learning_rate(), 0.25);
    }
}
