//! Lookup from block subtypes to constructors.
//!
//! A registry is an ordinary value handed to the assembler, so different
//! compilations can use different catalogs side by side.

use std::collections::HashMap;

use super::block::BlockParams;
use super::operation::Operation;
use crate::errors::ModelError;
use crate::layers::Activation;
use crate::training::{Loss, OptimizerConfig, SgdMomentum};

/// Builds an [`Operation`] from a layer or operation block's parameters.
pub type OperationConstructor =
    Box<dyn Fn(&BlockParams) -> Result<Operation, ModelError> + Send + Sync>;

/// Builds a criterion from a criterion block's parameters.
pub type CriterionConstructor = Box<dyn Fn(&BlockParams) -> Result<Loss, ModelError> + Send + Sync>;

/// Builds an optimizer description from an optimizer block's parameters.
pub type OptimizerConstructor =
    Box<dyn Fn(&BlockParams) -> Result<OptimizerConfig, ModelError> + Send + Sync>;

/// Maps block subtypes to constructors.
#[derive(Default)]
pub struct BlockRegistry {
    operations: HashMap<String, OperationConstructor>,
    criteria: HashMap<String, CriterionConstructor>,
    optimizers: HashMap<String, OptimizerConstructor>,
}

impl std::fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut operations: Vec<&String> = self.operations.keys().collect();
        let mut criteria: Vec<&String> = self.criteria.keys().collect();
        let mut optimizers: Vec<&String> = self.optimizers.keys().collect();
        operations.sort();
        criteria.sort();
        optimizers.sort();
        f.debug_struct("BlockRegistry")
            .field("operations", &operations)
            .field("criteria", &criteria)
            .field("optimizers", &optimizers)
            .finish()
    }
}

impl BlockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in catalog.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_operation("Linear", |params| {
            let activation = match params.str("activation")? {
                Some(name) => Activation::from_name(name).ok_or_else(|| {
                    ModelError::InvalidParameter {
                        name: "activation".to_string(),
                        message: format!("unknown activation `{name}`"),
                    }
                })?,
                None => Activation::None,
            };
            Ok(Operation::Dense {
                input_size: params.usize("in_features")?,
                output_size: positive(params.require_usize("out_features")?, "out_features")?,
                bias: params.bool("bias")?.unwrap_or(true),
                activation,
            })
        });
        registry.register_operation("BatchNorm1d", |params| {
            Ok(Operation::BatchNorm {
                num_features: params.usize("num_features")?,
                epsilon: params.f64("eps")?.unwrap_or(1e-5),
                momentum: params.f64("momentum")?.unwrap_or(0.1),
            })
        });
        registry.register_operation("Dropout", |params| {
            let prob = params.f64("p")?.unwrap_or(0.5);
            if !(0.0..1.0).contains(&prob) {
                return Err(ModelError::InvalidParameter {
                    name: "p".to_string(),
                    message: format!("dropout probability must be in [0, 1), got {prob}"),
                });
            }
            Ok(Operation::Dropout { prob })
        });
        for (name, activation) in [
            ("ReLU", Activation::Relu),
            ("Sigmoid", Activation::Sigmoid),
            ("Tanh", Activation::Tanh),
            ("GELU", Activation::Gelu),
            ("Softmax", Activation::Softmax),
        ] {
            registry.register_operation(name, move |_| Ok(Operation::Activation(activation)));
        }
        registry.register_operation("Identity", |_| Ok(Operation::Identity));
        registry.register_operation("Add", |_| Ok(Operation::Add));
        registry.register_operation("Multiply", |_| Ok(Operation::Multiply));
        registry.register_operation("Concat", |_| Ok(Operation::Concat));

        registry.register_criterion("MSELoss", |_| Ok(Loss::Mse));
        registry.register_criterion("L1Loss", |_| Ok(Loss::L1));
        registry.register_criterion("BCELoss", |_| Ok(Loss::BinaryCrossEntropy));
        registry.register_criterion("CrossEntropyLoss", |_| Ok(Loss::CrossEntropy));

        registry.register_optimizer("Adam", |params| {
            Ok(OptimizerConfig::Adam {
                learning_rate: learning_rate(params, 1e-3)?,
                betas: params.pair("betas")?.unwrap_or((0.9, 0.999)),
                epsilon: params.f64("eps")?.unwrap_or(1e-8),
                weight_decay: params.f64("weight_decay")?.filter(|w| *w > 0.0),
            })
        });
        registry.register_optimizer("AdamW", |params| {
            Ok(OptimizerConfig::AdamW {
                learning_rate: learning_rate(params, 1e-3)?,
                betas: params.pair("betas")?.unwrap_or((0.9, 0.999)),
                epsilon: params.f64("eps")?.unwrap_or(1e-8),
                weight_decay: params.f64("weight_decay")?.unwrap_or(1e-2),
            })
        });
        registry.register_optimizer("SGD", |params| {
            let momentum = params
                .f64("momentum")?
                .filter(|m| *m > 0.0)
                .map(|momentum| -> Result<SgdMomentum, ModelError> {
                    Ok(SgdMomentum {
                        momentum,
                        dampening: params.f64("dampening")?.unwrap_or(0.0),
                        nesterov: params.bool("nesterov")?.unwrap_or(false),
                    })
                })
                .transpose()?;
            Ok(OptimizerConfig::Sgd {
                learning_rate: learning_rate(params, 1e-2)?,
                momentum,
                weight_decay: params.f64("weight_decay")?.filter(|w| *w > 0.0),
            })
        });

        registry
    }

    /// Registers (or replaces) a layer/operation constructor.
    pub fn register_operation<F>(&mut self, subtype: impl Into<String>, constructor: F)
    where
        F: Fn(&BlockParams) -> Result<Operation, ModelError> + Send + Sync + 'static,
    {
        self.operations
            .insert(subtype.into(), Box::new(constructor));
    }

    /// Registers (or replaces) a criterion constructor.
    pub fn register_criterion<F>(&mut self, subtype: impl Into<String>, constructor: F)
    where
        F: Fn(&BlockParams) -> Result<Loss, ModelError> + Send + Sync + 'static,
    {
        self.criteria.insert(subtype.into(), Box::new(constructor));
    }

    /// Registers (or replaces) an optimizer constructor.
    pub fn register_optimizer<F>(&mut self, subtype: impl Into<String>, constructor: F)
    where
        F: Fn(&BlockParams) -> Result<OptimizerConfig, ModelError> + Send + Sync + 'static,
    {
        self.optimizers.insert(subtype.into(), Box::new(constructor));
    }

    pub fn resolve_operation(&self, subtype: &str) -> Result<&OperationConstructor, ModelError> {
        self.operations.get(subtype).ok_or_else(|| unsupported(subtype))
    }

    pub fn resolve_criterion(&self, subtype: &str) -> Result<&CriterionConstructor, ModelError> {
        self.criteria.get(subtype).ok_or_else(|| unsupported(subtype))
    }

    pub fn resolve_optimizer(&self, subtype: &str) -> Result<&OptimizerConstructor, ModelError> {
        self.optimizers.get(subtype).ok_or_else(|| unsupported(subtype))
    }
}

fn unsupported(subtype: &str) -> ModelError {
    ModelError::UnsupportedBlockType {
        subtype: subtype.to_string(),
    }
}

fn positive(value: usize, name: &str) -> Result<usize, ModelError> {
    if value == 0 {
        return Err(ModelError::InvalidParameter {
            name: name.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn learning_rate(params: &BlockParams, default: f64) -> Result<f64, ModelError> {
    let lr = params.f64("lr")?.unwrap_or(default);
    if !(lr.is_finite() && lr > 0.0) {
        return Err(ModelError::InvalidParameter {
            name: "lr".to_string(),
            message: format!("learning rate must be a positive number, got {lr}"),
        });
    }
    Ok(lr)
}
