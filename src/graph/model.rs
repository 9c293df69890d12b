//! CompiledModel - the executable form of an assembled block graph.
//!
//! A compiled model is split in two:
//! - [`Layers`]: the Burn module holding every trainable parameter. This is
//!   what the optimizer updates and what checkpoints persist.
//! - [`ExecutionPlan`]: the steps of the forward pass in topological order.
//!   Each step names its inputs by source (model input or an earlier step
//!   index), so branching and merging graphs run without a tensor map.

use burn::module::Module;
use burn::nn::DropoutConfig;
use burn::tensor::{Tensor, backend::Backend};

use super::block::{BlockId, BlockKind};
use crate::layers::{Activation, BatchNormLayer, Dense};
use crate::training::{Loss, OptimizerConfig};

/// Trainable parameters of a compiled model.
#[derive(Module, Debug)]
pub struct Layers<B: Backend> {
    dense: Vec<Dense<B>>,
    batch_norm: Vec<BatchNormLayer<B>>,
}

impl<B: Backend> Layers<B> {
    pub(crate) fn new(dense: Vec<Dense<B>>, batch_norm: Vec<BatchNormLayer<B>>) -> Self {
        Self { dense, batch_norm }
    }

    /// Returns the dense layers in the order their blocks execute.
    pub fn dense(&self) -> &[Dense<B>] {
        &self.dense
    }

    /// Returns the batch normalization layers in the order their blocks execute.
    pub fn batch_norm(&self) -> &[BatchNormLayer<B>] {
        &self.batch_norm
    }

    /// Returns true if there is nothing for an optimizer to update.
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty() && self.batch_norm.is_empty()
    }
}

/// Where a step reads one of its inputs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The batch fed to the model.
    Input,
    /// The output of an earlier step.
    Step(usize),
}

/// What a step computes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Kernel {
    Dense(usize),
    BatchNorm(usize),
    Dropout(f64),
    Activation(Activation),
    Identity,
    Add,
    Multiply,
    Concat,
}

/// One block of the forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    block_id: BlockId,
    kind: BlockKind,
    subtype: String,
    inputs: Vec<Source>,
    output_size: usize,
    kernel: Kernel,
}

impl Step {
    pub(crate) fn new(
        block_id: BlockId,
        kind: BlockKind,
        subtype: String,
        inputs: Vec<Source>,
        output_size: usize,
        kernel: Kernel,
    ) -> Self {
        Self {
            block_id,
            kind,
            subtype,
            inputs,
            output_size,
            kernel,
        }
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn inputs(&self) -> &[Source] {
        &self.inputs
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }
}

/// The forward pass as a list of steps in topological order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    feature_size: usize,
    steps: Vec<Step>,
    output: usize,
}

impl ExecutionPlan {
    pub(crate) fn new(feature_size: usize, steps: Vec<Step>, output: usize) -> Self {
        Self {
            feature_size,
            steps,
            output,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Index of the step whose output is the model output.
    pub fn output_step(&self) -> usize {
        self.output
    }

    /// Number of input features the model expects.
    pub fn feature_size(&self) -> usize {
        self.feature_size
    }

    /// Number of features the model produces.
    pub fn output_size(&self) -> usize {
        self.steps[self.output].output_size
    }

    /// Runs the forward pass with the given parameters.
    ///
    /// Dropout and batch-norm statistics follow Burn's convention: they are in
    /// training mode only on autodiff backends.
    pub fn forward<B: Backend>(&self, layers: &Layers<B>, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut outputs: Vec<Tensor<B, 2>> = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let operands: Vec<Tensor<B, 2>> = step
                .inputs
                .iter()
                .map(|source| match source {
                    Source::Input => input.clone(),
                    Source::Step(index) => outputs[*index].clone(),
                })
                .collect();
            let mut operands = operands.into_iter();
            let first = match operands.next() {
                Some(tensor) => tensor,
                None => input.clone(),
            };

            let result = match &step.kernel {
                Kernel::Dense(index) => layers.dense[*index].forward(first),
                Kernel::BatchNorm(index) => layers.batch_norm[*index].forward(first),
                Kernel::Dropout(prob) => DropoutConfig::new(*prob).init().forward(first),
                Kernel::Activation(activation) => activation.apply(first),
                Kernel::Identity => first,
                Kernel::Add => operands.fold(first, |acc, tensor| acc.add(tensor)),
                Kernel::Multiply => operands.fold(first, |acc, tensor| acc.mul(tensor)),
                Kernel::Concat => {
                    let mut tensors = vec![first];
                    tensors.extend(operands);
                    Tensor::cat(tensors, 1)
                }
            };
            outputs.push(result);
        }

        outputs.swap_remove(self.output)
    }
}

/// An assembled model: parameters, forward plan, bound criterion and optimizer factory.
#[derive(Debug)]
pub struct CompiledModel<B: Backend> {
    layers: Layers<B>,
    plan: ExecutionPlan,
    criterion: Loss,
    optimizer: OptimizerConfig,
}

impl<B: Backend> CompiledModel<B> {
    pub(crate) fn new(
        layers: Layers<B>,
        plan: ExecutionPlan,
        criterion: Loss,
        optimizer: OptimizerConfig,
    ) -> Self {
        Self {
            layers,
            plan,
            criterion,
            optimizer,
        }
    }

    /// Performs forward pass through the model.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.plan.forward(&self.layers, input)
    }

    pub fn layers(&self) -> &Layers<B> {
        &self.layers
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn criterion(&self) -> Loss {
        self.criterion
    }

    pub fn optimizer(&self) -> &OptimizerConfig {
        &self.optimizer
    }

    /// Returns the number of input features.
    pub fn feature_size(&self) -> usize {
        self.plan.feature_size()
    }

    /// Returns the output size of the model.
    pub fn output_size(&self) -> usize {
        self.plan.output_size()
    }

    /// Ids of the pipeline blocks in execution order.
    pub fn block_ids(&self) -> Vec<&str> {
        self.plan.steps.iter().map(|s| s.block_id()).collect()
    }

    /// Subtypes of the pipeline blocks in execution order.
    pub fn subtypes(&self) -> Vec<&str> {
        self.plan.steps.iter().map(|s| s.subtype()).collect()
    }

    /// Replaces the parameters, e.g. with ones loaded from a checkpoint.
    pub fn with_layers(self, layers: Layers<B>) -> Self {
        Self { layers, ..self }
    }

    /// Splits the model into its parts.
    pub fn into_parts(self) -> (Layers<B>, ExecutionPlan, Loss, OptimizerConfig) {
        (self.layers, self.plan, self.criterion, self.optimizer)
    }
}
