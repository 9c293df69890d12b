//! Assembly of an execution order into a [`CompiledModel`].

use std::collections::HashMap;

use burn::tensor::backend::Backend;

use super::block::{BlockDescriptor, BlockKind};
use super::compile::ExecutionOrder;
use super::model::{CompiledModel, ExecutionPlan, Kernel, Layers, Source, Step};
use super::operation::{Arity, Operation};
use super::registry::BlockRegistry;
use crate::errors::ModelError;
use crate::layers::{BatchNormLayer, DenseConfig};
use crate::training::{Loss, OptimizerConfig};

/// Turns ordered blocks into an executable model using a registry.
#[derive(Debug, Clone, Copy)]
pub struct ModelAssembler<'a> {
    registry: &'a BlockRegistry,
    feature_size: Option<usize>,
}

impl<'a> ModelAssembler<'a> {
    pub fn new(registry: &'a BlockRegistry) -> Self {
        Self {
            registry,
            feature_size: None,
        }
    }

    /// Sets the input width explicitly instead of reading it from a root `Linear` block.
    pub fn with_feature_size(mut self, feature_size: usize) -> Self {
        self.feature_size = Some(feature_size);
        self
    }

    /// Builds the model, creating weights on `device`.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnsupportedBlockType`] if a subtype is not registered.
    /// - [`ModelError::InvalidParameter`] if a constructor rejects a block's params.
    /// - [`ModelError::InvalidGraphConfiguration`] for a missing or repeated
    ///   criterion/optimizer, arity or width mismatches, zero or several sinks,
    ///   or a pipeline without trainable layers.
    pub fn assemble<B: Backend>(
        &self,
        order: &ExecutionOrder,
        device: &B::Device,
    ) -> Result<CompiledModel<B>, ModelError> {
        let mut criteria: Vec<Loss> = Vec::new();
        let mut optimizers: Vec<OptimizerConfig> = Vec::new();
        let mut pipeline: Vec<(&BlockDescriptor, Operation)> = Vec::new();

        for block in order.blocks() {
            let params = &block.params;
            match block.kind {
                BlockKind::Criterion => {
                    let constructor = self.registry.resolve_criterion(&block.subtype)?;
                    criteria.push(constructor(params).map_err(|e| in_block(e, &block.id))?);
                }
                BlockKind::Optimizer => {
                    let constructor = self.registry.resolve_optimizer(&block.subtype)?;
                    optimizers.push(constructor(params).map_err(|e| in_block(e, &block.id))?);
                }
                BlockKind::Layer | BlockKind::Operation => {
                    let constructor = self.registry.resolve_operation(&block.subtype)?;
                    let operation = constructor(params).map_err(|e| in_block(e, &block.id))?;
                    pipeline.push((block, operation));
                }
            }
        }

        let criterion = exactly_one(criteria, "CRITERION")?;
        let optimizer = exactly_one(optimizers, "OPTIMIZER")?;

        if pipeline.is_empty() {
            return Err(invalid("graph has no LAYER or OPERATION blocks".to_string()));
        }
        if !pipeline.iter().any(|(_, op)| op.is_trainable()) {
            return Err(invalid("graph has no trainable layers".to_string()));
        }

        let position: HashMap<&str, usize> = pipeline
            .iter()
            .enumerate()
            .map(|(i, (block, _))| (block.id.as_str(), i))
            .collect();

        // Only edges between data blocks carry tensors.
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); pipeline.len()];
        let mut has_successor = vec![false; pipeline.len()];
        for edge in order.edges() {
            let source = position.get(edge.source_id.as_str());
            let target = position.get(edge.target_id.as_str());
            if let (Some(&source), Some(&target)) = (source, target) {
                predecessors[target].push(source);
                has_successor[source] = true;
            }
        }

        let feature_size = self.resolve_feature_size(&pipeline, &predecessors)?;

        let mut dense = Vec::new();
        let mut batch_norm = Vec::new();
        let mut steps: Vec<Step> = Vec::with_capacity(pipeline.len());

        for (i, (block, operation)) in pipeline.iter().enumerate() {
            let inputs: Vec<Source> = if predecessors[i].is_empty() {
                vec![Source::Input]
            } else {
                predecessors[i].iter().map(|&p| Source::Step(p)).collect()
            };
            check_arity(block, operation, inputs.len())?;

            let input_sizes: Vec<usize> = inputs
                .iter()
                .map(|source| match source {
                    Source::Input => feature_size,
                    Source::Step(index) => steps[*index].output_size(),
                })
                .collect();
            let output_size = operation.output_size(&input_sizes).map_err(|e| match e {
                ModelError::InvalidGraphConfiguration(message) => {
                    invalid(format!("block `{}`: {message}", block.id))
                }
                other => other,
            })?;

            let kernel = match operation {
                Operation::Dense {
                    bias, activation, ..
                } => {
                    dense.push(
                        DenseConfig::new(input_sizes[0], output_size)
                            .with_bias(*bias)
                            .with_activation(*activation)
                            .init(device),
                    );
                    Kernel::Dense(dense.len() - 1)
                }
                Operation::BatchNorm {
                    epsilon, momentum, ..
                } => {
                    batch_norm.push(BatchNormLayer::new(
                        output_size,
                        *epsilon,
                        *momentum,
                        device,
                    ));
                    Kernel::BatchNorm(batch_norm.len() - 1)
                }
                Operation::Dropout { prob } => Kernel::Dropout(*prob),
                Operation::Activation(activation) => Kernel::Activation(*activation),
                Operation::Identity => Kernel::Identity,
                Operation::Add => Kernel::Add,
                Operation::Multiply => Kernel::Multiply,
                Operation::Concat => Kernel::Concat,
            };

            log::debug!(
                "Step {i}: {} ({}) {:?} -> {output_size}",
                block.id,
                block.subtype,
                input_sizes
            );
            steps.push(Step::new(
                block.id.clone(),
                block.kind,
                block.subtype.clone(),
                inputs,
                output_size,
                kernel,
            ));
        }

        let sinks: Vec<usize> = (0..steps.len()).filter(|&i| !has_successor[i]).collect();
        let output = match sinks.as_slice() {
            [single] => *single,
            _ => {
                let ids: Vec<&str> = sinks.iter().map(|&i| steps[i].block_id()).collect();
                return Err(invalid(format!(
                    "model must have exactly one output block, found {}: {ids:?}",
                    ids.len()
                )));
            }
        };

        log::debug!(
            "Assembled {} steps ({} dense, {} batch norm), {feature_size} -> {}",
            steps.len(),
            dense.len(),
            batch_norm.len(),
            steps[output].output_size()
        );

        Ok(CompiledModel::new(
            Layers::new(dense, batch_norm),
            ExecutionPlan::new(feature_size, steps, output),
            criterion,
            optimizer,
        ))
    }

    fn resolve_feature_size(
        &self,
        pipeline: &[(&BlockDescriptor, Operation)],
        predecessors: &[Vec<usize>],
    ) -> Result<usize, ModelError> {
        if let Some(size) = self.feature_size {
            if size == 0 {
                return Err(invalid("feature size must be greater than zero".to_string()));
            }
            return Ok(size);
        }

        pipeline
            .iter()
            .zip(predecessors)
            .filter(|(_, preds)| preds.is_empty())
            .find_map(|((_, operation), _)| match operation {
                Operation::Dense { input_size, .. } => *input_size,
                Operation::BatchNorm { num_features, .. } => *num_features,
                _ => None,
            })
            .ok_or_else(|| {
                invalid(
                    "cannot infer the input feature size; declare in_features on the first Linear block"
                        .to_string(),
                )
            })
    }
}

fn check_arity(
    block: &BlockDescriptor,
    operation: &Operation,
    inputs: usize,
) -> Result<(), ModelError> {
    match operation.arity() {
        Arity::Single if inputs > 1 => Err(invalid(format!(
            "block `{}` ({}) accepts one input but has {inputs}",
            block.id, block.subtype
        ))),
        Arity::AtLeast(min) if inputs < min => Err(invalid(format!(
            "block `{}` ({}) needs at least {min} inputs but has {inputs}",
            block.id, block.subtype
        ))),
        _ => Ok(()),
    }
}

fn exactly_one<T>(mut found: Vec<T>, kind: &str) -> Result<T, ModelError> {
    if found.len() != 1 {
        return Err(invalid(format!(
            "expected exactly one {kind} block, found {}",
            found.len()
        )));
    }
    found
        .pop()
        .ok_or_else(|| invalid(format!("expected exactly one {kind} block")))
}

fn in_block(error: ModelError, block_id: &str) -> ModelError {
    match error {
        ModelError::InvalidParameter { name, message } => ModelError::InvalidParameter {
            name,
            message: format!("{message} (block `{block_id}`)"),
        },
        other => other,
    }
}

fn invalid(message: String) -> ModelError {
    ModelError::InvalidGraphConfiguration(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::block::{ComputationGraph, EdgeDescriptor};
    use crate::graph::compile;
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    type TestBackend = NdArray;

    fn linear(id: &str, out: usize) -> BlockDescriptor {
        BlockDescriptor::layer(id, "Linear").param("out_features", out)
    }

    fn heads() -> Vec<BlockDescriptor> {
        vec![
            BlockDescriptor::criterion("loss", "MSELoss"),
            BlockDescriptor::optimizer("opt", "Adam").param("lr", 0.01),
        ]
    }

    fn assemble(
        blocks: Vec<BlockDescriptor>,
        edges: &[(&str, &str)],
    ) -> Result<CompiledModel<TestBackend>, ModelError> {
        let registry = BlockRegistry::with_defaults();
        let edges = edges
            .iter()
            .map(|(s, t)| EdgeDescriptor::new(*s, *t))
            .collect();
        let order = compile(&ComputationGraph::new(blocks, edges))?;
        let device = <TestBackend as Backend>::Device::default();
        ModelAssembler::new(&registry).assemble(&order, &device)
    }

    #[test]
    fn test_sequential_chain() {
        let mut blocks = vec![
            linear("fc2", 1),
            BlockDescriptor::operation("act", "ReLU"),
            linear("fc1", 8).param("in_features", 4),
        ];
        blocks.extend(heads());
        let model = assemble(blocks, &[("fc1", "act"), ("act", "fc2"), ("fc2", "loss")]).unwrap();

        assert_eq!(model.block_ids(), vec!["fc1", "act", "fc2"]);
        assert_eq!(model.subtypes(), vec!["Linear", "ReLU", "Linear"]);
        assert_eq!(model.feature_size(), 4);
        assert_eq!(model.output_size(), 1);
        assert_eq!(model.criterion(), Loss::Mse);
        assert_eq!(model.optimizer().learning_rate(), 0.01);
        assert_eq!(model.layers().dense().len(), 2);

        let device = <TestBackend as Backend>::Device::default();
        let output = model.forward(Tensor::zeros([3, 4], &device));
        assert_eq!(output.dims(), [3, 1]);
    }

    #[test]
    fn test_branch_and_merge() {
        let mut blocks = vec![
            linear("stem", 6).param("in_features", 3),
            linear("left", 6),
            linear("right", 6),
            BlockDescriptor::operation("sum", "Add"),
            BlockDescriptor::operation("cat", "Concat"),
            linear("head", 2),
        ];
        blocks.extend(heads());
        let model = assemble(
            blocks,
            &[
                ("stem", "left"),
                ("stem", "right"),
                ("left", "sum"),
                ("right", "sum"),
                ("sum", "cat"),
                ("stem", "cat"),
                ("cat", "head"),
            ],
        )
        .unwrap();

        let steps = model.plan().steps();
        assert_eq!(steps[3].inputs(), &[Source::Step(1), Source::Step(2)]);
        assert_eq!(steps[4].inputs(), &[Source::Step(3), Source::Step(0)]);
        assert_eq!(steps[4].output_size(), 12);
        assert_eq!(model.layers().dense()[3].input_size(), 12);

        let device = <TestBackend as Backend>::Device::default();
        let output = model.forward(Tensor::ones([5, 3], &device));
        assert_eq!(output.dims(), [5, 2]);
    }

    #[test]
    fn test_configured_feature_size() {
        let registry = BlockRegistry::with_defaults();
        let mut blocks = vec![
            BlockDescriptor::layer("norm", "BatchNorm1d"),
            linear("fc", 2),
        ];
        blocks.extend(heads());
        let graph = ComputationGraph::new(blocks, vec![EdgeDescriptor::new("norm", "fc")]);
        let order = compile(&graph).unwrap();
        let device = <TestBackend as Backend>::Device::default();

        assert!(matches!(
            ModelAssembler::new(&registry).assemble::<TestBackend>(&order, &device),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("feature size")
        ));

        let model = ModelAssembler::new(&registry)
            .with_feature_size(7)
            .assemble::<TestBackend>(&order, &device)
            .unwrap();
        assert_eq!(model.layers().batch_norm()[0].num_features(), 7);
        assert_eq!(model.layers().dense()[0].input_size(), 7);
    }

    #[test]
    fn test_unsupported_subtype() {
        let mut blocks = vec![BlockDescriptor::layer("conv", "Conv2d")];
        blocks.extend(heads());
        assert!(matches!(
            assemble(blocks, &[]),
            Err(ModelError::UnsupportedBlockType { subtype }) if subtype == "Conv2d"
        ));
    }

    #[test]
    fn test_requires_one_criterion_and_optimizer() {
        let blocks = vec![
            linear("fc", 1).param("in_features", 2),
            BlockDescriptor::optimizer("opt", "SGD"),
        ];
        assert!(matches!(
            assemble(blocks, &[]),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("CRITERION")
        ));

        let mut blocks = vec![linear("fc", 1).param("in_features", 2)];
        blocks.extend(heads());
        blocks.push(BlockDescriptor::optimizer("opt2", "SGD"));
        assert!(matches!(
            assemble(blocks, &[]),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("OPTIMIZER")
        ));
    }

    #[test]
    fn test_rejects_pipeline_without_trainable_layers() {
        assert!(assemble(heads(), &[]).is_err());

        let mut blocks = vec![BlockDescriptor::operation("act", "ReLU")];
        blocks.extend(heads());
        assert!(matches!(
            assemble(blocks, &[]),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("trainable")
        ));
    }

    #[test]
    fn test_rejects_multiple_sinks() {
        let mut blocks = vec![
            linear("stem", 4).param("in_features", 2),
            linear("a", 1),
            linear("b", 1),
        ];
        blocks.extend(heads());
        assert!(matches!(
            assemble(blocks, &[("stem", "a"), ("stem", "b")]),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("exactly one output")
        ));
    }

    #[test]
    fn test_arity_violations() {
        let mut blocks = vec![
            linear("a", 4).param("in_features", 2),
            linear("b", 4).param("in_features", 2),
            linear("fc", 1),
        ];
        blocks.extend(heads());
        assert!(matches!(
            assemble(blocks, &[("a", "fc"), ("b", "fc")]),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("accepts one input")
        ));

        let mut blocks = vec![
            linear("a", 4).param("in_features", 2),
            BlockDescriptor::operation("sum", "Add"),
        ];
        blocks.extend(heads());
        assert!(matches!(
            assemble(blocks, &[("a", "sum")]),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("at least 2")
        ));
    }

    #[test]
    fn test_width_mismatch() {
        let mut blocks = vec![
            linear("a", 4).param("in_features", 2),
            linear("b", 3).param("in_features", 5),
        ];
        blocks.extend(heads());
        assert!(matches!(
            assemble(blocks, &[("a", "b")]),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("block `b`")
        ));

        let mut blocks = vec![
            linear("stem", 4).param("in_features", 2),
            linear("a", 4),
            linear("b", 3),
            BlockDescriptor::operation("sum", "Add"),
        ];
        blocks.extend(heads());
        assert!(matches!(
            assemble(
                blocks,
                &[("stem", "a"), ("stem", "b"), ("a", "sum"), ("b", "sum")]
            ),
            Err(ModelError::InvalidGraphConfiguration(msg)) if msg.contains("same size")
        ));
    }

    #[test]
    fn test_parameter_error_names_block() {
        let mut blocks = vec![
            linear("fc", 1).param("in_features", 2),
            BlockDescriptor::operation("drop", "Dropout").param("p", 1.5),
        ];
        blocks.extend(heads());
        assert!(matches!(
            assemble(blocks, &[("fc", "drop")]),
            Err(ModelError::InvalidParameter { name, message })
                if name == "p" && message.contains("`drop`")
        ));
    }
}
