//! Training loop implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use burn::{
    module::AutodiffModule,
    optim::GradientsParams,
    tensor::{ElementConversion, backend::AutodiffBackend},
};

use super::checkpoint::{CheckpointPolicy, CheckpointSink, CheckpointState};
use super::data::{Batch, BatchLoader, InMemoryDataset};
use super::optimizer::ParameterUpdate;
use super::{Loss, TrainingConfig};
use crate::errors::{ModelError, Pass};
use crate::graph::{
    BlockRegistry, CompiledModel, ComputationGraph, ExecutionPlan, Layers, ModelAssembler, compile,
};

/// Shared flag to stop a run at the next epoch boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mean losses of one completed epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochResult {
    /// Zero-based epoch index.
    pub epoch: usize,
    pub train_loss: f64,
    pub validation_loss: f64,
    pub train_batches: usize,
    pub validation_batches: usize,
}

/// Outcome of a training run.
#[derive(Debug)]
pub struct TrainingReport<B: AutodiffBackend> {
    /// The trained model.
    pub model: CompiledModel<B>,
    /// One entry per completed epoch.
    pub history: Vec<EpochResult>,
    /// Best losses at the end of the run.
    pub checkpoint_state: CheckpointState,
    /// True if the run stopped before the configured number of epochs.
    pub cancelled: bool,
}

impl<B: AutodiffBackend> TrainingReport<B> {
    pub fn epochs_completed(&self) -> usize {
        self.history.len()
    }

    pub fn last_epoch(&self) -> Option<&EpochResult> {
        self.history.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Training(usize),
    Validating(usize),
    Checkpointing(usize),
    Done,
}

fn transition(state: &mut RunState, next: RunState) {
    log::debug!("{:?} -> {:?}", state, next);
    *state = next;
}

/// Runs epochs of training, validation and checkpointing over a compiled model.
///
/// A scheduler is consumed by [`run`](Self::run); build a new one per run.
#[derive(Debug)]
pub struct TrainingScheduler<B: AutodiffBackend> {
    model: CompiledModel<B>,
    config: TrainingConfig,
    policy: CheckpointPolicy,
    cancellation: CancellationToken,
}

impl<B: AutodiffBackend> TrainingScheduler<B> {
    pub fn new(model: CompiledModel<B>, config: TrainingConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let policy = CheckpointPolicy::new(config.checkpoint_interval)?;
        Ok(Self {
            model,
            config,
            policy,
            cancellation: CancellationToken::new(),
        })
    }

    /// Uses an externally held token instead of the scheduler's own.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns a handle that cancels this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn model(&self) -> &CompiledModel<B> {
        &self.model
    }

    /// Trains for the configured number of epochs.
    ///
    /// Each epoch is a full training pass, a validation pass on the inner
    /// backend, then the checkpoint step. Cancellation is honored between
    /// epochs only.
    ///
    /// # Errors
    ///
    /// - [`ModelError::EmptyDataset`] if a loader yields no batches.
    /// - [`ModelError::BatchExecutionFailure`] on a shape mismatch or a
    ///   non-finite loss.
    /// - Any error returned by the sink.
    ///
    /// Errors abort the run; the epoch in progress is not checkpointed.
    pub fn run<T, V, S>(
        self,
        train: &T,
        validate: &V,
        sink: &mut S,
    ) -> Result<TrainingReport<B>, ModelError>
    where
        T: BatchLoader<B> + ?Sized,
        V: BatchLoader<B> + ?Sized,
        S: CheckpointSink<B> + ?Sized,
    {
        let Self {
            model,
            config,
            mut policy,
            cancellation,
        } = self;
        let (mut layers, plan, criterion, optimizer_config) = model.into_parts();
        let mut optimizer = optimizer_config.init::<B, Layers<B>>();

        let mut state = RunState::Idle;
        let mut history = Vec::with_capacity(config.epochs);
        let mut cancelled = false;

        for epoch in 0..config.epochs {
            if cancellation.is_cancelled() {
                log::info!("Training cancelled after {epoch} epochs");
                cancelled = true;
                break;
            }

            transition(&mut state, RunState::Training(epoch));
            let (trained, train_loss, train_batches) =
                train_epoch(layers, &plan, criterion, optimizer.as_mut(), train, epoch)?;
            layers = trained;

            transition(&mut state, RunState::Validating(epoch));
            let (validation_loss, validation_batches) =
                validate_epoch::<B, V>(&layers.valid(), &plan, criterion, validate, epoch)?;

            transition(&mut state, RunState::Checkpointing(epoch));
            let actions = policy.evaluate(epoch, train_loss, validation_loss);
            for action in &actions {
                sink.persist(action, &layers)?;
            }
            policy.commit(train_loss, validation_loss);

            if config.verbose {
                log::info!(
                    "Epoch {}/{}: train_loss = {:.6}, valid_loss = {:.6}",
                    epoch + 1,
                    config.epochs,
                    train_loss,
                    validation_loss
                );
            }

            history.push(EpochResult {
                epoch,
                train_loss,
                validation_loss,
                train_batches,
                validation_batches,
            });
        }

        transition(&mut state, RunState::Done);

        Ok(TrainingReport {
            model: CompiledModel::new(layers, plan, criterion, optimizer_config),
            history,
            checkpoint_state: policy.state(),
            cancelled,
        })
    }
}

fn train_epoch<B, L>(
    mut layers: Layers<B>,
    plan: &ExecutionPlan,
    criterion: Loss,
    optimizer: &mut dyn ParameterUpdate<B, Layers<B>>,
    loader: &L,
    epoch: usize,
) -> Result<(Layers<B>, f64, usize), ModelError>
where
    B: AutodiffBackend,
    L: BatchLoader<B> + ?Sized,
{
    let mut running_loss = 0.0;
    let mut count = 0usize;

    for (index, batch) in loader.batches().enumerate() {
        check_shapes(plan, &batch, epoch, index)?;

        let predictions = plan.forward(&layers, batch.inputs);
        let loss = criterion.compute(predictions, batch.targets);
        let loss_value: f64 = loss.clone().into_scalar().elem();
        check_finite(loss_value, epoch, index)?;

        let grads = GradientsParams::from_grads(loss.backward(), &layers);
        layers = optimizer.step(layers, grads);

        running_loss += loss_value;
        count += 1;
    }

    if count == 0 {
        return Err(ModelError::EmptyDataset {
            pass: Pass::Training,
        });
    }
    Ok((layers, running_loss / count as f64, count))
}

fn validate_epoch<B, L>(
    layers: &Layers<B::InnerBackend>,
    plan: &ExecutionPlan,
    criterion: Loss,
    loader: &L,
    epoch: usize,
) -> Result<(f64, usize), ModelError>
where
    B: AutodiffBackend,
    L: BatchLoader<B> + ?Sized,
{
    let mut running_loss = 0.0;
    let mut count = 0usize;

    for (index, batch) in loader.batches().enumerate() {
        check_shapes(plan, &batch, epoch, index)?;

        let predictions = plan.forward(layers, batch.inputs.inner());
        let loss_value: f64 = criterion
            .compute(predictions, batch.targets.inner())
            .into_scalar()
            .elem();
        check_finite(loss_value, epoch, index)?;

        running_loss += loss_value;
        count += 1;
    }

    if count == 0 {
        return Err(ModelError::EmptyDataset {
            pass: Pass::Validation,
        });
    }
    Ok((running_loss / count as f64, count))
}

fn check_shapes<B: AutodiffBackend>(
    plan: &ExecutionPlan,
    batch: &Batch<B>,
    epoch: usize,
    index: usize,
) -> Result<(), ModelError> {
    let [rows, features] = batch.inputs.dims();
    let [target_rows, outputs] = batch.targets.dims();

    let message = if rows == 0 {
        Some("batch has no rows".to_string())
    } else if features != plan.feature_size() {
        Some(format!(
            "inputs have {features} features, model expects {}",
            plan.feature_size()
        ))
    } else if target_rows != rows {
        Some(format!("{rows} input rows but {target_rows} target rows"))
    } else if outputs != plan.output_size() {
        Some(format!(
            "targets have {outputs} columns, model produces {}",
            plan.output_size()
        ))
    } else {
        None
    };

    match message {
        Some(message) => Err(ModelError::BatchExecutionFailure {
            epoch,
            batch: index,
            message,
        }),
        None => Ok(()),
    }
}

fn check_finite(loss: f64, epoch: usize, index: usize) -> Result<(), ModelError> {
    if loss.is_finite() {
        Ok(())
    } else {
        Err(ModelError::BatchExecutionFailure {
            epoch,
            batch: index,
            message: format!("loss is not finite ({loss})"),
        })
    }
}

/// Compiles, assembles and trains a graph in one call.
///
/// The input width is taken from the training loader when it reports one.
#[allow(clippy::too_many_arguments)]
pub fn train_graph<B, T, V, S>(
    graph: &ComputationGraph,
    registry: &BlockRegistry,
    config: &TrainingConfig,
    train: &T,
    validate: &V,
    sink: &mut S,
    device: &B::Device,
) -> Result<TrainingReport<B>, ModelError>
where
    B: AutodiffBackend,
    T: BatchLoader<B> + ?Sized,
    V: BatchLoader<B> + ?Sized,
    S: CheckpointSink<B> + ?Sized,
{
    config.validate()?;
    let order = compile(graph)?;

    let mut assembler = ModelAssembler::new(registry);
    if let Some(size) = train.feature_size() {
        assembler = assembler.with_feature_size(size);
    }
    let model = assembler.assemble::<B>(&order, device)?;

    TrainingScheduler::new(model, config.clone())?.run(train, validate, sink)
}

/// Like [`train_graph`], batching both datasets by `config.batch_size`.
#[allow(clippy::too_many_arguments)]
pub fn train_dataset<B, S>(
    graph: &ComputationGraph,
    registry: &BlockRegistry,
    config: &TrainingConfig,
    train: &InMemoryDataset,
    validate: &InMemoryDataset,
    sink: &mut S,
    device: &B::Device,
) -> Result<TrainingReport<B>, ModelError>
where
    B: AutodiffBackend,
    S: CheckpointSink<B> + ?Sized,
{
    config.validate()?;
    let train_loader = train.loader::<B>(config.batch_size, device)?;
    let validate_loader = validate.loader::<B>(config.batch_size, device)?;
    log::debug!(
        "Batching {} training and {} validation rows by {}",
        train.len(),
        validate.len(),
        config.batch_size
    );

    train_graph(graph, registry, config, &train_loader, &validate_loader, sink, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BlockDescriptor, EdgeDescriptor};
    use crate::training::{CheckpointAction, CheckpointKind, InMemoryDataset};
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Tensor, backend::Backend};

    type TestBackend = Autodiff<NdArray>;

    fn regression_graph(optimizer: &str, lr: f64) -> ComputationGraph {
        ComputationGraph::new(
            vec![
                BlockDescriptor::layer("hidden", "Linear")
                    .param("in_features", 1)
                    .param("out_features", 8)
                    .param("activation", "relu"),
                BlockDescriptor::layer("out", "Linear").param("out_features", 1),
                BlockDescriptor::criterion("loss", "MSELoss"),
                BlockDescriptor::optimizer("opt", optimizer).param("lr", lr),
            ],
            vec![
                EdgeDescriptor::new("hidden", "out"),
                EdgeDescriptor::new("out", "loss"),
            ],
        )
    }

    fn model(graph: &ComputationGraph) -> CompiledModel<TestBackend> {
        let device = <TestBackend as Backend>::Device::default();
        let registry = BlockRegistry::with_defaults();
        let order = compile(graph).unwrap();
        ModelAssembler::new(&registry).assemble(&order, &device).unwrap()
    }

    fn linear_data() -> InMemoryDataset {
        // y = 2x
        let inputs = (0..8).map(|i| vec![i as f32 / 4.0]).collect();
        let targets = (0..8).map(|i| vec![i as f32 / 2.0]).collect();
        InMemoryDataset::new(inputs, targets).unwrap()
    }

    fn no_sink() -> impl FnMut(&CheckpointAction, &Layers<TestBackend>) -> Result<(), ModelError> {
        |_, _| Ok(())
    }

    #[test]
    fn test_training_reduces_loss() {
        let device = <TestBackend as Backend>::Device::default();
        let loader = linear_data().loader::<TestBackend>(4, &device).unwrap();
        let config = TrainingConfig::new().epochs(60).verbose(false);

        let report = TrainingScheduler::new(model(&regression_graph("Adam", 0.05)), config)
            .unwrap()
            .run(&loader, &loader, &mut no_sink())
            .unwrap();

        assert_eq!(report.epochs_completed(), 60);
        assert!(!report.cancelled);
        let first = report.history[0].train_loss;
        let last = report.last_epoch().unwrap().train_loss;
        assert!(last < first, "Loss should decrease: initial={first}, final={last}");
        assert!(report.checkpoint_state.best_train_loss <= last);
    }

    #[test]
    fn test_checkpoint_actions_per_epoch() {
        let device = <TestBackend as Backend>::Device::default();
        let loader = linear_data().loader::<TestBackend>(8, &device).unwrap();
        let config = TrainingConfig::new()
            .epochs(5)
            .checkpoint_interval(2)
            .verbose(false);

        let mut actions: Vec<CheckpointAction> = Vec::new();
        let mut sink = |action: &CheckpointAction, _: &Layers<TestBackend>| -> Result<(), ModelError> {
            actions.push(action.clone());
            Ok(())
        };
        let report = TrainingScheduler::new(model(&regression_graph("SGD", 0.01)), config)
            .unwrap()
            .run(&loader, &loader, &mut sink)
            .unwrap();

        let latest: Vec<usize> = actions
            .iter()
            .filter(|a| a.kind == CheckpointKind::Latest)
            .map(|a| a.epoch)
            .collect();
        assert_eq!(latest, vec![0, 2, 4]);
        // the first epoch always beats the infinite sentinel
        assert_eq!(actions[1].kind, CheckpointKind::BestTrain);
        assert_eq!(actions[2].kind, CheckpointKind::BestValidation);

        let best_train = report
            .history
            .iter()
            .map(|r| r.train_loss)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(report.checkpoint_state.best_train_loss, best_train);
    }

    #[test]
    fn test_cancelled_before_first_epoch() {
        let device = <TestBackend as Backend>::Device::default();
        let loader = linear_data().loader::<TestBackend>(4, &device).unwrap();
        let scheduler = TrainingScheduler::new(
            model(&regression_graph("Adam", 0.01)),
            TrainingConfig::new().epochs(3).verbose(false),
        )
        .unwrap();
        scheduler.cancellation_token().cancel();

        let mut persisted = 0;
        let mut sink = |_: &CheckpointAction, _: &Layers<TestBackend>| -> Result<(), ModelError> {
            persisted += 1;
            Ok(())
        };
        let report = scheduler.run(&loader, &loader, &mut sink).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.epochs_completed(), 0);
        assert_eq!(persisted, 0);
        assert_eq!(report.checkpoint_state, CheckpointState::default());
    }

    #[test]
    fn test_empty_training_set() {
        let device = <TestBackend as Backend>::Device::default();
        let empty: Vec<Batch<TestBackend>> = Vec::new();
        let loader = linear_data().loader::<TestBackend>(4, &device).unwrap();

        let result = TrainingScheduler::new(
            model(&regression_graph("Adam", 0.01)),
            TrainingConfig::new().epochs(1).verbose(false),
        )
        .unwrap()
        .run(&empty, &loader, &mut no_sink());

        assert!(matches!(
            result,
            Err(ModelError::EmptyDataset { pass: Pass::Training })
        ));
    }

    #[test]
    fn test_empty_validation_set_persists_nothing() {
        let device = <TestBackend as Backend>::Device::default();
        let loader = linear_data().loader::<TestBackend>(4, &device).unwrap();
        let empty: Vec<Batch<TestBackend>> = Vec::new();

        let mut persisted = 0;
        let mut sink = |_: &CheckpointAction, _: &Layers<TestBackend>| -> Result<(), ModelError> {
            persisted += 1;
            Ok(())
        };
        let result = TrainingScheduler::new(
            model(&regression_graph("Adam", 0.01)),
            TrainingConfig::new().epochs(2).verbose(false),
        )
        .unwrap()
        .run(&loader, &empty, &mut sink);

        assert!(matches!(
            result,
            Err(ModelError::EmptyDataset { pass: Pass::Validation })
        ));
        assert_eq!(persisted, 0);
    }

    #[test]
    fn test_shape_mismatch_is_batch_failure() {
        let device = <TestBackend as Backend>::Device::default();
        let bad = vec![
            Batch::<TestBackend>::new(Tensor::zeros([2, 1], &device), Tensor::zeros([2, 1], &device)),
            Batch::<TestBackend>::new(Tensor::zeros([2, 3], &device), Tensor::zeros([2, 1], &device)),
        ];

        let result = TrainingScheduler::new(
            model(&regression_graph("Adam", 0.01)),
            TrainingConfig::new().epochs(1).verbose(false),
        )
        .unwrap()
        .run(&bad, &bad, &mut no_sink());

        assert!(matches!(
            result,
            Err(ModelError::BatchExecutionFailure { epoch: 0, batch: 1, .. })
        ));
    }

    #[test]
    fn test_sink_error_aborts_run() {
        let device = <TestBackend as Backend>::Device::default();
        let loader = linear_data().loader::<TestBackend>(4, &device).unwrap();
        let mut sink = |action: &CheckpointAction, _: &Layers<TestBackend>| -> Result<(), ModelError> {
            Err(ModelError::Checkpoint {
                label: action.label.clone(),
                message: "disk full".to_string(),
            })
        };

        let result = TrainingScheduler::new(
            model(&regression_graph("Adam", 0.01)),
            TrainingConfig::new().epochs(3).verbose(false),
        )
        .unwrap()
        .run(&loader, &loader, &mut sink);

        assert!(matches!(result, Err(ModelError::Checkpoint { label, .. }) if label == "model_checkpoint_epoch_1"));
    }

    #[test]
    fn test_train_graph_uses_loader_width() {
        let device = <TestBackend as Backend>::Device::default();
        let graph = ComputationGraph::new(
            vec![
                BlockDescriptor::layer("norm", "BatchNorm1d"),
                BlockDescriptor::layer("fc", "Linear").param("out_features", 1),
                BlockDescriptor::criterion("loss", "L1Loss"),
                BlockDescriptor::optimizer("opt", "AdamW"),
            ],
            vec![EdgeDescriptor::new("norm", "fc")],
        );
        let loader = linear_data().loader::<TestBackend>(4, &device).unwrap();

        let report = train_graph(
            &graph,
            &BlockRegistry::with_defaults(),
            &TrainingConfig::new().epochs(2).verbose(false),
            &loader,
            &loader,
            &mut no_sink(),
            &device,
        )
        .unwrap();

        assert_eq!(report.model.feature_size(), 1);
        assert_eq!(report.epochs_completed(), 2);
    }

    #[test]
    fn test_train_dataset_batches_by_config() {
        let device = <TestBackend as Backend>::Device::default();
        let registry = BlockRegistry::with_defaults();
        let graph = regression_graph("SGD", 0.01);
        let data = linear_data();

        let batches_per_epoch = |batch_size: usize| {
            let config = TrainingConfig::new()
                .epochs(2)
                .batch_size(batch_size)
                .verbose(false);
            let report = train_dataset::<TestBackend, _>(
                &graph,
                &registry,
                &config,
                &data,
                &data,
                &mut no_sink(),
                &device,
            )
            .unwrap();
            report
                .history
                .iter()
                .map(|r| (r.train_batches, r.validation_batches))
                .collect::<Vec<_>>()
        };

        assert_eq!(batches_per_epoch(8), vec![(1, 1), (1, 1)]);
        assert_eq!(batches_per_epoch(3), vec![(3, 3), (3, 3)]);
        assert_eq!(batches_per_epoch(1), vec![(8, 8), (8, 8)]);
    }

    #[test]
    fn test_train_dataset_rejects_empty_split() {
        let device = <TestBackend as Backend>::Device::default();
        let result = train_dataset::<TestBackend, _>(
            &regression_graph("Adam", 0.01),
            &BlockRegistry::with_defaults(),
            &TrainingConfig::new().epochs(1).verbose(false),
            &linear_data(),
            &InMemoryDataset::default(),
            &mut no_sink(),
            &device,
        );
        assert!(matches!(
            result,
            Err(ModelError::EmptyDataset { pass: Pass::Validation })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            TrainingScheduler::new(
                model(&regression_graph("Adam", 0.01)),
                TrainingConfig::new().checkpoint_interval(0),
            ),
            Err(ModelError::InvalidTrainingConfig { .. })
        ));
    }
}
