//! Checkpoint decisions and persistence.
//!
//! [`CheckpointPolicy`] decides *what* to persist after an epoch and owns the
//! best-loss bookkeeping; a [`CheckpointSink`] decides *how*. The scheduler
//! calls [`CheckpointPolicy::evaluate`], hands each action to the sink, then
//! [`CheckpointPolicy::commit`]s, so a failed write leaves the bests untouched.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;

use crate::errors::ModelError;
use crate::graph::Layers;

/// The reason a checkpoint is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointKind {
    /// Periodic snapshot of the latest parameters.
    Latest,
    /// New lowest mean training loss.
    BestTrain,
    /// New lowest mean validation loss.
    BestValidation,
}

/// A single persistence request produced for an epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointAction {
    pub kind: CheckpointKind,
    /// Zero-based epoch index.
    pub epoch: usize,
    /// Stable name of the snapshot, e.g. `model_checkpoint_epoch_11`.
    pub label: String,
}

impl CheckpointAction {
    fn new(kind: CheckpointKind, epoch: usize) -> Self {
        let label = match kind {
            CheckpointKind::Latest => format!("model_checkpoint_epoch_{}", epoch + 1),
            CheckpointKind::BestTrain => "model_checkpoint_best_train_loss".to_string(),
            CheckpointKind::BestValidation => "model_checkpoint_best_valid_loss".to_string(),
        };
        Self { kind, epoch, label }
    }
}

/// Best losses seen so far in a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointState {
    pub best_train_loss: f64,
    pub best_validation_loss: f64,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            best_train_loss: f64::INFINITY,
            best_validation_loss: f64::INFINITY,
        }
    }
}

/// Decides which checkpoints an epoch produces.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointPolicy {
    interval: usize,
    state: CheckpointState,
}

impl CheckpointPolicy {
    /// Creates a policy persisting the latest model every `interval` epochs.
    pub fn new(interval: usize) -> Result<Self, ModelError> {
        if interval == 0 {
            return Err(ModelError::InvalidTrainingConfig {
                message: "checkpoint_interval must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            interval,
            state: CheckpointState::default(),
        })
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn state(&self) -> CheckpointState {
        self.state
    }

    /// Returns the actions for an epoch without changing state.
    ///
    /// A best loss is only beaten by a strictly smaller value; NaN never is.
    pub fn evaluate(&self, epoch: usize, train_loss: f64, validation_loss: f64) -> Vec<CheckpointAction> {
        let mut actions = Vec::new();
        if epoch % self.interval == 0 {
            actions.push(CheckpointAction::new(CheckpointKind::Latest, epoch));
        }
        if train_loss < self.state.best_train_loss {
            actions.push(CheckpointAction::new(CheckpointKind::BestTrain, epoch));
        }
        if validation_loss < self.state.best_validation_loss {
            actions.push(CheckpointAction::new(CheckpointKind::BestValidation, epoch));
        }
        actions
    }

    /// Records the losses of a completed epoch.
    pub fn commit(&mut self, train_loss: f64, validation_loss: f64) {
        if train_loss < self.state.best_train_loss {
            self.state.best_train_loss = train_loss;
        }
        if validation_loss < self.state.best_validation_loss {
            self.state.best_validation_loss = validation_loss;
        }
    }

    /// Evaluates and commits in one call.
    pub fn observe(&mut self, epoch: usize, train_loss: f64, validation_loss: f64) -> Vec<CheckpointAction> {
        let actions = self.evaluate(epoch, train_loss, validation_loss);
        self.commit(train_loss, validation_loss);
        actions
    }
}

/// Persists model parameters for a checkpoint action.
pub trait CheckpointSink<B: Backend> {
    fn persist(&mut self, action: &CheckpointAction, layers: &Layers<B>) -> Result<(), ModelError>;
}

impl<B, F> CheckpointSink<B> for F
where
    B: Backend,
    F: FnMut(&CheckpointAction, &Layers<B>) -> Result<(), ModelError>,
{
    fn persist(&mut self, action: &CheckpointAction, layers: &Layers<B>) -> Result<(), ModelError> {
        self(action, layers)
    }
}

/// Full-precision MessagePack records, so a reload reproduces the trained weights exactly.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Writes checkpoints as Burn records into a directory, one file per label.
///
/// A label is overwritten each time its action fires, so the directory holds
/// the best snapshots plus one file per periodic epoch.
#[derive(Debug, Clone)]
pub struct FileCheckpointSink {
    directory: PathBuf,
    recorder: CheckpointRecorder,
}

impl FileCheckpointSink {
    /// Creates the sink, creating `directory` if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, ModelError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| ModelError::Checkpoint {
            label: directory.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            directory,
            recorder: CheckpointRecorder::default(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of a label without the recorder's file extension.
    pub fn path_for(&self, label: &str) -> PathBuf {
        self.directory.join(label)
    }

    /// Loads a checkpoint into `layers`, which must have the same structure as the saved ones.
    pub fn load<B: Backend>(
        &self,
        label: &str,
        layers: Layers<B>,
        device: &B::Device,
    ) -> Result<Layers<B>, ModelError> {
        layers
            .load_file(self.path_for(label), &self.recorder, device)
            .map_err(|e| ModelError::Checkpoint {
                label: label.to_string(),
                message: e.to_string(),
            })
    }
}

impl<B: Backend> CheckpointSink<B> for FileCheckpointSink {
    fn persist(&mut self, action: &CheckpointAction, layers: &Layers<B>) -> Result<(), ModelError> {
        log::debug!("Writing checkpoint {} (epoch {})", action.label, action.epoch + 1);
        layers
            .clone()
            .save_file(self.path_for(&action.label), &self.recorder)
            .map_err(|e| ModelError::Checkpoint {
                label: action.label.clone(),
                message: e.to_string(),
            })
    }
}
