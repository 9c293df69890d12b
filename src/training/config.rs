//! Training configuration.

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// Configuration for a training run.
///
/// The loss function and optimizer come from the graph's criterion and
/// optimizer blocks, so they are not part of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of training epochs.
    pub epochs: usize,
    /// Rows per batch when [`train_dataset`](crate::training::train_dataset) builds the loaders.
    pub batch_size: usize,
    /// The latest model is persisted every `checkpoint_interval` epochs, starting with the first.
    pub checkpoint_interval: usize,
    /// Whether to log a summary after each epoch.
    pub verbose: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            checkpoint_interval: 10,
            verbose: true,
        }
    }
}

impl TrainingConfig {
    /// Creates a new TrainingConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the number of epochs.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Sets whether to log progress.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Rejects zero epochs, batch size or checkpoint interval.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (name, value) in [
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
            ("checkpoint_interval", self.checkpoint_interval),
        ] {
            if value == 0 {
                return Err(ModelError::InvalidTrainingConfig {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }
        Ok(())
    }
}
