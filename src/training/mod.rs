//! Training of compiled models.
//!
//! This module provides:
//! - Loss functions and optimizer descriptions bound from criterion/optimizer blocks
//! - Training configuration
//! - Batch loaders and an in-memory dataset on `burn::data`
//! - The epoch scheduler with cancellation
//! - The checkpoint policy and sinks

mod checkpoint;
mod config;
mod data;
mod loss;
mod optimizer;
mod trainer;

pub use checkpoint::{
    CheckpointAction, CheckpointKind, CheckpointPolicy, CheckpointRecorder, CheckpointSink,
    CheckpointState, FileCheckpointSink,
};
pub use config::TrainingConfig;
pub use data::{Batch, BatchLoader, InMemoryDataset, InMemoryLoader, Row, RowBatcher};
pub use loss::Loss;
pub use optimizer::{OptimizerConfig, ParameterUpdate, SgdMomentum};
pub use trainer::{
    CancellationToken, EpochResult, TrainingReport, TrainingScheduler, train_dataset,
    train_graph,
};
