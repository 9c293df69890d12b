//! Model-related error types.

use thiserror::Error;

/// Which pass over the data an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Training,
    Validation,
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::Training => write!(f, "training"),
            Pass::Validation => write!(f, "validation"),
        }
    }
}

/// Errors that can occur while compiling, assembling or training a block graph.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Cycle detected in the block graph; unordered blocks: {}", blocks.join(", "))]
    CycleDetected { blocks: Vec<String> },

    #[error("Unsupported block type: {subtype}")]
    UnsupportedBlockType { subtype: String },

    #[error("Invalid graph configuration: {0}")]
    InvalidGraphConfiguration(String),

    #[error("Invalid parameter `{name}`: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("The {pass} dataset yielded no batches")]
    EmptyDataset { pass: Pass },

    #[error("Batch {batch} of epoch {epoch} failed: {message}")]
    BatchExecutionFailure {
        epoch: usize,
        batch: usize,
        message: String,
    },

    #[error("Invalid training configuration: {message}")]
    InvalidTrainingConfig { message: String },

    #[error("Invalid dataset: {message}")]
    InvalidDataset { message: String },

    #[error("Checkpoint `{label}` failed: {message}")]
    Checkpoint { label: String, message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
