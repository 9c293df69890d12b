//! # blockgraph
//!
//! A Rust library for compiling user-authored block graphs into neural network
//! models and training them.
//!
//! A graph is a set of typed blocks (layers, operations, one criterion and one
//! optimizer) joined by data-flow edges, usually deserialized from a visual
//! editor's JSON. The library orders the blocks, builds Burn modules for them and
//! runs an epoch-based training loop with checkpointing.
//!
//! ## Features
//!
//! - **Deterministic compilation**: Kahn's algorithm with stable tie-breaking and
//!   cycle reporting.
//! - **DAG models**: branching and merging through `Add`, `Multiply` and `Concat`.
//! - **Pluggable catalog**: block subtypes resolve through an injected registry.
//! - **Burn Backend**: WGPU for training, NdArray for tests.
//!
//! ## Example
//!
//! ```
//! use blockgraph::prelude::*;
//! use burn::backend::{Autodiff, NdArray};
//!
//! type Backend = Autodiff<NdArray>;
//!
//! let device = <Backend as burn::tensor::backend::Backend>::Device::default();
//!
//! let graph = ComputationGraph::from_json(r#"{
//!     "blocks": [
//!         {"id": "fc1", "type": "LAYER", "subtype": "Linear",
//!          "params": {"in_features": 2, "out_features": 4, "activation": "relu"}},
//!         {"id": "fc2", "type": "LAYER", "subtype": "Linear", "params": {"out_features": 1}},
//!         {"id": "loss", "type": "CRITERION", "subtype": "MSELoss"},
//!         {"id": "opt", "type": "OPTIMIZER", "subtype": "Adam", "params": {"lr": 0.01}}
//!     ],
//!     "edges": [{"source_id": "fc1", "target_id": "fc2"}]
//! }"#).unwrap();
//!
//! let data = InMemoryDataset::new(
//!     vec![vec![0.0, 1.0], vec![1.0, 0.0]],
//!     vec![vec![1.0], vec![0.0]],
//! ).unwrap();
//! let loader = data.loader::<Backend>(2, &device).unwrap();
//!
//! let config = TrainingConfig::new().epochs(3).verbose(false);
//! let mut sink = |_: &CheckpointAction, _: &Layers<Backend>| -> Result<(), ModelError> { Ok(()) };
//! let report = train_graph(
//!     &graph,
//!     &BlockRegistry::with_defaults(),
//!     &config,
//!     &loader,
//!     &loader,
//!     &mut sink,
//!     &device,
//! ).unwrap();
//!
//! assert_eq!(report.epochs_completed(), 3);
//! ```

pub mod errors;
pub mod graph;
pub mod layers;
pub mod training;

// Re-exports for convenience
pub use errors::ModelError;
pub use graph::{BlockRegistry, CompiledModel, ComputationGraph, ModelAssembler, compile};
pub use layers::activation::Activation;
pub use training::{Loss, TrainingConfig, TrainingScheduler, train_dataset, train_graph};

/// Backend type alias for WGPU with autodiff support.
pub type Backend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Backend type for inference (no autodiff).
pub type InferenceBackend = burn::backend::Wgpu;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::errors::{ModelError, Pass};
    pub use crate::graph::{
        BlockDescriptor, BlockKind, BlockRegistry, CompiledModel, ComputationGraph,
        EdgeDescriptor, Layers, ModelAssembler, compile,
    };
    pub use crate::layers::activation::Activation;
    pub use crate::training::{
        Batch, BatchLoader, CancellationToken, CheckpointAction, CheckpointSink,
        FileCheckpointSink, InMemoryDataset, Loss, TrainingConfig, TrainingScheduler, train_dataset,
        train_graph,
    };
    pub use crate::{Backend, InferenceBackend};
}
