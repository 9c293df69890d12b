//! Block graphs: descriptors, compilation and assembly.
//!
//! A user-authored [`ComputationGraph`] goes through two stages:
//! [`compile`] orders the blocks topologically, then a [`ModelAssembler`]
//! resolves each block through a [`BlockRegistry`] and builds a
//! [`CompiledModel`] on a device.
//!
//! # Example
//!
//! ```
//! use blockgraph::graph::{
//!     BlockDescriptor, BlockRegistry, ComputationGraph, EdgeDescriptor, ModelAssembler, compile,
//! };
//! use burn::backend::NdArray;
//! use burn::tensor::backend::Backend;
//!
//! type TestBackend = NdArray;
//! let device = <TestBackend as Backend>::Device::default();
//!
//! let graph = ComputationGraph::new(
//!     vec![
//!         BlockDescriptor::layer("out", "Linear").param("out_features", 1),
//!         BlockDescriptor::layer("hidden", "Linear")
//!             .param("in_features", 4)
//!             .param("out_features", 8)
//!             .param("activation", "relu"),
//!         BlockDescriptor::criterion("loss", "MSELoss"),
//!         BlockDescriptor::optimizer("adam", "Adam"),
//!     ],
//!     vec![EdgeDescriptor::new("hidden", "out")],
//! );
//!
//! let order = compile(&graph).unwrap();
//! let registry = BlockRegistry::with_defaults();
//! let model = ModelAssembler::new(&registry)
//!     .assemble::<TestBackend>(&order, &device)
//!     .unwrap();
//!
//! assert_eq!(model.block_ids(), vec!["hidden", "out"]);
//! ```

mod assemble;
mod block;
mod compile;
mod model;
mod operation;
mod registry;

pub use assemble::ModelAssembler;
pub use block::{BlockDescriptor, BlockId, BlockKind, BlockParams, ComputationGraph, EdgeDescriptor};
pub use compile::{ExecutionOrder, compile};
pub use model::{CompiledModel, ExecutionPlan, Layers, Source, Step};
pub use operation::{Arity, Operation};
pub use registry::{
    BlockRegistry, CriterionConstructor, OperationConstructor, OptimizerConstructor,
};
