//! Block and edge descriptors as authored on the canvas.
//!
//! These are plain data: nothing here knows about tensors or devices. A
//! [`ComputationGraph`] is usually deserialized from the canvas JSON and then
//! handed to [`compile`](super::compile) and [`ModelAssembler`](super::ModelAssembler).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ModelError;

/// Identifier of a block, unique within one graph.
pub type BlockId = String;

/// The role a block plays in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockKind {
    /// A layer with (usually) trainable parameters.
    Layer,
    /// A parameter-free tensor operation.
    Operation,
    /// The loss function.
    Criterion,
    /// The parameter update rule.
    Optimizer,
}

impl BlockKind {
    /// Returns true for blocks that become steps of the forward pass.
    pub fn carries_data(&self) -> bool {
        matches!(self, BlockKind::Layer | BlockKind::Operation)
    }
}

/// Parameters declared on a block, kept as raw JSON and read through typed getters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockParams(Map<String, Value>);

impl BlockParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, builder style.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    /// Returns the raw value of a parameter.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|value| !value.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads an optional non-negative integer.
    pub fn usize(&self, name: &str) -> Result<Option<usize>, ModelError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        value
            .as_u64()
            .map(|v| Some(v as usize))
            .ok_or_else(|| invalid(name, format!("expected a non-negative integer, got {value}")))
    }

    /// Reads a non-negative integer that must be present.
    pub fn require_usize(&self, name: &str) -> Result<usize, ModelError> {
        self.usize(name)?
            .ok_or_else(|| invalid(name, "missing required parameter".to_string()))
    }

    /// Reads an optional number.
    pub fn f64(&self, name: &str) -> Result<Option<f64>, ModelError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        value
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(name, format!("expected a number, got {value}")))
    }

    /// Reads an optional boolean.
    pub fn bool(&self, name: &str) -> Result<Option<bool>, ModelError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        value
            .as_bool()
            .map(Some)
            .ok_or_else(|| invalid(name, format!("expected a boolean, got {value}")))
    }

    /// Reads an optional string.
    pub fn str(&self, name: &str) -> Result<Option<&str>, ModelError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        value
            .as_str()
            .map(Some)
            .ok_or_else(|| invalid(name, format!("expected a string, got {value}")))
    }

    /// Reads an optional pair of numbers, e.g. Adam's `betas`.
    pub fn pair(&self, name: &str) -> Result<Option<(f64, f64)>, ModelError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        match value.as_array().map(|items| items.as_slice()) {
            Some([first, second]) => match (first.as_f64(), second.as_f64()) {
                (Some(a), Some(b)) => Ok(Some((a, b))),
                _ => Err(invalid(name, format!("expected two numbers, got {value}"))),
            },
            _ => Err(invalid(name, format!("expected two numbers, got {value}"))),
        }
    }
}

fn invalid(name: &str, message: String) -> ModelError {
    ModelError::InvalidParameter {
        name: name.to_string(),
        message,
    }
}

/// A user-authored node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// Key into the [`BlockRegistry`](super::BlockRegistry).
    pub subtype: String,
    #[serde(default, alias = "args")]
    pub params: BlockParams,
}

impl BlockDescriptor {
    pub fn new(id: impl Into<BlockId>, kind: BlockKind, subtype: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            subtype: subtype.into(),
            params: BlockParams::new(),
        }
    }

    pub fn layer(id: impl Into<BlockId>, subtype: impl Into<String>) -> Self {
        Self::new(id, BlockKind::Layer, subtype)
    }

    pub fn operation(id: impl Into<BlockId>, subtype: impl Into<String>) -> Self {
        Self::new(id, BlockKind::Operation, subtype)
    }

    pub fn criterion(id: impl Into<BlockId>, subtype: impl Into<String>) -> Self {
        Self::new(id, BlockKind::Criterion, subtype)
    }

    pub fn optimizer(id: impl Into<BlockId>, subtype: impl Into<String>) -> Self {
        Self::new(id, BlockKind::Optimizer, subtype)
    }

    /// Sets a parameter, builder style.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params = self.params.with(name, value);
        self
    }
}

/// A directed data-flow connection: the output of `source_id` feeds `target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    pub source_id: BlockId,
    pub target_id: BlockId,
}

impl EdgeDescriptor {
    pub fn new(source_id: impl Into<BlockId>, target_id: impl Into<BlockId>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }
}

/// Blocks and edges submitted together for compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputationGraph {
    pub blocks: Vec<BlockDescriptor>,
    #[serde(default)]
    pub edges: Vec<EdgeDescriptor>,
}

impl ComputationGraph {
    pub fn new(blocks: Vec<BlockDescriptor>, edges: Vec<EdgeDescriptor>) -> Self {
        Self { blocks, edges }
    }

    /// Parses a graph from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }
}
