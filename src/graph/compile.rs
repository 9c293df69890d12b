//! Compilation of an unordered block graph into a deterministic execution order.

use std::collections::{HashMap, VecDeque};

use super::block::{BlockDescriptor, BlockId, ComputationGraph, EdgeDescriptor};
use crate::errors::ModelError;

/// Blocks in topological order, together with the edges they were ordered by.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOrder {
    blocks: Vec<BlockDescriptor>,
    edges: Vec<EdgeDescriptor>,
}

impl ExecutionOrder {
    /// Returns the blocks in execution order.
    pub fn blocks(&self) -> &[BlockDescriptor] {
        &self.blocks
    }

    /// Returns the edges in submission order.
    pub fn edges(&self) -> &[EdgeDescriptor] {
        &self.edges
    }

    /// Returns the ids of the ordered blocks.
    pub fn ids(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Orders the blocks of `graph` so that every edge's source precedes its target.
///
/// Uses Kahn's algorithm with a FIFO queue. Blocks become ready in submission
/// order and successors are released in edge submission order, so the same
/// input always yields the same ordering.
///
/// # Errors
///
/// - [`ModelError::InvalidGraphConfiguration`] for duplicate block ids or edges
///   referencing unknown blocks.
/// - [`ModelError::CycleDetected`] if the graph contains a cycle. No partial
///   order is returned.
pub fn compile(graph: &ComputationGraph) -> Result<ExecutionOrder, ModelError> {
    let blocks = &graph.blocks;

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(blocks.len());
    for (i, block) in blocks.iter().enumerate() {
        if index.insert(block.id.as_str(), i).is_some() {
            return Err(ModelError::InvalidGraphConfiguration(format!(
                "duplicate block id `{}`",
                block.id
            )));
        }
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); blocks.len()];
    let mut in_degree = vec![0usize; blocks.len()];

    for edge in &graph.edges {
        let source = lookup(&index, &edge.source_id)?;
        let target = lookup(&index, &edge.target_id)?;
        successors[source].push(target);
        in_degree[target] += 1;
    }

    let mut queue: VecDeque<usize> = (0..blocks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(blocks.len());

    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &next in &successors[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != blocks.len() {
        let unordered: Vec<String> = (0..blocks.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| blocks[i].id.clone())
            .collect();
        log::debug!("Compilation failed: cycle among {:?}", unordered);
        return Err(ModelError::CycleDetected { blocks: unordered });
    }

    log::debug!(
        "Compiled {} blocks and {} edges",
        blocks.len(),
        graph.edges.len()
    );

    Ok(ExecutionOrder {
        blocks: order.into_iter().map(|i| blocks[i].clone()).collect(),
        edges: graph.edges.clone(),
    })
}

fn lookup(index: &HashMap<&str, usize>, id: &BlockId) -> Result<usize, ModelError> {
    index.get(id.as_str()).copied().ok_or_else(|| {
        ModelError::InvalidGraphConfiguration(format!("edge references unknown block `{id}`"))
    })
}
