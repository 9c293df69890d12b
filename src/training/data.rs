//! Rows, batches and the loaders that yield them.
//!
//! [`InMemoryDataset`] is a Burn [`Dataset`] of [`Row`]s; [`RowBatcher`] stacks
//! rows into a [`Batch`] and [`InMemoryLoader`] drives both through Burn's
//! `DataLoader`.

use std::fmt;
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// One mini-batch: `[batch, features]` inputs and `[batch, outputs]` targets.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub inputs: Tensor<B, 2>,
    pub targets: Tensor<B, 2>,
}

impl<B: Backend> Batch<B> {
    pub fn new(inputs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Self {
        Self { inputs, targets }
    }

    pub fn len(&self) -> usize {
        self.inputs.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A source of batches, traversed once per epoch.
pub trait BatchLoader<B: Backend> {
    /// Returns a fresh pass over the batches.
    fn batches(&self) -> Box<dyn Iterator<Item = Batch<B>> + '_>;

    /// Width of the input rows, when known without iterating.
    fn feature_size(&self) -> Option<usize> {
        None
    }
}

impl<B: Backend> BatchLoader<B> for Vec<Batch<B>> {
    fn batches(&self) -> Box<dyn Iterator<Item = Batch<B>> + '_> {
        Box::new(self.iter().cloned())
    }

    fn feature_size(&self) -> Option<usize> {
        self.first().map(|batch| batch.inputs.dims()[1])
    }
}

/// A single sample: input values and the target values they map to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub inputs: Vec<f32>,
    pub targets: Vec<f32>,
}

/// Rows of input and target values held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryDataset {
    rows: Vec<Row>,
}

impl InMemoryDataset {
    /// Creates a dataset, checking that rows pair up and have consistent widths.
    pub fn new(inputs: Vec<Vec<f32>>, targets: Vec<Vec<f32>>) -> Result<Self, ModelError> {
        if inputs.len() != targets.len() {
            return Err(invalid(format!(
                "{} input rows but {} target rows",
                inputs.len(),
                targets.len()
            )));
        }
        check_widths(&inputs, "input")?;
        check_widths(&targets, "target")?;

        let rows = inputs
            .into_iter()
            .zip(targets)
            .map(|(inputs, targets)| Row { inputs, targets })
            .collect();
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Width of the input rows, zero for an empty dataset.
    pub fn input_size(&self) -> usize {
        self.rows.first().map_or(0, |row| row.inputs.len())
    }

    /// Width of the target rows, zero for an empty dataset.
    pub fn target_size(&self) -> usize {
        self.rows.first().map_or(0, |row| row.targets.len())
    }

    /// Splits into train, validation and test sets, in row order.
    ///
    /// The train and validation sizes are `floor(len * ratio)`; the test set
    /// takes the remaining rows.
    pub fn split(
        &self,
        train_ratio: f64,
        validate_ratio: f64,
    ) -> Result<(Self, Self, Self), ModelError> {
        let valid_ratio = |r: f64| r.is_finite() && (0.0..=1.0).contains(&r);
        if !valid_ratio(train_ratio)
            || !valid_ratio(validate_ratio)
            || train_ratio + validate_ratio > 1.0
        {
            return Err(invalid(format!(
                "split ratios must be in [0, 1] and sum to at most 1, got {train_ratio} and {validate_ratio}"
            )));
        }

        let len = self.len();
        let train_end = (len as f64 * train_ratio).floor() as usize;
        let validate_end = (train_end + (len as f64 * validate_ratio).floor() as usize).min(len);

        Ok((
            self.slice(0, train_end),
            self.slice(train_end, validate_end),
            self.slice(validate_end, len),
        ))
    }

    /// Builds a loader of `batch_size` rows per batch, in row order; the last
    /// batch may be smaller.
    pub fn loader<B: Backend>(
        &self,
        batch_size: usize,
        device: &B::Device,
    ) -> Result<InMemoryLoader<B>, ModelError> {
        if batch_size == 0 {
            return Err(invalid("batch_size must be greater than zero".to_string()));
        }

        let loader = DataLoaderBuilder::new(RowBatcher::<B>::new(device.clone()))
            .batch_size(batch_size)
            .build(self.clone());

        Ok(InMemoryLoader {
            loader,
            num_batches: self.len().div_ceil(batch_size),
            feature_size: self.input_size(),
        })
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            rows: self.rows[start..end].to_vec(),
        }
    }
}

impl Dataset<Row> for InMemoryDataset {
    fn get(&self, index: usize) -> Option<Row> {
        self.rows.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Stacks rows into input and target tensors on one device.
#[derive(Debug, Clone)]
pub struct RowBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> RowBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<Row, Batch<B>> for RowBatcher<B> {
    fn batch(&self, rows: Vec<Row>) -> Batch<B> {
        let input_size = rows.first().map_or(0, |row| row.inputs.len());
        let target_size = rows.first().map_or(0, |row| row.targets.len());

        let inputs: Vec<f32> = rows.iter().flat_map(|row| row.inputs.iter().copied()).collect();
        let targets: Vec<f32> = rows.iter().flat_map(|row| row.targets.iter().copied()).collect();

        Batch::new(
            Tensor::<B, 1>::from_floats(inputs.as_slice(), &self.device)
                .reshape([rows.len(), input_size]),
            Tensor::<B, 1>::from_floats(targets.as_slice(), &self.device)
                .reshape([rows.len(), target_size]),
        )
    }
}

/// Burn data loader over an [`InMemoryDataset`].
#[derive(Clone)]
pub struct InMemoryLoader<B: Backend> {
    loader: Arc<dyn DataLoader<Batch<B>>>,
    num_batches: usize,
    feature_size: usize,
}

impl<B: Backend> InMemoryLoader<B> {
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Number of rows behind the loader.
    pub fn num_items(&self) -> usize {
        self.loader.num_items()
    }
}

impl<B: Backend> fmt::Debug for InMemoryLoader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLoader")
            .field("num_items", &self.num_items())
            .field("num_batches", &self.num_batches)
            .field("feature_size", &self.feature_size)
            .finish()
    }
}

impl<B: Backend> BatchLoader<B> for InMemoryLoader<B> {
    fn batches(&self) -> Box<dyn Iterator<Item = Batch<B>> + '_> {
        Box::new(self.loader.iter())
    }

    fn feature_size(&self) -> Option<usize> {
        (self.num_batches > 0).then_some(self.feature_size)
    }
}

fn check_widths(rows: &[Vec<f32>], what: &str) -> Result<(), ModelError> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    if first.is_empty() {
        return Err(invalid(format!("{what} rows must not be empty")));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != first.len()) {
        return Err(invalid(format!(
            "{what} row {i} has {} values, expected {}",
            row.len(),
            first.len()
        )));
    }
    Ok(())
}

fn invalid(message: String) -> ModelError {
    ModelError::InvalidDataset { message }
}
