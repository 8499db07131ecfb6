//! Named outputs and gradients gathered during one training iteration.

use burn::optim::GradientsParams;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, Result};

/// Destination of a collected output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    /// Printed by the driver every iteration.
    Console,
    /// Summary values; logged at debug level.
    TensorBoard,
    /// Network outputs handed to `interpret_output`.
    NetworkOutput,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Console => "console",
            Self::TensorBoard => "tensorboard",
            Self::NetworkOutput => "network output",
        })
    }
}

/// Detached, flattened tensors registered under unique names per collection.
#[derive(Debug)]
pub struct OutputsCollector<B: Backend> {
    entries: BTreeMap<Collection, Vec<(String, Tensor<B, 1>)>>,
}

impl<B: Backend> Default for OutputsCollector<B> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<B: Backend> OutputsCollector<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_collection<const D: usize>(
        &mut self,
        var: Tensor<B, D>,
        name: impl Into<String>,
        collection: Collection,
    ) -> Result<()> {
        let name = name.into();
        let entries = self.entries.entry(collection).or_default();
        if entries.iter().any(|(existing, _)| *existing == name) {
            return Err(EngineError::DuplicateOutput { name, collection });
        }

        let num_elements = var.shape().num_elements();
        entries.push((name, var.detach().reshape([num_elements])));
        Ok(())
    }

    pub fn get(&self, collection: Collection, name: &str) -> Option<&Tensor<B, 1>> {
        self.entries
            .get(&collection)?
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Entries of one collection in registration order.
    pub fn entries(&self, collection: Collection) -> &[(String, Tensor<B, 1>)] {
        self.entries
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Mean value of every entry of `collection`.
    pub fn scalars(&self, collection: Collection) -> Vec<(String, f64)> {
        self.entries(collection)
            .iter()
            .map(|(name, value)| (name.clone(), value.clone().mean().into_scalar().elem::<f64>()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }
}

/// Gradients computed by `connect_data_and_network`, one entry per device.
#[derive(Debug, Default)]
pub struct GradientsCollector {
    gradients: Vec<GradientsParams>,
}

impl GradientsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_collection(&mut self, gradients: GradientsParams) {
        self.gradients.push(gradients);
    }

    pub fn len(&self) -> usize {
        self.gradients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gradients.is_empty()
    }

    /// Gradients of the single device, leaving the collector empty.
    pub fn take(&mut self) -> Result<Option<GradientsParams>> {
        match self.gradients.len() {
            0 | 1 => Ok(self.gradients.pop()),
            n => Err(EngineError::invalid_configuration(format!(
                "gradients from {} devices collected; averaging across devices is not supported",
                n
            ))),
        }
    }
}
