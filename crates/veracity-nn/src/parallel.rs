//! Data-parallel execution across several devices.
//!
//! A step's graphs are scattered into contiguous shards, one per device. The
//! primary device runs the model itself; every other device gets a replica
//! whose weights are copies of the primary variables moved across with
//! `to_device`, so gradients computed on a replica flow back to the shared
//! parameters. Shard outputs are gathered on the primary device in input
//! order.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing::trace;
use veracity_core::{Batch, GraphRecord};

use crate::error::{Error, Result};
use crate::model::GnnClassifier;

/// Runs a [`GnnClassifier`] over several devices.
#[derive(Debug, Clone)]
pub struct DataParallel {
    devices: Vec<Device>,
}

impl DataParallel {
    /// The first device is the primary one: parameters live there and
    /// outputs are gathered there.
    pub fn new(devices: Vec<Device>) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::InvalidConfig(
                "data-parallel execution needs at least one device".into(),
            ));
        }
        Ok(Self { devices })
    }

    pub fn primary(&self) -> &Device {
        &self.devices[0]
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Contiguous shard bounds for `len` graphs.
    pub fn shards(&self, len: usize) -> Vec<std::ops::Range<usize>> {
        let size = len.div_ceil(self.devices.len()).max(1);
        (0..len)
            .step_by(size)
            .map(|start| start..(start + size).min(len))
            .collect()
    }

    /// Log-probabilities for `graphs`, in input order, on the primary device.
    pub fn forward_t(
        &self,
        model: &GnnClassifier,
        varmap: &VarMap,
        graphs: &[GraphRecord],
        train: bool,
    ) -> Result<Tensor> {
        if graphs.is_empty() {
            return Err(Error::InvalidConfig("cannot scatter an empty batch".into()));
        }

        let mut outputs = Vec::with_capacity(self.devices.len());
        for (range, device) in self.shards(graphs.len()).into_iter().zip(&self.devices) {
            trace!(?device, graphs = range.len(), "scatter shard");
            let batch = Batch::collate(&graphs[range], device)?;
            let out = if device.same_device(self.primary()) {
                model.forward_t(&batch, train)?
            } else {
                self.replicate(model, varmap, device)?
                    .forward_t(&batch, train)?
                    .to_device(self.primary())?
            };
            outputs.push(out);
        }
        Ok(Tensor::cat(&outputs, 0)?)
    }

    fn replicate(&self, model: &GnnClassifier, varmap: &VarMap, device: &Device) -> Result<GnnClassifier> {
        let data = varmap.data().lock().map_err(|_| Error::Poisoned)?;
        let mut tensors = HashMap::with_capacity(data.len());
        for (name, var) in data.iter() {
            tensors.insert(name.clone(), var.as_tensor().to_device(device)?);
        }
        drop(data);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        GnnClassifier::new(model.config().clone(), vb)
    }
}
