//! Mini-batching of graph records.
//!
//! Two batch shapes are produced, matching the two execution modes:
//!
//! - [`Batch`]: the disjoint union of several graphs. Node features are
//!   stacked, edges are shifted by each graph's node offset, and a per-node
//!   assignment vector records which graph every node came from.
//! - A plain list of [`GraphRecord`]s, kept separate so a data-parallel
//!   wrapper can scatter them across devices.

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::{EdgeIndex, GraphRecord};

/// Several graphs merged into one disconnected graph.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Stacked node features (total_nodes x F).
    pub x: Tensor,
    /// Edges with batch-global node ids.
    pub edge_index: EdgeIndex,
    /// Graph id of every node, non-decreasing.
    pub batch: Vec<u32>,
    /// Node offsets: graph `g` owns nodes `ptr[g]..ptr[g + 1]`.
    pub ptr: Vec<usize>,
    /// Graph labels (num_graphs,), u32.
    pub y: Tensor,
}

impl Batch {
    /// Merge `graphs` into one batch on `device`.
    pub fn collate(graphs: &[GraphRecord], device: &Device) -> Result<Self> {
        if graphs.is_empty() {
            return Err(Error::InvalidConfig("cannot collate an empty batch".into()));
        }

        let mut ptr = Vec::with_capacity(graphs.len() + 1);
        let mut batch = Vec::new();
        let mut edge_index = EdgeIndex::empty();
        let mut offset = 0usize;
        ptr.push(0);

        for (g, graph) in graphs.iter().enumerate() {
            let shifted = graph.edge_index.offset(offset as u32);
            edge_index.src.extend(shifted.src);
            edge_index.dst.extend(shifted.dst);
            batch.extend(std::iter::repeat(g as u32).take(graph.num_nodes()));
            offset += graph.num_nodes();
            ptr.push(offset);
        }

        let xs: Vec<&Tensor> = graphs.iter().map(|g| &g.x).collect();
        let x = Tensor::cat(&xs, 0)?.to_device(device)?;
        let y = labels(graphs, device)?;

        Ok(Self {
            x,
            edge_index,
            batch,
            ptr,
            y,
        })
    }

    pub fn num_graphs(&self) -> usize {
        self.ptr.len() - 1
    }

    pub fn num_nodes(&self) -> usize {
        self.batch.len()
    }

    /// Index of the first node of every graph.
    pub fn first_nodes(&self) -> Vec<u32> {
        self.ptr[..self.num_graphs()]
            .iter()
            .map(|&p| p as u32)
            .collect()
    }
}

/// Stack the labels of `graphs` into a u32 tensor on `device`.
pub fn labels(graphs: &[GraphRecord], device: &Device) -> Result<Tensor> {
    let y: Vec<u32> = graphs.iter().map(|g| g.y).collect();
    Ok(Tensor::from_vec(y, graphs.len(), device)?)
}

/// How the loader hands out batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderMode {
    /// One merged [`Batch`] per step.
    #[default]
    Merged,
    /// A list of separate graphs per step (multi-device execution).
    List,
}

/// One step's worth of graphs.
#[derive(Debug, Clone)]
pub enum LoaderItem {
    Merged(Batch),
    List(Vec<GraphRecord>),
}

impl LoaderItem {
    pub fn num_graphs(&self) -> usize {
        match self {
            Self::Merged(batch) => batch.num_graphs(),
            Self::List(graphs) => graphs.len(),
        }
    }

    /// Graph labels on `device`, in batch order.
    pub fn labels(&self, device: &Device) -> Result<Tensor> {
        match self {
            Self::Merged(batch) => Ok(batch.y.to_device(device)?),
            Self::List(graphs) => labels(graphs, device),
        }
    }
}

/// Splits a subset of graphs into mini-batches.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    graphs: Vec<GraphRecord>,
    batch_size: usize,
    shuffle: bool,
    mode: LoaderMode,
    device: Device,
}

impl BatchLoader {
    pub fn new(
        graphs: Vec<GraphRecord>,
        batch_size: usize,
        shuffle: bool,
        mode: LoaderMode,
        device: Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".into()));
        }
        Ok(Self {
            graphs,
            batch_size,
            shuffle,
            mode,
            device,
        })
    }

    /// Number of graphs in the subset.
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Number of batches per pass.
    pub fn num_batches(&self) -> usize {
        self.graphs.len().div_ceil(self.batch_size)
    }

    pub fn mode(&self) -> LoaderMode {
        self.mode
    }

    /// One pass over the subset. The order is reshuffled with `rng` when the
    /// loader shuffles; otherwise graphs come out in subset order.
    pub fn epoch<R: Rng + ?Sized>(&self, rng: &mut R) -> Epoch<'_> {
        let mut order: Vec<usize> = (0..self.graphs.len()).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        Epoch {
            loader: self,
            order,
            cursor: 0,
        }
    }

    /// One pass in subset order, regardless of the shuffle flag.
    pub fn in_order(&self) -> Epoch<'_> {
        Epoch {
            loader: self,
            order: (0..self.graphs.len()).collect(),
            cursor: 0,
        }
    }

    fn load(&self, indices: &[usize]) -> Result<LoaderItem> {
        let graphs: Vec<GraphRecord> = indices.iter().map(|&i| self.graphs[i].clone()).collect();
        match self.mode {
            LoaderMode::Merged => Ok(LoaderItem::Merged(Batch::collate(&graphs, &self.device)?)),
            LoaderMode::List => Ok(LoaderItem::List(graphs)),
        }
    }
}

/// Iterator over the batches of one pass.
pub struct Epoch<'a> {
    loader: &'a BatchLoader,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for Epoch<'_> {
    type Item = Result<LoaderItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.loader.batch_size).min(self.order.len());
        let item = self.loader.load(&self.order[self.cursor..end]);
        self.cursor = end;
        Some(item)
    }
}
