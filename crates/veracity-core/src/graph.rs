//! Graph records and edge-list utilities.
//!
//! A [`GraphRecord`] is one labeled propagation graph: a node feature matrix,
//! a graph-local edge list and a class label. Edges are kept host-side as an
//! [`EdgeIndex`] (coordinate form) because every operation on them here is
//! structural: masking, symmetrising, offsetting for batching and computing
//! degrees. Message-passing layers turn them into index tensors on demand.

use std::collections::BTreeSet;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Edge list in coordinate form: edge `k` runs from `src[k]` to `dst[k]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeIndex {
    /// Source node of each edge.
    pub src: Vec<u32>,
    /// Destination node of each edge.
    pub dst: Vec<u32>,
}

impl EdgeIndex {
    /// Build an edge list from parallel source/destination vectors.
    pub fn new(src: Vec<u32>, dst: Vec<u32>) -> Result<Self> {
        if src.len() != dst.len() {
            return Err(Error::DimensionMismatch {
                expected: src.len(),
                got: dst.len(),
            });
        }
        Ok(Self { src, dst })
    }

    /// Build an edge list from `(src, dst)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let (src, dst) = pairs.into_iter().unzip();
        Self { src, dst }
    }

    /// An edge list with no edges.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Iterate over `(src, dst)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }

    pub fn num_self_loops(&self) -> usize {
        self.iter().filter(|(s, d)| s == d).count()
    }

    /// Keep only the edges selected by `mask`, preserving order.
    pub fn mask(&self, mask: EdgeMask) -> Self {
        Self::from_pairs(self.iter().filter(|&(s, d)| mask.keeps(s, d)))
    }

    /// Symmetrise and coalesce: every `(s, d)` gains `(d, s)`, then edges are
    /// sorted by `(src, dst)` and duplicates dropped.
    pub fn to_undirected(&self) -> Self {
        let coalesced: BTreeSet<(u32, u32)> =
            self.iter().flat_map(|(s, d)| [(s, d), (d, s)]).collect();
        Self::from_pairs(coalesced)
    }

    /// Replace existing self-loops with exactly one self-loop per node.
    pub fn with_self_loops(&self, num_nodes: usize) -> Self {
        let mut out = Self::from_pairs(self.iter().filter(|(s, d)| s != d));
        out.src.extend(0..num_nodes as u32);
        out.dst.extend(0..num_nodes as u32);
        out
    }

    /// Shift every node id by `by` (disjoint-union batching).
    pub fn offset(&self, by: u32) -> Self {
        Self {
            src: self.src.iter().map(|&s| s + by).collect(),
            dst: self.dst.iter().map(|&d| d + by).collect(),
        }
    }

    /// Number of incoming edges per node.
    pub fn in_degree(&self, num_nodes: usize) -> Vec<f32> {
        let mut deg = vec![0f32; num_nodes];
        for &d in &self.dst {
            deg[d as usize] += 1.0;
        }
        deg
    }

    /// Verify every endpoint lies in `[0, num_nodes)`.
    pub fn check_bounds(&self, num_nodes: usize, graph: usize) -> Result<()> {
        match self
            .iter()
            .find(|&(s, d)| s as usize >= num_nodes || d as usize >= num_nodes)
        {
            Some((src, dst)) => Err(Error::EdgeOutOfRange {
                graph,
                src,
                dst,
                num_nodes,
            }),
            None => Ok(()),
        }
    }
}

/// Edge filter applied to each graph at load time.
///
/// `SelfLoopsOnly` keeps only edges whose source equals their destination.
/// It discards almost every real propagation edge but stays the default so
/// results remain comparable with earlier runs. Loading logs a warning while
/// it is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum EdgeMask {
    /// Keep only `src == dst` edges.
    #[default]
    SelfLoopsOnly,
    /// Keep only `src != dst` edges.
    DropSelfLoops,
    /// Keep every edge.
    KeepAll,
}

impl EdgeMask {
    #[inline]
    pub fn keeps(self, src: u32, dst: u32) -> bool {
        match self {
            Self::SelfLoopsOnly => src == dst,
            Self::DropSelfLoops => src != dst,
            Self::KeepAll => true,
        }
    }
}

/// One labeled graph sample.
#[derive(Debug, Clone)]
pub struct GraphRecord {
    /// Node features (num_nodes x num_features).
    pub x: Tensor,
    /// Graph-local edges.
    pub edge_index: EdgeIndex,
    /// Graph label (0 = real, 1 = fake).
    pub y: u32,
    num_nodes: usize,
}

impl GraphRecord {
    /// Create a record, checking that `x` is a matrix and every edge is in range.
    ///
    /// `graph` is the record's position in its dataset and only feeds error
    /// messages.
    pub fn new(x: Tensor, edge_index: EdgeIndex, y: u32, graph: usize) -> Result<Self> {
        let (num_nodes, _) = x.dims2()?;
        if num_nodes == 0 {
            return Err(Error::EmptyGraph(graph));
        }
        edge_index.check_bounds(num_nodes, graph)?;
        Ok(Self {
            x,
            edge_index,
            y,
            num_nodes,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index.len()
    }

    pub fn num_features(&self) -> usize {
        self.x.dims().get(1).copied().unwrap_or(0)
    }

    /// Same record with a different edge list; node count is unchanged.
    pub fn with_edges(&self, edge_index: EdgeIndex) -> Self {
        Self {
            x: self.x.clone(),
            edge_index,
            y: self.y,
            num_nodes: self.num_nodes,
        }
    }

    /// Same record with every feature replaced by 1.0.
    pub fn without_features(&self) -> Result<Self> {
        Ok(Self {
            x: self.x.ones_like()?,
            edge_index: self.edge_index.clone(),
            y: self.y,
            num_nodes: self.num_nodes,
        })
    }
}
