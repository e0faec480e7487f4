//! Propagation-graph corpora and the graph splitter.
//!
//! A corpus is stored the way graph-learning libraries collate an in-memory
//! dataset: one concatenated node-feature matrix, one concatenated edge list
//! with graph-local node ids, one label per graph, and two slice vectors
//! marking where each graph's nodes and edges begin. [`split_graphs`] cuts
//! that store back into one [`GraphRecord`] per graph.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/<dataset>/<feature>.npz
//!     x            (total_nodes, F)   float
//!     edge_index   (2, total_edges)   int64
//!     y            (num_graphs,)      int64
//!     node_slices  (num_graphs + 1,)  int64
//!     edge_slices  (num_graphs + 1,)  int64
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::graph::{EdgeIndex, EdgeMask, GraphRecord};

/// Supported news corpora.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum DatasetName {
    #[default]
    Politifact,
    Gossipcop,
}

impl DatasetName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Politifact => "politifact",
            Self::Gossipcop => "gossipcop",
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node feature encodings shipped with each corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    /// Hand-crafted user profile features.
    Hand,
    /// Averaged GloVe embeddings of user history.
    Glove,
    /// BERT embeddings of user history.
    #[default]
    Bert,
}

impl FeatureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hand => "hand",
            Self::Glove => "glove",
            Self::Bert => "bert",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Archive path of a corpus under `root`.
pub fn dataset_path(root: &Path, name: DatasetName, feature: FeatureKind) -> PathBuf {
    root.join(name.as_str())
        .join(format!("{}.npz", feature.as_str()))
}

/// The concatenated store of a corpus, before splitting.
///
/// Fields are only reachable through [`RawDataset::new`] and
/// [`RawDataset::load`], so the slice boundaries are always a monotone cover
/// of the store.
#[derive(Debug, Clone)]
pub struct RawDataset {
    /// Concatenated node features (total_nodes x F), f32.
    x: Tensor,
    /// Concatenated edges, node ids local to their graph.
    edge_index: EdgeIndex,
    /// One label per graph.
    y: Vec<u32>,
    /// Node boundaries: graph `i` owns rows `node_slices[i]..node_slices[i + 1]`.
    node_slices: Vec<usize>,
    /// Edge boundaries: graph `i` owns edges `edge_slices[i]..edge_slices[i + 1]`.
    edge_slices: Vec<usize>,
}

impl RawDataset {
    /// Assemble a store, validating slice boundaries against the data.
    pub fn new(
        x: Tensor,
        edge_index: EdgeIndex,
        y: Vec<u32>,
        node_slices: Vec<usize>,
        edge_slices: Vec<usize>,
    ) -> Result<Self> {
        let (total_nodes, _) = x.dims2()?;
        check_slices("node", &node_slices, y.len(), total_nodes)?;
        check_slices("edge", &edge_slices, y.len(), edge_index.len())?;
        Ok(Self {
            x: x.to_dtype(DType::F32)?,
            edge_index,
            y,
            node_slices,
            edge_slices,
        })
    }

    /// Read a store from an `.npz` archive.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut arrays: HashMap<String, Tensor> =
            HashMap::from_iter(Tensor::read_npz(path)?);
        let mut take = |name: &str| {
            arrays
                .remove(name)
                .ok_or_else(|| Error::MissingArray(name.to_string()))
        };

        let x = take("x")?;
        let edges = take("edge_index")?.to_dtype(DType::I64)?;
        let y = take("y")?.to_dtype(DType::I64)?.to_vec1::<i64>()?;
        let node_slices = take("node_slices")?.to_dtype(DType::I64)?.to_vec1::<i64>()?;
        let edge_slices = take("edge_slices")?.to_dtype(DType::I64)?.to_vec1::<i64>()?;

        let edge_index = if edges.elem_count() == 0 {
            EdgeIndex::empty()
        } else {
            let rows = edges.to_vec2::<i64>()?;
            if rows.len() != 2 {
                return Err(Error::DimensionMismatch {
                    expected: 2,
                    got: rows.len(),
                });
            }
            EdgeIndex::new(to_u32(&rows[0], "edge")?, to_u32(&rows[1], "edge")?)?
        };

        Self::new(
            x,
            edge_index,
            to_u32(&y, "label")?,
            to_usize(&node_slices, "node")?,
            to_usize(&edge_slices, "edge")?,
        )
    }

    /// Write the store as an `.npz` archive readable by [`RawDataset::load`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let device = Device::Cpu;
        let num_edges = self.edge_index.len();
        let as_i64 = |v: &[u32]| v.iter().map(|&i| i as i64).collect::<Vec<_>>();
        let mut edges = as_i64(&self.edge_index.src);
        edges.extend(as_i64(&self.edge_index.dst));
        let slices = |v: &[usize]| {
            Tensor::from_vec(
                v.iter().map(|&i| i as i64).collect::<Vec<_>>(),
                v.len(),
                &device,
            )
        };

        let x = self.x.to_device(&device)?;
        let edge_index = Tensor::from_vec(edges, (2, num_edges), &device)?;
        let y = Tensor::from_vec(as_i64(&self.y), self.y.len(), &device)?;
        let node_slices = slices(&self.node_slices)?;
        let edge_slices = slices(&self.edge_slices)?;

        Tensor::write_npz(
            &[
                ("x", &x),
                ("edge_index", &edge_index),
                ("y", &y),
                ("node_slices", &node_slices),
                ("edge_slices", &edge_slices),
            ],
            path,
        )?;
        Ok(())
    }

    pub fn x(&self) -> &Tensor {
        &self.x
    }

    pub fn edge_index(&self) -> &EdgeIndex {
        &self.edge_index
    }

    pub fn labels(&self) -> &[u32] {
        &self.y
    }

    pub fn node_slices(&self) -> &[usize] {
        &self.node_slices
    }

    pub fn edge_slices(&self) -> &[usize] {
        &self.edge_slices
    }

    pub fn num_graphs(&self) -> usize {
        self.y.len()
    }

    pub fn num_features(&self) -> usize {
        self.x.dims().get(1).copied().unwrap_or(0)
    }
}

fn check_slices(kind: &'static str, slices: &[usize], num_graphs: usize, total: usize) -> Result<()> {
    let invalid = |reason: String| Error::InvalidSlices { kind, reason };
    if slices.len() != num_graphs + 1 {
        return Err(invalid(format!(
            "expected {} boundaries, got {}",
            num_graphs + 1,
            slices.len()
        )));
    }
    if slices[0] != 0 {
        return Err(invalid(format!("first boundary is {}, not 0", slices[0])));
    }
    if let Some(w) = slices.windows(2).find(|w| w[1] < w[0]) {
        return Err(invalid(format!("boundary {} follows {}", w[1], w[0])));
    }
    let last = slices[num_graphs];
    if last != total {
        return Err(invalid(format!("last boundary is {last}, store holds {total}")));
    }
    Ok(())
}

fn to_u32(values: &[i64], kind: &'static str) -> Result<Vec<u32>> {
    values
        .iter()
        .map(|&v| {
            u32::try_from(v).map_err(|_| Error::InvalidSlices {
                kind,
                reason: format!("value {v} is not a valid index"),
            })
        })
        .collect()
}

fn to_usize(values: &[i64], kind: &'static str) -> Result<Vec<usize>> {
    values
        .iter()
        .map(|&v| {
            usize::try_from(v).map_err(|_| Error::InvalidSlices {
                kind,
                reason: format!("negative boundary {v}"),
            })
        })
        .collect()
}

/// Cut a concatenated store into one record per graph.
///
/// Graph `i` receives feature rows `node_slices[i]..node_slices[i + 1]` and
/// edges `edge_slices[i]..edge_slices[i + 1]`, filtered by `mask`, plus
/// label `y[i]`. The store is not modified.
pub fn split_graphs(raw: &RawDataset, mask: EdgeMask) -> Result<Vec<GraphRecord>> {
    (0..raw.num_graphs())
        .map(|i| {
            let (n0, n1) = (raw.node_slices[i], raw.node_slices[i + 1]);
            let (e0, e1) = (raw.edge_slices[i], raw.edge_slices[i + 1]);

            let x = raw.x.narrow(0, n0, n1 - n0)?;
            let edges = EdgeIndex {
                src: raw.edge_index.src[e0..e1].to_vec(),
                dst: raw.edge_index.dst[e0..e1].to_vec(),
            }
            .mask(mask);

            GraphRecord::new(x, edges, raw.y[i], i)
        })
        .collect()
}

/// Load-time transforms applied to every graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Edge filter applied while splitting.
    pub edge_mask: EdgeMask,
    /// Replace every node feature with 1.0.
    pub no_feature: bool,
    /// Symmetrise each graph's edges after masking.
    pub undirected: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            edge_mask: EdgeMask::default(),
            no_feature: false,
            undirected: true,
        }
    }
}

/// A corpus split into immutable graph records.
#[derive(Debug, Clone)]
pub struct FnnDataset {
    graphs: Vec<GraphRecord>,
    num_features: usize,
    num_classes: usize,
}

impl FnnDataset {
    /// Load `<root>/<name>/<feature>.npz` and split it.
    pub fn load(
        root: impl AsRef<Path>,
        name: DatasetName,
        feature: FeatureKind,
        options: LoadOptions,
    ) -> Result<Self> {
        let path = dataset_path(root.as_ref(), name, feature);
        info!(path = %path.display(), "loading dataset");
        Self::from_raw(&RawDataset::load(&path)?, options)
    }

    /// Split a store and apply the load-time transforms.
    pub fn from_raw(raw: &RawDataset, options: LoadOptions) -> Result<Self> {
        if options.edge_mask == EdgeMask::SelfLoopsOnly {
            warn!("edge mask keeps self-loops only; nearly all propagation edges are discarded");
        }

        let mut graphs = split_graphs(raw, options.edge_mask)?;
        if options.undirected {
            graphs = graphs
                .iter()
                .map(|g| g.with_edges(g.edge_index.to_undirected()))
                .collect();
        }
        if options.no_feature {
            graphs = graphs
                .iter()
                .map(GraphRecord::without_features)
                .collect::<Result<_>>()?;
        }

        let num_classes = raw.y.iter().max().map_or(0, |&m| m as usize + 1);
        let kept: usize = graphs.iter().map(GraphRecord::num_edges).sum();
        info!(
            graphs = graphs.len(),
            features = raw.num_features(),
            classes = num_classes,
            edges_kept = kept,
            edges_total = raw.edge_index.len(),
            "dataset ready"
        );

        Ok(Self {
            graphs,
            num_features: raw.num_features(),
            num_classes,
        })
    }

    /// Build a dataset from records already in memory.
    pub fn from_graphs(graphs: Vec<GraphRecord>, num_classes: usize) -> Result<Self> {
        let num_features = graphs.first().map_or(0, GraphRecord::num_features);
        if let Some(g) = graphs.iter().find(|g| g.num_features() != num_features) {
            return Err(Error::DimensionMismatch {
                expected: num_features,
                got: g.num_features(),
            });
        }
        Ok(Self {
            graphs,
            num_features,
            num_classes,
        })
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn graphs(&self) -> &[GraphRecord] {
        &self.graphs
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Clone the records at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Vec<GraphRecord> {
        indices.iter().map(|&i| self.graphs[i].clone()).collect()
    }
}
