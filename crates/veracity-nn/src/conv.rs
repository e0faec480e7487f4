//! Message-passing convolutional layers.
//!
//! Implements the three interchangeable node-update layers:
//! - [`GCNConv`]: Graph Convolutional Network (Kipf & Welling, 2017)
//! - [`SAGEConv`]: GraphSAGE (Hamilton et al., 2017)
//! - [`GATConv`]: Graph Attention Network (Velickovic et al., 2018)
//!
//! # Message Passing Framework
//!
//! All layers follow the message-passing paradigm:
//!
//! 1. **Message**: Compute messages from neighbors
//! 2. **Aggregate**: Combine messages (sum, mean, attention-weighted sum)
//! 3. **Update**: Transform aggregated messages
//!
//! ```text
//! h_i^{(l+1)} = UPDATE(h_i^{(l)}, AGGREGATE({MESSAGE(h_j^{(l)}) : j in N(i)}))
//! ```
//!
//! Edges arrive as an [`EdgeIndex`] with messages flowing `src -> dst`.
//! Gathering uses `index_select` on the source ids and aggregation uses
//! `index_add` on the destination ids, so memory is O(E) rather than the
//! O(N^2) of a dense adjacency. Batches routinely hold tens of thousands of
//! nodes, which rules the dense form out.

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{linear, linear_no_bias, Init, Linear, Module, VarBuilder};
use veracity_core::EdgeIndex;

fn index_tensor(ids: &[u32], device: &Device) -> Result<Tensor> {
    Tensor::from_slice(ids, ids.len(), device)
}

/// Sum rows of `messages` into `num_nodes` buckets given by `dst`.
fn scatter_sum(messages: &Tensor, dst: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let mut shape = messages.dims().to_vec();
    shape[0] = num_nodes;
    Tensor::zeros(shape, messages.dtype(), messages.device())?.index_add(dst, messages, 0)
}

/// Graph Convolutional Network layer.
///
/// Implements: H' = D^{-1/2} (A + I) D^{-1/2} H W + b
///
/// Where:
/// - A is the adjacency matrix; existing self-loops are replaced by exactly
///   one self-loop per node
/// - D is the in-degree matrix of A + I
/// - H is the node feature matrix
/// - W is the learnable weight matrix, b the bias added after aggregation
///
/// # Reference
///
/// Kipf & Welling, "Semi-Supervised Classification with Graph Convolutional
/// Networks", ICLR 2017.
pub struct GCNConv {
    linear: Linear,
    bias: Option<Tensor>,
}

impl GCNConv {
    /// Create a new GCN layer.
    ///
    /// # Arguments
    /// - `in_features`: Input feature dimension
    /// - `out_features`: Output feature dimension
    /// - `bias`: Whether to include bias term
    /// - `vb`: Variable builder for parameter initialization
    pub fn new(in_features: usize, out_features: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        let linear = linear_no_bias(in_features, out_features, vb.pp("lin"))?;
        let bias = if bias {
            Some(vb.get_with_hints(out_features, "bias", Init::Const(0.))?)
        } else {
            None
        };
        Ok(Self { linear, bias })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `edge_index`: Edges, node ids in `[0, N)`
    ///
    /// # Returns
    /// - Node embeddings (N x out_features)
    pub fn forward(&self, x: &Tensor, edge_index: &EdgeIndex) -> Result<Tensor> {
        let n = x.dim(0)?;
        let device = x.device();
        let edges = edge_index.with_self_loops(n);

        // Symmetric normalisation: deg^{-1/2}[src] * deg^{-1/2}[dst]
        let deg_inv_sqrt: Vec<f32> = edges
            .in_degree(n)
            .into_iter()
            .map(|d| if d > 0.0 { d.powf(-0.5) } else { 0.0 })
            .collect();
        let norm: Vec<f32> = edges
            .iter()
            .map(|(s, d)| deg_inv_sqrt[s as usize] * deg_inv_sqrt[d as usize])
            .collect();

        // Linear transform: X * W
        let h = self.linear.forward(x)?;
        let norm = Tensor::from_vec(norm, (edges.len(), 1), device)?.to_dtype(h.dtype())?;
        let src = index_tensor(&edges.src, device)?;
        let dst = index_tensor(&edges.dst, device)?;

        // Neighborhood aggregation: A_hat * H
        let messages = h.index_select(&src, 0)?.broadcast_mul(&norm)?;
        let out = scatter_sum(&messages, &dst, n)?;
        match &self.bias {
            Some(b) => out.broadcast_add(b),
            None => Ok(out),
        }
    }
}

/// Aggregation function for GraphSAGE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Aggregator {
    /// Mean aggregator: average of neighbor features
    #[default]
    Mean,
    /// Sum aggregator
    Sum,
}

/// GraphSAGE convolutional layer.
///
/// Implements neighborhood aggregation with a separate root transform:
/// h_i' = W_neighbor * AGG({h_j : j -> i}) + W_self * h_i
///
/// Nodes without incoming edges aggregate to zero, so with an empty edge
/// set the layer reduces to `W_self * h_i + b`.
///
/// # Reference
///
/// Hamilton et al., "Inductive Representation Learning on Large Graphs",
/// NeurIPS 2017.
pub struct SAGEConv {
    lin_self: Linear,
    lin_neighbor: Linear,
    aggregator: Aggregator,
    normalize: bool,
}

impl SAGEConv {
    /// Create a new GraphSAGE layer.
    ///
    /// The neighbor projection carries the bias; the root projection has none.
    pub fn new(
        in_features: usize,
        out_features: usize,
        aggregator: Aggregator,
        normalize: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let lin_self = linear_no_bias(in_features, out_features, vb.pp("lin_self"))?;
        let lin_neighbor = linear(in_features, out_features, vb.pp("lin_neighbor"))?;

        Ok(Self {
            lin_self,
            lin_neighbor,
            aggregator,
            normalize,
        })
    }

    fn aggregate(&self, x: &Tensor, edge_index: &EdgeIndex) -> Result<Tensor> {
        if edge_index.is_empty() {
            return x.zeros_like();
        }
        let n = x.dim(0)?;
        let device = x.device();
        let src = index_tensor(&edge_index.src, device)?;
        let dst = index_tensor(&edge_index.dst, device)?;
        let sum = scatter_sum(&x.index_select(&src, 0)?, &dst, n)?;

        match self.aggregator {
            Aggregator::Sum => Ok(sum),
            Aggregator::Mean => {
                let deg: Vec<f32> = edge_index
                    .in_degree(n)
                    .into_iter()
                    .map(|d| d.max(1.0))
                    .collect();
                let deg = Tensor::from_vec(deg, (n, 1), device)?.to_dtype(x.dtype())?;
                sum.broadcast_div(&deg)
            }
        }
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `edge_index`: Edges, node ids in `[0, N)`
    ///
    /// # Returns
    /// - Node embeddings (N x out_features)
    pub fn forward(&self, x: &Tensor, edge_index: &EdgeIndex) -> Result<Tensor> {
        let h_self = self.lin_self.forward(x)?;
        let h_neighbor = self.lin_neighbor.forward(&self.aggregate(x, edge_index)?)?;
        let out = (h_self + h_neighbor)?;

        // Optional L2 normalization
        if self.normalize {
            let norm = out.sqr()?.sum_keepdim(1)?.sqrt()?;
            let norm = (norm + 1e-6)?;
            out.broadcast_div(&norm)
        } else {
            Ok(out)
        }
    }
}

/// Graph Attention Network layer.
///
/// Implements attention-weighted aggregation:
/// h_i' = sum_{j -> i} alpha_{ij} W h_j + b
///
/// Where alpha_{ij} = softmax_j(LeakyReLU(a_src^T W h_j + a_dst^T W h_i)),
/// taken over the incoming edges of `i` (self-loop included). Heads are
/// concatenated.
///
/// # Reference
///
/// Velickovic et al., "Graph Attention Networks", ICLR 2018.
pub struct GATConv {
    linear: Linear,
    att_src: Tensor, // Attention vector for source nodes
    att_dst: Tensor, // Attention vector for destination nodes
    bias: Tensor,
    negative_slope: f64,
    num_heads: usize,
    out_per_head: usize,
}

impl GATConv {
    /// Create a new GAT layer.
    ///
    /// # Arguments
    /// - `in_features`: Input feature dimension
    /// - `out_features`: Output feature dimension per head
    /// - `num_heads`: Number of attention heads
    /// - `negative_slope`: LeakyReLU negative slope (typically 0.2)
    /// - `vb`: Variable builder
    pub fn new(
        in_features: usize,
        out_features: usize,
        num_heads: usize,
        negative_slope: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let linear = linear_no_bias(in_features, out_features * num_heads, vb.pp("lin"))?;

        // Glorot bound over the (heads, out) fan
        let bound = (6.0 / (num_heads + out_features) as f64).sqrt();
        let init = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let att_src = vb.get_with_hints((1, num_heads, out_features), "att_src", init)?;
        let att_dst = vb.get_with_hints((1, num_heads, out_features), "att_dst", init)?;
        let bias = vb.get_with_hints(out_features * num_heads, "bias", Init::Const(0.))?;

        Ok(Self {
            linear,
            att_src,
            att_dst,
            bias,
            negative_slope,
            num_heads,
            out_per_head: out_features,
        })
    }

    /// Forward pass with attention.
    ///
    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `edge_index`: Edges, node ids in `[0, N)`
    ///
    /// # Returns
    /// - Node embeddings (N x num_heads * out_features)
    pub fn forward(&self, x: &Tensor, edge_index: &EdgeIndex) -> Result<Tensor> {
        let n = x.dim(0)?;
        let device = x.device();
        let heads = self.num_heads;
        let edges = edge_index.with_self_loops(n);
        let src = index_tensor(&edges.src, device)?;
        let dst = index_tensor(&edges.dst, device)?;

        // Linear projection: (N, in) -> (N, heads, out)
        let h = self
            .linear
            .forward(x)?
            .reshape((n, heads, self.out_per_head))?;

        // Per-node attention halves: (N, heads)
        let alpha_src = h.broadcast_mul(&self.att_src)?.sum(D::Minus1)?;
        let alpha_dst = h.broadcast_mul(&self.att_dst)?.sum(D::Minus1)?;

        // e_ij = LeakyReLU(alpha_src[j] + alpha_dst[i]) per edge: (E, heads)
        let e = (alpha_src.index_select(&src, 0)? + alpha_dst.index_select(&dst, 0)?)?;
        let e = e.maximum(&(&e * self.negative_slope)?)?;

        // Softmax over each destination's incoming edges. The per-destination
        // max is a constant shift and does not change the softmax.
        let scores = e.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let mut max = vec![f32::NEG_INFINITY; n * heads];
        for (row, &d) in scores.iter().zip(&edges.dst) {
            for (k, &s) in row.iter().enumerate() {
                let m = &mut max[d as usize * heads + k];
                *m = m.max(s);
            }
        }
        let shift: Vec<f32> = edges
            .dst
            .iter()
            .flat_map(|&d| max[d as usize * heads..(d as usize + 1) * heads].to_vec())
            .collect();
        let shift = Tensor::from_vec(shift, (edges.len(), heads), device)?.to_dtype(e.dtype())?;

        let weights = (e - shift)?.exp()?;
        let denom = scatter_sum(&weights, &dst, n)?;
        let alpha = (weights / denom.index_select(&dst, 0)?)?;

        // Weighted messages: (E, heads, out) -> (N, heads * out)
        let messages = h
            .index_select(&src, 0)?
            .broadcast_mul(&alpha.unsqueeze(D::Minus1)?)?;
        let out = scatter_sum(&messages, &dst, n)?.reshape((n, heads * self.out_per_head))?;
        out.broadcast_add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    fn path_graph() -> EdgeIndex {
        EdgeIndex::from_pairs([(0, 1), (1, 0), (1, 2), (2, 1)])
    }

    #[test]
    fn test_gcn_forward_shape() -> Result<()> {
        let varmap = VarMap::new();
        let gcn = GCNConv::new(64, 32, true, vb(&varmap))?;

        // 10 nodes, 64 features
        let x = Tensor::randn(0f32, 1f32, (10, 64), &Device::Cpu)?;
        let out = gcn.forward(&x, &EdgeIndex::from_pairs([(0, 1), (3, 4)]))?;
        assert_eq!(out.dims(), &[10, 32]);
        Ok(())
    }

    #[test]
    fn test_gcn_isolated_nodes_keep_own_features() -> Result<()> {
        let varmap = VarMap::new();
        let gcn = GCNConv::new(4, 4, false, vb(&varmap))?;

        // With only self-loops every node has degree 1, so H' = X W
        let x = Tensor::randn(0f32, 1f32, (3, 4), &Device::Cpu)?;
        let out = gcn.forward(&x, &EdgeIndex::empty())?;
        let expected = gcn.linear.forward(&x)?;
        let diff = (out - expected)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn test_sage_forward_shape() -> Result<()> {
        let varmap = VarMap::new();
        let sage = SAGEConv::new(64, 32, Aggregator::Mean, true, vb(&varmap))?;

        let x = Tensor::randn(0f32, 1f32, (10, 64), &Device::Cpu)?;
        let out = sage.forward(&x, &EdgeIndex::from_pairs([(0, 1), (2, 1)]))?;
        assert_eq!(out.dims(), &[10, 32]);
        Ok(())
    }

    #[test]
    fn test_sage_mean_aggregation() -> Result<()> {
        let varmap = VarMap::new();
        let sage = SAGEConv::new(2, 2, Aggregator::Mean, false, vb(&varmap))?;

        // node 1 receives from nodes 0 and 2
        let x = Tensor::new(&[[1f32, 0.], [0., 0.], [3., 2.]], &Device::Cpu)?;
        let edges = EdgeIndex::from_pairs([(0, 1), (2, 1)]);
        let agg = sage.aggregate(&x, &edges)?.to_vec2::<f32>()?;
        assert_eq!(agg, vec![vec![0., 0.], vec![2., 1.], vec![0., 0.]]);
        Ok(())
    }

    #[test]
    fn test_sage_without_edges() -> Result<()> {
        let varmap = VarMap::new();
        let sage = SAGEConv::new(8, 4, Aggregator::Sum, false, vb(&varmap))?;
        let x = Tensor::randn(0f32, 1f32, (5, 8), &Device::Cpu)?;
        let out = sage.forward(&x, &EdgeIndex::empty())?;
        assert_eq!(out.dims(), &[5, 4]);
        Ok(())
    }

    #[test]
    fn test_gat_forward_shape() -> Result<()> {
        let varmap = VarMap::new();
        let gat = GATConv::new(16, 8, 2, 0.2, vb(&varmap))?;

        let x = Tensor::randn(0f32, 1f32, (3, 16), &Device::Cpu)?;
        let out = gat.forward(&x, &path_graph())?;
        assert_eq!(out.dims(), &[3, 16]);
        Ok(())
    }

    #[test]
    fn test_gat_attention_is_convex_combination() -> Result<()> {
        let varmap = VarMap::new();
        let gat = GATConv::new(4, 4, 1, 0.2, vb(&varmap))?;

        // Identical projected features on every node: any convex combination
        // returns that same row.
        let x = Tensor::ones((3, 4), DType::F32, &Device::Cpu)?;
        let out = gat.forward(&x, &path_graph())?;
        let rows = out.to_vec2::<f32>()?;
        for row in &rows[1..] {
            for (a, b) in row.iter().zip(&rows[0]) {
                assert!((a - b).abs() < 1e-5);
            }
        }
        Ok(())
    }
}
