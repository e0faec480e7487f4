//! Graph-level readout.

use candle_core::{Result, Tensor};

/// Element-wise maximum over each graph's nodes.
///
/// `ptr` holds node offsets of a batch (graph `g` owns rows
/// `ptr[g]..ptr[g + 1]` of `x`); every graph must have at least one node.
///
/// # Returns
/// - Graph embeddings (num_graphs x D)
pub fn global_max_pool(x: &Tensor, ptr: &[usize]) -> Result<Tensor> {
    let pooled = ptr
        .windows(2)
        .map(|w| x.narrow(0, w[0], w[1] - w[0])?.max_keepdim(0))
        .collect::<Result<Vec<_>>>()?;
    Tensor::cat(&pooled, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_max_pool_per_graph() -> Result<()> {
        let x = Tensor::new(
            &[[1f32, 5.], [3., -1.], [0., 0.], [-2., 7.], [4., 2.]],
            &Device::Cpu,
        )?;
        let pooled = global_max_pool(&x, &[0, 2, 5])?;
        assert_eq!(pooled.to_vec2::<f32>()?, vec![vec![3., 5.], vec![4., 7.]]);
        Ok(())
    }

    #[test]
    fn test_single_node_graph_is_identity() -> Result<()> {
        let x = Tensor::new(&[[1f32, 2.], [3., 4.]], &Device::Cpu)?;
        let pooled = global_max_pool(&x, &[0, 1, 2])?;
        assert_eq!(pooled.to_vec2::<f32>()?, x.to_vec2::<f32>()?);
        Ok(())
    }
}
