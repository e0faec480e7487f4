//! Property-based tests for splitting and partitioning.
//!
//! These tests verify invariants that should hold for any corpus:
//! - Partitions are disjoint, cover every graph and have floor-based sizes
//! - Split graphs keep their node counts and in-range edges
//! - The self-loop mask leaves only `src == dst` edges

use std::collections::HashSet;

use candle_core::{Device, Tensor};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use veracity_core::split::{random_split, SplitSizes, TRAIN_RATIO, VAL_RATIO};
use veracity_core::{split_graphs, EdgeIndex, EdgeMask, RawDataset};

/// Generate a corpus as per-graph (node count, local edge list).
fn arb_corpus() -> impl Strategy<Value = Vec<(usize, Vec<(u32, u32)>)>> {
    prop::collection::vec(
        (1usize..8).prop_flat_map(|n| {
            let edge = (0..n as u32, 0..n as u32);
            (Just(n), prop::collection::vec(edge, 0..12))
        }),
        1..12,
    )
}

fn build(corpus: &[(usize, Vec<(u32, u32)>)]) -> RawDataset {
    let total_nodes: usize = corpus.iter().map(|(n, _)| n).sum();
    let x = Tensor::zeros((total_nodes, 3), candle_core::DType::F32, &Device::Cpu).unwrap();

    let mut node_slices = vec![0];
    let mut edge_slices = vec![0];
    let mut pairs = Vec::new();
    for (n, edges) in corpus {
        node_slices.push(node_slices.last().unwrap() + n);
        edge_slices.push(edge_slices.last().unwrap() + edges.len());
        pairs.extend(edges.iter().copied());
    }
    let y = (0..corpus.len() as u32).map(|i| i % 2).collect();
    RawDataset::new(x, EdgeIndex::from_pairs(pairs), y, node_slices, edge_slices).unwrap()
}

mod partition_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn partition_is_disjoint_cover(n in 0usize..500, seed in any::<u64>()) {
            let sizes = SplitSizes::new(n, TRAIN_RATIO, VAL_RATIO).unwrap();
            let parts = random_split(sizes, &mut ChaCha8Rng::seed_from_u64(seed));

            prop_assert_eq!(parts.train.len(), (n as f64 * 0.2).floor() as usize);
            prop_assert_eq!(parts.val.len(), (n as f64 * 0.1).floor() as usize);
            prop_assert_eq!(parts.train.len() + parts.val.len() + parts.test.len(), n);

            let all: HashSet<usize> = parts.train.iter()
                .chain(&parts.val)
                .chain(&parts.test)
                .copied()
                .collect();
            prop_assert_eq!(all.len(), n);
            prop_assert!(all.iter().all(|&i| i < n));
        }
    }
}

mod splitter_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn split_preserves_nodes_and_bounds(corpus in arb_corpus()) {
            let raw = build(&corpus);
            let graphs = split_graphs(&raw, EdgeMask::KeepAll).unwrap();

            prop_assert_eq!(graphs.len(), corpus.len());
            for (graph, (n, edges)) in graphs.iter().zip(&corpus) {
                prop_assert_eq!(graph.num_nodes(), *n);
                prop_assert_eq!(graph.x.dims()[0], *n);
                prop_assert_eq!(graph.num_edges(), edges.len());
                prop_assert!(graph.edge_index.iter().all(|(s, d)| (s as usize) < *n && (d as usize) < *n));
            }
        }

        #[test]
        fn self_loop_mask_keeps_only_loops(corpus in arb_corpus()) {
            let raw = build(&corpus);
            let graphs = split_graphs(&raw, EdgeMask::SelfLoopsOnly).unwrap();

            for (graph, (_, edges)) in graphs.iter().zip(&corpus) {
                let loops = edges.iter().filter(|(s, d)| s == d).count();
                prop_assert_eq!(graph.num_edges(), loops);
                prop_assert_eq!(graph.edge_index.num_self_loops(), loops);
            }
        }
    }
}
