//! Random train/validation/test partitioning.
//!
//! Sizes are fixed up front: `floor(train_ratio * n)` training graphs,
//! `floor(val_ratio * n)` validation graphs and the remainder for testing.
//! Membership is a uniform random permutation of `0..n` cut at those sizes,
//! so the three subsets are disjoint and cover every graph exactly once. No
//! stratification is attempted; the seed of the supplied RNG is the only
//! source of reproducibility.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};

/// Fraction of graphs used for training.
pub const TRAIN_RATIO: f64 = 0.2;
/// Fraction of graphs used for validation.
pub const VAL_RATIO: f64 = 0.1;

/// Subset sizes for a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSizes {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl SplitSizes {
    /// Compute subset sizes for `n` graphs.
    pub fn new(n: usize, train_ratio: f64, val_ratio: f64) -> Result<Self> {
        let valid = |r: f64| (0.0..=1.0).contains(&r);
        if !valid(train_ratio) || !valid(val_ratio) || train_ratio + val_ratio > 1.0 {
            return Err(Error::InvalidConfig(format!(
                "split ratios {train_ratio}/{val_ratio} must be in [0, 1] and sum to at most 1"
            )));
        }
        let train = (train_ratio * n as f64).floor() as usize;
        let val = (val_ratio * n as f64).floor() as usize;
        Ok(Self {
            train,
            val,
            test: n - train - val,
        })
    }

    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }
}

/// Indices of the graphs in each subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl Partition {
    pub fn sizes(&self) -> SplitSizes {
        SplitSizes {
            train: self.train.len(),
            val: self.val.len(),
            test: self.test.len(),
        }
    }
}

/// Randomly partition `0..sizes.total()` into the three subsets.
pub fn random_split<R: Rng + ?Sized>(sizes: SplitSizes, rng: &mut R) -> Partition {
    let mut order: Vec<usize> = (0..sizes.total()).collect();
    order.shuffle(rng);

    let test = order.split_off(sizes.train + sizes.val);
    let val = order.split_off(sizes.train);
    Partition {
        train: order,
        val,
        test,
    }
}
