//! Seeded parameter initialisation.
//!
//! Candle's CPU backend cannot be seeded, so the initial weights drawn by the
//! `VarBuilder` differ between runs. [`seed_parameters`] overwrites every
//! variable in a [`VarMap`] from a ChaCha stream, visiting variables in name
//! order so the same seed always yields the same model.
//!
//! | Shape        | Distribution                             |
//! |--------------|------------------------------------------|
//! | `(out, in)`  | `U(-1/sqrt(in), 1/sqrt(in))`             |
//! | `(1, h, d)`  | Glorot `U(-sqrt(6/(h+d)), sqrt(6/(h+d)))` |
//! | `(n,)`       | zeros                                    |

use candle_core::Tensor;
use candle_nn::VarMap;
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::error::{Error, Result};

/// Overwrite every parameter of `varmap` deterministically from `seed`.
pub fn seed_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let data = varmap.data().lock().map_err(|_| Error::Poisoned)?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for name in names {
        let var = &data[name];
        let dims = var.dims().to_vec();
        let numel: usize = dims.iter().product();

        let values: Vec<f32> = match bound(&dims) {
            Some(b) if b > 0.0 => {
                let dist = Uniform::new_inclusive(-b, b);
                (0..numel).map(|_| dist.sample(&mut rng)).collect()
            }
            _ => vec![0.0; numel],
        };
        let init = Tensor::from_vec(values, dims.as_slice(), var.device())?.to_dtype(var.dtype())?;
        var.set(&init)?;
        debug!(name = name.as_str(), shape = ?dims, "seeded parameter");
    }
    Ok(())
}

fn bound(dims: &[usize]) -> Option<f32> {
    match *dims {
        [_, fan_in] if fan_in > 0 => Some(1.0 / (fan_in as f32).sqrt()),
        [_, heads, out] if heads + out > 0 => Some((6.0 / (heads + out) as f32).sqrt()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GnnClassifier, ModelConfig, ModelKind};
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    fn build(kind: ModelKind) -> Result<VarMap> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        GnnClassifier::new(
            ModelConfig {
                num_features: 6,
                nhid: 4,
                num_classes: 2,
                dropout_ratio: 0.0,
                kind,
                concat: true,
            },
            vb,
        )?;
        Ok(varmap)
    }

    fn snapshot(varmap: &VarMap) -> Result<Vec<(String, Vec<f32>)>> {
        let data = varmap.data().lock().map_err(|_| Error::Poisoned)?;
        let mut out = Vec::new();
        for (name, var) in data.iter() {
            out.push((name.clone(), var.as_tensor().flatten_all()?.to_vec1::<f32>()?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    #[test]
    fn test_same_seed_same_weights() -> Result<()> {
        for kind in [ModelKind::Gcn, ModelKind::Sage, ModelKind::Gat] {
            let a = build(kind)?;
            let b = build(kind)?;
            seed_parameters(&a, 777)?;
            seed_parameters(&b, 777)?;
            assert_eq!(snapshot(&a)?, snapshot(&b)?);
        }
        Ok(())
    }

    #[test]
    fn test_different_seed_different_weights() -> Result<()> {
        let a = build(ModelKind::Sage)?;
        let b = build(ModelKind::Sage)?;
        seed_parameters(&a, 1)?;
        seed_parameters(&b, 2)?;
        assert_ne!(snapshot(&a)?, snapshot(&b)?);
        Ok(())
    }

    #[test]
    fn test_bounds_and_zero_bias() -> Result<()> {
        let varmap = build(ModelKind::Gcn)?;
        seed_parameters(&varmap, 5)?;
        for (name, values) in snapshot(&varmap)? {
            if name.ends_with("bias") {
                assert!(values.iter().all(|&v| v == 0.0), "{name}");
            } else if name == "lin0.weight" {
                let b = 1.0 / 6f32.sqrt();
                assert!(values.iter().all(|v| v.abs() <= b), "{name}");
            }
        }
        Ok(())
    }
}
