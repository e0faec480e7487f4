//! Adam with L2 regularisation folded into the gradient.
//!
//! Unlike AdamW, the penalty `weight_decay * theta` is added to the gradient
//! before the moment estimates, so it is rescaled by the adaptive step like
//! any other gradient component.

use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::Optimizer;

/// Adam hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsAdam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for ParamsAdam {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

#[derive(Debug)]
struct VarAdam {
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

#[derive(Debug)]
pub struct Adam {
    vars: Vec<VarAdam>,
    step_t: usize,
    params: ParamsAdam,
}

impl Optimizer for Adam {
    type Config = ParamsAdam;

    fn new(vars: Vec<Var>, params: ParamsAdam) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let second_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarAdam {
                    var,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let ParamsAdam {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.params;
        let scale_m = 1f64 / (1f64 - beta1.powi(self.step_t as i32));
        let scale_v = 1f64 / (1f64 - beta2.powi(self.step_t as i32));

        for var in &self.vars {
            let theta = &var.var;
            let Some(g) = grads.get(theta) else {
                continue;
            };
            let g = if weight_decay > 0.0 {
                (g + (theta.as_tensor() * weight_decay)?)?
            } else {
                g.clone()
            };
            let m = &var.first_moment;
            let v = &var.second_moment;
            let next_m = ((m.as_tensor() * beta1)? + (&g * (1.0 - beta1))?)?;
            let next_v = ((v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
            let m_hat = (&next_m * scale_m)?;
            let v_hat = (&next_v * scale_v)?;
            let delta = ((m_hat / (v_hat.sqrt()? + eps)?)? * lr)?;
            theta.set(&theta.sub(&delta)?)?;
            m.set(&next_m)?;
            v.set(&next_v)?;
        }
        Ok(())
    }
}

impl Adam {
    pub fn new_lr(vars: Vec<Var>, lr: f64) -> Result<Self> {
        <Self as Optimizer>::new(
            vars,
            ParamsAdam {
                lr,
                ..ParamsAdam::default()
            },
        )
    }

    pub fn params(&self) -> &ParamsAdam {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_minimises_quadratic() -> Result<()> {
        let x = Var::new(&[0f32], &Device::Cpu)?;
        let mut opt = Adam::new_lr(vec![x.clone()], 0.1)?;
        for _ in 0..500 {
            let loss = (x.as_tensor() - 3.0)?.sqr()?.sum_all()?;
            opt.backward_step(&loss)?;
        }
        let x = x.as_tensor().to_vec1::<f32>()?[0];
        assert!((x - 3.0).abs() < 0.05, "x = {x}");
        Ok(())
    }

    /// One step on a loss whose gradient is a small negative constant.
    fn step_with_decay(weight_decay: f64) -> Result<f32> {
        let x = Var::new(&[1f32], &Device::Cpu)?;
        let mut opt = Adam::new(
            vec![x.clone()],
            ParamsAdam {
                lr: 0.1,
                weight_decay,
                ..ParamsAdam::default()
            },
        )?;
        let loss = (x.as_tensor() * -1e-4)?.sum_all()?;
        opt.backward_step(&loss)?;
        Ok(x.as_tensor().to_vec1::<f32>()?[0])
    }

    #[test]
    fn test_weight_decay_is_added_to_the_gradient() -> Result<()> {
        // Without decay the loss gradient pushes x up by about lr.
        let plain = step_with_decay(0.0)?;
        assert!(plain > 1.05, "x = {plain}");

        // 0.01 * x outweighs the -1e-4 gradient and flips the step direction.
        let decayed = step_with_decay(0.01)?;
        assert!(decayed < 1.0 && decayed > 0.85, "x = {decayed}");
        Ok(())
    }

    #[test]
    fn test_untouched_vars_are_skipped() -> Result<()> {
        let used = Var::new(&[1f32], &Device::Cpu)?;
        let unused = Var::new(&[5f32], &Device::Cpu)?;
        let mut opt = Adam::new_lr(vec![used.clone(), unused.clone()], 0.1)?;
        let loss = used.as_tensor().sqr()?.sum_all()?;
        opt.backward_step(&loss)?;
        assert_eq!(unused.as_tensor().to_vec1::<f32>()?, vec![5.0]);
        Ok(())
    }
}
