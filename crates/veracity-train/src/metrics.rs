//! Classification metrics over accumulated predictions.
//!
//! | Metric | Positive class | Notes |
//! |--------|----------------|-------|
//! | accuracy | - | argmax of the probability row |
//! | f1_macro | - | mean over observed and predicted classes |
//! | f1_micro | - | equals accuracy for single-label data |
//! | precision, recall | 1 | zero division gives 0 |
//! | auc | 1 | rank statistic, tied scores share their mean rank |
//! | ap | 1 | step-wise area under the precision-recall curve |
//!
//! AUC and AP need both classes present; otherwise they are NaN. An empty
//! log yields NaN for every metric.

use std::collections::BTreeSet;
use std::fmt;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// (probability row, label) pairs collected over one pass.
#[derive(Debug, Clone, Default)]
pub struct OutLog {
    probs: Vec<Vec<f32>>,
    labels: Vec<u32>,
}

impl OutLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch: `probs` is (B x C), `labels` is (B,).
    pub fn push(&mut self, probs: &Tensor, labels: &Tensor) -> Result<()> {
        let probs = probs.to_dtype(candle_core::DType::F32)?.to_vec2::<f32>()?;
        let labels = labels.to_vec1::<u32>()?;
        self.push_rows(probs, labels)
    }

    pub fn push_rows(&mut self, probs: Vec<Vec<f32>>, labels: Vec<u32>) -> Result<()> {
        if probs.len() != labels.len() {
            return Err(Error::LogMismatch {
                probs: probs.len(),
                labels: labels.len(),
            });
        }
        self.probs.extend(probs);
        self.labels.extend(labels);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn predictions(&self) -> Vec<u32> {
        self.probs
            .iter()
            .map(|row| {
                let mut best = 0;
                for (k, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = k;
                    }
                }
                best as u32
            })
            .collect()
    }

    fn positive_scores(&self) -> Option<Vec<f64>> {
        self.probs
            .iter()
            .map(|row| row.get(1).map(|&p| p as f64))
            .collect()
    }
}

/// Evaluation results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub f1_macro: f64,
    pub f1_micro: f64,
    pub precision: f64,
    pub recall: f64,
    pub auc: f64,
    pub ap: f64,
}

impl Metrics {
    pub fn nan() -> Self {
        Self {
            accuracy: f64::NAN,
            f1_macro: f64::NAN,
            f1_micro: f64::NAN,
            precision: f64::NAN,
            recall: f64::NAN,
            auc: f64::NAN,
            ap: f64::NAN,
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acc: {:.4}, f1_macro: {:.4}, f1_micro: {:.4}, precision: {:.4}, recall: {:.4}, auc: {:.4}, ap: {:.4}",
            self.accuracy, self.f1_macro, self.f1_micro, self.precision, self.recall, self.auc, self.ap
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    tp: usize,
    fp: usize,
    fn_: usize,
}

impl Counts {
    fn of(class: u32, labels: &[u32], preds: &[u32]) -> Self {
        let mut c = Self::default();
        for (&y, &p) in labels.iter().zip(preds) {
            match (y == class, p == class) {
                (true, true) => c.tp += 1,
                (false, true) => c.fp += 1,
                (true, false) => c.fn_ += 1,
                (false, false) => {}
            }
        }
        c
    }

    fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Compute every metric over the whole log.
pub fn eval_deep(log: &OutLog) -> Metrics {
    if log.is_empty() {
        return Metrics::nan();
    }

    let labels = &log.labels;
    let preds = log.predictions();
    let correct = labels.iter().zip(&preds).filter(|(y, p)| y == p).count();
    let accuracy = correct as f64 / labels.len() as f64;

    let classes: BTreeSet<u32> = labels.iter().chain(&preds).copied().collect();
    let f1_macro = classes
        .iter()
        .map(|&c| Counts::of(c, labels, &preds).f1())
        .sum::<f64>()
        / classes.len() as f64;

    let positive = Counts::of(1, labels, &preds);

    let (auc, ap) = match log.positive_scores() {
        Some(scores) => {
            let is_pos: Vec<bool> = labels.iter().map(|&y| y == 1).collect();
            (roc_auc(&scores, &is_pos), average_precision(&scores, &is_pos))
        }
        None => (f64::NAN, f64::NAN),
    };
    if auc.is_nan() {
        warn!(samples = labels.len(), "AUC/AP undefined: only one class present");
    }

    Metrics {
        accuracy,
        f1_macro,
        f1_micro: accuracy,
        precision: positive.precision(),
        recall: positive.recall(),
        auc,
        ap,
    }
}

/// Mann-Whitney form of the ROC AUC with averaged ranks for ties.
pub fn roc_auc(scores: &[f64], is_pos: &[bool]) -> f64 {
    let n_pos = is_pos.iter().filter(|&&p| p).count();
    let n_neg = is_pos.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1..=j+1 share their mean
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum += order[i..=j].iter().filter(|&&k| is_pos[k]).count() as f64 * mean_rank;
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    (rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

/// Sum of `(R_k - R_{k-1}) * P_k` over distinct score thresholds.
pub fn average_precision(scores: &[f64], is_pos: &[bool]) -> f64 {
    let n_pos = is_pos.iter().filter(|&&p| p).count();
    if n_pos == 0 || n_pos == is_pos.len() {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (mut tp, mut fp) = (0usize, 0usize);
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if is_pos[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    ap
}
