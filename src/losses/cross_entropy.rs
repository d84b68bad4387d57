use anyhow::{ensure, Result};
use ndarray::{s, Array4, ArrayView2, ArrayView3, ArrayView4, ArrayViewMut3, Axis};
use rayon::prelude::*;
use crate::common::IGNORE_LABEL;

/// Loss value with its gradient w.r.t. the logits.
#[derive(Debug, Clone)]
pub struct LossGrad {
    pub loss: f32,
    pub grad: Array4<f32>,
}

/// Negative log-likelihood of a log-softmax over the class axis of
/// `[N, K, H, W]` logits against `[N, H, W]` targets.
///
/// Pixels labelled `ignore_index` contribute neither to the loss nor to the
/// normaliser. The result is the (weighted) mean over the remaining pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossEntropyLoss2d {
    pub weight: Option<Vec<f32>>,
    pub ignore_index: i64,
}

impl Default for CrossEntropyLoss2d {
    fn default() -> Self {
        Self {
            weight: None,
            ignore_index: IGNORE_LABEL,
        }
    }
}

impl CrossEntropyLoss2d {
    pub fn new(ignore_index: i64) -> Self {
        Self {
            ignore_index,
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: &[f32]) -> Self {
        self.weight = Some(weight.to_vec());
        self
    }

    fn class_weight(&self, class: usize) -> f64 {
        match &self.weight {
            Some(w) => w[class] as f64,
            None => 1.,
        }
    }

    /// Loss and gradient. A batch without any non-ignored pixel yields a zero
    /// loss and a zero gradient.
    pub fn forward(&self, logits: ArrayView4<f32>, targets: ArrayView3<i64>) -> Result<LossGrad> {
        let (n, k, h, w) = logits.dim();
        ensure!(
            targets.dim() == (n, h, w),
            "Target shape {:?} does not match logits shape {:?}",
            targets.shape(),
            logits.shape()
        );
        if let Some(weight) = &self.weight {
            ensure!(weight.len() == k, "Got {} class weights for {} classes", weight.len(), k);
        }

        let mut grad = Array4::<f32>::zeros(logits.raw_dim());
        let (loss_sum, weight_sum) = grad
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(logits.axis_iter(Axis(0)).into_par_iter())
            .zip(targets.axis_iter(Axis(0)).into_par_iter())
            .map(|((g, l), t)| self.sample_terms(l, t, g))
            .try_reduce(|| (0., 0.), |a, b| Ok((a.0 + b.0, a.1 + b.1)))?;

        if weight_sum <= 0. {
            log::debug!("CrossEntropyLoss2d: no labelled pixels in batch");
            grad.fill(0.);
            return Ok(LossGrad { loss: 0., grad });
        }

        let scale = (1. / weight_sum) as f32;
        grad.par_mapv_inplace(|v| v * scale);
        Ok(LossGrad {
            loss: (loss_sum / weight_sum) as f32,
            grad,
        })
    }

    /// Unnormalised loss and weight of one sample; writes `w_y * (softmax - onehot)` into `grad`.
    fn sample_terms(&self, logits: ArrayView3<f32>, target: ArrayView2<i64>, mut grad: ArrayViewMut3<f32>) -> Result<(f64, f64)> {
        let (k, h, w) = logits.dim();
        let mut loss = 0.;
        let mut weight_sum = 0.;

        for y in 0..h {
            for x in 0..w {
                let t = target[[y, x]];
                if t == self.ignore_index {
                    continue;
                }
                ensure!(t >= 0 && (t as usize) < k, "Target class {} is outside [0, {})", t, k);
                let t = t as usize;

                let col = logits.slice(s![.., y, x]);
                let max = col.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                let sum_exp: f32 = col.iter().map(|&v| (v - max).exp()).sum();
                let log_z = max + sum_exp.ln();

                let wt = self.class_weight(t);
                loss += wt * (log_z - col[t]) as f64;
                weight_sum += wt;

                for c in 0..k {
                    let p = (col[c] - log_z).exp();
                    let onehot = if c == t { 1. } else { 0. };
                    grad[[c, y, x]] = (wt as f32) * (p - onehot);
                }
            }
        }
        Ok((loss, weight_sum))
    }
}
