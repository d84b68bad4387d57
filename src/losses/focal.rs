//! Sigmoid focal loss with a hand-derived gradient.
//!
//! The backward pass is computed in closed form from values saved by the
//! forward pass instead of differentiating through the sigmoid/log chain.

use anyhow::{bail, ensure, Result};
use ndarray::{Array, ArrayView, Dimension, Zip};
use num_traits::Float;
use crate::common::{Reduction, TrainConfig};

pub fn sigmoid<F: Float>(x: F) -> F {
    if x >= F::zero() {
        F::one() / (F::one() + (-x).exp())
    } else {
        let e = x.exp();
        e / (F::one() + e)
    }
}

/// `log(sigmoid(x))`, split on the sign of `x` so `exp` never overflows.
pub fn log_sigmoid<F: Float>(x: F) -> F {
    if x >= F::zero() {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// `log(1 - sigmoid(x))`, split on the sign of `x` so `exp` never overflows.
pub fn log_one_minus_sigmoid<F: Float>(x: F) -> F {
    if x >= F::zero() {
        -x - (-x).exp().ln_1p()
    } else {
        -x.exp().ln_1p()
    }
}

/// Values the forward pass keeps for [`focal_backward`].
#[derive(Debug, Clone)]
pub struct FocalContext<F, D: Dimension> {
    coeff: Array<F, D>,
    probs: Array<F, D>,
    ce: Array<F, D>,
    label: Array<F, D>,
    alpha: F,
    gamma: F,
}

impl<F, D: Dimension> FocalContext<F, D> {
    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn probs(&self) -> &Array<F, D> {
        &self.probs
    }
}

/// Elementwise focal loss.
///
/// `coeff = -|label - p|^gamma`, `ce = alpha * label * log(p) + (1 - alpha) * (1 - label) * log(1 - p)`,
/// `loss = ce * coeff` with `p = sigmoid(logits)`.
pub fn focal_forward<F, D>(
    logits: ArrayView<F, D>,
    label: ArrayView<F, D>,
    alpha: F,
    gamma: F,
) -> Result<(Array<F, D>, FocalContext<F, D>)>
where
    F: Float + Send + Sync,
    D: Dimension,
{
    ensure!(
        logits.shape() == label.shape(),
        "Logits shape {:?} does not match label shape {:?}",
        logits.shape(),
        label.shape()
    );

    let one = F::one();
    let probs = logits.mapv(sigmoid);
    let coeff = Zip::from(&label)
        .and(&probs)
        .par_map_collect(|&y, &p| -(y - p).abs().powf(gamma));
    let ce = Zip::from(&logits)
        .and(&label)
        .par_map_collect(|&x, &y| {
            log_sigmoid(x) * y * alpha + log_one_minus_sigmoid(x) * (one - y) * (one - alpha)
        });
    let loss = Zip::from(&ce).and(&coeff).par_map_collect(|&ce, &coeff| ce * coeff);

    let ctx = FocalContext {
        coeff,
        probs,
        ce,
        label: label.to_owned(),
        alpha,
        gamma,
    };
    Ok((loss, ctx))
}

/// Gradient of [`focal_forward`] w.r.t. the logits, scaled by `grad_output`.
pub fn focal_backward<F, D>(ctx: &FocalContext<F, D>, grad_output: ArrayView<F, D>) -> Result<Array<F, D>>
where
    F: Float + Send + Sync,
    D: Dimension,
{
    ensure!(
        grad_output.shape() == ctx.probs.shape(),
        "Gradient shape {:?} does not match loss shape {:?}",
        grad_output.shape(),
        ctx.probs.shape()
    );

    let one = F::one();
    let two = one + one;
    let (alpha, gamma) = (ctx.alpha, ctx.gamma);

    let grads = Zip::from(&grad_output)
        .and(&ctx.label)
        .and(&ctx.probs)
        .and(&ctx.ce)
        .and(&ctx.coeff)
        .par_map_collect(|&g, &y, &p, &ce, &coeff| {
            let mut d_coeff = (y - p).abs().powf(gamma - one) * gamma * p * (one - p);
            if y < p {
                d_coeff = -d_coeff;
            }
            let term1 = d_coeff * ce;

            let d_ce = y * alpha - p * (two * alpha * y + one - y - alpha);
            let term2 = d_ce * coeff;

            (term1 + term2) * g
        });
    Ok(grads)
}

/// A loss folded according to its [`Reduction`].
#[derive(Debug, Clone, PartialEq)]
pub enum LossValue<F, D: Dimension> {
    Scalar(F),
    Elementwise(Array<F, D>),
}

impl<F: Copy, D: Dimension> LossValue<F, D> {
    pub fn scalar(&self) -> Option<F> {
        match self {
            LossValue::Scalar(x) => Some(*x),
            LossValue::Elementwise(_) => None,
        }
    }

    pub fn elementwise(&self) -> Option<&Array<F, D>> {
        match self {
            LossValue::Scalar(_) => None,
            LossValue::Elementwise(x) => Some(x),
        }
    }
}

/// Focal loss over sigmoid logits against binary labels, used like a
/// binary cross-entropy with logits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocalLoss<F> {
    pub alpha: F,
    pub gamma: F,
    pub reduction: Reduction,
}

impl<F: Float> Default for FocalLoss<F> {
    fn default() -> Self {
        Self {
            alpha: F::from(0.25).unwrap_or_else(F::zero),
            gamma: F::from(2.0).unwrap_or_else(F::one),
            reduction: Reduction::Mean,
        }
    }
}

impl FocalLoss<f32> {
    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(config.focal_alpha, config.focal_gamma, config.focal_reduction)
    }
}

impl<F: Float + Send + Sync> FocalLoss<F> {
    pub fn new(alpha: F, gamma: F, reduction: Reduction) -> Self {
        Self {
            alpha,
            gamma,
            reduction,
        }
    }

    pub fn forward<D: Dimension>(
        &self,
        logits: ArrayView<F, D>,
        label: ArrayView<F, D>,
    ) -> Result<(LossValue<F, D>, FocalContext<F, D>)> {
        let (loss, ctx) = focal_forward(logits, label, self.alpha, self.gamma)?;
        let value = match self.reduction {
            Reduction::Mean => LossValue::Scalar(loss.sum() / Self::count(loss.len())?),
            Reduction::Sum => LossValue::Scalar(loss.sum()),
            Reduction::None => LossValue::Elementwise(loss),
        };
        Ok((value, ctx))
    }

    /// Expands the upstream gradient of the reduced loss to every element and
    /// applies [`focal_backward`].
    pub fn backward<D: Dimension>(&self, ctx: &FocalContext<F, D>, grad_output: &LossValue<F, D>) -> Result<Array<F, D>> {
        let grad = match (self.reduction, grad_output) {
            (Reduction::Mean, LossValue::Scalar(g)) => {
                Array::from_elem(ctx.probs.raw_dim(), *g / Self::count(ctx.len())?)
            }
            (Reduction::Sum, LossValue::Scalar(g)) => Array::from_elem(ctx.probs.raw_dim(), *g),
            (Reduction::None, LossValue::Elementwise(g)) => g.clone(),
            (reduction, _) => bail!(
                "Upstream gradient does not match the '{}' reduction",
                reduction.str_lowercase()
            ),
        };
        focal_backward(ctx, grad.view())
    }

    fn count(n: usize) -> Result<F> {
        F::from(n).ok_or_else(|| anyhow::anyhow!("Element count {} is not representable", n))
    }
}
