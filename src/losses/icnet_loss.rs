use anyhow::{ensure, Result};
use ndarray::{Array3, ArrayView3};
use crate::common::{MultiScaleOutput, TrainConfig, IGNORE_LABEL, NUM_SCALES};
use crate::losses::CrossEntropyLoss2d;

/// Weighted total over the model heads, with the per-head parts.
#[derive(Debug, Clone)]
pub struct IcnetLossOutput {
    pub total: f32,
    pub head_losses: [f32; NUM_SCALES],
    /// Gradient of `total` w.r.t. every head's logits.
    pub grads: MultiScaleOutput,
}

/// Combines the four ICNet heads into one training loss.
///
/// Each weighted head is scored with [`CrossEntropyLoss2d`] against the label
/// map resized (nearest) to that head's resolution. The default weights skip
/// the primary head and train the 1/4 scale head with the 1/8 and 1/16
/// heads as auxiliaries.
#[derive(Debug, Clone)]
pub struct IcnetLoss {
    num_classes: usize,
    weights: [f32; NUM_SCALES],
    criterion: CrossEntropyLoss2d,
}

impl IcnetLoss {
    pub const DEFAULT_WEIGHTS: [f32; NUM_SCALES] = [0.0, 1.0, 0.4, 0.4];

    pub fn new(num_classes: usize, ignore_index: i64) -> Self {
        Self {
            num_classes,
            weights: Self::DEFAULT_WEIGHTS,
            criterion: CrossEntropyLoss2d::new(ignore_index),
        }
    }

    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(config.num_classes, config.ignore_index).with_weights(config.loss_weights)
    }

    pub fn with_weights(mut self, weights: [f32; NUM_SCALES]) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_class_weight(mut self, weight: &[f32]) -> Self {
        self.criterion = self.criterion.with_weight(weight);
        self
    }

    pub fn weights(&self) -> &[f32; NUM_SCALES] {
        &self.weights
    }

    pub fn forward(&self, outputs: &MultiScaleOutput, labels: ArrayView3<i64>) -> Result<IcnetLossOutput> {
        let mut total = 0.;
        let mut head_losses = [0.; NUM_SCALES];
        let mut grads = outputs.zeros_like();

        for (i, head) in outputs.iter().enumerate() {
            let (n, k, h, w) = head.dim();
            ensure!(
                k == self.num_classes,
                "Head {} emits {} classes, expected {}",
                i, k, self.num_classes
            );
            ensure!(
                n == labels.len_of(ndarray::Axis(0)),
                "Head {} batch size {} does not match label batch size {}",
                i, n, labels.len_of(ndarray::Axis(0))
            );

            let weight = self.weights[i];
            if weight == 0. {
                continue;
            }

            let target = resize_labels_nearest(labels, h, w);
            let out = self.criterion.forward(head.view(), target.view())?;
            head_losses[i] = out.loss;
            total += weight * out.loss;
            if let Some(g) = grads.head_mut(i) {
                *g = out.grad * weight;
            }
        }

        log::trace!("IcnetLoss | total={:.5} | heads={:?}", total, head_losses);

        Ok(IcnetLossOutput {
            total,
            head_losses,
            grads,
        })
    }
}

/// Nearest-neighbour resize of `[N, H, W]` label maps to `[N, out_h, out_w]`,
/// sampling `src = floor(dst * in / out)`.
pub fn resize_labels_nearest(labels: ArrayView3<i64>, out_h: usize, out_w: usize) -> Array3<i64> {
    let (n, h, w) = labels.dim();
    if (h, w) == (out_h, out_w) {
        return labels.to_owned();
    }
    if h == 0 || w == 0 {
        return Array3::from_elem((n, out_h, out_w), IGNORE_LABEL);
    }
    Array3::from_shape_fn((n, out_h, out_w), |(b, y, x)| {
        let sy = (y * h / out_h).min(h - 1);
        let sx = (x * w / out_w).min(w - 1);
        labels[[b, sy, sx]]
    })
}
