use anyhow::Result;
use ndarray::{Array3, Array4, ArrayD, ArrayView4, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use crate::common::MultiScaleOutput;

/// A trainable tensor and its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub value: ArrayD<f32>,
    pub grad: ArrayD<f32>,
}

impl Param {
    pub fn new(name: &str, value: ArrayD<f32>) -> Self {
        let grad = ArrayD::zeros(value.raw_dim());
        Self {
            name: name.to_string(),
            value,
            grad,
        }
    }

    pub fn zeros(name: &str, shape: &[usize]) -> Self {
        Self::new(name, ArrayD::zeros(IxDyn(shape)))
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }
}

/// Train mode records what `backward` needs; eval mode records nothing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelMode {
    #[default] Train,
    Eval,
}

/// A segmentation network emitting [`NUM_SCALES`](crate::common::NUM_SCALES) heads of logits.
pub trait SegmentationModel {
    /// Runs the network on `[N, C, H, W]` images.
    fn forward(&mut self, images: ArrayView4<f32>) -> Result<MultiScaleOutput>;

    /// Accumulates parameter gradients from the per-head logit gradients of
    /// the last train-mode `forward`.
    fn backward(&mut self, grads: &MultiScaleOutput) -> Result<()>;

    fn params(&self) -> Vec<&Param>;

    fn params_mut(&mut self) -> Vec<&mut Param>;

    fn mode(&self) -> ModelMode;

    fn set_mode(&mut self, mode: ModelMode);

    fn train(&mut self) {
        self.set_mode(ModelMode::Train);
    }

    fn eval(&mut self) {
        self.set_mode(ModelMode::Eval);
    }

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }

    fn num_params(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }

    /// Size of the f32 parameters in MiB.
    fn model_size_mb(&self) -> f64 {
        self.num_params() as f64 * 4. / (1024. * 1024.)
    }

    /// Class map `[N, H, W]` from the primary head.
    fn predict(&mut self, images: ArrayView4<f32>) -> Result<Array3<i64>> {
        let outputs = self.forward(images)?;
        Ok(softmax_argmax(outputs.primary().view()))
    }
}

/// Softmax over the class axis of `[N, K, H, W]` logits.
pub fn softmax(logits: ArrayView4<f32>) -> Array4<f32> {
    let mut probs = logits.to_owned();
    for mut lane in probs.lanes_mut(Axis(1)) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    probs
}

/// Argmax over the class axis of the softmax; ties resolve to the lowest class id.
pub fn softmax_argmax(logits: ArrayView4<f32>) -> Array3<i64> {
    let probs = softmax(logits);
    let (n, _, h, w) = probs.dim();
    let mut predicted = Array3::<i64>::zeros((n, h, w));
    for ((b, y, x), out) in predicted.indexed_iter_mut() {
        let lane = probs.slice(ndarray::s![b, .., y, x]);
        let mut best = 0usize;
        for (c, &p) in lane.iter().enumerate() {
            if p > lane[best] {
                best = c;
            }
        }
        *out = best as i64;
    }
    predicted
}
