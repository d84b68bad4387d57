//! Per-pixel linear classifier with ICNet-shaped outputs.
//!
//! A 1x1 projection from input channels to class logits, emitted at strides
//! 1, 2, 4 and 8 (average pooled). Small enough to drive the training and
//! validation loops end to end.

use anyhow::{bail, ensure, Result};
use ndarray::{s, Array1, Array2, Array4, ArrayView4, Axis, Ix1, Ix2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::common::{MultiScaleOutput, TrainConfig, NUM_SCALES};
use crate::training::{ModelMode, Param, SegmentationModel};

pub const HEAD_STRIDES: [usize; NUM_SCALES] = [1, 2, 4, 8];

#[derive(Debug, Clone)]
pub struct PixelLinear {
    in_channels: usize,
    num_classes: usize,
    weight: Param,
    bias: Param,
    mode: ModelMode,
    cached_input: Option<Array4<f32>>,
}

impl PixelLinear {
    /// Kaiming-uniform weights, zero bias.
    pub fn new(in_channels: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = (6. / in_channels.max(1) as f32).sqrt();
        let weight = Array2::from_shape_fn((num_classes, in_channels), |_| rng.gen_range(-bound..bound));

        Self {
            in_channels,
            num_classes,
            weight: Param::new("classifier.weight", weight.into_dyn()),
            bias: Param::zeros("classifier.bias", &[num_classes]),
            mode: ModelMode::Train,
            cached_input: None,
        }
    }

    /// Sized for `config.num_classes`, initialised from `config.seed`.
    pub fn from_config(in_channels: usize, config: &TrainConfig) -> Self {
        Self::new(in_channels, config.num_classes, config.seed)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Full resolution logits `[N, K, H, W]`.
    fn project(&self, images: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (n, _, h, w) = images.dim();
        let weight = self.weight.value.view().into_dimensionality::<Ix2>()?;
        let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;

        let mut logits = Array4::<f32>::zeros((n, self.num_classes, h, w));
        for (b, image) in images.axis_iter(Axis(0)).enumerate() {
            let x = image.to_shape((self.in_channels, h * w))?;
            let z = weight.dot(&x) + &bias.insert_axis(Axis(1));
            let z = z.into_shape_with_order((self.num_classes, h, w))?;
            logits.slice_mut(s![b, .., .., ..]).assign(&z);
        }
        Ok(logits)
    }
}

/// `[start, end)` covered by output cell `o` of a stride `stride` pooling over `len` inputs.
fn window(o: usize, stride: usize, len: usize) -> (usize, usize) {
    let start = o * stride;
    (start, (start + stride).min(len))
}

fn pooled_len(len: usize, stride: usize) -> usize {
    (len / stride).max(1)
}

fn avg_pool(x: &Array4<f32>, stride: usize) -> Array4<f32> {
    if stride == 1 {
        return x.clone();
    }
    let (n, k, h, w) = x.dim();
    let (oh, ow) = (pooled_len(h, stride), pooled_len(w, stride));
    Array4::from_shape_fn((n, k, oh, ow), |(b, c, oy, ox)| {
        let (y0, y1) = window(oy, stride, h);
        let (x0, x1) = window(ox, stride, w);
        let cell = x.slice(s![b, c, y0..y1, x0..x1]);
        cell.sum() / cell.len() as f32
    })
}

/// Adds the gradient of [`avg_pool`] for `grad` into `full`.
fn avg_unpool_into(full: &mut Array4<f32>, grad: &Array4<f32>, stride: usize) {
    if stride == 1 {
        *full += grad;
        return;
    }
    let (_, _, h, w) = full.dim();
    for ((b, c, oy, ox), &g) in grad.indexed_iter() {
        let (y0, y1) = window(oy, stride, h);
        let (x0, x1) = window(ox, stride, w);
        let mut cell = full.slice_mut(s![b, c, y0..y1, x0..x1]);
        let share = g / cell.len() as f32;
        cell += share;
    }
}

impl SegmentationModel for PixelLinear {
    fn forward(&mut self, images: ArrayView4<f32>) -> Result<MultiScaleOutput> {
        let (_, c, h, w) = images.dim();
        ensure!(
            c == self.in_channels,
            "PixelLinear expects {} input channels, got {}",
            self.in_channels, c
        );
        ensure!(h > 0 && w > 0, "Empty image of size {}x{}", h, w);

        let full = self.project(images)?;
        let heads = HEAD_STRIDES.map(|stride| avg_pool(&full, stride));

        self.cached_input = match self.mode {
            ModelMode::Train => Some(images.to_owned()),
            ModelMode::Eval => None,
        };
        Ok(MultiScaleOutput::new(heads))
    }

    fn backward(&mut self, grads: &MultiScaleOutput) -> Result<()> {
        let input = match self.cached_input.take() {
            Some(x) => x,
            None => bail!("backward called without a train-mode forward pass"),
        };
        let (n, _, h, w) = input.dim();

        let mut full_grad = Array4::<f32>::zeros((n, self.num_classes, h, w));
        for (i, (grad, stride)) in grads.iter().zip(HEAD_STRIDES).enumerate() {
            let expected = (n, self.num_classes, pooled_len(h, stride), pooled_len(w, stride));
            ensure!(
                grad.dim() == expected,
                "Gradient of head {} has shape {:?}, expected {:?}",
                i, grad.shape(), expected
            );
            avg_unpool_into(&mut full_grad, grad, stride);
        }

        let mut d_weight = Array2::<f32>::zeros((self.num_classes, self.in_channels));
        let mut d_bias = Array1::<f32>::zeros(self.num_classes);
        for (g, x) in full_grad.axis_iter(Axis(0)).zip(input.axis_iter(Axis(0))) {
            let g = g.to_shape((self.num_classes, h * w))?;
            let x = x.to_shape((self.in_channels, h * w))?;
            d_weight += &g.dot(&x.t());
            d_bias += &g.sum_axis(Axis(1));
        }

        self.weight.grad += &d_weight.into_dyn();
        self.bias.grad += &d_bias.into_dyn();
        Ok(())
    }

    fn params(&self) -> Vec<&Param> {
        vec![&self.weight, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn mode(&self) -> ModelMode {
        self.mode
    }

    fn set_mode(&mut self, mode: ModelMode) {
        if mode == ModelMode::Eval {
            self.cached_input = None;
        }
        self.mode = mode;
    }
}
