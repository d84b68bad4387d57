use anyhow::{ensure, Result};
use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};

/// Number of heads every segmentation model emits.
pub const NUM_SCALES: usize = 4;

/// Label value excluded from losses and metrics.
pub const IGNORE_LABEL: i64 = -1;

/// One `(images, labels)` pair handed out by a data loader.
///
/// * `images` - `[N, C, H, W]`, normalized floats.
/// * `labels` - `[N, H, W]`, class ids in `[0, num_classes)` or [`IGNORE_LABEL`].
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Array3<i64>,
}

impl Batch {
    pub fn new(images: Array4<f32>, labels: Array3<i64>) -> Result<Self> {
        let batch = Self { images, labels };
        batch.validate()?;
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn images(&self) -> ArrayView4<'_, f32> {
        self.images.view()
    }

    pub fn labels(&self) -> ArrayView3<'_, i64> {
        self.labels.view()
    }

    /// Checks that images and labels agree on batch size and spatial size.
    pub fn validate(&self) -> Result<()> {
        let (n, _, h, w) = self.images.dim();
        let (ln, lh, lw) = self.labels.dim();
        ensure!(
            (n, h, w) == (ln, lh, lw),
            "Batch shape mismatch: images [{}, _, {}, {}] vs labels [{}, {}, {}]",
            n, h, w, ln, lh, lw
        );
        Ok(())
    }
}

/// Ordered logits of every model head, primary head first.
///
/// Each entry is `[N, num_classes, h_i, w_i]`. Also used to carry the
/// matching per-head gradients during the backward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiScaleOutput([Array4<f32>; NUM_SCALES]);

impl MultiScaleOutput {
    pub fn new(heads: [Array4<f32>; NUM_SCALES]) -> Self {
        Self(heads)
    }

    /// Builds the output from a vector, failing unless exactly [`NUM_SCALES`] heads are given.
    pub fn from_vec(heads: Vec<Array4<f32>>) -> Result<Self> {
        let n = heads.len();
        let heads: [Array4<f32>; NUM_SCALES] = heads.try_into().map_err(|_| {
            anyhow::anyhow!("Expected exactly {} model heads, got {}", NUM_SCALES, n)
        })?;
        Ok(Self(heads))
    }

    /// Same shapes as `self`, all zeros.
    pub fn zeros_like(&self) -> Self {
        Self(std::array::from_fn(|i| Array4::zeros(self.0[i].raw_dim())))
    }

    /// The full-resolution head used for predictions.
    pub fn primary(&self) -> &Array4<f32> {
        &self.0[0]
    }

    pub fn head(&self, i: usize) -> Option<&Array4<f32>> {
        self.0.get(i)
    }

    pub fn head_mut(&mut self, i: usize) -> Option<&mut Array4<f32>> {
        self.0.get_mut(i)
    }

    pub fn heads(&self) -> &[Array4<f32>; NUM_SCALES] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Array4<f32>> {
        self.0.iter()
    }

    pub fn into_heads(self) -> [Array4<f32>; NUM_SCALES] {
        self.0
    }
}

impl std::ops::Index<usize> for MultiScaleOutput {
    type Output = Array4<f32>;

    fn index(&self, i: usize) -> &Self::Output {
        &self.0[i]
    }
}
