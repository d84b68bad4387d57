use anyhow::{ensure, Result};
use ndarray::{stack, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use crate::common::{Batch, TrainConfig};

/// A finite, restartable source of batches; one call to `batches` is one epoch.
pub trait DataLoader {
    /// Number of batches per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

/// Owned `(image [C, H, W], label [H, W])` samples served in fixed-size batches.
#[derive(Debug, Clone)]
pub struct InMemoryLoader {
    samples: Vec<(Array3<f32>, Array2<i64>)>,
    batch_size: usize,
    shuffle: Option<StdRng>,
    order: Vec<usize>,
}

impl InMemoryLoader {
    pub fn new(samples: Vec<(Array3<f32>, Array2<i64>)>, batch_size: usize) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size must be at least 1");
        if let Some((image, _)) = samples.first() {
            let (c, h, w) = image.dim();
            for (i, (x, y)) in samples.iter().enumerate() {
                ensure!(
                    x.dim() == (c, h, w) && y.dim() == (h, w),
                    "Sample {} has image {:?} / label {:?}, expected [{}, {}, {}] / [{}, {}]",
                    i, x.shape(), y.shape(), c, h, w, h, w
                );
            }
        }
        let order = (0..samples.len()).collect();
        Ok(Self {
            samples,
            batch_size,
            shuffle: None,
            order,
        })
    }

    /// Loader with the configured batch size. Samples must be `img_size`; a
    /// training loader reshuffles every epoch from `config.seed`.
    pub fn from_config(samples: Vec<(Array3<f32>, Array2<i64>)>, config: &TrainConfig, shuffle: bool) -> Result<Self> {
        let (h, w) = config.img_size;
        for (i, (image, _)) in samples.iter().enumerate() {
            let (_, ih, iw) = image.dim();
            ensure!(
                (ih, iw) == (h, w),
                "Sample {} is {}x{}, configured img_size is {}x{}",
                i, ih, iw, h, w
            );
        }
        let loader = Self::new(samples, config.batch_size)?;
        Ok(match shuffle {
            true => loader.with_shuffle(config.seed),
            false => loader,
        })
    }

    /// Splits `[N, C, H, W]` images and `[N, H, W]` labels into samples.
    pub fn from_arrays(images: Array4<f32>, labels: Array3<i64>, batch_size: usize) -> Result<Self> {
        let batch = Batch::new(images, labels)?;
        let samples = batch
            .images
            .axis_iter(Axis(0))
            .zip(batch.labels.axis_iter(Axis(0)))
            .map(|(x, y)| (x.to_owned(), y.to_owned()))
            .collect();
        Self::new(samples, batch_size)
    }

    /// Reshuffles the sample order at the start of every epoch.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = Some(StdRng::seed_from_u64(seed));
        self
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn collate(samples: &[(Array3<f32>, Array2<i64>)], idx: &[usize]) -> Result<Batch> {
        let images: Vec<ArrayView3<f32>> = idx.iter().map(|&i| samples[i].0.view()).collect();
        let labels: Vec<ArrayView2<i64>> = idx.iter().map(|&i| samples[i].1.view()).collect();
        Batch::new(stack(Axis(0), &images)?, stack(Axis(0), &labels)?)
    }
}

impl DataLoader for InMemoryLoader {
    fn len(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        if let Some(rng) = self.shuffle.as_mut() {
            self.order.shuffle(rng);
        }
        let order = self.order.clone();
        let samples = &self.samples;
        let batch_size = self.batch_size;
        let n = self.len();

        Box::new((0..n).map(move |i| {
            let start = i * batch_size;
            let end = (start + batch_size).min(order.len());
            Self::collate(samples, &order[start..end])
        }))
    }
}
