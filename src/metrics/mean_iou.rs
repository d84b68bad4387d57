use anyhow::{ensure, Result};
use ndarray::{ArrayView, Dimension, Zip};
use rayon::prelude::*;

/// Seed value of every Mean-IoU accumulator.
pub const IOU_EPSILON: f64 = 1e-9;

/// Per-class pixel counts gathered over a set of label-map pairs.
#[derive(Debug, Clone)]
struct IouCounts {
    /// truth == i and prediction == i
    n_ii: Vec<f64>,
    /// truth == i
    t_i: Vec<f64>,
    /// prediction == i
    sum_n_ji: Vec<f64>,
}

impl IouCounts {
    fn zeros(num_classes: usize) -> Self {
        Self {
            n_ii: vec![0.; num_classes],
            t_i: vec![0.; num_classes],
            sum_n_ji: vec![0.; num_classes],
        }
    }

    fn count<D: Dimension>(prediction: ArrayView<i64, D>, gt: ArrayView<i64, D>, num_classes: usize) -> Self {
        let mut counts = Self::zeros(num_classes);
        let class_of = |v: i64| usize::try_from(v).ok().filter(|c| *c < num_classes);
        Zip::from(&prediction).and(&gt).for_each(|&p, &g| {
            let p = class_of(p);
            let g = class_of(g);
            if let Some(g) = g {
                counts.t_i[g] += 1.;
                if p == Some(g) {
                    counts.n_ii[g] += 1.;
                }
            }
            if let Some(p) = p {
                counts.sum_n_ji[p] += 1.;
            }
        });
        counts
    }

    fn merge(mut self, other: Self) -> Self {
        for i in 0..self.n_ii.len() {
            self.n_ii[i] += other.n_ii[i];
            self.t_i[i] += other.t_i[i];
            self.sum_n_ji[i] += other.sum_n_ji[i];
        }
        self
    }

    fn class_iu(&self, i: usize) -> f64 {
        let n_ii = IOU_EPSILON + self.n_ii[i];
        let t_i = IOU_EPSILON + self.t_i[i];
        let sum_n_ji = IOU_EPSILON + self.sum_n_ji[i];
        n_ii / (t_i + sum_n_ji - n_ii)
    }
}

/// Mean IoU over `num_classes` classes, pooled across all prediction/truth pairs.
///
/// Each accumulator starts at [`IOU_EPSILON`], so a class missing from both the
/// predictions and the truth scores `eps / eps = 1` and lifts the mean. Labels
/// outside `[0, num_classes)` (the ignore label included) never match a class.
pub fn calculate_mean_iu<D: Dimension>(
    predictions: &[ArrayView<i64, D>],
    gts: &[ArrayView<i64, D>],
    num_classes: usize,
) -> Result<f64> {
    ensure!(num_classes > 0, "num_classes must be at least 1");
    ensure!(
        predictions.len() == gts.len(),
        "Got {} prediction maps but {} ground-truth maps",
        predictions.len(),
        gts.len()
    );
    for (p, gt) in predictions.iter().zip(gts) {
        ensure!(
            p.shape() == gt.shape(),
            "Prediction shape {:?} does not match ground-truth shape {:?}",
            p.shape(),
            gt.shape()
        );
    }

    let counts = predictions
        .par_iter()
        .zip(gts.par_iter())
        .map(|(p, gt)| IouCounts::count(p.view(), gt.view(), num_classes))
        .reduce(|| IouCounts::zeros(num_classes), IouCounts::merge);

    let sum_iu: f64 = (0..num_classes).map(|i| counts.class_iu(i)).sum();
    Ok(sum_iu / num_classes as f64)
}
