use std::collections::BTreeMap;
use anyhow::{bail, ensure, Result};
use ndarray::{Array1, Array2, ArrayView, Axis, Dimension, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Summary metrics derived from a confusion histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub overall_acc: f64,
    pub mean_acc: f64,
    pub freq_weighted_acc: f64,
    pub mean_iou: f64,
}

impl Scores {
    /// Named metrics in report order.
    pub fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("Overall Acc", self.overall_acc),
            ("Mean Acc", self.mean_acc),
            ("FreqW Acc", self.freq_weighted_acc),
            ("Mean IoU", self.mean_iou),
        ]
    }
}

/// Square `n_class x n_class` count matrix, `hist[[true, pred]]`.
///
/// Zero at the start of an evaluation pass, accumulated batch by batch and
/// read once at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionHistogram {
    n_class: usize,
    hist: Array2<u64>,
}

impl ConfusionHistogram {
    pub fn new(n_class: usize) -> Self {
        Self {
            n_class,
            hist: Array2::zeros((n_class, n_class)),
        }
    }

    pub fn n_class(&self) -> usize {
        self.n_class
    }

    pub fn hist(&self) -> &Array2<u64> {
        &self.hist
    }

    pub fn total(&self) -> u64 {
        self.hist.sum()
    }

    /// Adds one truth/prediction pair of label maps.
    pub fn update<D: Dimension>(&mut self, label_true: ArrayView<i64, D>, label_pred: ArrayView<i64, D>) -> Result<()> {
        let hist = fast_hist(label_true, label_pred, self.n_class)?;
        self.hist += &hist;
        Ok(())
    }

    /// Summary metrics and per-class IoU.
    ///
    /// Classes without support produce NaN ratios; those are left out of the
    /// means instead of being counted as zero.
    pub fn scores(&self) -> (Scores, BTreeMap<usize, f64>) {
        let hist = self.hist.mapv(|v| v as f64);
        let diag: Array1<f64> = hist.diag().to_owned();
        let row_sum = hist.sum_axis(Axis(1));
        let col_sum = hist.sum_axis(Axis(0));
        let total = hist.sum();

        let overall_acc = diag.sum() / total;
        let acc_cls = &diag / &row_sum;
        let iu = &diag / &(&row_sum + &col_sum - &diag);
        let freq = &row_sum / total;

        let freq_weighted_acc = Zip::from(&freq)
            .and(&iu)
            .fold(0., |acc, &f, &i| if f > 0. { acc + f * i } else { acc });

        let scores = Scores {
            overall_acc,
            mean_acc: nan_mean(acc_cls.iter().copied()),
            freq_weighted_acc,
            mean_iou: nan_mean(iu.iter().copied()),
        };
        let cls_iu = iu.iter().copied().enumerate().collect::<BTreeMap<usize, f64>>();

        (scores, cls_iu)
    }
}

/// Mean of the non-NaN values; NaN when there are none.
pub fn nan_mean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0., 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Confusion counts of one label-map pair.
///
/// Pixels whose truth lies outside `[0, n_class)` are skipped. A retained
/// pixel with a prediction outside that range is an error.
pub fn fast_hist<D: Dimension>(label_true: ArrayView<i64, D>, label_pred: ArrayView<i64, D>, n_class: usize) -> Result<Array2<u64>> {
    ensure!(
        label_true.shape() == label_pred.shape(),
        "Label shape {:?} does not match prediction shape {:?}",
        label_true.shape(),
        label_pred.shape()
    );

    // bincount over n_class * true + pred
    let mut bins = vec![0u64; n_class * n_class];
    let mut bad_pred = None;
    Zip::from(&label_true).and(&label_pred).for_each(|&t, &p| {
        if t < 0 || t as usize >= n_class {
            return;
        }
        if p < 0 || p as usize >= n_class {
            if bad_pred.is_none() {
                bad_pred = Some(p);
            }
            return;
        }
        bins[n_class * t as usize + p as usize] += 1;
    });
    if let Some(p) = bad_pred {
        bail!("Predicted class {} is outside [0, {})", p, n_class);
    }

    Ok(Array2::from_shape_vec((n_class, n_class), bins)?)
}

/// Accuracy / IoU evaluation of a whole set of label-map pairs.
///
/// Returns the summary (overall accuracy, mean accuracy, frequency-weighted
/// accuracy, mean IoU) and the IoU of every class.
pub fn scores<D: Dimension>(
    label_trues: &[ArrayView<i64, D>],
    label_preds: &[ArrayView<i64, D>],
    n_class: usize,
) -> Result<(Scores, BTreeMap<usize, f64>)> {
    ensure!(n_class > 0, "n_class must be at least 1");
    ensure!(
        label_trues.len() == label_preds.len(),
        "Got {} label maps but {} prediction maps",
        label_trues.len(),
        label_preds.len()
    );

    let hist = label_trues
        .par_iter()
        .zip(label_preds.par_iter())
        .map(|(lt, lp)| fast_hist(lt.view(), lp.view(), n_class))
        .try_reduce(|| Array2::zeros((n_class, n_class)), |a, b| Ok(a + b))?;

    let histogram = ConfusionHistogram { n_class, hist };
    Ok(histogram.scores())
}
