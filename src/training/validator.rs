use std::time::{Duration, Instant};
use anyhow::{ensure, Result};
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use crate::data::{colorize_mask, rmrf_mkdir, ClassIou, Palette};
use crate::metrics::{calculate_mean_iu, ConfusionHistogram, Scores};
use crate::training::{DataLoader, ExperimentContext, SegmentationModel};

/// Outcome of one validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// `None` for the pass run before the first epoch.
    pub epoch: Option<usize>,
    pub batches: usize,
    /// Per-batch Mean-IoU averaged over the batches.
    pub mean_iu: f64,
    /// Whole-pass histogram metrics.
    pub scores: Scores,
    pub class_iou: Vec<ClassIou>,
    pub elapsed: Duration,
}

impl ValidationReport {
    pub fn epoch_label(&self) -> String {
        epoch_label(self.epoch)
    }

    pub fn summary_text(&self) -> String {
        let mut text = format!("[epoch {}] validation over {} batches\n", self.epoch_label(), self.batches);
        for c in &self.class_iou {
            text += &format!("{}: {:.2}%\n", c.label, c.percent());
        }
        text += &format!("Mean IU (batch avg): {:.4}\n", self.mean_iu);
        for (name, value) in self.scores.named() {
            text += &format!("{}: {:.4}\n", name, value);
        }
        text
    }
}

pub(crate) fn epoch_label(epoch: Option<usize>) -> String {
    match epoch {
        Some(e) => e.to_string(),
        None => "init".to_string(),
    }
}

/// Runs the model in eval mode over `loader`, scoring the primary-head
/// predictions. The model is back in train mode when this returns, error or not.
pub fn validate<M, L>(ctx: &ExperimentContext, model: &mut M, loader: &mut L, epoch: Option<usize>) -> Result<ValidationReport>
where
    M: SegmentationModel + ?Sized,
    L: DataLoader + ?Sized,
{
    model.eval();
    let report = validate_inner(ctx, model, loader, epoch);
    model.train();
    let report = report?;

    for line in report.summary_text().lines() {
        println!("{}", line);
        log::info!("{}", line);
    }
    ctx.log_line(&format!("{}\n", report.summary_text()))?;
    Ok(report)
}

fn validate_inner<M, L>(ctx: &ExperimentContext, model: &mut M, loader: &mut L, epoch: Option<usize>) -> Result<ValidationReport>
where
    M: SegmentationModel + ?Sized,
    L: DataLoader + ?Sized,
{
    let start = Instant::now();
    let config = ctx.config();
    let num_classes = config.num_classes;

    let mut histogram = ConfusionHistogram::new(num_classes);
    let mut sum_mean_iu = 0.;
    let mut batches = 0usize;

    for batch in loader.batches() {
        let batch = batch?;
        batch.validate()?;

        let predicted = model.predict(batch.images())?;
        ensure!(
            predicted.dim() == batch.labels.dim(),
            "Prediction shape {:?} does not match label shape {:?}",
            predicted.shape(),
            batch.labels.shape()
        );

        sum_mean_iu += calculate_mean_iu(&[predicted.view()], &[batch.labels()], num_classes)?;
        histogram.update(batch.labels(), predicted.view())?;

        if config.save_visuals && batches == 0 {
            save_predictions(ctx, &predicted, epoch)?;
        }
        batches += 1;
    }
    ensure!(batches > 0, "Validation loader produced no batches");

    let (scores, cls_iu) = histogram.scores();
    let class_iou = cls_iu
        .into_iter()
        .map(|(id, iou)| ClassIou::new(id, config.class_name(id), iou))
        .collect();

    Ok(ValidationReport {
        epoch,
        batches,
        mean_iu: sum_mean_iu / batches as f64,
        scores,
        class_iou,
        elapsed: start.elapsed(),
    })
}

/// Writes colourised predicted masks as `<exp_dir>/epoch_<e>/<n>.png`.
fn save_predictions(ctx: &ExperimentContext, predicted: &Array3<i64>, epoch: Option<usize>) -> Result<()> {
    let dir = ctx.exp_dir().join(format!("epoch_{}", epoch_label(epoch)));
    rmrf_mkdir(&dir)?;
    let palette = Palette::default();
    for (n, mask) in predicted.axis_iter(Axis(0)).enumerate() {
        colorize_mask(mask, &palette).save(dir.join(format!("{}.png", n)))?;
    }
    log::debug!("Saved {} predicted masks to {}", predicted.len_of(Axis(0)), dir.display());
    Ok(())
}
