use std::time::{Duration, Instant};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use crate::common::NUM_SCALES;
use crate::data::Timer;
use crate::losses::IcnetLoss;
use crate::training::{validate, DataLoader, ExperimentContext, Optimizer, SegmentationModel, StepLr, ValidationReport};
use crate::utils;

/// Training statistics of one epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub batches: usize,
    /// Mean of the aggregated loss over the batches.
    pub mean_loss: f32,
    pub mean_head_losses: [f32; NUM_SCALES],
    /// Learning rate the epoch ran with.
    pub lr: f32,
    pub elapsed: Duration,
}

/// One epoch of training followed by its validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train: EpochStats,
    pub validation: ValidationReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Validation before any training.
    pub initial: ValidationReport,
    pub epochs: Vec<EpochSummary>,
}

impl TrainingReport {
    /// Epoch with the highest histogram mean IoU.
    pub fn best_epoch(&self) -> Option<&EpochSummary> {
        self.epochs
            .iter()
            .filter(|e| !e.validation.scores.mean_iou.is_nan())
            .max_by(|a, b| {
                a.validation.scores.mean_iou
                    .partial_cmp(&b.validation.scores.mean_iou)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// One pass over `loader`: zero gradients, forward, aggregate loss, backward, optimizer step.
pub fn train_epoch<M, O, L>(
    model: &mut M,
    criterion: &IcnetLoss,
    optimizer: &mut O,
    loader: &mut L,
    epoch: usize,
    verbose: bool,
) -> Result<EpochStats>
where
    M: SegmentationModel + ?Sized,
    O: Optimizer + ?Sized,
    L: DataLoader + ?Sized,
{
    model.train();
    let start = Instant::now();
    let lr = optimizer.lr();

    let mut batches = 0usize;
    let mut loss_sum = 0.;
    let mut head_sums = [0.; NUM_SCALES];

    for batch in loader.batches() {
        let batch_start = Instant::now();
        let mut elapsed = batch_start.elapsed();
        let batch = batch?;
        batch.validate()?;

        model.zero_grad();
        let outputs = model.forward(batch.images())?;
        elapsed = utils::trace(verbose, "TRAIN", "Forward", batch_start, elapsed);

        let loss = criterion.forward(&outputs, batch.labels())?;
        elapsed = utils::trace(verbose, "TRAIN", "Loss", batch_start, elapsed);

        model.backward(&loss.grads)?;
        elapsed = utils::trace(verbose, "TRAIN", "Backward", batch_start, elapsed);

        optimizer.step(model.params_mut())?;
        utils::trace(verbose, "TRAIN", "Optimizer step", batch_start, elapsed);

        loss_sum += loss.total;
        for (sum, l) in head_sums.iter_mut().zip(loss.head_losses) {
            *sum += l;
        }
        batches += 1;
        log::debug!("[epoch {}] batch {} loss={:.5}", epoch, batches, loss.total);
    }
    ensure!(batches > 0, "Training loader produced no batches");

    let n = batches as f32;
    Ok(EpochStats {
        epoch,
        batches,
        mean_loss: loss_sum / n,
        mean_head_losses: head_sums.map(|s| s / n),
        lr,
        elapsed: start.elapsed(),
    })
}

/// Full run: an initial validation, then `max_epoch` rounds of train, LR
/// schedule step and validation. Any error aborts the run.
pub fn run_training<M, O, L, V>(
    ctx: &ExperimentContext,
    model: &mut M,
    criterion: &IcnetLoss,
    optimizer: &mut O,
    scheduler: &mut StepLr,
    train_loader: &mut L,
    val_loader: &mut V,
) -> Result<TrainingReport>
where
    M: SegmentationModel + Send + ?Sized,
    O: Optimizer + Send + ?Sized,
    L: DataLoader + Send + ?Sized,
    V: DataLoader + Send + ?Sized,
{
    ctx.device().install(|| {
        let max_epoch = ctx.config().max_epoch;
        log::info!(
            "Training '{}' for {} epochs, {} parameters ({:.2} MiB)",
            ctx.config().exp_name,
            max_epoch,
            model.num_params(),
            model.model_size_mb()
        );

        let mut train_timer = Timer::new();
        let mut val_timer = Timer::new();

        let initial = validate(ctx, model, val_loader, None)?;
        let mut epochs = Vec::with_capacity(max_epoch);

        for epoch in 0..max_epoch {
            train_timer.tic();
            let train = train_epoch(model, criterion, optimizer, train_loader, epoch, false)?;
            train_timer.toc(false);
            println!("training time of one epoch: {:.2}s", train_timer.diff().as_secs_f64());
            log::info!("[epoch {}] loss={:.5} lr={:e}", epoch, train.mean_loss, train.lr);

            scheduler.step(optimizer);

            val_timer.tic();
            let validation = validate(ctx, model, val_loader, Some(epoch))?;
            val_timer.toc(false);
            println!("val time of one epoch: {:.2}s", val_timer.diff().as_secs_f64());

            let summary = EpochSummary {
                epoch,
                train,
                validation,
            };
            ctx.send_summary(&summary);
            epochs.push(summary);
        }

        Ok(TrainingReport { initial, epochs })
    })
}
