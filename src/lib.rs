mod utils;
pub mod common;
pub mod data;
pub mod losses;
pub mod metrics;
pub mod training;

use crate::common::TrainConfig;
use crate::losses::IcnetLoss;
use crate::training::{run_training, Adam, DataLoader, ExperimentContext, SegmentationModel, StepLr, TrainingReport};

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Opens the experiment described by `config`: checks it, takes the compute
/// context and writes the configuration to the experiment log.
pub fn init_experiment(config: TrainConfig) -> Result<ExperimentContext> {
    println!("===========\ninit_experiment\n===========");
    println!("{}", config.to_string());
    ExperimentContext::open(config)
}

/// Trains `model` with the ICNet loss, Adam and a step LR schedule built from
/// the context's config, validating before training and after every epoch.
///
/// `ctx` comes from [`init_experiment`]; attach a progress channel with
/// [`ExperimentContext::with_progress`] before calling.
pub fn run_experiment<M, L, V>(
    ctx: &ExperimentContext,
    model: &mut M,
    train_loader: &mut L,
    val_loader: &mut V,
) -> Result<TrainingReport>
where
    M: SegmentationModel + Send + ?Sized,
    L: DataLoader + Send + ?Sized,
    V: DataLoader + Send + ?Sized,
{
    let config = ctx.config();
    let criterion = IcnetLoss::from_config(config);
    let mut optimizer = Adam::from_config(config);
    let mut scheduler = StepLr::from_config(config);

    let report = run_training(ctx, model, &criterion, &mut optimizer, &mut scheduler, train_loader, val_loader)?;
    if let Some(best) = report.best_epoch() {
        log::info!(
            "Best epoch {} with mean IoU {:.4}",
            best.epoch,
            best.validation.scores.mean_iou
        );
    }
    Ok(report)
}
