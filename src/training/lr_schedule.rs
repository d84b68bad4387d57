use crate::common::TrainConfig;
use crate::training::Optimizer;

/// Decays the learning rate by `gamma` every `step_size` epochs.
#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr: f32,
    step_size: usize,
    gamma: f32,
    last_epoch: usize,
}

impl StepLr {
    pub fn new(base_lr: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            last_epoch: 0,
        }
    }

    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(config.lr, config.num_epoch_lr_decay, config.lr_decay)
    }

    pub fn lr_at(&self, epoch: usize) -> f32 {
        self.base_lr * self.gamma.powi((epoch / self.step_size) as i32)
    }

    pub fn last_epoch(&self) -> usize {
        self.last_epoch
    }

    pub fn current_lr(&self) -> f32 {
        self.lr_at(self.last_epoch)
    }

    /// Closes an epoch and pushes the resulting rate into `optimizer`.
    pub fn step<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> f32 {
        self.last_epoch += 1;
        let lr = self.current_lr();
        optimizer.set_lr(lr);
        log::debug!("StepLr | epoch={} | lr={:e}", self.last_epoch, lr);
        lr
    }
}
