use anyhow::{ensure, Result};
use ndarray::{ArrayD, Zip};
use crate::common::TrainConfig;
use crate::training::Param;

pub trait Optimizer {
    /// Applies one update from the gradients currently stored in `params`.
    fn step(&mut self, params: Vec<&mut Param>) -> Result<()>;

    fn lr(&self) -> f32;

    fn set_lr(&mut self, lr: f32);
}

#[derive(Debug, Clone)]
struct AdamState {
    m: ArrayD<f32>,
    v: ArrayD<f32>,
}

/// Adam with L2 weight decay added to the gradient.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    betas: (f32, f32),
    eps: f32,
    weight_decay: f32,
    step: i32,
    state: Vec<AdamState>,
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-8,
            weight_decay: 0.,
            step: 0,
            state: vec![],
        }
    }
}

#[allow(dead_code)]
impl Adam {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            ..Default::default()
        }
    }

    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(config.lr)
            .with_weight_decay(config.weight_decay)
            .with_betas(config.betas.0, config.betas.1)
            .with_eps(config.adam_eps)
    }

    pub fn with_weight_decay(mut self, x: f32) -> Self {
        self.weight_decay = x;
        self
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.betas = (beta1, beta2);
        self
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn steps(&self) -> i32 {
        self.step
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: Vec<&mut Param>) -> Result<()> {
        if self.state.is_empty() {
            self.state = params
                .iter()
                .map(|p| AdamState {
                    m: ArrayD::zeros(p.value.raw_dim()),
                    v: ArrayD::zeros(p.value.raw_dim()),
                })
                .collect();
        }
        ensure!(
            self.state.len() == params.len(),
            "Adam was set up for {} parameters, got {}",
            self.state.len(),
            params.len()
        );

        for (p, state) in params.iter().zip(&self.state) {
            ensure!(
                p.value.shape() == state.m.shape(),
                "Parameter {} changed shape from {:?} to {:?}",
                p.name, state.m.shape(), p.value.shape()
            );
        }

        self.step += 1;
        let (beta1, beta2) = self.betas;
        let bias_correction1 = 1. - beta1.powi(self.step);
        let bias_correction2_sqrt = (1. - beta2.powi(self.step)).sqrt();
        let step_size = self.lr / bias_correction1;
        let (eps, weight_decay) = (self.eps, self.weight_decay);

        for (p, state) in params.into_iter().zip(self.state.iter_mut()) {
            Zip::from(&mut p.value)
                .and(&p.grad)
                .and(&mut state.m)
                .and(&mut state.v)
                .par_for_each(|theta, &g, m, v| {
                    let g = g + weight_decay * *theta;
                    *m = beta1 * *m + (1. - beta1) * g;
                    *v = beta2 * *v + (1. - beta2) * g * g;
                    let denom = v.sqrt() / bias_correction2_sqrt + eps;
                    *theta -= step_size * *m / denom;
                });
        }
        Ok(())
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Sets the optimizer to `lr` decayed by `decay` every `n_epochs` epochs and returns the new rate.
pub fn adjust_learning_rate<O: Optimizer + ?Sized>(lr: f32, decay: f32, optimizer: &mut O, cur_epoch: usize, n_epochs: usize) -> f32 {
    let new_lr = lr * decay.powi((cur_epoch / n_epochs.max(1)) as i32);
    optimizer.set_lr(new_lr);
    new_lr
}
