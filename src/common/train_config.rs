use std::path::{Path, PathBuf};
use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use crate::common::{ComputeDevice, Reduction, NUM_SCALES, IGNORE_LABEL};

/// Hyperparameters and experiment paths for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub exp_name: String,
    pub exp_path: PathBuf,
    pub exp_log_path: PathBuf,

    pub lr: f32,
    pub weight_decay: f32,
    pub betas: (f32, f32),
    pub adam_eps: f32,
    pub lr_decay: f32,
    pub num_epoch_lr_decay: usize,
    pub max_epoch: usize,
    pub batch_size: usize,
    pub img_size: (usize, usize),

    pub num_classes: usize,
    pub class_names: Option<Vec<String>>,
    pub ignore_index: i64,
    pub loss_weights: [f32; NUM_SCALES],

    // focal loss
    pub focal_alpha: f32,
    pub focal_gamma: f32,
    pub focal_reduction: Reduction,

    pub gpu_ids: Vec<usize>,
    pub num_threads: usize,
    pub seed: u64,
    pub save_visuals: bool,

    /// Raw text of the file this config was read from, if any.
    #[serde(skip)]
    pub source_text: Option<String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            exp_name: "icnet".to_string(),
            exp_path: PathBuf::from("./exp"),
            exp_log_path: PathBuf::from("./logs"),

            lr: 1e-4,
            weight_decay: 1e-4,
            betas: (0.9, 0.999),
            adam_eps: 1e-8,
            lr_decay: 0.995,
            num_epoch_lr_decay: 1,
            max_epoch: 10,
            batch_size: 4,
            img_size: (224, 448),

            num_classes: 5,
            class_names: None,
            ignore_index: IGNORE_LABEL,
            loss_weights: [0.0, 1.0, 0.4, 0.4],

            focal_alpha: 0.25,
            focal_gamma: 2.0,
            focal_reduction: Reduction::Mean,

            gpu_ids: vec![],
            num_threads: 0,
            seed: 0,
            save_visuals: false,

            source_text: None,
        }
    }
}

#[allow(dead_code)]
impl TrainConfig {
    pub fn new() -> Self {
        Default::default()
    }

    /// Reads a JSON config file, keeping the raw text for the experiment log.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: TrainConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.source_text = Some(text);
        config.validate()?;
        Ok(config)
    }

    /// Text appended to the experiment log when a run starts.
    pub fn log_text(&self) -> Result<String> {
        match &self.source_text {
            Some(text) => Ok(text.clone()),
            None => Ok(serde_json::to_string_pretty(self)?),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.exp_name.is_empty(), "Experiment name must not be empty");
        ensure!(self.num_classes > 0, "num_classes must be at least 1");
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(
            self.img_size.0 > 0 && self.img_size.1 > 0,
            "img_size must be non-empty, got {}x{}", self.img_size.0, self.img_size.1
        );
        ensure!(self.lr > 0.0 && self.lr.is_finite(), "Learning rate must be positive, got {}", self.lr);
        ensure!(self.weight_decay >= 0.0, "weight_decay must not be negative, got {}", self.weight_decay);
        ensure!(self.num_epoch_lr_decay > 0, "num_epoch_lr_decay must be at least 1");
        ensure!(self.lr_decay > 0.0, "lr_decay must be positive, got {}", self.lr_decay);
        ensure!(
            self.focal_alpha.is_finite() && self.focal_gamma.is_finite(),
            "Focal loss parameters must be finite (alpha={}, gamma={})",
            self.focal_alpha, self.focal_gamma
        );
        ensure!(
            self.loss_weights.iter().all(|w| w.is_finite() && *w >= 0.0),
            "Loss weights must be finite and non-negative: {:?}", self.loss_weights
        );
        if let Some(names) = &self.class_names {
            if names.len() != self.num_classes {
                bail!(
                    "The number of class names: {} and num_classes: {} do not match.",
                    names.len(),
                    self.num_classes,
                );
            }
        }
        Ok(())
    }

    pub fn device(&self) -> ComputeDevice {
        ComputeDevice::from_gpu_ids(&self.gpu_ids)
    }

    /// Name of class `id`, falling back to its index.
    pub fn class_name(&self, id: usize) -> String {
        self.class_names
            .as_ref()
            .and_then(|names| names.get(id).cloned())
            .unwrap_or_else(|| format!("Class {}", id))
    }

    /// `<exp_log_path>/<exp_name>.txt`
    pub fn log_file(&self) -> PathBuf {
        self.exp_log_path.join(format!("{}.txt", self.exp_name))
    }

    /// `<exp_path>/<exp_name>`
    pub fn exp_dir(&self) -> PathBuf {
        self.exp_path.join(&self.exp_name)
    }

    pub fn with_exp_name(mut self, exp_name: &str) -> Self {
        self.exp_name = exp_name.to_string();
        self
    }

    pub fn with_exp_path<P: AsRef<Path>>(mut self, exp_path: P) -> Self {
        self.exp_path = exp_path.as_ref().to_path_buf();
        self
    }

    pub fn with_exp_log_path<P: AsRef<Path>>(mut self, exp_log_path: P) -> Self {
        self.exp_log_path = exp_log_path.as_ref().to_path_buf();
        self
    }

    pub fn with_lr(mut self, lr: f32) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_weight_decay(mut self, x: f32) -> Self {
        self.weight_decay = x;
        self
    }

    pub fn with_lr_decay(mut self, decay: f32, every_n_epochs: usize) -> Self {
        self.lr_decay = decay;
        self.num_epoch_lr_decay = every_n_epochs;
        self
    }

    pub fn with_max_epoch(mut self, n: usize) -> Self {
        self.max_epoch = n;
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_img_size(mut self, height: usize, width: usize) -> Self {
        self.img_size = (height, width);
        self
    }

    pub fn with_num_classes(mut self, nc: usize) -> Self {
        self.num_classes = nc;
        self
    }

    pub fn with_class_names(mut self, names: &[&str]) -> Self {
        self.class_names = Some(names.iter().map(|x| x.to_string()).collect::<Vec<String>>());
        self
    }

    pub fn with_loss_weights(mut self, weights: [f32; NUM_SCALES]) -> Self {
        self.loss_weights = weights;
        self
    }

    pub fn with_focal(mut self, alpha: f32, gamma: f32, reduction: Reduction) -> Self {
        self.focal_alpha = alpha;
        self.focal_gamma = gamma;
        self.focal_reduction = reduction;
        self
    }

    pub fn with_gpu_ids(mut self, ids: &[usize]) -> Self {
        self.gpu_ids = ids.to_vec();
        self
    }

    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_save_visuals(mut self, x: bool) -> Self {
        self.save_visuals = x;
        self
    }

    pub fn to_string(&self) -> String {
        format!("Experiment: {}\n\
        Experiment Path: {}\n\
        Log File: {}\n\
        Device: {}\n\
        Classes: {}\n\
        Image Size: {}x{}\n\
        Batch Size: {}\n\
        Learning Rate: {} (x{} every {} epochs)\n\
        Weight Decay: {}\n\
        Max Epochs: {}\n\
        Loss Weights: {:?}",
                self.exp_name, self.exp_dir().display(), self.log_file().display(),
                self.device(), self.num_classes, self.img_size.0, self.img_size.1,
                self.batch_size, self.lr, self.lr_decay, self.num_epoch_lr_decay,
                self.weight_decay, self.max_epoch, self.loss_weights)
    }
}
