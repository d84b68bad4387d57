use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use crate::common::{ComputeDevice, TrainConfig};
use crate::data::send_channels::ProgressState;
use crate::data::FsAccess;
use crate::training::EpochSummary;

/// Only one run computes at a time.
static DEVICE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Exclusive hold on the compute context for the lifetime of a run.
///
/// Owns the rayon pool the run executes on. Dropping it releases the context
/// for the next run.
pub struct DeviceContext {
    device: ComputeDevice,
    pool: rayon::ThreadPool,
    _guard: MutexGuard<'static, ()>,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.device)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl DeviceContext {
    /// Blocks until no other run holds the context. `num_threads == 0` lets rayon decide.
    pub fn acquire(device: ComputeDevice, num_threads: usize) -> Result<Self> {
        let guard = match DEVICE_LOCK.try_lock() {
            Some(guard) => guard,
            None => {
                log::info!("Compute context busy, waiting for the running experiment to finish");
                DEVICE_LOCK.lock()
            }
        };

        if device.is_accelerator() {
            log::warn!("GPU ids {:?} requested; the ndarray backend computes on the CPU", device.device_ids());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("icnet-worker-{}", i))
            .build()?;
        log::info!("Acquired compute context ({}) with {} threads", device, pool.current_num_threads());

        Ok(Self {
            device,
            pool,
            _guard: guard,
        })
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op` with this context's pool as the rayon pool.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::debug!("Released compute context ({})", self.device);
    }
}

/// Everything a training or validation pass needs besides the model and data:
/// the configuration, the held compute context, output locations and the
/// optional progress channel.
#[derive(Debug)]
pub struct ExperimentContext {
    config: TrainConfig,
    device: DeviceContext,
    exp_dir: PathBuf,
    log_file: PathBuf,
    progress: Option<ProgressState>,
}

impl ExperimentContext {
    /// Validates `config`, takes the compute context, prepares the output
    /// directories and appends the configuration to the experiment log.
    pub fn open(config: TrainConfig) -> Result<Self> {
        config.validate()?;
        let device = DeviceContext::acquire(config.device(), config.num_threads)?;

        let exp_dir = FsAccess::Current.resolve(config.exp_dir())?;
        let log_dir = FsAccess::Current.resolve(&config.exp_log_path)?;
        let log_file = log_dir.join(format!("{}.txt", config.exp_name));

        let ctx = Self {
            config,
            device,
            exp_dir,
            log_file,
            progress: None,
        };
        let text = ctx.config.log_text()?;
        ctx.log_line(&format!("{}\n\n\n\n", text))?;
        log::info!("Experiment '{}' logging to {}", ctx.config.exp_name, ctx.log_file.display());
        Ok(ctx)
    }

    pub fn with_progress(mut self, progress: ProgressState) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn exp_dir(&self) -> &Path {
        &self.exp_dir
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Appends `text` verbatim to the experiment log.
    pub fn log_line(&self, text: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open experiment log {}", self.log_file.display()))?;
        f.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Publishes an epoch summary if a progress channel is attached.
    pub fn send_summary(&self, summary: &EpochSummary) {
        if let Some(progress) = &self.progress {
            if let Err(e) = progress.summary_tx.send(summary.clone()) {
                log::warn!("Progress receiver dropped: {}", e);
            }
        }
    }
}
