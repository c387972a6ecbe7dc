//! Policy checkpoints with a resumable iteration counter.
//!
//! Checkpoints are burn binary records named `model_{iteration}.bin`; the
//! iteration is recovered from the `_N` suffix when loading. The best model by
//! mean episode reward is mirrored to `best.bin`, and only the newest
//! `max_to_keep` iteration files are kept.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use thiserror::Error;

const PREFIX: &str = "model_";
const EXTENSION: &str = "bin";
const BEST_NAME: &str = "best.bin";

/// Where and how often the runner writes policy records.
#[derive(Debug, Clone)]
pub struct CheckpointerConfig {
    pub directory: PathBuf,
    /// Iterations between saves; 0 disables periodic saves.
    pub save_interval: usize,
    /// Iteration files kept on disk; 0 keeps all.
    pub max_to_keep: usize,
    /// Mirror the highest-reward save to `best.bin`.
    pub mirror_best: bool,
}

impl CheckpointerConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            save_interval: 50,
            max_to_keep: 5,
            mirror_best: true,
        }
    }

    pub fn with_save_interval(self, save_interval: usize) -> Self {
        Self { save_interval, ..self }
    }

    pub fn with_max_to_keep(self, max_to_keep: usize) -> Self {
        Self { max_to_keep, ..self }
    }

    pub fn with_mirror_best(self, mirror_best: bool) -> Self {
        Self { mirror_best, ..self }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),
    #[error("recorder: {0}")]
    Recorder(String),
    #[error("no checkpoints in {0}")]
    NoCheckpoints(PathBuf),
    #[error("`{0}` is not a model_<iteration>.bin checkpoint name")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub iteration: usize,
    /// Mean episode reward at save time, when known.
    pub metric: Option<f32>,
}

/// `model_{iteration}.bin`
pub fn checkpoint_file_name(iteration: usize) -> String {
    format!("{}{}.{}", PREFIX, iteration, EXTENSION)
}

/// Iteration encoded in a checkpoint path's `_N` suffix.
pub fn parse_iteration(path: &Path) -> Result<usize, CheckpointError> {
    let invalid = || CheckpointError::InvalidName(path.display().to_string());
    let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(invalid)?;
    let (_, digits) = stem.rsplit_once('_').ok_or_else(invalid)?;
    digits.parse().map_err(|_| invalid())
}

pub struct Checkpointer {
    config: CheckpointerConfig,
    best_metric: f32,
    history: Vec<CheckpointInfo>,
}

impl Checkpointer {
    /// Creates the checkpoint directory if needed.
    pub fn new(config: CheckpointerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.directory)?;
        Ok(Self {
            config,
            best_metric: f32::NEG_INFINITY,
            history: Vec::new(),
        })
    }

    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    pub fn best_metric(&self) -> f32 {
        self.best_metric
    }

    pub fn should_save(&self, iteration: usize) -> bool {
        self.config.save_interval > 0 && iteration % self.config.save_interval == 0
    }

    /// Save `model` as `model_{iteration}.bin`.
    pub fn save<B: Backend, M: Module<B>>(
        &mut self,
        model: &M,
        iteration: usize,
        metric: Option<f32>,
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.config.directory.join(checkpoint_file_name(iteration));
        record(model, &path)?;
        log::debug!("saved checkpoint {}", path.display());

        if self.config.mirror_best {
            if let Some(m) = metric.filter(|m| *m > self.best_metric) {
                self.best_metric = m;
                record(model, &self.config.directory.join(BEST_NAME))?;
            }
        }

        self.history.retain(|c| c.iteration != iteration);
        self.history.push(CheckpointInfo {
            path: path.clone(),
            iteration,
            metric,
        });
        self.prune()?;
        Ok(path)
    }

    /// Load `path` into `template`; returns the model and its iteration.
    pub fn load<B: Backend, M: Module<B>>(
        &self,
        template: M,
        path: &Path,
        device: &B::Device,
    ) -> Result<(M, usize), CheckpointError> {
        load_checkpoint(template, path, device)
    }

    pub fn load_latest<B: Backend, M: Module<B>>(
        &self,
        template: M,
        device: &B::Device,
    ) -> Result<(M, usize), CheckpointError> {
        let latest = self
            .list_checkpoints()?
            .pop()
            .ok_or_else(|| CheckpointError::NoCheckpoints(self.config.directory.clone()))?;
        self.load(template, &latest.path, device)
    }

    pub fn load_best<B: Backend, M: Module<B>>(&self, template: M, device: &B::Device) -> Result<M, CheckpointError> {
        let path = self.config.directory.join(BEST_NAME);
        if !path.exists() {
            return Err(CheckpointError::NoCheckpoints(self.config.directory.clone()));
        }
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        template
            .load_file(&path, &recorder, device)
            .map_err(|e| CheckpointError::Recorder(e.to_string()))
    }

    /// Iteration checkpoints on disk, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut found: Vec<CheckpointInfo> = fs::read_dir(&self.config.directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                name.starts_with(PREFIX) && path.extension().is_some_and(|e| e == EXTENSION)
            })
            .filter_map(|path| {
                let iteration = parse_iteration(&path).ok()?;
                Some(CheckpointInfo {
                    path,
                    iteration,
                    metric: None,
                })
            })
            .collect();
        found.sort_by_key(|c| c.iteration);
        Ok(found)
    }

    fn prune(&mut self) -> Result<(), CheckpointError> {
        let keep = self.config.max_to_keep;
        if keep == 0 || self.history.len() <= keep {
            return Ok(());
        }
        let excess = self.history.len() - keep;
        for old in self.history.drain(..excess) {
            if old.path.exists() {
                fs::remove_file(&old.path)?;
            }
        }
        Ok(())
    }
}

/// Load a `model_{iteration}.bin` file into `template`.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    template: M,
    path: &Path,
    device: &B::Device,
) -> Result<(M, usize), CheckpointError> {
    let iteration = parse_iteration(path)?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = template
        .load_file(path, &recorder, device)
        .map_err(|e| CheckpointError::Recorder(e.to_string()))?;
    Ok((model, iteration))
}

fn record<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<(), CheckpointError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| CheckpointError::Recorder(e.to_string()))
}
