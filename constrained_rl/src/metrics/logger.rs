//! Per-iteration training logs.
//!
//! A [`TrainingSnapshot`] is produced once per learning iteration and handed
//! to a [`MetricsLogger`]: a console table, a CSV file, or both.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Everything reported for one iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSnapshot {
    pub iteration: usize,
    pub total_iterations: usize,
    /// Environment steps since training started.
    pub env_steps: usize,
    /// Environment steps collected by this iteration.
    pub iteration_steps: usize,
    /// Episodes completed during this iteration's rollout.
    pub episodes: usize,
    /// Rolling-window means; `None` before the first episode completes.
    pub mean_reward: Option<f32>,
    pub mean_cost: Option<f32>,
    pub mean_length: Option<f32>,
    /// Constraint violation used by the update.
    pub violation: f32,
    pub value_loss: f32,
    pub cost_value_loss: f32,
    pub surrogate: f32,
    pub kl: f32,
    pub step_size: f32,
    /// Most frequent optimisation case of the update.
    pub case: u8,
    pub collection_secs: f32,
    pub learn_secs: f32,
}

impl TrainingSnapshot {
    pub fn new(iteration: usize, total_iterations: usize) -> Self {
        Self {
            iteration,
            total_iterations,
            ..Default::default()
        }
    }

    pub fn steps_per_second(&self) -> f32 {
        let secs = self.collection_secs + self.learn_secs;
        if secs > 0.0 {
            self.iteration_steps as f32 / secs
        } else {
            0.0
        }
    }
}

fn optional(value: Option<f32>, precision: usize) -> String {
    value.map(|v| format!("{:.*}", precision, v)).unwrap_or_else(|| "-".to_string())
}

pub trait MetricsLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot);

    fn flush(&mut self) {}
}

// ============================================================================
// Console
// ============================================================================

/// Fixed-width table on stdout, one row every `log_interval` iterations.
pub struct ConsoleLogger {
    log_interval: usize,
    header_every: usize,
    rows: usize,
}

impl ConsoleLogger {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
            header_every: 20,
            rows: 0,
        }
    }

    fn header() -> String {
        format!(
            "{:>11} {:>10} {:>9} {:>8} {:>9} {:>9} {:>9} {:>9} {:>5} {:>8}",
            "Epoch", "Reward", "Cost", "EpLen", "Viol", "VLoss", "CLoss", "KL", "Case", "Step"
        )
    }

    fn row(snapshot: &TrainingSnapshot) -> String {
        format!(
            "{:>5}/{:<5} {:>10} {:>9} {:>8} {:>9.3} {:>9.4} {:>9.4} {:>9.5} {:>5} {:>8.5}",
            snapshot.iteration,
            snapshot.total_iterations,
            optional(snapshot.mean_reward, 2),
            optional(snapshot.mean_cost, 2),
            optional(snapshot.mean_length, 1),
            snapshot.violation,
            snapshot.value_loss,
            snapshot.cost_value_loss,
            snapshot.kl,
            snapshot.case,
            snapshot.step_size
        )
    }
}

impl MetricsLogger for ConsoleLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        if snapshot.iteration % self.log_interval != 0 {
            return;
        }
        if self.rows % self.header_every == 0 {
            let header = Self::header();
            println!("{}", header);
            println!("{}", "-".repeat(header.len()));
        }
        println!("{}", Self::row(snapshot));
        self.rows += 1;
    }
}

// ============================================================================
// CSV
// ============================================================================

pub struct CsvLogger<W: Write = BufWriter<File>> {
    writer: W,
    start: Instant,
}

const CSV_HEADER: &str = "iteration,env_steps,episodes,mean_reward,mean_cost,mean_length,violation,\
value_loss,cost_value_loss,surrogate,kl,step_size,case,steps_per_second,elapsed_secs";

impl CsvLogger {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::from_writer(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> CsvLogger<W> {
    pub fn from_writer(mut writer: W) -> std::io::Result<Self> {
        writeln!(writer, "{}", CSV_HEADER)?;
        Ok(Self {
            writer,
            start: Instant::now(),
        })
    }
}

impl<W: Write> MetricsLogger for CsvLogger<W> {
    fn log(&mut self, s: &TrainingSnapshot) {
        let blank = |v: Option<f32>| v.map(|v| v.to_string()).unwrap_or_default();
        let result = writeln!(
            self.writer,
            "{},{},{},{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{},{:.1},{:.2}",
            s.iteration,
            s.env_steps,
            s.episodes,
            blank(s.mean_reward),
            blank(s.mean_cost),
            blank(s.mean_length),
            s.violation,
            s.value_loss,
            s.cost_value_loss,
            s.surrogate,
            s.kl,
            s.step_size,
            s.case,
            s.steps_per_second(),
            self.start.elapsed().as_secs_f32()
        );
        if let Err(e) = result {
            log::warn!("failed to write metrics row: {}", e);
        }
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl<W: Write> Drop for CsvLogger<W> {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

// ============================================================================
// Fan-out
// ============================================================================

#[derive(Default)]
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricsLogger>>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricsLogger for MultiLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        for logger in &mut self.loggers {
            logger.log(snapshot);
        }
    }

    fn flush(&mut self) {
        for logger in &mut self.loggers {
            logger.flush();
        }
    }
}
