//! Training logs.
//!
//! - [`ConsoleLogger`]: fixed-width table on stdout
//! - [`CsvLogger`]: one CSV row per iteration
//! - [`MultiLogger`]: fan-out to several loggers

pub mod logger;

pub use logger::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger, TrainingSnapshot};
