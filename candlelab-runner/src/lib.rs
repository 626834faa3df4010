//! Experiment layer on top of the candlelab data core.
//!
//! Feature transforms (DMI/ADX, forward returns), a small experiment
//! registry, and the artifact pipeline that gives every run its own
//! timestamped directory with metrics, results, a report, and the resolved
//! config.

pub mod artifacts;
pub mod config;
pub mod experiments;
pub mod features;
pub mod runner;
pub mod sample;

pub use config::RunConfig;
pub use runner::run_experiment;
