#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! sdlab engine: runs stock/flow models, derives composite indicators, and keeps scenarios.

/// Logging and event handle.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// Series and result types.
#[path = "../series.rs"]
pub mod series;

/// Equation parser and evaluator.
#[path = "../expression.rs"]
pub mod expression;

/// Model definition, Euler solver and loaders.
#[path = "../model.rs"]
pub mod model;

/// Output variable metadata sources.
#[path = "../metadata.rs"]
pub mod metadata;

/// Model run and variable extraction.
#[path = "../simulator.rs"]
pub mod simulator;

/// Composite indicators.
#[path = "../indicators.rs"]
pub mod indicators;

/// Per-variable summary statistics.
#[path = "../summary.rs"]
pub mod summary;

/// Lab configuration.
#[path = "../config.rs"]
pub mod config;

/// In-memory scenario store.
#[path = "../scenario.rs"]
pub mod scenario;

/// Multi-scenario comparison.
#[path = "../compare.rs"]
pub mod compare;

/// Pipeline entry point.
#[path = "../main.rs"]
pub mod runtime;

pub use config::LabConfig;
pub use error::{ModelError, ScenarioError, SeriesError, SimulationError};
pub use runtime::{Simulate, SimulationPipeline, SimulationPipelineBuilder};
pub use scenario::{Scenario, ScenarioStore, ScenarioSummary};
pub use series::{
    DisplayMetadata, ParameterSet, PreviewRow, RunMode, Series, SimulationResult, VariableResult,
};
pub use telemetry::{event_opt, log_opt, LabTelemetry, LabTelemetryBuilder};
