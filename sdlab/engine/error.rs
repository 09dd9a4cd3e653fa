use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or solving a stock/flow model definition.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The definition file does not exist.
    #[error("model definition {0} does not exist")]
    Missing(PathBuf),
    /// The definition file could not be read.
    #[error("reading model definition {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The definition is not valid TOML or misses required sections.
    #[error("parsing model definition: {0}")]
    Parse(String),
    /// Two variables share a name once case and separators are ignored.
    #[error("variable \"{0}\" is declared more than once")]
    DuplicateName(String),
    /// An equation references an undeclared variable.
    #[error("equation of \"{variable}\" references unknown variable \"{reference}\"")]
    UnknownReference {
        /// Variable whose equation failed.
        variable: String,
        /// Name that could not be resolved.
        reference: String,
    },
    /// An equation could not be parsed.
    #[error("equation of \"{variable}\": {message}")]
    Expression {
        /// Variable whose equation failed.
        variable: String,
        /// Parser message.
        message: String,
    },
    /// Auxiliaries depend on each other without an intervening stock.
    #[error("auxiliary dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    /// Control values are unusable (non-positive step, reversed horizon, ...).
    #[error("invalid time control: {0}")]
    InvalidControl(String),
    /// A parameter override is not a finite number.
    #[error("parameter \"{name}\" has invalid value {value}")]
    InvalidOverride {
        /// Override key.
        name: String,
        /// Rejected value.
        value: f64,
    },
    /// Integration produced NaN or infinity.
    #[error("variable \"{variable}\" became non-finite at time {time}")]
    NonFinite {
        /// First variable found non-finite.
        variable: String,
        /// Simulation time of the failure.
        time: f64,
    },
}

/// Failure of the simulation pipeline. Success and failure never mix: a
/// pipeline call yields either a complete result or exactly one of these.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Model file missing/unreadable or the metadata source failed.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The solver failed with the supplied parameters.
    #[error("{}", solver_message(.message, .default_run_failed))]
    Solver {
        /// Solver message from the last attempt.
        message: String,
        /// True when the fallback run without overrides failed as well.
        default_run_failed: bool,
    },
    /// A requested output variable is not a model column.
    #[error("{}", not_found_message(.variable, .model, .suggestions, .available))]
    VariableNotFound {
        /// Requested variable.
        variable: String,
        /// Model label (file name).
        model: String,
        /// Columns containing, or contained in, the requested name.
        suggestions: Vec<String>,
        /// Sample of non-control columns.
        available: Vec<String>,
    },
}

fn solver_message(message: &str, default_run_failed: &bool) -> String {
    if *default_run_failed {
        format!("simulation failed with the supplied parameters and the default run also failed: {message}")
    } else {
        format!("simulation failed: {message}")
    }
}

fn not_found_message(
    variable: &str,
    model: &str,
    suggestions: &[String],
    available: &[String],
) -> String {
    let mut message = format!("output variable \"{variable}\" does not exist in model {model}.");
    if !suggestions.is_empty() {
        message.push_str(&format!(" Did you mean: {}?", suggestions.join(", ")));
    }
    message.push_str(&format!(
        " Available variables: {}. Update the variable metadata or the model.",
        available.join(", ")
    ));
    message
}

/// Failure of a series construction or deserialization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesError {
    /// Time and value columns differ in length.
    #[error("series has {times} time points but {values} values")]
    LengthMismatch {
        /// Number of time points.
        times: usize,
        /// Number of values.
        values: usize,
    },
    /// Time is not strictly increasing at the given index.
    #[error("series time is not strictly increasing at index {0}")]
    NonIncreasingTime(usize),
}

/// Failures surfaced by the scenario store and comparator.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Running the simulation for a new scenario failed.
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    /// An imported document is not a valid scenario.
    #[error("malformed scenario document: {0}")]
    Malformed(String),
    /// `compare` was called without ids.
    #[error("no scenarios provided for comparison")]
    EmptyComparison,
}
