#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! sdlab analytics: trend forecasts, anomaly detection and correlations over simulation output.

/// Analytics errors.
#[path = "../error.rs"]
pub mod error;

/// Capability and mode selection.
#[path = "../capability.rs"]
pub mod capability;

/// Descriptive statistics.
#[path = "../statistics.rs"]
pub mod statistics;

/// Trend forecaster.
#[path = "../predictor.rs"]
pub mod predictor;

/// Isolation forest.
#[path = "../isolation.rs"]
pub mod isolation;

/// Anomaly detector.
#[path = "../anomaly.rs"]
pub mod anomaly;

/// Correlation analyzer.
#[path = "../correlation.rs"]
pub mod correlation;

/// Combined forecast report.
#[path = "../report.rs"]
pub mod report;

/// Analyzer entry point.
#[path = "../main.rs"]
pub mod runtime;

pub use anomaly::{AnomalyDetector, AnomalyReport, Severity};
pub use capability::{Capability, DetectionMode, ForecastMode};
pub use correlation::{correlate, CorrelationReport};
pub use error::AnalyticsError;
pub use predictor::{ForecastResult, Forecaster};
pub use report::ForecastReport;
pub use runtime::{PredictiveAnalyzer, PredictiveAnalyzerBuilder};
