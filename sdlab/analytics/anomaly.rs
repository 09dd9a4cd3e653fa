use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use sdlab_engine::{log_opt, LabTelemetry, Series, SimulationResult};

use crate::{
    capability::{Capability, DetectionMode},
    error::AnalyticsError,
    isolation::{IsolationForest, DEFAULT_SEED, DEFAULT_TREES},
    statistics::{mean, std_dev},
};

/// Fewest points a variable needs to be analyzed.
pub const MIN_POINTS: usize = 10;
/// Default expected share of anomalies.
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

/// How far a flagged point lies from the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Close to the flagging threshold.
    Low,
    /// Clearly outside the bulk.
    Medium,
    /// More than three standard deviations away.
    High,
}

/// One flagged point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPoint {
    /// Time of the point.
    pub time: f64,
    /// Value of the point.
    pub value: f64,
    /// Severity class.
    pub severity: Severity,
}

/// Anomalies of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAnomalies {
    /// Number of flagged points.
    pub count: usize,
    /// Flagged points in time order.
    pub points: Vec<AnomalyPoint>,
    /// Share of points flagged, 0-100.
    pub percentage: f64,
}

/// Detection outcome over a whole result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Only variables with at least one anomaly.
    pub anomalies: IndexMap<String, VariableAnomalies>,
    /// Variables present in the input.
    pub total_variables_analyzed: usize,
    /// `anomalies.len()`.
    pub variables_with_anomalies: usize,
    /// True when produced by the deviation strategy.
    pub is_fallback: bool,
    /// Generation time.
    pub timestamp: DateTime<Utc>,
}

/// Per-series outlier strategy.
pub trait OutlierStrategy: Send + Sync {
    /// Mode label.
    fn mode(&self) -> DetectionMode;

    /// Flags points of `series`; the series has at least [`MIN_POINTS`] points.
    fn flag(&self, series: &Series, contamination: f64) -> Vec<AnomalyPoint>;
}

/// Isolation forest with z-score severity.
#[derive(Debug, Clone, Copy)]
pub struct IsolationStrategy {
    trees: usize,
    seed: u64,
}

impl Default for IsolationStrategy {
    fn default() -> Self {
        Self {
            trees: DEFAULT_TREES,
            seed: DEFAULT_SEED,
        }
    }
}

/// Two-sigma threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviationStrategy;

fn z_severity(value: f64, mean: f64, std: f64) -> Severity {
    let z = if std > 0.0 {
        ((value - mean) / std).abs()
    } else {
        0.0
    };
    if z > 3.0 {
        Severity::High
    } else if z > 2.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

impl OutlierStrategy for IsolationStrategy {
    fn mode(&self) -> DetectionMode {
        DetectionMode::IsolationForest
    }

    fn flag(&self, series: &Series, contamination: f64) -> Vec<AnomalyPoint> {
        let values = series.values();
        let (mean, std) = (mean(values), std_dev(values));
        IsolationForest::fit(values, self.trees, self.seed)
            .outliers(values, contamination)
            .into_iter()
            .map(|idx| AnomalyPoint {
                time: series.times()[idx],
                value: values[idx],
                severity: z_severity(values[idx], mean, std),
            })
            .collect()
    }
}

impl OutlierStrategy for DeviationStrategy {
    fn mode(&self) -> DetectionMode {
        DetectionMode::Deviation
    }

    fn flag(&self, series: &Series, _contamination: f64) -> Vec<AnomalyPoint> {
        let values = series.values();
        let (mean, std) = (mean(values), std_dev(values));
        series
            .points()
            .filter(|(_, value)| (value - mean).abs() > 2.0 * std)
            .map(|(time, value)| AnomalyPoint {
                time,
                value,
                severity: if (value - mean).abs() > 2.5 * std {
                    Severity::Medium
                } else {
                    Severity::Low
                },
            })
            .collect()
    }
}

/// Flags outlying points per variable; the strategy is fixed at construction.
pub struct AnomalyDetector {
    strategy: Box<dyn OutlierStrategy>,
    telemetry: Option<LabTelemetry>,
}

impl AnomalyDetector {
    /// Uses the mode the build's capability selects.
    #[must_use]
    pub fn new(telemetry: Option<LabTelemetry>) -> Self {
        Self::with_mode(Capability::detect().detection_mode(), telemetry)
    }

    /// Forces a mode.
    #[must_use]
    pub fn with_mode(mode: DetectionMode, telemetry: Option<LabTelemetry>) -> Self {
        let strategy: Box<dyn OutlierStrategy> = match mode {
            DetectionMode::IsolationForest => Box::new(IsolationStrategy::default()),
            DetectionMode::Deviation => Box::new(DeviationStrategy),
        };
        Self {
            strategy,
            telemetry,
        }
    }

    /// Active mode.
    #[must_use]
    pub fn mode(&self) -> DetectionMode {
        self.strategy.mode()
    }

    /// Analyzes every variable with at least [`MIN_POINTS`] finite points.
    #[allow(clippy::cast_precision_loss)]
    pub fn detect(
        &self,
        result: &SimulationResult,
        contamination: f64,
    ) -> Result<AnomalyReport, AnalyticsError> {
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(AnalyticsError::InvalidContamination(contamination));
        }
        let mut anomalies = IndexMap::new();
        for (name, variable) in result.iter() {
            let series = &variable.series;
            if series.len() < MIN_POINTS {
                continue;
            }
            if series.values().iter().any(|v| !v.is_finite()) {
                log_opt(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "anomaly.variable.skipped",
                    json!({ "variable": name, "reason": "non-finite values" }),
                );
                continue;
            }
            let points = self.strategy.flag(series, contamination);
            if points.is_empty() {
                continue;
            }
            anomalies.insert(
                name.clone(),
                VariableAnomalies {
                    count: points.len(),
                    percentage: points.len() as f64 / series.len() as f64 * 100.0,
                    points,
                },
            );
        }
        log_opt(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "anomaly.detect.complete",
            json!({
                "mode": self.mode(),
                "variables": result.len(),
                "with_anomalies": anomalies.len(),
            }),
        );
        Ok(AnomalyReport {
            variables_with_anomalies: anomalies.len(),
            total_variables_analyzed: result.len(),
            anomalies,
            is_fallback: self.mode().is_fallback(),
            timestamp: Utc::now(),
        })
    }
}
