use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use sdlab_engine::ParameterSet;

use crate::{
    anomaly::AnomalyReport, correlation::CorrelationReport, error::AnalyticsError,
    predictor::ForecastResult, statistics::VariableStatistics,
};

/// Report part that may have failed; failures carry their message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Section<T> {
    /// Computed section.
    Ready(T),
    /// Failure message.
    Failed {
        /// Error text.
        error: String,
    },
}

impl<T> From<Result<T, AnalyticsError>> for Section<T> {
    fn from(outcome: Result<T, AnalyticsError>) -> Self {
        match outcome {
            Ok(value) => Self::Ready(value),
            Err(err) => Self::Failed {
                error: err.to_string(),
            },
        }
    }
}

impl<T> Section<T> {
    /// The computed value, if any.
    #[must_use]
    pub const fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Failed { .. } => None,
        }
    }
}

/// Forecast, anomalies, correlations and statistics of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    /// Trend forecasts.
    pub predictions: ForecastResult,
    /// Anomaly detection.
    pub anomalies: Section<AnomalyReport>,
    /// Correlation analysis.
    pub correlations: Section<CorrelationReport>,
    /// Descriptive statistics per variable.
    pub statistics: IndexMap<String, VariableStatistics>,
    /// Parameters of the analyzed run.
    pub parameters: ParameterSet,
    /// Generation time.
    pub timestamp: DateTime<Utc>,
}

/// Builder for `ForecastReport`.
pub struct ForecastReportBuilder {
    predictions: ForecastResult,
    anomalies: Section<AnomalyReport>,
    correlations: Section<CorrelationReport>,
    statistics: IndexMap<String, VariableStatistics>,
    parameters: ParameterSet,
}

impl ForecastReportBuilder {
    /// Starts a report from the forecasts.
    #[must_use]
    pub fn new(predictions: ForecastResult) -> Self {
        Self {
            predictions,
            anomalies: Section::Failed {
                error: "anomaly detection not run".into(),
            },
            correlations: Section::Failed {
                error: "correlation analysis not run".into(),
            },
            statistics: IndexMap::new(),
            parameters: ParameterSet::new(),
        }
    }

    /// Sets anomalies.
    #[must_use]
    pub fn anomalies(mut self, anomalies: Result<AnomalyReport, AnalyticsError>) -> Self {
        self.anomalies = anomalies.into();
        self
    }

    /// Sets correlations.
    #[must_use]
    pub fn correlations(mut self, correlations: Result<CorrelationReport, AnalyticsError>) -> Self {
        self.correlations = correlations.into();
        self
    }

    /// Sets statistics.
    #[must_use]
    pub fn statistics(mut self, statistics: IndexMap<String, VariableStatistics>) -> Self {
        self.statistics = statistics;
        self
    }

    /// Sets parameters.
    #[must_use]
    pub fn parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = parameters;
        self
    }

    /// Builds report.
    #[must_use]
    pub fn build(self) -> ForecastReport {
        ForecastReport {
            predictions: self.predictions,
            anomalies: self.anomalies,
            correlations: self.correlations,
            statistics: self.statistics,
            parameters: self.parameters,
            timestamp: Utc::now(),
        }
    }
}
