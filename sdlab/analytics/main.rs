use indexmap::IndexMap;
use serde_json::json;
use shared_logging::LogLevel;

use sdlab_engine::{log_opt, LabTelemetry, ParameterSet, SimulationResult};

use crate::{
    anomaly::{AnomalyDetector, AnomalyReport, DEFAULT_CONTAMINATION},
    capability::{Capability, DetectionMode, ForecastMode},
    correlation::{correlate, CorrelationReport},
    error::AnalyticsError,
    predictor::{ForecastResult, Forecaster},
    report::{ForecastReport, ForecastReportBuilder},
    statistics::{statistics, VariableStatistics},
};

/// Forecast horizon used by the combined report.
pub const REPORT_STEPS: usize = 12;

/// Entry point bundling forecaster, detector and correlation analysis.
pub struct PredictiveAnalyzer {
    forecaster: Forecaster,
    detector: AnomalyDetector,
    telemetry: Option<LabTelemetry>,
}

impl PredictiveAnalyzer {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> PredictiveAnalyzerBuilder {
        PredictiveAnalyzerBuilder::default()
    }

    /// Forecasts `steps` points per variable.
    #[must_use]
    pub fn predict(&self, result: &SimulationResult, steps: usize) -> ForecastResult {
        self.forecaster.predict(result, steps)
    }

    /// Flags anomalies per variable.
    pub fn detect_anomalies(
        &self,
        result: &SimulationResult,
        contamination: f64,
    ) -> Result<AnomalyReport, AnalyticsError> {
        self.detector.detect(result, contamination)
    }

    /// Pairwise correlations.
    #[allow(clippy::unused_self)]
    pub fn correlate(&self, result: &SimulationResult) -> Result<CorrelationReport, AnalyticsError> {
        correlate(result)
    }

    /// Descriptive statistics per variable.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn statistics(&self, result: &SimulationResult) -> IndexMap<String, VariableStatistics> {
        statistics(result)
    }

    /// Runs every analysis and bundles the outcome with `parameters`.
    #[must_use]
    pub fn forecast_report(
        &self,
        result: &SimulationResult,
        parameters: &ParameterSet,
    ) -> ForecastReport {
        let correlations = self.correlate(result);
        if let Err(err) = &correlations {
            log_opt(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "report.correlations.failed",
                json!({ "error": err.to_string() }),
            );
        }
        let report = ForecastReportBuilder::new(self.predict(result, REPORT_STEPS))
            .anomalies(self.detect_anomalies(result, DEFAULT_CONTAMINATION))
            .correlations(correlations)
            .statistics(self.statistics(result))
            .parameters(parameters.clone())
            .build();
        log_opt(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "report.generated",
            json!({
                "variables": result.len(),
                "forecasts": report.predictions.predictions.len(),
            }),
        );
        report
    }

    /// Active forecast mode.
    #[must_use]
    pub fn forecast_mode(&self) -> ForecastMode {
        self.forecaster.mode()
    }

    /// Active detection mode.
    #[must_use]
    pub fn detection_mode(&self) -> DetectionMode {
        self.detector.mode()
    }
}

/// Builder for `PredictiveAnalyzer`.
pub struct PredictiveAnalyzerBuilder {
    forecast_mode: ForecastMode,
    detection_mode: DetectionMode,
    telemetry: Option<LabTelemetry>,
}

impl Default for PredictiveAnalyzerBuilder {
    fn default() -> Self {
        let capability = Capability::detect();
        Self {
            forecast_mode: capability.forecast_mode(),
            detection_mode: capability.detection_mode(),
            telemetry: None,
        }
    }
}

impl PredictiveAnalyzerBuilder {
    /// Selects both modes from a capability.
    #[must_use]
    pub const fn capability(mut self, capability: Capability) -> Self {
        self.forecast_mode = capability.forecast_mode();
        self.detection_mode = capability.detection_mode();
        self
    }

    /// Forces the forecast mode.
    #[must_use]
    pub const fn forecast_mode(mut self, mode: ForecastMode) -> Self {
        self.forecast_mode = mode;
        self
    }

    /// Forces the detection mode.
    #[must_use]
    pub const fn detection_mode(mut self, mode: DetectionMode) -> Self {
        self.detection_mode = mode;
        self
    }

    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: LabTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the analyzer.
    #[must_use]
    pub fn build(self) -> PredictiveAnalyzer {
        PredictiveAnalyzer {
            forecaster: Forecaster::with_mode(self.forecast_mode, self.telemetry.clone()),
            detector: AnomalyDetector::with_mode(self.detection_mode, self.telemetry.clone()),
            telemetry: self.telemetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;
    use sdlab_engine::{
        DisplayMetadata, RunMode, Series, Simulate, SimulationPipeline, VariableResult,
    };
    use std::path::Path;
    use tempfile::tempdir;

    fn shipped_run() -> SimulationResult {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let config = sdlab_engine::LabConfig {
            model_path: root.join("models/forrester.toml"),
            metadata_path: root.join("models/metadata.toml"),
            ..sdlab_engine::LabConfig::default()
        };
        SimulationPipeline::builder()
            .config(&config)
            .build()
            .unwrap()
            .simulate(&ParameterSet::new())
            .unwrap()
    }

    #[test]
    fn report_over_shipped_model() {
        let tmp = tempdir().unwrap();
        let telemetry = LabTelemetry::builder("analytics")
            .log_path(tmp.path().join("analytics.log"))
            .build()
            .unwrap();
        let analyzer = PredictiveAnalyzer::builder().telemetry(telemetry).build();
        let result = shipped_run();
        let params = indexmap! { "objetivo".to_string() => 30000.0 };
        let report = analyzer.forecast_report(&result, &params);
        assert_eq!(report.predictions.steps, REPORT_STEPS);
        assert_eq!(report.predictions.predictions.len(), result.len());
        assert!(report.correlations.ready().is_some());
        assert!(report.anomalies.ready().is_some());
        assert_eq!(report.statistics.len(), result.len());
        assert_eq!(report.parameters, params);
        let log = std::fs::read_to_string(tmp.path().join("analytics.log")).unwrap();
        assert!(log.contains("report.generated"));
    }

    #[test]
    fn report_embeds_correlation_failure() {
        let series = |n: usize| {
            let times = (0..n).map(|t| t as f64).collect();
            Series::new(times, vec![1.0; n]).unwrap()
        };
        let result = SimulationResult::from_variables(
            RunMode::Defaults,
            [
                VariableResult::new("a", series(3), DisplayMetadata::fallback("a"), 10),
                VariableResult::new("b", series(2), DisplayMetadata::fallback("b"), 10),
            ],
        );
        let report = PredictiveAnalyzer::builder()
            .capability(Capability::Basic)
            .build()
            .forecast_report(&result, &ParameterSet::new());
        assert!(report.predictions.is_fallback);
        assert!(matches!(
            report.correlations,
            crate::report::Section::Failed { .. }
        ));
    }

    #[test]
    fn modes_can_be_forced() {
        let analyzer = PredictiveAnalyzer::builder()
            .forecast_mode(ForecastMode::Naive)
            .detection_mode(DetectionMode::IsolationForest)
            .build();
        assert_eq!(analyzer.forecast_mode(), ForecastMode::Naive);
        assert_eq!(analyzer.detection_mode(), DetectionMode::IsolationForest);
    }
}
