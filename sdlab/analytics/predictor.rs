use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use sdlab_engine::{log_opt, LabTelemetry, Series, SimulationResult};

use crate::{
    capability::{Capability, ForecastMode},
    statistics::std_dev,
};

/// Half-width multiplier of the 95% band.
pub const CONFIDENCE_Z: f64 = 1.96;

/// Direction of the fitted trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Slope above zero.
    Increasing,
    /// Slope zero or below.
    Decreasing,
}

impl Trend {
    fn of(slope: f64) -> Self {
        if slope > 0.0 {
            Self::Increasing
        } else {
            Self::Decreasing
        }
    }
}

/// Extrapolation of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableForecast {
    /// Times beyond the last observation.
    pub future_times: Vec<f64>,
    /// Values at `future_times`.
    pub predicted_values: Vec<f64>,
    /// Lower band, regression only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_lower: Option<Vec<f64>>,
    /// Upper band, regression only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_upper: Option<Vec<f64>>,
    /// Trend direction.
    pub trend: Trend,
    /// Change per time unit.
    pub slope: f64,
    /// Coefficient of determination, regression only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r2_score: Option<f64>,
    /// Strategy that produced the forecast.
    pub method: ForecastMode,
}

/// Forecasts of every variable that could be fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Per variable, in result order.
    pub predictions: IndexMap<String, VariableForecast>,
    /// Requested steps.
    pub steps: usize,
    /// True when produced by the naive strategy.
    pub is_fallback: bool,
    /// Generation time.
    pub timestamp: DateTime<Utc>,
}

/// Per-series extrapolation strategy.
pub trait ForecastStrategy: Send + Sync {
    /// Mode label.
    fn mode(&self) -> ForecastMode;

    /// Extrapolates `steps` points; `None` when the data cannot be fitted.
    fn forecast(&self, series: &Series, steps: usize) -> Option<VariableForecast>;
}

/// Ordinary least squares on `(time, value)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionStrategy;

/// Last first difference carried forward.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveStrategy;

/// Least-squares line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    /// Slope.
    pub slope: f64,
    /// Intercept.
    pub intercept: f64,
}

impl LinearFit {
    /// Fits `y = slope * x + intercept`; `None` for fewer than two points or
    /// non-finite coefficients.
    #[must_use]
    pub fn fit(x: &[f64], y: &[f64]) -> Option<Self> {
        if x.len() < 2 || x.len() != y.len() {
            return None;
        }
        let x = Array1::from(x.to_vec());
        let y = Array1::from(y.to_vec());
        let (x_mean, y_mean) = (x.mean()?, y.mean()?);
        let dx = &x - x_mean;
        let dy = &y - y_mean;
        let slope = dx.dot(&dy) / dx.dot(&dx);
        let intercept = slope.mul_add(-x_mean, y_mean);
        (slope.is_finite() && intercept.is_finite()).then_some(Self { slope, intercept })
    }

    /// Value of the line at `x`.
    #[must_use]
    pub fn predict(&self, x: f64) -> f64 {
        self.slope.mul_add(x, self.intercept)
    }

    /// R² of the fit; a flat target scores 1.0 when matched exactly, else 0.0.
    #[must_use]
    pub fn r2(&self, x: &[f64], y: &[f64]) -> f64 {
        let y_arr = Array1::from(y.to_vec());
        let y_mean = y_arr.mean().unwrap_or(0.0);
        let ss_tot: f64 = y_arr.iter().map(|v| (v - y_mean).powi(2)).sum();
        let ss_res: f64 = x
            .iter()
            .zip(y)
            .map(|(x, y)| (y - self.predict(*x)).powi(2))
            .sum();
        if ss_tot == 0.0 {
            if ss_res == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - ss_res / ss_tot
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn future_times(series: &Series, steps: usize) -> Option<Vec<f64>> {
    let step = series.last_step()?;
    let last = *series.times().last()?;
    Some((1..=steps).map(|i| step.mul_add(i as f64, last)).collect())
}

impl ForecastStrategy for RegressionStrategy {
    fn mode(&self) -> ForecastMode {
        ForecastMode::Regression
    }

    fn forecast(&self, series: &Series, steps: usize) -> Option<VariableForecast> {
        let (x, y) = (series.times(), series.values());
        if y.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let fit = LinearFit::fit(x, y)?;
        let residuals: Vec<f64> = x.iter().zip(y).map(|(x, y)| y - fit.predict(*x)).collect();
        let band = CONFIDENCE_Z * std_dev(&residuals);
        let future_times = future_times(series, steps)?;
        let predicted_values: Vec<f64> = future_times.iter().map(|t| fit.predict(*t)).collect();
        Some(VariableForecast {
            confidence_lower: Some(predicted_values.iter().map(|v| v - band).collect()),
            confidence_upper: Some(predicted_values.iter().map(|v| v + band).collect()),
            trend: Trend::of(fit.slope),
            slope: fit.slope,
            r2_score: Some(fit.r2(x, y)),
            method: ForecastMode::Regression,
            future_times,
            predicted_values,
        })
    }
}

impl ForecastStrategy for NaiveStrategy {
    fn mode(&self) -> ForecastMode {
        ForecastMode::Naive
    }

    #[allow(clippy::cast_precision_loss)]
    fn forecast(&self, series: &Series, steps: usize) -> Option<VariableForecast> {
        let [.., previous, last] = series.values() else {
            return None;
        };
        let delta = last - previous;
        if !delta.is_finite() {
            return None;
        }
        let step = series.last_step()?;
        Some(VariableForecast {
            future_times: future_times(series, steps)?,
            predicted_values: (1..=steps).map(|i| delta.mul_add(i as f64, *last)).collect(),
            confidence_lower: None,
            confidence_upper: None,
            trend: Trend::of(delta),
            slope: delta / step,
            r2_score: None,
            method: ForecastMode::Naive,
        })
    }
}

/// Trend forecaster; the strategy is fixed at construction.
pub struct Forecaster {
    strategy: Box<dyn ForecastStrategy>,
    telemetry: Option<LabTelemetry>,
}

impl Forecaster {
    /// Uses the mode the build's capability selects.
    #[must_use]
    pub fn new(telemetry: Option<LabTelemetry>) -> Self {
        Self::with_mode(Capability::detect().forecast_mode(), telemetry)
    }

    /// Forces a mode.
    #[must_use]
    pub fn with_mode(mode: ForecastMode, telemetry: Option<LabTelemetry>) -> Self {
        let strategy: Box<dyn ForecastStrategy> = match mode {
            ForecastMode::Regression => Box::new(RegressionStrategy),
            ForecastMode::Naive => Box::new(NaiveStrategy),
        };
        Self::with_strategy(strategy, telemetry)
    }

    /// Uses a custom strategy.
    #[must_use]
    pub fn with_strategy(
        strategy: Box<dyn ForecastStrategy>,
        telemetry: Option<LabTelemetry>,
    ) -> Self {
        Self {
            strategy,
            telemetry,
        }
    }

    /// Active mode.
    #[must_use]
    pub fn mode(&self) -> ForecastMode {
        self.strategy.mode()
    }

    /// Forecasts every variable with at least two points. Variables that
    /// cannot be fitted are logged and skipped.
    #[must_use]
    pub fn predict(&self, result: &SimulationResult, steps: usize) -> ForecastResult {
        let mut predictions = IndexMap::new();
        for (name, variable) in result.iter() {
            if variable.series.len() < 2 {
                continue;
            }
            match self.strategy.forecast(&variable.series, steps) {
                Some(forecast) => {
                    predictions.insert(name.clone(), forecast);
                }
                None => {
                    log_opt(
                        self.telemetry.as_ref(),
                        LogLevel::Warn,
                        "forecast.variable.skipped",
                        json!({ "variable": name, "mode": self.mode() }),
                    );
                }
            }
        }
        ForecastResult {
            predictions,
            steps,
            is_fallback: self.mode().is_fallback(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdlab_engine::{DisplayMetadata, RunMode, VariableResult};

    fn result(series: &[(&str, Vec<f64>, Vec<f64>)]) -> SimulationResult {
        SimulationResult::from_variables(
            RunMode::Defaults,
            series.iter().map(|(name, times, values)| {
                VariableResult::new(
                    *name,
                    Series::new(times.clone(), values.clone()).unwrap(),
                    DisplayMetadata::fallback(name),
                    10,
                )
            }),
        )
    }

    #[test]
    fn naive_holds_last_difference() {
        let data = result(&[("stock", vec![0.0, 1.0, 2.0], vec![10.0, 12.0, 14.0])]);
        let forecast = Forecaster::with_mode(ForecastMode::Naive, None).predict(&data, 2);
        assert!(forecast.is_fallback);
        let stock = &forecast.predictions["stock"];
        assert_eq!(stock.predicted_values, vec![16.0, 18.0]);
        assert_eq!(stock.future_times, vec![3.0, 4.0]);
        assert!(stock.confidence_lower.is_none());
        assert_eq!(stock.trend, Trend::Increasing);
    }

    #[test]
    fn regression_fits_line_with_band() {
        let data = result(&[(
            "stock",
            vec![0.0, 2.0, 4.0, 6.0],
            vec![1.0, 5.0, 9.0, 13.0],
        )]);
        let forecast = Forecaster::with_mode(ForecastMode::Regression, None).predict(&data, 3);
        assert!(!forecast.is_fallback);
        let stock = &forecast.predictions["stock"];
        assert!((stock.slope - 2.0).abs() < 1e-12);
        assert_eq!(stock.future_times, vec![8.0, 10.0, 12.0]);
        assert!((stock.predicted_values[0] - 17.0).abs() < 1e-9);
        assert!((stock.r2_score.unwrap() - 1.0).abs() < 1e-12);
        let lower = stock.confidence_lower.as_ref().unwrap();
        assert!((lower[0] - stock.predicted_values[0]).abs() < 1e-9);
    }

    #[test]
    fn flat_series_scores_perfect_fit_and_decreasing_trend() {
        let data = result(&[("flat", vec![0.0, 1.0, 2.0], vec![5.0, 5.0, 5.0])]);
        let forecast = Forecaster::with_mode(ForecastMode::Regression, None).predict(&data, 1);
        let flat = &forecast.predictions["flat"];
        assert_eq!(flat.r2_score, Some(1.0));
        assert_eq!(flat.trend, Trend::Decreasing);
        assert_eq!(flat.predicted_values, vec![5.0]);
    }

    #[test]
    fn imperfect_fit_of_flat_target_scores_zero() {
        let fit = LinearFit {
            slope: 1.0,
            intercept: 0.0,
        };
        assert_eq!(fit.r2(&[0.0, 1.0], &[3.0, 3.0]), 0.0);
    }

    #[test]
    fn short_series_are_skipped() {
        let data = result(&[
            ("single", vec![0.0], vec![1.0]),
            ("pair", vec![0.0, 1.0], vec![1.0, 3.0]),
        ]);
        let forecast = Forecaster::new(None).predict(&data, 1);
        assert!(!forecast.predictions.contains_key("single"));
        assert!(forecast.predictions.contains_key("pair"));
    }
}
