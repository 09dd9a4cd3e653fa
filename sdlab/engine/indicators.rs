//! Composite indicators derived from raw model output.

use indexmap::IndexMap;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    error::SeriesError,
    model::RawTable,
    series::{DisplayMetadata, Series, SimulationResult, VariableResult},
    telemetry::{log_opt, LabTelemetry},
};

/// Weight of the inverted at-large ratio.
pub const AT_LARGE_WEIGHT: f64 = 0.6;
/// Weight of the resolution ratio.
pub const RESOLVED_WEIGHT: f64 = 0.4;

const EPSILON: f64 = 1e-9;

/// A derived output computed from raw model columns.
pub trait CompositeIndicator: Send + Sync {
    /// Name of the derived variable.
    fn name(&self) -> &str;

    /// Computes the indicator, or `None` when a required column is absent
    /// from the table.
    fn derive(
        &self,
        table: &RawTable,
        preview_len: usize,
    ) -> Result<Option<VariableResult>, SeriesError>;
}

/// Column names feeding the security index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityInputs {
    /// Population at large (A).
    pub at_large: String,
    /// Active capacity (B).
    pub capacity: String,
    /// Resolved count (C).
    pub resolved: String,
}

impl Default for SecurityInputs {
    fn default() -> Self {
        Self {
            at_large: "Delincuentes en la calle".into(),
            capacity: "Policias en servicio".into(),
            resolved: "Delincuentes arrestados".into(),
        }
    }
}

/// 0-100 security index: `(0.6 * (1 - norm(A/B)) + 0.4 * norm(C/A)) * 100`.
#[derive(Debug, Clone)]
pub struct SecurityIndex {
    name: String,
    inputs: SecurityInputs,
}

impl Default for SecurityIndex {
    fn default() -> Self {
        Self::new(SecurityInputs::default())
    }
}

impl SecurityIndex {
    /// Display name of the derived variable.
    pub const DEFAULT_NAME: &'static str = "Indicadores de Seguridad";
    /// Component key of A/B.
    pub const AT_LARGE_RATIO: &'static str = "Delincuentes / Policía";
    /// Component key of C/A.
    pub const RESOLVED_RATIO: &'static str = "Fracción arrestos";

    /// Creates the indicator over the given columns.
    #[must_use]
    pub fn new(inputs: SecurityInputs) -> Self {
        Self {
            name: Self::DEFAULT_NAME.into(),
            inputs,
        }
    }

    /// Input columns.
    #[must_use]
    pub const fn inputs(&self) -> &SecurityInputs {
        &self.inputs
    }

    fn display(&self) -> DisplayMetadata {
        DisplayMetadata {
            title: self.name.clone(),
            x_label: "Meses".into(),
            y_label: "Valor".into(),
            color: "#3b82f6".into(),
        }
    }
}

impl CompositeIndicator for SecurityIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn derive(
        &self,
        table: &RawTable,
        preview_len: usize,
    ) -> Result<Option<VariableResult>, SeriesError> {
        let (Some(a), Some(b), Some(c)) = (
            table.column(&self.inputs.at_large),
            table.column(&self.inputs.capacity),
            table.column(&self.inputs.resolved),
        ) else {
            return Ok(None);
        };
        let times = table.time().to_vec();

        let ratio_at_large: Vec<f64> = a
            .iter()
            .zip(b)
            .map(|(a, b)| if *b == 0.0 { 0.0 } else { a / b })
            .collect();
        let ratio_resolved: Vec<f64> = c
            .iter()
            .zip(a)
            .map(|(c, a)| {
                let value = c / (a + EPSILON);
                if value.is_finite() {
                    value
                } else {
                    0.0
                }
            })
            .collect();
        let index: Vec<f64> = min_max(&ratio_at_large)
            .zip(min_max(&ratio_resolved))
            .map(|(r1, r2)| {
                (AT_LARGE_WEIGHT.mul_add(1.0 - r1, RESOLVED_WEIGHT * r2) * 100.0).clamp(0.0, 100.0)
            })
            .collect();

        let mut components = IndexMap::new();
        components.insert(
            Self::AT_LARGE_RATIO.to_string(),
            Series::new(times.clone(), ratio_at_large)?,
        );
        components.insert(
            Self::RESOLVED_RATIO.to_string(),
            Series::new(times.clone(), ratio_resolved)?,
        );
        Ok(Some(VariableResult::with_components(
            self.name.clone(),
            Series::new(times, index)?,
            self.display(),
            components,
            preview_len,
        )))
    }
}

/// Min-max normalization; a flat series divides by epsilon instead of zero.
fn min_max(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if max > min { max - min } else { EPSILON };
    values.iter().map(move |v| (v - min) / span)
}

/// Appends every applicable indicator, computed from the run's raw table, to
/// its result. Failures are logged and never abort the run.
#[derive(Default)]
pub struct IndicatorDeriver {
    indicators: Vec<Box<dyn CompositeIndicator>>,
    telemetry: Option<LabTelemetry>,
}

impl IndicatorDeriver {
    /// Creates a deriver with no indicators.
    #[must_use]
    pub fn new(telemetry: Option<LabTelemetry>) -> Self {
        Self {
            indicators: Vec::new(),
            telemetry,
        }
    }

    /// Registers an indicator.
    #[must_use]
    pub fn with_indicator(mut self, indicator: impl CompositeIndicator + 'static) -> Self {
        self.indicators.push(Box::new(indicator));
        self
    }

    /// Registers an already boxed indicator.
    #[must_use]
    pub fn with_boxed(mut self, indicator: Box<dyn CompositeIndicator>) -> Self {
        self.indicators.push(indicator);
        self
    }

    /// Number of registered indicators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    /// True when no indicator is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Derives all indicators from `table` into `result`.
    pub fn apply(&self, table: &RawTable, result: &mut SimulationResult, preview_len: usize) {
        for indicator in &self.indicators {
            match indicator.derive(table, preview_len) {
                Ok(Some(variable)) => {
                    result.variables.insert(variable.name.clone(), variable);
                }
                Ok(None) => log_opt(
                    self.telemetry.as_ref(),
                    LogLevel::Debug,
                    "indicator.skipped",
                    json!({ "indicator": indicator.name(), "reason": "missing input" }),
                ),
                Err(err) => log_opt(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "indicator.failed",
                    json!({ "indicator": indicator.name(), "error": err.to_string() }),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::RunMode;

    fn table(a: &[f64], b: &[f64], c: &[f64]) -> RawTable {
        let inputs = SecurityInputs::default();
        let time = (0..a.len()).map(|t| t as f64).collect();
        let mut columns = IndexMap::new();
        columns.insert(inputs.at_large, a.to_vec());
        columns.insert(inputs.capacity, b.to_vec());
        columns.insert(inputs.resolved, c.to_vec());
        RawTable::new(time, columns).unwrap()
    }

    #[test]
    fn security_index_weights_normalized_ratios() {
        let table = table(&[100.0, 50.0], &[10.0, 10.0], &[10.0, 10.0]);
        let index = SecurityIndex::default()
            .derive(&table, 10)
            .unwrap()
            .unwrap();
        let values = index.series.values();
        // t0: nR1 = 1, nR2 = 0; t1: nR1 = 0, nR2 = 1.
        assert!(values[0].abs() < 1e-6);
        assert!((values[1] - 100.0).abs() < 1e-6);
        assert_eq!(index.components.len(), 2);
        assert_eq!(index.preview[0].components.len(), 2);
        assert_eq!(index.display.color, "#3b82f6");
    }

    #[test]
    fn flat_and_zero_inputs_stay_finite() {
        let flat = table(&[5.0, 5.0, 5.0], &[5.0, 5.0, 5.0], &[0.0, 0.0, 0.0]);
        let index = SecurityIndex::default().derive(&flat, 10).unwrap().unwrap();
        assert!(index.series.values().iter().all(|v| v.is_finite()));
        assert!(index.series.values().iter().all(|v| (*v - 60.0).abs() < 1e-9));

        let zero_capacity = table(&[0.0, 4.0], &[0.0, 2.0], &[1.0, 1.0]);
        let index = SecurityIndex::default()
            .derive(&zero_capacity, 10)
            .unwrap()
            .unwrap();
        assert_eq!(index.components[SecurityIndex::AT_LARGE_RATIO].values()[0], 0.0);
    }

    #[test]
    fn deriver_reads_raw_columns_and_skips_missing_ones() {
        let deriver = IndicatorDeriver::new(None).with_indicator(SecurityIndex::default());
        let mut result = SimulationResult::from_variables(RunMode::Defaults, Vec::<VariableResult>::new());

        let mut partial = IndexMap::new();
        partial.insert("Delincuentes en la calle".to_string(), vec![1.0, 2.0]);
        let partial = RawTable::new(vec![0.0, 1.0], partial).unwrap();
        deriver.apply(&partial, &mut result, 10);
        assert!(result.is_empty());

        deriver.apply(&table(&[1.0, 2.0], &[1.0, 1.0], &[0.5, 0.5]), &mut result, 10);
        assert_eq!(result.names().collect::<Vec<_>>(), vec![SecurityIndex::DEFAULT_NAME]);
    }
}
