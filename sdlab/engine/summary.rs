use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::series::{Series, SimulationResult};

/// Headline statistics of one variable over its full series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableSummary {
    /// First value.
    pub initial: f64,
    /// Last value.
    #[serde(rename = "final")]
    pub final_value: f64,
    /// Maximum.
    pub max: f64,
    /// Minimum.
    pub min: f64,
    /// Arithmetic mean.
    pub avg: f64,
    /// `(final - initial) / initial * 100`, or 0 when `initial` is 0.
    pub change_percent: f64,
}

impl VariableSummary {
    /// Summarizes a series; `None` when it is empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(series: &Series) -> Option<Self> {
        let values = series.values();
        let (&initial, &final_value) = (values.first()?, values.last()?);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        let change_percent = if initial == 0.0 {
            0.0
        } else {
            (final_value - initial) / initial * 100.0
        };
        Some(Self {
            initial,
            final_value,
            max,
            min,
            avg,
            change_percent,
        })
    }
}

/// Per-variable summary metadata attached to every scenario.
pub type ScenarioMetadata = IndexMap<String, VariableSummary>;

/// Summarizes every non-empty variable of a result, in result order.
#[must_use]
pub fn summarize(result: &SimulationResult) -> ScenarioMetadata {
    result
        .iter()
        .filter_map(|(name, variable)| {
            VariableSummary::of(&variable.series).map(|summary| (name.clone(), summary))
        })
        .collect()
}
