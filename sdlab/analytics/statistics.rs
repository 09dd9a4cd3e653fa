use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use sdlab_engine::SimulationResult;

/// Descriptive statistics of one variable (population moments).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableStatistics {
    /// Mean.
    pub mean: f64,
    /// Median.
    pub median: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Minimum.
    pub min: f64,
    /// Maximum.
    pub max: f64,
    /// `max - min`.
    pub range: f64,
    /// Population variance.
    pub variance: f64,
}

impl VariableStatistics {
    /// Statistics of `values`; `None` when empty.
    #[must_use]
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mean = mean(values);
        let variance = variance(values, mean);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean,
            median: median(values),
            std: variance.sqrt(),
            min,
            max,
            range: max - min,
            variance,
        })
    }
}

/// Statistics for every non-empty variable, in result order.
#[must_use]
pub fn statistics(result: &SimulationResult) -> IndexMap<String, VariableStatistics> {
    result
        .iter()
        .filter_map(|(name, variable)| {
            VariableStatistics::of(variable.series.values()).map(|stats| (name.clone(), stats))
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn variance(values: &[f64], mean: f64) -> f64 {
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    variance(values, mean(values)).sqrt()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_moments() {
        let stats = VariableStatistics::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.median, 4.5);
        assert_eq!(stats.variance, 4.0);
        assert_eq!(stats.std, 2.0);
        assert_eq!(stats.range, 7.0);
    }

    #[test]
    fn odd_length_median_and_empty_input() {
        assert_eq!(VariableStatistics::of(&[3.0, 1.0, 2.0]).unwrap().median, 2.0);
        assert!(VariableStatistics::of(&[]).is_none());
    }
}
