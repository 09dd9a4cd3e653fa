use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use sdlab_engine::SimulationResult;

use crate::error::AnalyticsError;

/// Pairs with `|r|` above this are reported as significant.
pub const SIGNIFICANCE_THRESHOLD: f64 = 0.7;

/// Sign of a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// `r > 0`.
    Positive,
    /// `r <= 0`.
    Negative,
}

/// Magnitude class of a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strength {
    /// `|r| >= 0.9`.
    #[serde(rename = "very strong")]
    VeryStrong,
    /// `|r| >= 0.7`.
    #[serde(rename = "strong")]
    Strong,
    /// `|r| >= 0.5`.
    #[serde(rename = "moderate")]
    Moderate,
    /// Anything weaker.
    #[serde(rename = "weak")]
    Weak,
}

impl Strength {
    /// Classifies `|r|`.
    #[must_use]
    pub fn of(r: f64) -> Self {
        let r = r.abs();
        if r >= 0.9 {
            Self::VeryStrong
        } else if r >= 0.7 {
            Self::Strong
        } else if r >= 0.5 {
            Self::Moderate
        } else {
            Self::Weak
        }
    }
}

/// A pair above the significance threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificantCorrelation {
    /// First variable (earlier in result order).
    pub variable1: String,
    /// Second variable.
    pub variable2: String,
    /// Pearson coefficient.
    pub correlation: f64,
    /// Sign.
    pub relationship: Relationship,
    /// Magnitude class.
    pub strength: Strength,
}

/// Pairwise Pearson matrix plus the significant pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    /// `matrix[a][b]`; `None` where a column is constant.
    pub correlation_matrix: IndexMap<String, IndexMap<String, Option<f64>>>,
    /// Pairs with `|r| > 0.7`, upper triangle in result order.
    pub significant_correlations: Vec<SignificantCorrelation>,
    /// Generation time.
    pub timestamp: DateTime<Utc>,
}

/// Correlates every pair of variables in a result.
pub fn correlate(result: &SimulationResult) -> Result<CorrelationReport, AnalyticsError> {
    let names: Vec<&String> = result.iter().map(|(name, _)| name).collect();
    let rows = result
        .iter()
        .next()
        .map_or(0, |(_, variable)| variable.series.len());
    if let Some((name, variable)) = result
        .iter()
        .find(|(_, variable)| variable.series.len() != rows)
    {
        return Err(AnalyticsError::MismatchedLengths {
            variable: name.clone(),
            expected: rows,
            found: variable.series.len(),
        });
    }

    let mut data = Array2::<f64>::zeros((rows, names.len()));
    for (col, (_, variable)) in result.iter().enumerate() {
        for (row, value) in variable.series.values().iter().enumerate() {
            data[[row, col]] = *value;
        }
    }
    let coefficients = pearson(&data);

    let mut correlation_matrix = IndexMap::new();
    for (i, a) in names.iter().enumerate() {
        let row = names
            .iter()
            .enumerate()
            .map(|(j, b)| ((*b).clone(), coefficients[i][j]))
            .collect();
        correlation_matrix.insert((*a).clone(), row);
    }

    let mut significant_correlations = Vec::new();
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            let Some(r) = coefficients[i][j] else {
                continue;
            };
            if r.abs() > SIGNIFICANCE_THRESHOLD {
                significant_correlations.push(SignificantCorrelation {
                    variable1: names[i].clone(),
                    variable2: names[j].clone(),
                    correlation: r,
                    relationship: if r > 0.0 {
                        Relationship::Positive
                    } else {
                        Relationship::Negative
                    },
                    strength: Strength::of(r),
                });
            }
        }
    }

    Ok(CorrelationReport {
        correlation_matrix,
        significant_correlations,
        timestamp: Utc::now(),
    })
}

/// Column-wise Pearson coefficients; constant or empty columns yield `None`.
fn pearson(data: &Array2<f64>) -> Vec<Vec<Option<f64>>> {
    let cols = data.ncols();
    let Some(means) = data.mean_axis(Axis(0)) else {
        return vec![vec![None; cols]; cols];
    };
    let centered = data - &means;
    let covariance = centered.t().dot(&centered);
    let constant: Vec<bool> = data
        .columns()
        .into_iter()
        .map(|column| {
            let min = column.iter().copied().fold(f64::INFINITY, f64::min);
            let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            max <= min
        })
        .collect();
    (0..cols)
        .map(|i| {
            (0..cols)
                .map(|j| {
                    if constant[i] || constant[j] {
                        return None;
                    }
                    let r = covariance[[i, j]] / (covariance[[i, i]] * covariance[[j, j]]).sqrt();
                    r.is_finite().then(|| r.clamp(-1.0, 1.0))
                })
                .collect()
        })
        .collect()
}
