use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::ScenarioError,
    scenario::{ScenarioStore, ScenarioSummary},
    series::{DisplayMetadata, Series},
};

/// One scenario's contribution to a compared variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSeries {
    /// Scenario id.
    pub scenario_id: String,
    /// Scenario name.
    pub scenario_name: String,
    /// Full series.
    pub series: Series,
    /// Labels and color.
    pub display: DisplayMetadata,
}

/// Scenarios aligned per variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Compared scenarios in caller order.
    pub scenarios: Vec<ScenarioSummary>,
    /// Union of variable names, first-seen order.
    pub variables: Vec<String>,
    /// Per variable, every scenario that produced it.
    pub comparison_data: IndexMap<String, Vec<ComparisonSeries>>,
}

/// Compares the given scenarios. Fails only for an empty id list; unknown ids
/// are skipped.
pub fn compare(store: &ScenarioStore, ids: &[String]) -> Result<ComparisonResult, ScenarioError> {
    if ids.is_empty() {
        return Err(ScenarioError::EmptyComparison);
    }
    let scenarios = store.snapshot(ids);
    let mut comparison_data: IndexMap<String, Vec<ComparisonSeries>> = IndexMap::new();
    for scenario in &scenarios {
        for (name, variable) in scenario.results.iter() {
            comparison_data
                .entry(name.clone())
                .or_default()
                .push(ComparisonSeries {
                    scenario_id: scenario.id.clone(),
                    scenario_name: scenario.name.clone(),
                    series: variable.series.clone(),
                    display: variable.display.clone(),
                });
        }
    }
    Ok(ComparisonResult {
        scenarios: scenarios
            .iter()
            .map(|scenario| ScenarioSummary::from(scenario.as_ref()))
            .collect(),
        variables: comparison_data.keys().cloned().collect(),
        comparison_data,
    })
}
