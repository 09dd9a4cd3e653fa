use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::SeriesError;

/// Named numeric overrides applied before a run. Unknown keys are ignored by
/// the model; missing keys keep the model defaults.
pub type ParameterSet = IndexMap<String, f64>;

/// Time-indexed values produced by one run. Time is strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesColumns", into = "SeriesColumns")]
pub struct Series {
    times: Vec<f64>,
    values: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct SeriesColumns {
    time: Vec<f64>,
    value: Vec<f64>,
}

impl TryFrom<SeriesColumns> for Series {
    type Error = SeriesError;

    fn try_from(columns: SeriesColumns) -> Result<Self, Self::Error> {
        Self::new(columns.time, columns.value)
    }
}

impl From<Series> for SeriesColumns {
    fn from(series: Series) -> Self {
        Self {
            time: series.times,
            value: series.values,
        }
    }
}

impl Series {
    /// Builds a series, rejecting mismatched lengths and non-increasing time.
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self, SeriesError> {
        if times.len() != values.len() {
            return Err(SeriesError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }
        if let Some(idx) = times.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(SeriesError::NonIncreasingTime(idx + 1));
        }
        Ok(Self { times, values })
    }

    /// Time column.
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Value column.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the series has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates `(time, value)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    /// Difference between the last two time points, if there are two.
    #[must_use]
    pub fn last_step(&self) -> Option<f64> {
        match self.times.as_slice() {
            [.., prev, last] => Some(last - prev),
            _ => None,
        }
    }
}

/// How a variable is labelled when displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    /// Chart title.
    pub title: String,
    /// X axis label.
    pub x_label: String,
    /// Y axis label.
    pub y_label: String,
    /// Line color (CSS color string).
    pub color: String,
}

impl DisplayMetadata {
    /// Fallback labels used when a variable carries no metadata of its own.
    #[must_use]
    pub fn fallback(name: &str) -> Self {
        Self {
            title: name.to_string(),
            x_label: "Tiempo".into(),
            y_label: "Valor".into(),
            color: "#3b82f6".into(),
        }
    }
}

/// One row of the preview table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRow {
    /// Time of the row.
    pub time: f64,
    /// Main value.
    pub value: f64,
    /// Component values, for composite indicators.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub components: IndexMap<String, f64>,
}

/// Full output of one variable: series, preview rows and display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableResult {
    /// Variable (column) name.
    pub name: String,
    /// Full series.
    pub series: Series,
    /// First rows of the series.
    pub preview: Vec<PreviewRow>,
    /// Labels and color.
    pub display: DisplayMetadata,
    /// Named sub-series a composite indicator was built from.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub components: IndexMap<String, Series>,
}

impl VariableResult {
    /// Builds a plain variable with a preview of the first `preview_len` points.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        series: Series,
        display: DisplayMetadata,
        preview_len: usize,
    ) -> Self {
        Self::with_components(name, series, display, IndexMap::new(), preview_len)
    }

    /// Builds a variable that also carries component series.
    #[must_use]
    pub fn with_components(
        name: impl Into<String>,
        series: Series,
        display: DisplayMetadata,
        components: IndexMap<String, Series>,
        preview_len: usize,
    ) -> Self {
        let preview = series
            .points()
            .take(preview_len)
            .enumerate()
            .map(|(idx, (time, value))| PreviewRow {
                time,
                value,
                components: components
                    .iter()
                    .filter_map(|(key, component)| {
                        component.values().get(idx).map(|v| (key.clone(), *v))
                    })
                    .collect(),
            })
            .collect();
        Self {
            name: name.into(),
            series,
            preview,
            display,
            components,
        }
    }
}

/// Which parameters produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Supplied overrides were applied.
    Overrides,
    /// No overrides were supplied.
    Defaults,
    /// Overrides broke the solver and the default run was used instead.
    DefaultsAfterFallback,
}

impl RunMode {
    /// Label for logging.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Overrides => "overrides",
            Self::Defaults => "defaults",
            Self::DefaultsAfterFallback => "defaults_after_fallback",
        }
    }
}

/// Successful output of the simulation pipeline, keyed by variable name in
/// metadata order, followed by derived indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Parameters that actually produced the data.
    pub run_mode: RunMode,
    /// Variables by name.
    pub variables: IndexMap<String, VariableResult>,
}

impl SimulationResult {
    /// Builds a result from variables, keyed by their names.
    #[must_use]
    pub fn from_variables(
        run_mode: RunMode,
        variables: impl IntoIterator<Item = VariableResult>,
    ) -> Self {
        Self {
            run_mode,
            variables: variables
                .into_iter()
                .map(|variable| (variable.name.clone(), variable))
                .collect(),
        }
    }

    /// Looks up a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VariableResult> {
        self.variables.get(name)
    }

    /// Iterates variables in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableResult)> {
        self.variables.iter()
    }

    /// Variable names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// True when no variable was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    #[test]
    fn series_rejects_bad_shapes() {
        assert_eq!(
            Series::new(vec![0.0, 1.0], vec![1.0]).unwrap_err(),
            SeriesError::LengthMismatch { times: 2, values: 1 }
        );
        assert_eq!(
            Series::new(vec![0.0, 1.0, 1.0], vec![1.0, 2.0, 3.0]).unwrap_err(),
            SeriesError::NonIncreasingTime(2)
        );
    }

    #[test]
    fn series_deserialization_validates() {
        let ok: Series = serde_json::from_str(r#"{"time":[0,1],"value":[5,6]}"#).unwrap();
        assert_eq!(ok.last_step(), Some(1.0));
        let bad = serde_json::from_str::<Series>(r#"{"time":[1,0],"value":[5,6]}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn preview_includes_components() {
        let series = Series::new(vec![0.0, 1.0, 2.0], vec![10.0, 20.0, 30.0]).unwrap();
        let ratio = Series::new(vec![0.0, 1.0, 2.0], vec![0.1, 0.2, 0.3]).unwrap();
        let variable = VariableResult::with_components(
            "index",
            series,
            DisplayMetadata::fallback("index"),
            indexmap! { "ratio".to_string() => ratio },
            2,
        );
        assert_eq!(variable.preview.len(), 2);
        assert_eq!(variable.preview[1].components["ratio"], 0.2);
    }
}
