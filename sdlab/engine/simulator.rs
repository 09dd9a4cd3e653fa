use std::sync::Arc;

use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    error::SimulationError,
    metadata::{MetadataSource, VariableMetadata},
    model::{ModelEngine, ModelLoader, RawTable, CONTROL_COLUMNS},
    series::{ParameterSet, RunMode, Series, SimulationResult, VariableResult},
    telemetry::{event_opt, log_opt, LabTelemetry},
};

/// Maximum number of names offered in "did you mean" and availability hints.
pub const HINT_LIMIT: usize = 15;

/// Loads the model, runs it once (or twice on fallback) and extracts the
/// metadata-listed variables.
pub struct ModelRunner {
    loader: Arc<dyn ModelLoader>,
    metadata: Arc<dyn MetadataSource>,
    preview_len: usize,
    telemetry: Option<LabTelemetry>,
}

impl ModelRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        metadata: Arc<dyn MetadataSource>,
        preview_len: usize,
        telemetry: Option<LabTelemetry>,
    ) -> Self {
        Self {
            loader,
            metadata,
            preview_len,
            telemetry,
        }
    }

    /// Preview rows kept per variable.
    #[must_use]
    pub const fn preview_len(&self) -> usize {
        self.preview_len
    }

    /// Runs the model with `overrides` and extracts every metadata variable.
    pub fn run(&self, overrides: &ParameterSet) -> Result<SimulationResult, SimulationError> {
        self.run_with_table(overrides).map(|(result, _)| result)
    }

    /// Like [`Self::run`], also returning the full raw table the variables
    /// were extracted from.
    pub fn run_with_table(
        &self,
        overrides: &ParameterSet,
    ) -> Result<(SimulationResult, RawTable), SimulationError> {
        let records = self
            .metadata
            .fetch()
            .map_err(|err| SimulationError::Configuration(format!("variable metadata: {err:#}")))?;
        let model = self
            .loader
            .load()
            .map_err(|err| SimulationError::Configuration(err.to_string()))?;
        log_opt(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "simulation.run.start",
            json!({
                "model": model.label(),
                "overrides": overrides.len(),
                "variables": records.len(),
            }),
        );
        let (table, run_mode) = self.solve(model.as_ref(), overrides)?;
        let variables = records
            .iter()
            .map(|record| self.extract(&table, record, model.label()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((SimulationResult::from_variables(run_mode, variables), table))
    }

    fn solve(
        &self,
        model: &dyn ModelEngine,
        overrides: &ParameterSet,
    ) -> Result<(RawTable, RunMode), SimulationError> {
        if overrides.is_empty() {
            return model
                .run(overrides)
                .map(|table| (table, RunMode::Defaults))
                .map_err(|err| SimulationError::Solver {
                    message: err.to_string(),
                    default_run_failed: false,
                });
        }
        match model.run(overrides) {
            Ok(table) => Ok((table, RunMode::Overrides)),
            Err(first) => {
                log_opt(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "simulation.run.fallback",
                    json!({ "model": model.label(), "error": first.to_string() }),
                );
                event_opt(
                    self.telemetry.as_ref(),
                    "simulation.fallback",
                    json!({ "model": model.label(), "error": first.to_string() }),
                );
                model
                    .run(&ParameterSet::new())
                    .map(|table| (table, RunMode::DefaultsAfterFallback))
                    .map_err(|second| SimulationError::Solver {
                        message: format!("{first}; default run: {second}"),
                        default_run_failed: true,
                    })
            }
        }
    }

    fn extract(
        &self,
        table: &RawTable,
        record: &VariableMetadata,
        model: &str,
    ) -> Result<VariableResult, SimulationError> {
        let Some(column) = table.column(&record.variable_name) else {
            return Err(not_found(table, &record.variable_name, model));
        };
        let series = Series::new(table.time().to_vec(), column.to_vec()).map_err(|err| {
            SimulationError::Solver {
                message: format!("column \"{}\": {err}", record.variable_name),
                default_run_failed: false,
            }
        })?;
        Ok(VariableResult::new(
            record.variable_name.clone(),
            series,
            record.display(),
            self.preview_len,
        ))
    }
}

fn not_found(table: &RawTable, variable: &str, model: &str) -> SimulationError {
    let wanted = variable.to_lowercase();
    let suggestions = table
        .column_names()
        .filter(|name| {
            let name = name.to_lowercase();
            name.contains(&wanted) || wanted.contains(&name)
        })
        .take(HINT_LIMIT)
        .map(str::to_string)
        .collect();
    let available = table
        .column_names()
        .filter(|name| !CONTROL_COLUMNS.contains(name))
        .take(HINT_LIMIT)
        .map(str::to_string)
        .collect();
    SimulationError::VariableNotFound {
        variable: variable.to_string(),
        model: model.to_string(),
        suggestions,
        available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ModelError,
        metadata::{FileMetadataSource, StaticMetadataSource},
        model::{FileModelLoader, StaticModelLoader, StockFlowModel},
    };
    use indexmap::indexmap;
    use shared_event_bus::MemoryEventBus;
    use std::path::Path;
    use tempfile::tempdir;

    const GROWTH: &str = r#"
        [control]
        initial_time = 0
        final_time = 3
        time_step = 1

        [constants]
        rate = 1

        [auxiliaries]
        growth = "Stock / rate"

        [stocks.Stock]
        initial = 1
        inflows = ["growth"]
    "#;

    fn record(variable: &str) -> VariableMetadata {
        VariableMetadata {
            id: 1,
            title: variable.to_string(),
            x_label: "Meses".into(),
            y_label: "Valor".into(),
            position: 1,
            variable_name: variable.to_string(),
            color_name: "#f97316".into(),
        }
    }

    fn runner(model: &str, variables: &[&str], telemetry: Option<LabTelemetry>) -> ModelRunner {
        let model = StockFlowModel::from_toml("growth.toml", model).unwrap();
        ModelRunner::new(
            Arc::new(StaticModelLoader::new(Arc::new(model))),
            Arc::new(StaticMetadataSource::new(
                variables.iter().map(|v| record(v)).collect(),
            )),
            2,
            telemetry,
        )
    }

    fn models_dir() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../models")
    }

    #[test]
    fn runs_shipped_forrester_model() {
        let dir = models_dir();
        let runner = ModelRunner::new(
            Arc::new(FileModelLoader::new(dir.join("forrester.toml"))),
            Arc::new(FileMetadataSource::new(dir.join("metadata.toml"))),
            10,
            None,
        );
        let result = runner.run(&ParameterSet::new()).unwrap();
        assert_eq!(result.run_mode, RunMode::Defaults);
        assert_eq!(result.len(), 5);
        for (_, variable) in result.iter() {
            assert_eq!(variable.series.len(), 101);
            assert_eq!(variable.preview.len(), 10);
        }
        let police = result.get("Policias en servicio").unwrap();
        assert_eq!(police.series.values()[0], 10000.0);
        assert_eq!(police.series.values()[1], 11700.0);
    }

    #[test]
    fn applies_overrides() {
        let result = runner(GROWTH, &["Stock"], None)
            .run(&indexmap! { "rate".to_string() => 2.0 })
            .unwrap();
        assert_eq!(result.run_mode, RunMode::Overrides);
        assert_eq!(
            result.get("Stock").unwrap().series.values(),
            &[1.0, 1.5, 2.25, 3.375]
        );
    }

    #[test]
    fn breaking_override_falls_back_to_defaults() {
        let tmp = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = LabTelemetry::builder("runner")
            .log_path(tmp.path().join("runner.log"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let result = runner(GROWTH, &["Stock"], Some(telemetry))
            .run(&indexmap! { "rate".to_string() => 0.0 })
            .unwrap();
        assert_eq!(result.run_mode, RunMode::DefaultsAfterFallback);
        assert_eq!(
            result.get("Stock").unwrap().series.values(),
            &[1.0, 2.0, 4.0, 8.0]
        );
        assert_eq!(bus.events_of_type("simulation.fallback").len(), 1);
        let log = std::fs::read_to_string(tmp.path().join("runner.log")).unwrap();
        assert!(log.contains("simulation.run.fallback"));
    }

    #[test]
    fn runaway_time_controls_fall_back_to_defaults() {
        let runner = runner(GROWTH, &["Stock"], None);
        for overrides in [
            indexmap! { "FINAL TIME".to_string() => 1e30 },
            indexmap! { "TIME STEP".to_string() => 1e-300 },
        ] {
            let result = runner.run(&overrides).unwrap();
            assert_eq!(result.run_mode, RunMode::DefaultsAfterFallback);
            assert_eq!(result.get("Stock").unwrap().series.len(), 4);
        }
    }

    #[test]
    fn broken_default_model_reports_default_failure() {
        let broken = GROWTH.replace("rate = 1", "rate = 0");
        let err = runner(&broken, &["Stock"], None)
            .run(&indexmap! { "rate".to_string() => 0.0 })
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Solver {
                default_run_failed: true,
                ..
            }
        ));
        let err = runner(&broken, &["Stock"], None)
            .run(&ParameterSet::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Solver {
                default_run_failed: false,
                ..
            }
        ));
    }

    #[test]
    fn missing_column_lists_hints() {
        let err = runner(GROWTH, &["stock level"], None)
            .run(&ParameterSet::new())
            .unwrap_err();
        match err {
            SimulationError::VariableNotFound {
                suggestions,
                available,
                model,
                ..
            } => {
                assert_eq!(suggestions, vec!["Stock"]);
                assert_eq!(available, vec!["rate", "Stock", "growth"]);
                assert_eq!(model, "growth.toml");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn hints_are_capped() {
        let gauges: String = (1..=20)
            .map(|i| format!("\"Stock gauge {i}\" = {i}\n"))
            .collect();
        let model = GROWTH.replace("rate = 1", &format!("rate = 1\n{gauges}"));
        let err = runner(&model, &["stock"], None)
            .run(&ParameterSet::new())
            .unwrap_err();
        match err {
            SimulationError::VariableNotFound {
                suggestions,
                available,
                ..
            } => {
                assert_eq!(suggestions.len(), HINT_LIMIT);
                assert_eq!(suggestions[0], "Stock gauge 1");
                assert_eq!(available.len(), HINT_LIMIT);
                assert_eq!(available[0], "rate");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_model_file_is_configuration_error() {
        let dir = tempdir().unwrap();
        let runner = ModelRunner::new(
            Arc::new(FileModelLoader::new(dir.path().join("absent.toml"))),
            Arc::new(StaticMetadataSource::new(vec![record("Stock")])),
            10,
            None,
        );
        let err = runner.run(&ParameterSet::new()).unwrap_err();
        match err {
            SimulationError::Configuration(message) => {
                assert!(message.contains("absent.toml"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(ModelError::Missing(dir.path().join("x")).to_string().contains("does not exist"));
    }
}
