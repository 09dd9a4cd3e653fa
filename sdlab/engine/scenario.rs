use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    error::ScenarioError,
    runtime::Simulate,
    series::{ParameterSet, SimulationResult},
    summary::{summarize, ScenarioMetadata},
    telemetry::{event_opt, log_opt, LabTelemetry},
};

/// Named parameter set with the results it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Identifier, `scenario_YYYYMMDD_HHMMSS[_N]`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free text.
    pub description: String,
    /// Overrides the run used.
    pub parameters: ParameterSet,
    /// Full simulation output.
    pub results: SimulationResult,
    /// Per-variable headline statistics.
    pub metadata: ScenarioMetadata,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Scenario without its results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free text.
    pub description: String,
    /// Overrides the run used.
    pub parameters: ParameterSet,
    /// Per-variable headline statistics.
    pub metadata: ScenarioMetadata,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&Scenario> for ScenarioSummary {
    fn from(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id.clone(),
            name: scenario.name.clone(),
            description: scenario.description.clone(),
            parameters: scenario.parameters.clone(),
            metadata: scenario.metadata.clone(),
            created_at: scenario.created_at,
        }
    }
}

/// Import shape: identical to [`Scenario`] except that `id` may be absent.
#[derive(Deserialize)]
struct ScenarioDocument {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    parameters: ParameterSet,
    results: SimulationResult,
    metadata: ScenarioMetadata,
    created_at: DateTime<Utc>,
}

/// In-memory scenario registry. Insertion ordered; entries are immutable.
pub struct ScenarioStore {
    simulator: Arc<dyn Simulate>,
    scenarios: RwLock<IndexMap<String, Arc<Scenario>>>,
    last_id: Mutex<Option<(String, u32)>>,
    telemetry: Option<LabTelemetry>,
}

impl ScenarioStore {
    /// Creates an empty store running simulations through `simulator`.
    #[must_use]
    pub fn new(simulator: Arc<dyn Simulate>, telemetry: Option<LabTelemetry>) -> Self {
        Self {
            simulator,
            scenarios: RwLock::new(IndexMap::new()),
            last_id: Mutex::new(None),
            telemetry,
        }
    }

    /// Runs a simulation and stores the outcome. Failures store nothing.
    pub fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSet,
    ) -> Result<Arc<Scenario>, ScenarioError> {
        let name = name.into();
        let results = self.simulator.simulate(&parameters).map_err(|err| {
            log_opt(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "scenario.create.failed",
                json!({ "name": name, "error": err.to_string() }),
            );
            err
        })?;
        let metadata = summarize(&results);
        let mut guard = self.scenarios.write();
        let id = self.next_id(&guard);
        let scenario = Arc::new(Scenario {
            id: id.clone(),
            name,
            description: description.into(),
            parameters,
            results,
            metadata,
            created_at: Utc::now(),
        });
        guard.insert(id.clone(), Arc::clone(&scenario));
        drop(guard);
        log_opt(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "scenario.created",
            json!({ "id": id, "name": scenario.name, "run_mode": scenario.results.run_mode.label() }),
        );
        event_opt(
            self.telemetry.as_ref(),
            "scenario.created",
            json!({ "id": id, "name": scenario.name }),
        );
        Ok(scenario)
    }

    /// Looks up a scenario.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Scenario>> {
        self.scenarios.read().get(id).cloned()
    }

    /// Summaries in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<ScenarioSummary> {
        self.scenarios
            .read()
            .values()
            .map(|scenario| ScenarioSummary::from(scenario.as_ref()))
            .collect()
    }

    /// Removes a scenario; false when the id is unknown.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.scenarios.write().shift_remove(id).is_some();
        if removed {
            log_opt(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "scenario.deleted",
                json!({ "id": id }),
            );
            event_opt(self.telemetry.as_ref(), "scenario.deleted", json!({ "id": id }));
        }
        removed
    }

    /// Pretty JSON of a scenario; `None` when the id is unknown.
    #[must_use]
    pub fn export(&self, id: &str) -> Option<String> {
        let scenario = self.get(id)?;
        match serde_json::to_string_pretty(scenario.as_ref()) {
            Ok(text) => Some(text),
            Err(err) => {
                log_opt(
                    self.telemetry.as_ref(),
                    LogLevel::Error,
                    "scenario.export.failed",
                    json!({ "id": id, "error": err.to_string() }),
                );
                None
            }
        }
    }

    /// Stores a serialized scenario and returns its id. A missing id gets a
    /// fresh one; an existing id is replaced.
    pub fn import(&self, serialized: &str) -> Result<String, ScenarioError> {
        let document: ScenarioDocument = serde_json::from_str(serialized)
            .map_err(|err| ScenarioError::Malformed(err.to_string()))?;
        let mut guard = self.scenarios.write();
        let id = match document.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => self.next_id(&guard),
        };
        let scenario = Scenario {
            id: id.clone(),
            name: document.name,
            description: document.description,
            parameters: document.parameters,
            results: document.results,
            metadata: document.metadata,
            created_at: document.created_at,
        };
        let replaced = guard.insert(id.clone(), Arc::new(scenario)).is_some();
        drop(guard);
        log_opt(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "scenario.imported",
            json!({ "id": id, "replaced": replaced }),
        );
        event_opt(
            self.telemetry.as_ref(),
            "scenario.imported",
            json!({ "id": id, "replaced": replaced }),
        );
        Ok(id)
    }

    /// Scenarios for `ids` in the given order, read under one lock. Unknown
    /// ids are skipped.
    #[must_use]
    pub fn snapshot(&self, ids: &[String]) -> Vec<Arc<Scenario>> {
        let guard = self.scenarios.read();
        ids.iter().filter_map(|id| guard.get(id).cloned()).collect()
    }

    /// Number of stored scenarios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.read().len()
    }

    /// True when the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.read().is_empty()
    }

    /// Generates `scenario_YYYYMMDD_HHMMSS`, suffixing `_2`, `_3`, ... within
    /// the same second. Caller holds the write lock.
    fn next_id(&self, existing: &IndexMap<String, Arc<Scenario>>) -> String {
        let base = Local::now().format("scenario_%Y%m%d_%H%M%S").to_string();
        let mut last = self.last_id.lock();
        let mut counter = match last.as_ref() {
            Some((previous, counter)) if *previous == base => counter + 1,
            _ => 1,
        };
        let mut candidate = numbered(&base, counter);
        while existing.contains_key(&candidate) {
            counter += 1;
            candidate = numbered(&base, counter);
        }
        *last = Some((base, counter));
        candidate
    }
}

fn numbered(base: &str, counter: u32) -> String {
    if counter <= 1 {
        base.to_string()
    } else {
        format!("{base}_{counter}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LabConfig,
        error::SimulationError,
        runtime::SimulationPipeline,
        series::{DisplayMetadata, RunMode, Series, VariableResult},
    };
    use indexmap::indexmap;
    use shared_event_bus::MemoryEventBus;
    use std::collections::HashSet;

    /// Linear growth `level * t` where `level` defaults to 1.
    struct LinearSimulator;

    impl Simulate for LinearSimulator {
        fn simulate(&self, params: &ParameterSet) -> Result<SimulationResult, SimulationError> {
            let level = params.get("level").copied().unwrap_or(1.0);
            if level < 0.0 {
                return Err(SimulationError::Solver {
                    message: "negative level".into(),
                    default_run_failed: true,
                });
            }
            let times = vec![0.0, 1.0, 2.0];
            let values = times.iter().map(|t| level * (t + 1.0)).collect();
            Ok(SimulationResult::from_variables(
                RunMode::Overrides,
                [VariableResult::new(
                    "stock",
                    Series::new(times, values).unwrap(),
                    DisplayMetadata::fallback("stock"),
                    10,
                )],
            ))
        }
    }

    fn store(telemetry: Option<LabTelemetry>) -> ScenarioStore {
        ScenarioStore::new(Arc::new(LinearSimulator), telemetry)
    }

    #[test]
    fn create_get_list_delete() {
        let store = store(None);
        let params = indexmap! { "level".to_string() => 2.0 };
        let scenario = store.create("base", "first", params.clone()).unwrap();
        assert!(scenario.id.starts_with("scenario_"));
        assert_eq!(store.get(&scenario.id).unwrap().parameters, params);
        assert_eq!(scenario.metadata["stock"].final_value, 6.0);
        assert_eq!(scenario.metadata["stock"].change_percent, 200.0);

        let second = store.create("alt", "", ParameterSet::new()).unwrap();
        let names: Vec<_> = store.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["base", "alt"]);

        assert!(!store.delete("scenario_unknown"));
        assert!(store.delete(&second.id));
        assert!(store.get(&second.id).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failed_simulation_stores_nothing() {
        let store = store(None);
        let err = store
            .create("broken", "", indexmap! { "level".to_string() => -1.0 })
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Simulation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn ids_within_one_second_are_distinct() {
        let store = store(None);
        let ids: HashSet<_> = (0..20)
            .map(|_| store.create("s", "", ParameterSet::new()).unwrap().id.clone())
            .collect();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn export_import_round_trip() {
        let store = store(None);
        let scenario = store
            .create("base", "d", indexmap! { "level".to_string() => 3.0 })
            .unwrap();
        let exported = store.export(&scenario.id).unwrap();
        assert!(store.export("missing").is_none());

        let other = self::store(None);
        let id = other.import(&exported).unwrap();
        assert_eq!(id, scenario.id);
        let imported = other.get(&id).unwrap();
        assert_eq!(imported.metadata, scenario.metadata);
        assert_eq!(imported.parameters, scenario.parameters);

        // Importing again replaces the entry instead of duplicating it.
        other.import(&exported).unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn forrester_scenarios_survive_export_import() {
        let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let config = LabConfig {
            model_path: root.join("models/forrester.toml"),
            metadata_path: root.join("models/metadata.toml"),
            ..LabConfig::default()
        };
        let pipeline = SimulationPipeline::builder().config(&config).build().unwrap();
        let store = ScenarioStore::new(Arc::new(pipeline), None);
        let other = self::store(None);
        for rate in [0.11, 0.123_456_789, 0.2, 0.3333] {
            let scenario = store
                .create(
                    "immigration",
                    "",
                    indexmap! { "tasa de inmigrantes".to_string() => rate },
                )
                .unwrap();
            let id = other.import(&store.export(&scenario.id).unwrap()).unwrap();
            let imported = other.get(&id).unwrap();
            assert_eq!(imported.metadata, scenario.metadata);
            assert_eq!(*imported, *scenario);
        }
    }

    #[test]
    fn import_assigns_missing_id_and_rejects_garbage() {
        let store = store(None);
        let scenario = store.create("base", "", ParameterSet::new()).unwrap();
        let mut value = serde_json::to_value(scenario.as_ref()).unwrap();
        value.as_object_mut().unwrap().remove("id");
        let id = store.import(&value.to_string()).unwrap();
        assert_ne!(id, scenario.id);
        assert!(id.starts_with("scenario_"));
        assert_eq!(store.len(), 2);

        assert!(matches!(
            store.import("{\"name\": 1}"),
            Err(ScenarioError::Malformed(_))
        ));
        assert!(matches!(
            store.import(r#"{"name":"x","parameters":{},"results":{"run_mode":"defaults","variables":{"v":{"name":"v","series":{"time":[1,0],"value":[1,2]},"preview":[],"display":{"title":"v","x_label":"x","y_label":"y","color":"c"}}}},"metadata":{},"created_at":"2024-01-01T00:00:00Z"}"#),
            Err(ScenarioError::Malformed(_))
        ));
    }

    #[test]
    fn lifecycle_events_are_published() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = LabTelemetry::builder("scenario-store")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let store = store(Some(telemetry));
        let scenario = store.create("base", "", ParameterSet::new()).unwrap();
        let exported = store.export(&scenario.id).unwrap();
        store.delete(&scenario.id);
        store.import(&exported).unwrap();
        assert_eq!(bus.events_of_type("scenario.created").len(), 1);
        assert_eq!(bus.events_of_type("scenario.deleted").len(), 1);
        assert_eq!(bus.events_of_type("scenario.imported").len(), 1);
    }
}
