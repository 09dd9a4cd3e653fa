use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

use crate::{
    config::LabConfig,
    error::SimulationError,
    indicators::{CompositeIndicator, IndicatorDeriver, SecurityIndex},
    metadata::{FileMetadataSource, MetadataSource},
    model::{FileModelLoader, ModelLoader},
    series::{ParameterSet, SimulationResult},
    simulator::ModelRunner,
    telemetry::{event_opt, log_opt, LabTelemetry},
};

/// Anything that turns a parameter set into a simulation result.
pub trait Simulate: Send + Sync {
    /// Runs one simulation.
    fn simulate(&self, params: &ParameterSet) -> Result<SimulationResult, SimulationError>;
}

/// Model run followed by indicator derivation.
pub struct SimulationPipeline {
    runner: ModelRunner,
    deriver: IndicatorDeriver,
    telemetry: Option<LabTelemetry>,
}

impl SimulationPipeline {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> SimulationPipelineBuilder {
        SimulationPipelineBuilder::default()
    }

    /// Returns telemetry handle.
    #[must_use]
    pub fn telemetry(&self) -> Option<&LabTelemetry> {
        self.telemetry.as_ref()
    }
}

impl Simulate for SimulationPipeline {
    fn simulate(&self, params: &ParameterSet) -> Result<SimulationResult, SimulationError> {
        let (mut result, table) = match self.runner.run_with_table(params) {
            Ok(output) => output,
            Err(err) => {
                log_opt(
                    self.telemetry.as_ref(),
                    LogLevel::Error,
                    "simulation.run.failed",
                    json!({ "error": err.to_string() }),
                );
                return Err(err);
            }
        };
        self.deriver.apply(&table, &mut result, self.runner.preview_len());
        log_opt(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "simulation.run.complete",
            json!({
                "run_mode": result.run_mode.label(),
                "variables": result.len(),
            }),
        );
        event_opt(
            self.telemetry.as_ref(),
            "simulation.completed",
            json!({
                "run_mode": result.run_mode.label(),
                "variables": result.names().collect::<Vec<_>>(),
            }),
        );
        Ok(result)
    }
}

/// Builder for `SimulationPipeline`.
pub struct SimulationPipelineBuilder {
    loader: Option<Arc<dyn ModelLoader>>,
    metadata: Option<Arc<dyn MetadataSource>>,
    preview_len: usize,
    telemetry: Option<LabTelemetry>,
    config: Option<LabConfig>,
    indicators: Vec<Box<dyn CompositeIndicator>>,
    default_indicators: bool,
}

impl Default for SimulationPipelineBuilder {
    fn default() -> Self {
        Self {
            loader: None,
            metadata: None,
            preview_len: 10,
            telemetry: None,
            config: None,
            indicators: Vec::new(),
            default_indicators: true,
        }
    }
}

impl SimulationPipelineBuilder {
    /// Wires model, metadata, preview length, indicators and telemetry sinks
    /// from a configuration. Explicit setters called afterwards win.
    #[must_use]
    pub fn config(mut self, config: &LabConfig) -> Self {
        self.loader = Some(Arc::new(FileModelLoader::new(&config.model_path)));
        self.metadata = Some(Arc::new(FileMetadataSource::new(&config.metadata_path)));
        self.preview_len = config.preview_len;
        self.default_indicators = false;
        if config.security_index.enabled {
            self.indicators
                .push(Box::new(SecurityIndex::new(config.security_index.inputs())));
        }
        self.config = Some(config.clone());
        self
    }

    /// Sets the model loader.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Sets the metadata source.
    #[must_use]
    pub fn metadata(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Preview rows per variable.
    #[must_use]
    pub const fn preview_len(mut self, rows: usize) -> Self {
        self.preview_len = rows;
        self
    }

    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: LabTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Registers an indicator; replaces the default security index.
    #[must_use]
    pub fn indicator(mut self, indicator: impl CompositeIndicator + 'static) -> Self {
        self.default_indicators = false;
        self.indicators.push(Box::new(indicator));
        self
    }

    /// Disables every indicator.
    #[must_use]
    pub fn without_indicators(mut self) -> Self {
        self.default_indicators = false;
        self.indicators.clear();
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> Result<SimulationPipeline> {
        let loader = self
            .loader
            .context("simulation pipeline requires a model loader")?;
        let metadata = self
            .metadata
            .context("simulation pipeline requires a metadata source")?;
        let telemetry = match (self.telemetry, &self.config) {
            (Some(telemetry), _) => Some(telemetry),
            (None, Some(config)) => telemetry_from_config(config)?,
            (None, None) => None,
        };
        let mut deriver = IndicatorDeriver::new(telemetry.clone());
        if self.default_indicators {
            deriver = deriver.with_indicator(SecurityIndex::default());
        }
        for indicator in self.indicators {
            deriver = deriver.with_boxed(indicator);
        }
        Ok(SimulationPipeline {
            runner: ModelRunner::new(loader, metadata, self.preview_len.max(1), telemetry.clone()),
            deriver,
            telemetry,
        })
    }
}

/// Builds telemetry for the configured sinks; `None` when none is set.
pub fn telemetry_from_config(config: &LabConfig) -> Result<Option<LabTelemetry>> {
    if config.log_path.is_none() && config.event_log_path.is_none() {
        return Ok(None);
    }
    let mut builder = LabTelemetry::builder("sdlab").min_level(config.log_level);
    if let Some(path) = &config.log_path {
        builder = builder.log_path(path);
    }
    if let Some(path) = &config.event_log_path {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    builder.build().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::StaticMetadataSource, metadata::VariableMetadata, series::RunMode};
    use shared_event_bus::MemoryEventBus;
    use std::path::Path;
    use tempfile::tempdir;

    fn shipped_config() -> LabConfig {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        LabConfig {
            model_path: root.join("models/forrester.toml"),
            metadata_path: root.join("models/metadata.toml"),
            ..LabConfig::default()
        }
    }

    #[test]
    fn pipeline_adds_security_index() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = LabTelemetry::builder("pipeline")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let pipeline = SimulationPipeline::builder()
            .config(&shipped_config())
            .telemetry(telemetry)
            .build()
            .unwrap();
        let result = pipeline.simulate(&ParameterSet::new()).unwrap();
        let index = result.get(SecurityIndex::DEFAULT_NAME).unwrap();
        assert_eq!(index.series.len(), 101);
        assert!(index
            .series
            .values()
            .iter()
            .all(|v| (0.0..=100.0).contains(v)));
        assert_eq!(result.names().last(), Some(SecurityIndex::DEFAULT_NAME));
        assert_eq!(bus.events_of_type("simulation.completed").len(), 1);
    }

    #[test]
    fn security_index_uses_columns_outside_metadata() {
        let config = shipped_config();
        let record = |position: i32, name: &str| VariableMetadata {
            id: 1,
            title: name.to_string(),
            x_label: "Meses".into(),
            y_label: "Personas".into(),
            position,
            variable_name: name.to_string(),
            color_name: "#ef4444".into(),
        };
        let pipeline = SimulationPipeline::builder()
            .config(&config)
            .metadata(Arc::new(StaticMetadataSource::new(vec![
                record(1, "Delincuentes en la calle"),
                record(2, "Policias en servicio"),
            ])))
            .build()
            .unwrap();
        let result = pipeline.simulate(&ParameterSet::new()).unwrap();
        assert!(result.get("Delincuentes arrestados").is_none());
        let index = result.get(SecurityIndex::DEFAULT_NAME).unwrap();
        assert_eq!(index.series.len(), 101);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn disabled_indicator_is_not_derived() {
        let mut config = shipped_config();
        config.security_index.enabled = false;
        let pipeline = SimulationPipeline::builder().config(&config).build().unwrap();
        let result = pipeline.simulate(&ParameterSet::new()).unwrap();
        assert!(result.get(SecurityIndex::DEFAULT_NAME).is_none());
        assert_eq!(result.run_mode, RunMode::Defaults);
    }

    #[test]
    fn config_sinks_receive_logs_and_events() {
        let dir = tempdir().unwrap();
        let mut config = shipped_config();
        config.log_path = Some(dir.path().join("logs/sdlab.jsonl"));
        config.event_log_path = Some(dir.path().join("logs/events.jsonl"));
        let pipeline = SimulationPipeline::builder().config(&config).build().unwrap();
        pipeline.simulate(&ParameterSet::new()).unwrap();
        let log = std::fs::read_to_string(dir.path().join("logs/sdlab.jsonl")).unwrap();
        assert!(log.contains("simulation.run.complete"));
        let events = std::fs::read_to_string(dir.path().join("logs/events.jsonl")).unwrap();
        assert!(events.contains("simulation.completed"));
    }

    #[test]
    fn builder_requires_sources() {
        assert!(SimulationPipeline::builder().build().is_err());
        let pipeline = SimulationPipeline::builder()
            .loader(Arc::new(FileModelLoader::new("missing.toml")))
            .metadata(Arc::new(StaticMetadataSource::new(Vec::<VariableMetadata>::new())))
            .build()
            .unwrap();
        assert!(matches!(
            pipeline.simulate(&ParameterSet::new()),
            Err(SimulationError::Configuration(_))
        ));
    }
}
