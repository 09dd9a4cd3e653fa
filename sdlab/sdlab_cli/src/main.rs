use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use sdlab_analytics::{anomaly::DEFAULT_CONTAMINATION, PredictiveAnalyzer};
use sdlab_engine::{
    compare::compare, log_opt, LabConfig, ParameterSet, ScenarioStore, Simulate,
    SimulationPipeline,
};

#[derive(Parser, Debug)]
#[command(name = "sdlab", version, about = "System-dynamics scenario lab")]
struct Cli {
    /// Lab configuration file.
    #[arg(long, global = true, default_value = "sdlab.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs one simulation and prints the result.
    Run(ParamArgs),
    /// Creates every scenario of a batch file and compares them.
    Scenarios {
        #[arg(long)]
        batch: PathBuf,
    },
    /// Compares previously exported scenarios.
    Compare {
        #[arg(required = true)]
        exports: Vec<PathBuf>,
    },
    /// Runs one scenario and writes its export.
    Export {
        #[arg(long, default_value = "scenario")]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[command(flatten)]
        params: ParamArgs,
        #[arg(long)]
        out: PathBuf,
    },
    /// Forecasts every variable.
    Forecast {
        #[arg(long, default_value_t = 10)]
        steps: usize,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Flags anomalous points.
    Anomalies {
        #[arg(long, default_value_t = DEFAULT_CONTAMINATION)]
        contamination: f64,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Pairwise correlations.
    Correlate(ParamArgs),
    /// Forecast, anomalies, correlations and statistics in one document.
    Report(ParamArgs),
}

#[derive(Args, Debug, Default)]
struct ParamArgs {
    /// Parameter override, repeatable.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    params: Vec<(String, f64)>,
}

impl ParamArgs {
    fn to_set(&self) -> ParameterSet {
        self.params.iter().cloned().collect()
    }
}

fn parse_param(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in `{raw}`"));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|err| format!("invalid value for `{name}`: {err}"))?;
    Ok((name.to_string(), value))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchFile {
    #[serde(default)]
    scenario: Vec<BatchScenario>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchScenario {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: ParameterSet,
}

fn load_batch(path: &Path) -> Result<BatchFile> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading batch {path:?}"))?;
    let batch: BatchFile =
        toml::from_str(&raw).with_context(|| format!("parsing batch {path:?}"))?;
    if batch.scenario.is_empty() {
        bail!("batch {path:?} defines no [[scenario]] entries");
    }
    Ok(batch)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LabConfig::load(&cli.config)?;
    let pipeline = Arc::new(SimulationPipeline::builder().config(&config).build()?);
    match cli.command {
        Commands::Run(params) => print_json(&pipeline.simulate(&params.to_set())?),
        Commands::Scenarios { batch } => {
            let batch = load_batch(&batch)?;
            let store = store_for(&pipeline);
            let mut ids = Vec::new();
            for entry in batch.scenario {
                let scenario = store.create(entry.name, entry.description, entry.parameters)?;
                ids.push(scenario.id.clone());
            }
            print_json(&json!({
                "scenarios": store.list(),
                "comparison": compare(&store, &ids)?,
            }))
        }
        Commands::Compare { exports } => {
            let store = store_for(&pipeline);
            let mut ids = Vec::new();
            for path in &exports {
                let raw =
                    fs::read_to_string(path).with_context(|| format!("reading export {path:?}"))?;
                ids.push(
                    store
                        .import(&raw)
                        .with_context(|| format!("importing {path:?}"))?,
                );
            }
            print_json(&compare(&store, &ids)?)
        }
        Commands::Export {
            name,
            description,
            params,
            out,
        } => {
            let store = store_for(&pipeline);
            let scenario = store.create(name, description, params.to_set())?;
            let document = store
                .export(&scenario.id)
                .with_context(|| format!("scenario {} vanished before export", scenario.id))?;
            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&out, document).with_context(|| format!("writing export {out:?}"))?;
            log_opt(
                pipeline.telemetry(),
                LogLevel::Info,
                "cli.export.written",
                json!({ "id": scenario.id, "path": out }),
            );
            println!("{} -> {}", scenario.id, out.display());
            Ok(())
        }
        Commands::Forecast { steps, params } => {
            let result = pipeline.simulate(&params.to_set())?;
            print_json(&analyzer_for(&pipeline).predict(&result, steps))
        }
        Commands::Anomalies {
            contamination,
            params,
        } => {
            let result = pipeline.simulate(&params.to_set())?;
            print_json(&analyzer_for(&pipeline).detect_anomalies(&result, contamination)?)
        }
        Commands::Correlate(params) => {
            let result = pipeline.simulate(&params.to_set())?;
            print_json(&analyzer_for(&pipeline).correlate(&result)?)
        }
        Commands::Report(params) => {
            let params = params.to_set();
            let result = pipeline.simulate(&params)?;
            print_json(&analyzer_for(&pipeline).forecast_report(&result, &params))
        }
    }
}

fn store_for(pipeline: &Arc<SimulationPipeline>) -> ScenarioStore {
    let simulator: Arc<dyn Simulate> = pipeline.clone();
    ScenarioStore::new(simulator, pipeline.telemetry().cloned())
}

fn analyzer_for(pipeline: &SimulationPipeline) -> PredictiveAnalyzer {
    let mut builder = PredictiveAnalyzer::builder();
    if let Some(tel) = pipeline.telemetry() {
        builder = builder.telemetry(tel.clone());
    }
    builder.build()
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn params_parse_name_value_pairs() {
        assert_eq!(
            parse_param("objetivo = 25000").unwrap(),
            ("objetivo".to_string(), 25000.0)
        );
        assert!(parse_param("objetivo").is_err());
        assert!(parse_param("=3").is_err());
        assert!(parse_param("x=abc").is_err());
    }

    #[test]
    fn batch_file_requires_scenarios() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("batch.toml");
        fs::write(
            &path,
            r#"
[[scenario]]
name = "base"

[[scenario]]
name = "more police"
description = "raise the target"
parameters = { objetivo = 40000.0 }
"#,
        )
        .unwrap();
        let batch = load_batch(&path).unwrap();
        assert_eq!(batch.scenario.len(), 2);
        assert_eq!(batch.scenario[1].parameters["objetivo"], 40000.0);

        fs::write(&path, "").unwrap();
        assert!(load_batch(&path).is_err());
    }

    #[test]
    fn cli_accepts_repeated_params() {
        let cli = Cli::try_parse_from([
            "sdlab", "--config", "lab.toml", "forecast", "--steps", "4", "--param", "a=1",
            "--param", "b=2",
        ])
        .unwrap();
        match cli.command {
            Commands::Forecast { steps, params } => {
                assert_eq!(steps, 4);
                assert_eq!(params.to_set().len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
