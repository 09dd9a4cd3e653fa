use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::{
    error::ModelError,
    expression::{canonical_name, Expr, ExprError},
    series::ParameterSet,
};

/// Control columns every raw table carries; never offered as output hints.
pub const CONTROL_COLUMNS: [&str; 4] = ["FINAL TIME", "INITIAL TIME", "SAVEPER", "TIME STEP"];

/// Most integration steps a single run may take.
pub const MAX_STEPS: usize = 10_000_000;

/// Time-indexed table produced by one model run: a time index plus one column
/// per constant, stock, auxiliary and control value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    time: Vec<f64>,
    columns: IndexMap<String, Vec<f64>>,
}

impl RawTable {
    /// Builds a table; every column must match the time index length.
    pub fn new(time: Vec<f64>, columns: IndexMap<String, Vec<f64>>) -> Result<Self, ModelError> {
        if let Some((name, _)) = columns.iter().find(|(_, col)| col.len() != time.len()) {
            return Err(ModelError::Parse(format!(
                "column \"{name}\" does not match the time index length {}",
                time.len()
            )));
        }
        Ok(Self { time, columns })
    }

    /// Time index.
    #[must_use]
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Column by exact name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Column names in model order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.time.len()
    }
}

/// A runnable system-dynamics model.
pub trait ModelEngine: Send + Sync {
    /// Short label used in messages (usually the file name).
    fn label(&self) -> &str;

    /// Runs the model with overrides applied on top of its defaults.
    fn run(&self, overrides: &ParameterSet) -> Result<RawTable, ModelError>;
}

/// Source of model definitions. Loading failures are configuration errors,
/// distinct from solver failures raised by [`ModelEngine::run`].
pub trait ModelLoader: Send + Sync {
    /// Loads the model.
    fn load(&self) -> Result<Arc<dyn ModelEngine>, ModelError>;
}

/// Reads a TOML stock/flow definition from disk on every load.
#[derive(Debug, Clone)]
pub struct FileModelLoader {
    path: PathBuf,
}

impl FileModelLoader {
    /// Creates a loader for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Definition path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelLoader for FileModelLoader {
    fn load(&self) -> Result<Arc<dyn ModelEngine>, ModelError> {
        if !self.path.exists() {
            return Err(ModelError::Missing(self.path.clone()));
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| ModelError::Read {
            path: self.path.clone(),
            source,
        })?;
        let label = self
            .path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Arc::new(StockFlowModel::from_toml(label, &raw)?))
    }
}

/// Hands out an already built model; used when the definition lives in memory.
#[derive(Clone)]
pub struct StaticModelLoader {
    model: Arc<dyn ModelEngine>,
}

impl StaticModelLoader {
    /// Wraps a model.
    #[must_use]
    pub fn new(model: Arc<dyn ModelEngine>) -> Self {
        Self { model }
    }
}

impl ModelLoader for StaticModelLoader {
    fn load(&self) -> Result<Arc<dyn ModelEngine>, ModelError> {
        Ok(Arc::clone(&self.model))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelDocument {
    control: ControlSection,
    #[serde(default)]
    constants: IndexMap<String, f64>,
    #[serde(default)]
    auxiliaries: IndexMap<String, String>,
    #[serde(default)]
    stocks: IndexMap<String, StockSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlSection {
    initial_time: f64,
    final_time: f64,
    time_step: f64,
    #[serde(default)]
    saveper: Option<f64>,
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StockSection {
    initial: InitialValue,
    #[serde(default)]
    inflows: Vec<String>,
    #[serde(default)]
    outflows: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InitialValue {
    Number(f64),
    Equation(String),
}

/// Time horizon of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeControl {
    /// First simulated time.
    pub initial_time: f64,
    /// Last simulated time (inclusive).
    pub final_time: f64,
    /// Integration step.
    pub time_step: f64,
    /// Output interval.
    pub saveper: f64,
}

impl TimeControl {
    #[allow(clippy::cast_precision_loss)]
    fn validate(self) -> Result<Self, ModelError> {
        let values = [self.initial_time, self.final_time, self.time_step, self.saveper];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidControl("non-finite control value".into()));
        }
        if self.time_step <= 0.0 || self.saveper <= 0.0 {
            return Err(ModelError::InvalidControl(format!(
                "time step {} and saveper {} must be positive",
                self.time_step, self.saveper
            )));
        }
        if self.final_time < self.initial_time {
            return Err(ModelError::InvalidControl(format!(
                "final time {} precedes initial time {}",
                self.final_time, self.initial_time
            )));
        }
        let steps = ((self.final_time - self.initial_time) / self.time_step).round();
        if !steps.is_finite() || steps > MAX_STEPS as f64 {
            return Err(ModelError::InvalidControl(format!(
                "{steps} integration steps exceed the limit of {MAX_STEPS}"
            )));
        }
        let save_every = (self.saveper / self.time_step).round();
        if !save_every.is_finite() || save_every > MAX_STEPS as f64 {
            return Err(ModelError::InvalidControl(format!(
                "saveper {} spans more than {MAX_STEPS} steps of {}",
                self.saveper, self.time_step
            )));
        }
        Ok(self)
    }

    /// Number of integration steps between initial and final time.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn step_count(&self) -> usize {
        ((self.final_time - self.initial_time) / self.time_step).round() as usize
    }

    /// Integration steps between two saved rows.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn save_every(&self) -> usize {
        ((self.saveper / self.time_step).round() as usize).max(1)
    }

    /// Number of rows a run produces.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.step_count() / self.save_every() + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Constant,
    Stock,
    Auxiliary,
}

#[derive(Debug)]
struct Stock {
    slot: usize,
    initial: Expr,
    inflows: Vec<usize>,
    outflows: Vec<usize>,
}

/// Compiled stock/flow model integrated with Euler steps.
#[derive(Debug)]
pub struct StockFlowModel {
    label: String,
    units: Option<String>,
    control: TimeControl,
    names: Vec<String>,
    kinds: Vec<Kind>,
    index: HashMap<String, usize>,
    defaults: Vec<f64>,
    stocks: Vec<Stock>,
    /// Auxiliaries in evaluation order.
    auxiliaries: Vec<(usize, Expr)>,
}

impl StockFlowModel {
    /// Parses and compiles a TOML definition.
    pub fn from_toml(label: impl Into<String>, raw: &str) -> Result<Self, ModelError> {
        let document: ModelDocument =
            toml::from_str(raw).map_err(|err| ModelError::Parse(err.to_string()))?;
        Self::compile(label.into(), document)
    }

    fn compile(label: String, document: ModelDocument) -> Result<Self, ModelError> {
        let control = TimeControl {
            initial_time: document.control.initial_time,
            final_time: document.control.final_time,
            time_step: document.control.time_step,
            saveper: document
                .control
                .saveper
                .unwrap_or(document.control.time_step),
        }
        .validate()?;

        let mut names = Vec::new();
        let mut kinds = Vec::new();
        let mut defaults = Vec::new();
        let mut index = HashMap::new();
        let mut declare = |name: &str, kind: Kind, default: f64| -> Result<usize, ModelError> {
            let slot = names.len();
            if index.insert(canonical_name(name), slot).is_some() {
                return Err(ModelError::DuplicateName(name.to_string()));
            }
            names.push(name.to_string());
            kinds.push(kind);
            defaults.push(default);
            Ok(slot)
        };
        for (name, value) in &document.constants {
            declare(name, Kind::Constant, *value)?;
        }
        for name in document.stocks.keys() {
            declare(name, Kind::Stock, 0.0)?;
        }
        for name in document.auxiliaries.keys() {
            declare(name, Kind::Auxiliary, 0.0)?;
        }

        let resolve = |name: &str| index.get(name).copied();
        let compile_equation = |variable: &str, source: &str| {
            Expr::parse(source, resolve).map_err(|err| match err {
                ExprError::UnknownName(reference) => ModelError::UnknownReference {
                    variable: variable.to_string(),
                    reference,
                },
                ExprError::Syntax(message) => ModelError::Expression {
                    variable: variable.to_string(),
                    message,
                },
            })
        };

        let mut auxiliary_exprs = Vec::with_capacity(document.auxiliaries.len());
        for (name, source) in &document.auxiliaries {
            auxiliary_exprs.push((index[&canonical_name(name)], compile_equation(name, source)?));
        }

        let mut stocks = Vec::with_capacity(document.stocks.len());
        for (name, section) in &document.stocks {
            let initial = match &section.initial {
                InitialValue::Number(value) => Expr::Number(*value),
                InitialValue::Equation(source) => {
                    let expr = compile_equation(name, source)?;
                    if let Some(slot) = expr
                        .references()
                        .into_iter()
                        .find(|slot| kinds[*slot] != Kind::Constant)
                    {
                        return Err(ModelError::Expression {
                            variable: name.clone(),
                            message: format!(
                                "initial value may only reference constants, found \"{}\"",
                                names[slot]
                            ),
                        });
                    }
                    expr
                }
            };
            let flow_slots = |flows: &[String]| -> Result<Vec<usize>, ModelError> {
                flows
                    .iter()
                    .map(|flow| {
                        resolve(&canonical_name(flow)).ok_or_else(|| ModelError::UnknownReference {
                            variable: name.clone(),
                            reference: flow.clone(),
                        })
                    })
                    .collect()
            };
            stocks.push(Stock {
                slot: index[&canonical_name(name)],
                initial,
                inflows: flow_slots(&section.inflows)?,
                outflows: flow_slots(&section.outflows)?,
            });
        }

        let auxiliaries = order_auxiliaries(auxiliary_exprs, &kinds, &names)?;
        Ok(Self {
            label,
            units: document.control.units,
            control,
            names,
            kinds,
            index,
            defaults,
            stocks,
            auxiliaries,
        })
    }

    /// Default time horizon.
    #[must_use]
    pub const fn control(&self) -> TimeControl {
        self.control
    }

    /// Time units, if declared.
    #[must_use]
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    /// Declared variable names in slot order (constants, stocks, auxiliaries).
    #[must_use]
    pub fn variable_names(&self) -> &[String] {
        &self.names
    }

    fn apply_overrides(
        &self,
        overrides: &ParameterSet,
    ) -> Result<(Vec<f64>, TimeControl), ModelError> {
        let mut values = self.defaults.clone();
        let mut control = self.control;
        for (name, value) in overrides {
            let key = canonical_name(name);
            let target = match key.as_str() {
                "initial time" => Some(&mut control.initial_time),
                "final time" => Some(&mut control.final_time),
                "time step" => Some(&mut control.time_step),
                "saveper" => Some(&mut control.saveper),
                _ => match self.index.get(&key) {
                    Some(&slot) if self.kinds[slot] == Kind::Constant => Some(&mut values[slot]),
                    _ => None,
                },
            };
            if let Some(target) = target {
                if !value.is_finite() {
                    return Err(ModelError::InvalidOverride {
                        name: name.clone(),
                        value: *value,
                    });
                }
                *target = *value;
            }
        }
        Ok((values, control.validate()?))
    }

    fn evaluate_auxiliaries(&self, values: &mut [f64], time: f64) -> Result<(), ModelError> {
        for (slot, expr) in &self.auxiliaries {
            let value = expr.eval(values);
            if !value.is_finite() {
                return Err(ModelError::NonFinite {
                    variable: self.names[*slot].clone(),
                    time,
                });
            }
            values[*slot] = value;
        }
        Ok(())
    }
}

impl ModelEngine for StockFlowModel {
    fn label(&self) -> &str {
        &self.label
    }

    #[allow(clippy::cast_precision_loss)]
    fn run(&self, overrides: &ParameterSet) -> Result<RawTable, ModelError> {
        let (mut values, control) = self.apply_overrides(overrides)?;
        for stock in &self.stocks {
            values[stock.slot] = stock.initial.eval(&values);
        }

        let steps = control.step_count();
        let save_every = control.save_every();
        let mut time_index = Vec::with_capacity(control.row_count());
        let mut rows: Vec<Vec<f64>> = vec![Vec::with_capacity(control.row_count()); self.names.len()];
        let mut derivatives = vec![0.0; self.stocks.len()];

        for step in 0..=steps {
            let time = control.time_step.mul_add(step as f64, control.initial_time);
            self.evaluate_auxiliaries(&mut values, time)?;
            if let Some(slot) = values.iter().position(|v| !v.is_finite()) {
                return Err(ModelError::NonFinite {
                    variable: self.names[slot].clone(),
                    time,
                });
            }
            if step % save_every == 0 {
                time_index.push(time);
                for (column, value) in rows.iter_mut().zip(&values) {
                    column.push(*value);
                }
            }
            if step == steps {
                break;
            }
            for (derivative, stock) in derivatives.iter_mut().zip(&self.stocks) {
                let inflow: f64 = stock.inflows.iter().map(|slot| values[*slot]).sum();
                let outflow: f64 = stock.outflows.iter().map(|slot| values[*slot]).sum();
                *derivative = inflow - outflow;
            }
            for (derivative, stock) in derivatives.iter().zip(&self.stocks) {
                values[stock.slot] += control.time_step * derivative;
            }
        }

        let rows_len = time_index.len();
        let mut columns: IndexMap<String, Vec<f64>> = self.names.iter().cloned().zip(rows).collect();
        for (name, value) in [
            ("FINAL TIME", control.final_time),
            ("INITIAL TIME", control.initial_time),
            ("SAVEPER", control.saveper),
            ("TIME STEP", control.time_step),
        ] {
            columns.insert(name.to_string(), vec![value; rows_len]);
        }
        RawTable::new(time_index, columns)
    }
}

/// Orders auxiliaries so every auxiliary follows the auxiliaries it reads.
fn order_auxiliaries(
    exprs: Vec<(usize, Expr)>,
    kinds: &[Kind],
    names: &[String],
) -> Result<Vec<(usize, Expr)>, ModelError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit(
        slot: usize,
        deps: &HashMap<usize, Vec<usize>>,
        marks: &mut HashMap<usize, Mark>,
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
        names: &[String],
    ) -> Result<(), ModelError> {
        match marks.get(&slot).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                let start = stack.iter().position(|s| *s == slot).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| names[*s].clone()).collect();
                cycle.push(names[slot].clone());
                return Err(ModelError::Cycle(cycle));
            }
            Mark::Unvisited => {}
        }
        marks.insert(slot, Mark::Visiting);
        stack.push(slot);
        for dep in deps.get(&slot).map(Vec::as_slice).unwrap_or_default() {
            visit(*dep, deps, marks, stack, order, names)?;
        }
        stack.pop();
        marks.insert(slot, Mark::Done);
        order.push(slot);
        Ok(())
    }

    let deps: HashMap<usize, Vec<usize>> = exprs
        .iter()
        .map(|(slot, expr)| {
            let aux_refs = expr
                .references()
                .into_iter()
                .filter(|dep| kinds[*dep] == Kind::Auxiliary)
                .collect();
            (*slot, aux_refs)
        })
        .collect();
    let mut marks = HashMap::new();
    let mut order = Vec::with_capacity(exprs.len());
    let mut stack = Vec::new();
    for (slot, _) in &exprs {
        visit(*slot, &deps, &mut marks, &mut stack, &mut order, names)?;
    }
    let mut by_slot: HashMap<usize, Expr> = exprs.into_iter().collect();
    Ok(order
        .into_iter()
        .filter_map(|slot| by_slot.remove(&slot).map(|expr| (slot, expr)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;
    use tempfile::tempdir;

    const DECAY: &str = r#"
        [control]
        initial_time = 0
        final_time = 4
        time_step = 1

        [constants]
        "decay rate" = 0.5

        [auxiliaries]
        outflow = "Level * decay_rate"
        "double outflow" = "outflow * 2"

        [stocks.Level]
        initial = 16
        outflows = ["outflow"]
    "#;

    #[test]
    fn integrates_with_euler_steps() {
        let model = StockFlowModel::from_toml("decay", DECAY).unwrap();
        let table = model.run(&ParameterSet::new()).unwrap();
        assert_eq!(table.time(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(table.column("Level").unwrap(), &[16.0, 8.0, 4.0, 2.0, 1.0]);
        assert_eq!(table.column("double outflow").unwrap()[0], 16.0);
        assert_eq!(table.column("TIME STEP").unwrap(), &[1.0; 5]);
        assert_eq!(table.row_count(), model.control().row_count());
    }

    #[test]
    fn overrides_apply_to_constants_and_control() {
        let model = StockFlowModel::from_toml("decay", DECAY).unwrap();
        let table = model
            .run(&indexmap! {
                "Decay_Rate".to_string() => 0.25,
                "final time".to_string() => 2.0,
                "unknown knob".to_string() => 9.0,
            })
            .unwrap();
        assert_eq!(table.column("Level").unwrap(), &[16.0, 12.0, 9.0]);
    }

    #[test]
    fn saveper_thins_output_rows() {
        let raw = DECAY.replace("time_step = 1", "time_step = 0.5\nsaveper = 1");
        let model = StockFlowModel::from_toml("decay", &raw).unwrap();
        let table = model.run(&ParameterSet::new()).unwrap();
        assert_eq!(table.time(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn non_finite_values_fail_the_run() {
        let model = StockFlowModel::from_toml("decay", DECAY).unwrap();
        let err = model
            .run(&indexmap! { "decay rate".to_string() => f64::NAN })
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidOverride { .. }));

        let raw = DECAY.replace("\"Level * decay_rate\"", "\"Level / (decay_rate - 0.5)\"");
        let model = StockFlowModel::from_toml("decay", &raw).unwrap();
        assert!(matches!(
            model.run(&ParameterSet::new()),
            Err(ModelError::NonFinite { .. })
        ));
    }

    #[test]
    fn oversized_time_controls_are_rejected() {
        let model = StockFlowModel::from_toml("decay", DECAY).unwrap();
        for overrides in [
            indexmap! { "FINAL TIME".to_string() => 1e30 },
            indexmap! { "TIME STEP".to_string() => 1e-300 },
            indexmap! { "saveper".to_string() => 1e300 },
            indexmap! { "initial time".to_string() => -1e308, "final time".to_string() => 1e308 },
        ] {
            assert!(matches!(
                model.run(&overrides),
                Err(ModelError::InvalidControl(_))
            ));
        }
        let limit = indexmap! { "final time".to_string() => MAX_STEPS as f64 + 1.0 };
        assert!(matches!(
            model.run(&limit),
            Err(ModelError::InvalidControl(_))
        ));
    }

    #[test]
    fn detects_cycles_and_unknown_references() {
        let cyclic = DECAY.replace("\"Level * decay_rate\"", "\"double outflow / 2\"");
        assert!(matches!(
            StockFlowModel::from_toml("c", &cyclic),
            Err(ModelError::Cycle(_))
        ));
        let unknown = DECAY.replace("\"Level * decay_rate\"", "\"Level * ghost\"");
        assert!(matches!(
            StockFlowModel::from_toml("u", &unknown),
            Err(ModelError::UnknownReference { .. })
        ));
    }

    #[test]
    fn file_loader_reports_missing_file() {
        let dir = tempdir().unwrap();
        let loader = FileModelLoader::new(dir.path().join("absent.toml"));
        assert!(matches!(loader.load(), Err(ModelError::Missing(_))));

        let path = dir.path().join("decay.toml");
        std::fs::write(&path, DECAY).unwrap();
        let model = FileModelLoader::new(&path).load().unwrap();
        assert_eq!(model.label(), "decay.toml");
    }
}
