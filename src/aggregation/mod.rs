//! Streaming aggregation functions.
//!
//! An [`AggregationFunction`] describes a function (name, parameters, return
//! type, number of passes) and creates [`Accumulator`]s that compute it over
//! a stream of rows. Every accumulator follows the same lifecycle:
//!
//! ```text
//! start -> on_row* -> finish -> get_value
//! ```
//!
//! Running functions produce a value after every row; summary functions
//! produce one value per group at `finish`. Two-pass functions are driven
//! through the lifecycle twice over the same rows: the first `start` begins
//! collecting, the second begins emitting, and a third starts a new group.

pub mod basic;
pub mod financial;
pub mod percentile;
pub mod rank;
pub mod registry;

pub use registry::AggregationRegistry;

use std::fmt::Debug;
use std::sync::Arc;

use crate::container::SpillArea;
use crate::error::Result;
use crate::row::{Expression, RowSource};
use crate::value::{DataType, Value};
use crate::Error;

/// Whether a function reports per row or per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Running,
    Summary,
}

/// Describes one argument of an aggregation function.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDef {
    pub name: String,
    pub display_name: String,
    pub is_optional: bool,
    /// True for the argument carrying the aggregated data, false for
    /// parameters such as `N` or a rate.
    pub is_data_field: bool,
    pub supported_types: Vec<DataType>,
    pub description: String,
}

impl ParameterDef {
    /// Required data argument accepting any type.
    pub fn data_field(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            is_optional: false,
            is_data_field: true,
            supported_types: vec![DataType::Any],
            description: String::new(),
        }
    }

    /// Required numeric, non data, parameter.
    pub fn numeric(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            is_optional: false,
            is_data_field: false,
            supported_types: vec![DataType::Integer, DataType::Double],
            description: String::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn types(mut self, types: &[DataType]) -> Self {
        self.supported_types = types.to_vec();
        self
    }

    pub fn describe(mut self, display_name: &str, description: &str) -> Self {
        self.display_name = display_name.to_string();
        self.description = description.to_string();
        self
    }
}

/// Restartable computation of one aggregation over a row stream.
pub trait Accumulator: Send + Debug {
    /// Begins a group, or for multi-pass functions the next pass.
    fn start(&mut self) -> Result<()>;

    /// Feeds one row's arguments, data field first.
    fn on_row(&mut self, args: &[Value]) -> Result<()>;

    /// Ends the current pass. Legal with zero rows.
    fn finish(&mut self) -> Result<()>;

    /// Latest value, `Value::Null` when no row has produced one yet. Fails
    /// before the first `start`.
    fn get_value(&self) -> Result<Value>;

    /// Group value of a summary function once `finish` was called.
    fn get_summary_value(&self) -> Result<Value> {
        self.get_value()
    }

    /// Drops all state and returns to idle.
    fn reset(&mut self);
}

/// Descriptor and accumulator factory of an aggregation function.
pub trait AggregationFunction: Send + Sync + Debug {
    /// Upper-case name the function is registered under.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn display_name(&self) -> &str;

    fn data_type(&self) -> DataType;

    fn parameter_defs(&self) -> &[ParameterDef];

    fn number_of_passes(&self) -> usize {
        1
    }

    fn kind(&self) -> FunctionKind;

    fn new_accumulator(&self, spill: &Arc<SpillArea>) -> Box<dyn Accumulator>;
}

type Factory = fn(&Arc<SpillArea>) -> Box<dyn Accumulator>;

/// Table-driven [`AggregationFunction`] used for the built-in functions.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    name: String,
    display_name: String,
    description: String,
    data_type: DataType,
    parameters: Vec<ParameterDef>,
    passes: usize,
    kind: FunctionKind,
    factory: Factory,
}

impl FunctionDescriptor {
    pub fn new(name: &str, kind: FunctionKind, data_type: DataType, factory: Factory) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            display_name: name.to_string(),
            description: String::new(),
            data_type,
            parameters: Vec::new(),
            passes: 1,
            kind,
            factory,
        }
    }

    pub fn describe(mut self, display_name: &str, description: &str) -> Self {
        self.display_name = display_name.to_string();
        self.description = description.to_string();
        self
    }

    pub fn parameter(mut self, parameter: ParameterDef) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn passes(mut self, passes: usize) -> Self {
        self.passes = passes.max(1);
        self
    }
}

impl AggregationFunction for FunctionDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn parameter_defs(&self) -> &[ParameterDef] {
        &self.parameters
    }

    fn number_of_passes(&self) -> usize {
        self.passes
    }

    fn kind(&self) -> FunctionKind {
        self.kind
    }

    fn new_accumulator(&self, spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
        (self.factory)(spill)
    }
}

/// Lifecycle position shared by the built-in accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Phase {
    #[default]
    Idle,
    Started,
    Finished,
}

impl Phase {
    pub(crate) fn check_started(self, function: &str) -> Result<()> {
        match self {
            Phase::Started => Ok(()),
            _ => Err(Error::InvalidState(format!(
                "{}: row received outside start/finish",
                function
            ))),
        }
    }

    pub(crate) fn check_not_idle(self, function: &str) -> Result<()> {
        match self {
            Phase::Idle => Err(Error::Aggregation(format!(
                "{}: accumulator was never started",
                function
            ))),
            _ => Ok(()),
        }
    }
}

static NULL: Value = Value::Null;

/// Argument `index`, or null when the caller passed fewer arguments.
pub(crate) fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

/// Result of [`evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// One value per input row, for running functions.
    PerRow(Vec<Value>),
    /// The group value, for summary functions.
    Summary(Value),
}

/// Runs `function` over the rows produced by `open_rows`, treating all rows
/// as one group. The row source is reopened for every pass; `args` are
/// evaluated against each row to build the argument tuple.
pub fn evaluate<R, F>(
    function: &dyn AggregationFunction,
    spill: &Arc<SpillArea>,
    mut open_rows: F,
    args: &[Box<dyn Expression>],
) -> Result<Evaluation>
where
    R: RowSource,
    F: FnMut() -> Result<R>,
{
    check_arity(function, args.len())?;

    let passes = function.number_of_passes();
    let mut accumulator = function.new_accumulator(spill);
    let mut per_row = Vec::new();
    for pass in 1..=passes {
        let last = pass == passes;
        let mut rows = open_rows()?;
        accumulator.start()?;
        while rows.next_row()? {
            let values = args
                .iter()
                .map(|expr| expr.evaluate(&rows))
                .collect::<Result<Vec<_>>>()?;
            accumulator.on_row(&values)?;
            if last && function.kind() == FunctionKind::Running {
                per_row.push(accumulator.get_value()?);
            }
        }
        accumulator.finish()?;
    }

    Ok(match function.kind() {
        FunctionKind::Running => Evaluation::PerRow(per_row),
        FunctionKind::Summary => Evaluation::Summary(accumulator.get_summary_value()?),
    })
}

fn check_arity(function: &dyn AggregationFunction, given: usize) -> Result<()> {
    let defs = function.parameter_defs();
    let required = defs.iter().filter(|p| !p.is_optional).count();
    if given < required || given > defs.len() {
        return Err(Error::InvalidArgument(format!(
            "{} takes {} to {} arguments, got {}",
            function.name(),
            required,
            defs.len(),
            given
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{Column, Literal, VecRowSource};

    fn run(name: &str, values: &[Value], extra: &[Value]) -> Result<Evaluation> {
        let registry = AggregationRegistry::builtin()?;
        let function = registry.get(name).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown function {}", name))
        })?;
        let spill = Arc::new(SpillArea::in_memory(2));
        let source = VecRowSource::single("v", values.to_vec());

        let mut args: Vec<Box<dyn Expression>> = vec![Box::new(Column(0))];
        for v in extra {
            args.push(Box::new(Literal(v.clone())));
        }
        evaluate(function.as_ref(), &spill, || Ok(source.clone()), &args)
    }

    #[test]
    fn test_evaluate_summary() -> Result<()> {
        let values = [1, 2, 3, 4].map(Value::from);
        assert_eq!(
            run("sum", &values, &[])?,
            Evaluation::Summary(Value::from(10.0))
        );
        Ok(())
    }

    #[test]
    fn test_evaluate_two_pass_running() -> Result<()> {
        let values = [5, 3, 8, 1, 9].map(Value::from);
        assert_eq!(
            run("IsBottomN", &values, &[Value::from(2)])?,
            Evaluation::PerRow(
                [false, true, false, true, false]
                    .into_iter()
                    .map(Value::from)
                    .collect()
            )
        );
        Ok(())
    }

    #[test]
    fn test_evaluate_checks_arity() {
        let values = [Value::from(1)];
        assert!(matches!(
            run("ISTOPN", &values, &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            run("SUM", &values, &[Value::from(1), Value::from(2)]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_phase_checks() {
        assert!(Phase::Idle.check_started("SUM").is_err());
        assert!(Phase::Finished.check_started("SUM").is_err());
        assert!(Phase::Started.check_started("SUM").is_ok());
        assert!(Phase::Idle.check_not_idle("SUM").is_err());
        assert_eq!(arg(&[], 3), &Value::Null);
    }
}
