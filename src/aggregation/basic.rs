//! Single-pass fold functions: totals, extremes, moments and their running
//! variants.

use std::sync::Arc;

use super::{arg, Accumulator, FunctionDescriptor, FunctionKind, ParameterDef, Phase};
use crate::container::SpillArea;
use crate::error::Result;
use crate::value::{DataType, Value};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Sum,
    Count,
    Ave,
    Min,
    Max,
    First,
    Last,
    Variance,
    StdDev,
    RunningSum,
    RunningCount,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Sum => "SUM",
            Op::Count => "COUNT",
            Op::Ave => "AVE",
            Op::Min => "MIN",
            Op::Max => "MAX",
            Op::First => "FIRST",
            Op::Last => "LAST",
            Op::Variance => "VARIANCE",
            Op::StdDev => "STDDEV",
            Op::RunningSum => "RUNNINGSUM",
            Op::RunningCount => "RUNNINGCOUNT",
        }
    }

    fn counts(self) -> bool {
        matches!(self, Op::Count | Op::RunningCount)
    }
}

/// Fold state for every function in this module. Moments are kept with
/// Welford's update so variance stays stable on long streams.
#[derive(Debug)]
struct BasicAccumulator {
    op: Op,
    phase: Phase,
    rows: usize,
    count: usize,
    sum: f64,
    mean: f64,
    m2: f64,
    pick: Option<Value>,
    value: Value,
}

impl BasicAccumulator {
    fn new(op: Op) -> Self {
        Self {
            op,
            phase: Phase::Idle,
            rows: 0,
            count: 0,
            sum: 0.0,
            mean: 0.0,
            m2: 0.0,
            pick: None,
            value: Value::Null,
        }
    }

    fn clear(&mut self) {
        self.rows = 0;
        self.count = 0;
        self.sum = 0.0;
        self.mean = 0.0;
        self.m2 = 0.0;
        self.pick = None;
        self.value = if self.op.counts() {
            Value::Integer(0)
        } else {
            Value::Null
        };
    }

    fn accumulate(&mut self, x: f64) {
        self.count += 1;
        self.sum += x;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn current(&self) -> Value {
        match self.op {
            Op::Count | Op::RunningCount => Value::from(self.count),
            Op::Min | Op::Max | Op::First | Op::Last => self.pick.clone().unwrap_or_default(),
            _ if self.count == 0 => Value::Null,
            Op::Sum | Op::RunningSum => Value::Double(self.sum),
            Op::Ave => Value::Double(self.sum / self.count as f64),
            Op::Variance | Op::StdDev if self.count < 2 => Value::Null,
            Op::Variance => Value::Double(self.m2 / (self.count - 1) as f64),
            Op::StdDev => Value::Double((self.m2 / (self.count - 1) as f64).sqrt()),
        }
    }
}

impl Accumulator for BasicAccumulator {
    fn start(&mut self) -> Result<()> {
        self.clear();
        self.phase = Phase::Started;
        Ok(())
    }

    fn on_row(&mut self, args: &[Value]) -> Result<()> {
        self.phase.check_started(self.op.name())?;
        self.rows += 1;
        let value = arg(args, 0);

        match self.op {
            Op::Count | Op::RunningCount => {
                if args.is_empty() || !value.is_null() {
                    self.count += 1;
                }
            }
            Op::First => {
                if self.rows == 1 {
                    self.pick = Some(value.clone());
                }
            }
            Op::Last => self.pick = Some(value.clone()),
            Op::Min | Op::Max => {
                if !value.is_null() {
                    let replace = match &self.pick {
                        None => true,
                        Some(current) if self.op == Op::Min => value < current,
                        Some(current) => value > current,
                    };
                    if replace {
                        self.pick = Some(value.clone());
                    }
                }
            }
            Op::Sum | Op::RunningSum | Op::Ave | Op::Variance | Op::StdDev => {
                if !value.is_null() {
                    self.accumulate(value.to_f64()?);
                }
            }
        }

        self.value = self.current();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.phase != Phase::Started {
            return Err(Error::InvalidState(format!(
                "{}: finish without start",
                self.op.name()
            )));
        }
        self.phase = Phase::Finished;
        Ok(())
    }

    fn get_value(&self) -> Result<Value> {
        self.phase.check_not_idle(self.op.name())?;
        Ok(self.value.clone())
    }

    fn reset(&mut self) {
        self.clear();
        self.phase = Phase::Idle;
    }
}

pub fn sum(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::Sum))
}

pub fn count(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::Count))
}

pub fn ave(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::Ave))
}

pub fn min(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::Min))
}

pub fn max(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::Max))
}

pub fn first(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::First))
}

pub fn last(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::Last))
}

pub fn variance(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::Variance))
}

pub fn stddev(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::StdDev))
}

pub fn running_sum(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::RunningSum))
}

pub fn running_count(_: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(BasicAccumulator::new(Op::RunningCount))
}

pub(crate) fn functions() -> Vec<FunctionDescriptor> {
    use DataType::*;
    use FunctionKind::*;

    let numeric = || ParameterDef::data_field("value").types(&[Integer, Double]);
    let any = || ParameterDef::data_field("value");
    vec![
        FunctionDescriptor::new("SUM", Summary, Double, sum)
            .describe("Sum", "Total of the non-null values")
            .parameter(numeric()),
        FunctionDescriptor::new("COUNT", Summary, Integer, count)
            .describe("Count", "Number of rows, or of non-null values when given")
            .parameter(any().optional()),
        FunctionDescriptor::new("AVE", Summary, Double, ave)
            .describe("Average", "Mean of the non-null values")
            .parameter(numeric()),
        FunctionDescriptor::new("MIN", Summary, Any, min)
            .describe("Minimum", "Smallest non-null value")
            .parameter(any()),
        FunctionDescriptor::new("MAX", Summary, Any, max)
            .describe("Maximum", "Largest non-null value")
            .parameter(any()),
        FunctionDescriptor::new("FIRST", Summary, Any, first)
            .describe("First", "Value of the first row")
            .parameter(any()),
        FunctionDescriptor::new("LAST", Summary, Any, last)
            .describe("Last", "Value of the last row")
            .parameter(any()),
        FunctionDescriptor::new("VARIANCE", Summary, Double, variance)
            .describe("Variance", "Sample variance of the non-null values")
            .parameter(numeric()),
        FunctionDescriptor::new("STDDEV", Summary, Double, stddev)
            .describe("Standard deviation", "Sample standard deviation of the non-null values")
            .parameter(numeric()),
        FunctionDescriptor::new("RUNNINGSUM", Running, Double, running_sum)
            .describe("Running sum", "Total of the non-null values so far")
            .parameter(numeric()),
        FunctionDescriptor::new("RUNNINGCOUNT", Running, Integer, running_count)
            .describe("Running count", "Number of rows so far")
            .parameter(any().optional()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(
        factory: fn(&Arc<SpillArea>) -> Box<dyn Accumulator>,
        values: &[Value],
    ) -> Result<(Vec<Value>, Value)> {
        let spill = Arc::new(SpillArea::in_memory(16));
        let mut acc = factory(&spill);
        acc.start()?;
        let mut running = Vec::new();
        for v in values {
            acc.on_row(std::slice::from_ref(v))?;
            running.push(acc.get_value()?);
        }
        acc.finish()?;
        Ok((running, acc.get_summary_value()?))
    }

    fn nums(values: &[f64]) -> Vec<Value> {
        values.iter().copied().map(Value::from).collect()
    }

    #[test]
    fn test_totals_skip_nulls() -> Result<()> {
        let values = vec![Value::from(2), Value::Null, Value::from(4.5)];
        assert_eq!(fold(sum, &values)?.1, Value::from(6.5));
        assert_eq!(fold(ave, &values)?.1, Value::from(3.25));
        assert_eq!(fold(count, &values)?.1, Value::from(2));
        assert_eq!(fold(min, &values)?.1, Value::from(2));
        assert_eq!(fold(max, &values)?.1, Value::from(4.5));
        assert_eq!(fold(first, &values)?.1, Value::from(2));
        assert_eq!(fold(last, &values)?.1, Value::from(4.5));
        Ok(())
    }

    #[test]
    fn test_moments() -> Result<()> {
        let values = nums(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let variance = fold(variance, &values)?.1.to_f64()?;
        let stddev = fold(stddev, &values)?.1.to_f64()?;
        assert!((variance - 4.571428571428571).abs() < 1e-12);
        assert!((stddev - 2.138089935299395).abs() < 1e-12);
        assert_eq!(fold(super::variance, &nums(&[1.0]))?.1, Value::Null);
        Ok(())
    }

    #[test]
    fn test_running_values() -> Result<()> {
        let (running, _) = fold(running_sum, &nums(&[1.0, 2.0, 3.0]))?;
        assert_eq!(running, nums(&[1.0, 3.0, 6.0]));

        let (counts, _) = fold(running_count, &[Value::Null, Value::from(1)])?;
        assert_eq!(counts, vec![Value::from(0), Value::from(1)]);
        Ok(())
    }

    #[test]
    fn test_empty_group() -> Result<()> {
        assert_eq!(fold(sum, &[])?.1, Value::Null);
        assert_eq!(fold(count, &[])?.1, Value::from(0));
        Ok(())
    }

    #[test]
    fn test_lifecycle_errors() -> Result<()> {
        let spill = Arc::new(SpillArea::in_memory(16));
        let mut acc = sum(&spill);
        assert!(matches!(acc.get_value(), Err(Error::Aggregation(_))));
        assert!(acc.on_row(&[Value::from(1)]).is_err());

        acc.start()?;
        assert!(matches!(
            acc.on_row(&[Value::from("abc")]),
            Err(Error::InvalidArgument(_))
        ));
        acc.on_row(&[Value::from(1)])?;
        acc.finish()?;
        assert!(acc.on_row(&[Value::from(1)]).is_err());

        // A new group starts from scratch.
        acc.start()?;
        acc.on_row(&[Value::from(5)])?;
        assert_eq!(acc.get_value()?, Value::from(5.0));

        acc.reset();
        assert!(acc.get_value().is_err());
        Ok(())
    }
}
