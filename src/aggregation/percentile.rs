use std::sync::Arc;

use super::{arg, Accumulator, FunctionDescriptor, FunctionKind, ParameterDef, Phase};
use crate::container::{CachedList, SpillArea};
use crate::error::Result;
use crate::value::{DataType, Value};
use crate::Error;

/// Linear interpolation percentile of `values`, which need not be sorted.
///
/// With `n` values in ascending order `a`, `k = floor(p*(n-1)) + 1` and
/// `f = p*(n-1) + 1 - k`; the result is `a[k-1] + f*(a[k]-a[k-1])`, or
/// `a[k-1]` when `f` is zero.
pub fn percentile(values: &[f64], p: f64) -> Result<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    interpolate(sorted.len(), p, |i| Ok(sorted[i]))
}

/// Interpolates over `n` ascending values read through `at`, which is
/// called for at most two indexes.
fn interpolate(n: usize, p: f64, mut at: impl FnMut(usize) -> Result<f64>) -> Result<f64> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidArgument(format!(
            "percentile must be within [0, 1], got {}",
            p
        )));
    }
    if n == 0 {
        return Err(Error::Aggregation(
            "percentile of an empty set".to_string(),
        ));
    }

    let position = p * (n - 1) as f64;
    let k = position.floor() as usize + 1;
    let f = position + 1.0 - k as f64;
    let low = at(k - 1)?;
    if f == 0.0 {
        Ok(low)
    } else {
        Ok(low + f * (at(k)? - low))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Percentile,
    Quartile,
    Median,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Percentile => "PERCENTILE",
            Mode::Quartile => "QUARTILE",
            Mode::Median => "MEDIAN",
        }
    }
}

/// Collects non-null values and computes the percentile at `finish`.
#[derive(Debug)]
struct PercentileAccumulator {
    mode: Mode,
    spill: Arc<SpillArea>,
    phase: Phase,
    values: Option<CachedList>,
    /// Fraction in [0, 1], captured from the first row.
    p: Option<f64>,
    value: Value,
}

impl PercentileAccumulator {
    fn new(mode: Mode, spill: &Arc<SpillArea>) -> Self {
        Self {
            mode,
            spill: spill.clone(),
            phase: Phase::Idle,
            values: None,
            p: if mode == Mode::Median { Some(0.5) } else { None },
            value: Value::Null,
        }
    }

    fn capture(&mut self, parameter: &Value) -> Result<f64> {
        if let Some(p) = self.p {
            return Ok(p);
        }
        if parameter.is_null() {
            return Err(Error::InvalidArgument(format!(
                "{}: missing parameter on first row",
                self.mode.name()
            )));
        }
        let raw = parameter.to_f64()?;
        let p = match self.mode {
            Mode::Quartile => {
                if raw.fract() != 0.0 || !(0.0..=4.0).contains(&raw) {
                    return Err(Error::InvalidArgument(format!(
                        "QUARTILE: quart must be 0, 1, 2, 3 or 4, got {}",
                        parameter
                    )));
                }
                raw / 4.0
            }
            _ => {
                if !(0.0..=1.0).contains(&raw) {
                    return Err(Error::InvalidArgument(format!(
                        "PERCENTILE: percentile must be within [0, 1], got {}",
                        parameter
                    )));
                }
                raw
            }
        };
        self.p = Some(p);
        Ok(p)
    }
}

impl Accumulator for PercentileAccumulator {
    fn start(&mut self) -> Result<()> {
        if let Some(mut values) = self.values.take() {
            values.discard()?;
        }
        self.values = Some(CachedList::new(self.spill.clone()));
        if self.mode != Mode::Median {
            self.p = None;
        }
        self.value = Value::Null;
        self.phase = Phase::Started;
        Ok(())
    }

    fn on_row(&mut self, args: &[Value]) -> Result<()> {
        self.phase.check_started(self.mode.name())?;
        self.capture(arg(args, 1))?;
        let value = arg(args, 0);
        if value.is_null() {
            return Ok(());
        }
        let x = value.to_f64()?;
        if let Some(values) = self.values.as_mut() {
            values.append(Value::Double(x))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.check_started(self.mode.name())?;
        self.phase = Phase::Finished;

        let Some(mut values) = self.values.take() else {
            return Ok(());
        };
        let mut sorted = values.sorted()?;
        values.discard()?;

        let result = match self.p {
            Some(p) if !sorted.is_empty() => {
                let n = sorted.size();
                Some(interpolate(n, p, |i| sorted.get(i)?.to_f64()))
            }
            _ => None,
        };
        sorted.discard()?;
        self.value = match result {
            Some(x) => Value::Double(x?),
            None => Value::Null,
        };
        Ok(())
    }

    fn get_value(&self) -> Result<Value> {
        self.phase.check_not_idle(self.mode.name())?;
        Ok(self.value.clone())
    }

    fn reset(&mut self) {
        self.values = None;
        if self.mode != Mode::Median {
            self.p = None;
        }
        self.value = Value::Null;
        self.phase = Phase::Idle;
    }
}

pub fn percentile_fn(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(PercentileAccumulator::new(Mode::Percentile, spill))
}

pub fn quartile(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(PercentileAccumulator::new(Mode::Quartile, spill))
}

pub fn median(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(PercentileAccumulator::new(Mode::Median, spill))
}

pub(crate) fn functions() -> Vec<FunctionDescriptor> {
    let value = || ParameterDef::data_field("value").types(&[DataType::Integer, DataType::Double]);
    vec![
        FunctionDescriptor::new("PERCENTILE", FunctionKind::Summary, DataType::Double, percentile_fn)
            .describe("Percentile", "Interpolated percentile of the non-null values")
            .parameter(value())
            .parameter(ParameterDef::numeric("percentile").describe("Percentile", "Fraction within [0, 1]")),
        FunctionDescriptor::new("QUARTILE", FunctionKind::Summary, DataType::Double, quartile)
            .describe("Quartile", "Quartile 0 to 4 of the non-null values")
            .parameter(value())
            .parameter(ParameterDef::numeric("quart").describe("Quart", "0 min, 2 median, 4 max")),
        FunctionDescriptor::new("MEDIAN", FunctionKind::Summary, DataType::Double, median)
            .describe("Median", "Middle value of the non-null values")
            .parameter(value()),
    ]
}
