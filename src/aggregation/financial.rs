//! Time value of money: NPV, running NPV, IRR and MIRR.
//!
//! Cash flows arrive one per row in period order. Null flows are skipped
//! without consuming a period.

use std::sync::Arc;

use super::{arg, Accumulator, FunctionDescriptor, FunctionKind, ParameterDef, Phase};
use crate::container::{CachedList, SpillArea};
use crate::error::Result;
use crate::value::{DataType, Value};
use crate::Error;

pub const IRR_MAX_ITERATIONS: usize = 100;
pub const IRR_TOLERANCE: f64 = 1e-7;
pub const IRR_DEFAULT_GUESS: f64 = 0.1;

/// Net present value of `flows`, the first discounted by one period.
pub fn npv(rate: f64, flows: &[f64]) -> f64 {
    let mut discount = 1.0;
    let mut sum = 0.0;
    for cf in flows {
        discount *= 1.0 + rate;
        sum += cf / discount;
    }
    sum
}

/// Period-ordered cash flows that can be scanned repeatedly. Solvers walk
/// the flows once per iteration instead of holding them in memory.
trait CashFlows {
    fn scan(&mut self, f: &mut dyn FnMut(usize, f64)) -> Result<()>;

    /// Number of flows and whether both signs occur.
    fn profile(&mut self) -> Result<(usize, bool)> {
        let (mut count, mut positive, mut negative) = (0, false, false);
        self.scan(&mut |_: usize, cf: f64| {
            count += 1;
            positive |= cf > 0.0;
            negative |= cf < 0.0;
        })?;
        Ok((count, positive && negative))
    }
}

impl CashFlows for &[f64] {
    fn scan(&mut self, f: &mut dyn FnMut(usize, f64)) -> Result<()> {
        self.iter().enumerate().for_each(|(i, cf)| f(i, *cf));
        Ok(())
    }
}

impl CashFlows for CachedList {
    fn scan(&mut self, f: &mut dyn FnMut(usize, f64)) -> Result<()> {
        for i in 0..self.size() {
            f(i, self.get(i)?.to_f64()?);
        }
        Ok(())
    }
}

/// Internal rate of return by Newton-Raphson, starting from `guess`.
pub fn irr(flows: &[f64], guess: f64) -> Result<f64> {
    let mut flows = flows;
    solve_irr(&mut flows, guess)
}

fn solve_irr(flows: &mut impl CashFlows, guess: f64) -> Result<f64> {
    let (_, sign_change) = flows.profile()?;
    if !sign_change {
        return Err(Error::Aggregation(
            "IRR needs at least one positive and one negative cash flow".to_string(),
        ));
    }

    let mut rate = guess;
    for _ in 0..IRR_MAX_ITERATIONS {
        let mut value = 0.0;
        let mut derivative = 0.0;
        flows.scan(&mut |i: usize, cf: f64| {
            let t = i as f64;
            value += cf / (1.0 + rate).powf(t);
            derivative -= t * cf / (1.0 + rate).powf(t + 1.0);
        })?;
        if derivative == 0.0 || !derivative.is_finite() {
            break;
        }
        let next = rate - value / derivative;
        if !next.is_finite() {
            break;
        }
        if (next - rate).abs() < IRR_TOLERANCE {
            return Ok(next);
        }
        rate = next;
    }
    Err(Error::Aggregation(format!(
        "IRR did not converge from guess {}",
        guess
    )))
}

/// Modified internal rate of return: negative flows are discounted at
/// `finance_rate`, positive flows compounded at `reinvest_rate`.
pub fn mirr(flows: &[f64], finance_rate: f64, reinvest_rate: f64) -> Result<f64> {
    let mut flows = flows;
    solve_mirr(&mut flows, finance_rate, reinvest_rate)
}

fn solve_mirr(flows: &mut impl CashFlows, finance_rate: f64, reinvest_rate: f64) -> Result<f64> {
    let (count, sign_change) = flows.profile()?;
    if count < 2 || !sign_change {
        return Err(Error::Aggregation(
            "MIRR needs at least one positive and one negative cash flow".to_string(),
        ));
    }
    let last = (count - 1) as f64;
    let mut present = 0.0;
    let mut future = 0.0;
    flows.scan(&mut |i: usize, cf: f64| {
        let t = i as f64;
        if cf < 0.0 {
            present += cf / (1.0 + finance_rate).powf(t);
        } else {
            future += cf * (1.0 + reinvest_rate).powf(last - t);
        }
    })?;
    Ok((future / -present).powf(1.0 / last) - 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Npv,
    RunningNpv,
    Irr,
    Mirr,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Npv => "NPV",
            Mode::RunningNpv => "RUNNINGNPV",
            Mode::Irr => "IRR",
            Mode::Mirr => "MIRR",
        }
    }
}

#[derive(Debug)]
struct FinancialAccumulator {
    mode: Mode,
    spill: Arc<SpillArea>,
    phase: Phase,
    /// Rate (NPV), guess (IRR) or finance and reinvest rates (MIRR), captured
    /// from the first row that supplies them.
    rates: Option<(f64, f64)>,
    discount: f64,
    sum: f64,
    flows: Option<CachedList>,
    value: Value,
}

impl FinancialAccumulator {
    fn new(mode: Mode, spill: &Arc<SpillArea>) -> Self {
        Self {
            mode,
            spill: spill.clone(),
            phase: Phase::Idle,
            rates: None,
            discount: 1.0,
            sum: 0.0,
            flows: None,
            value: Value::Null,
        }
    }

    fn required_rate(&self, value: &Value, what: &str) -> Result<f64> {
        if value.is_null() {
            return Err(Error::InvalidArgument(format!(
                "{}: missing {}",
                self.mode.name(),
                what
            )));
        }
        value.to_f64()
    }

    fn capture_rates(&mut self, args: &[Value]) -> Result<()> {
        if self.rates.is_some() {
            return Ok(());
        }
        let rates = match self.mode {
            Mode::Npv | Mode::RunningNpv => (self.required_rate(arg(args, 1), "rate")?, 0.0),
            Mode::Irr => match arg(args, 1) {
                // Guess is optional; keep looking on later rows.
                Value::Null => return Ok(()),
                guess => (guess.to_f64()?, 0.0),
            },
            Mode::Mirr => (
                self.required_rate(arg(args, 1), "finance rate")?,
                self.required_rate(arg(args, 2), "reinvest rate")?,
            ),
        };
        self.rates = Some(rates);
        Ok(())
    }
}

impl Accumulator for FinancialAccumulator {
    fn start(&mut self) -> Result<()> {
        if let Some(mut flows) = self.flows.take() {
            flows.discard()?;
        }
        if matches!(self.mode, Mode::Irr | Mode::Mirr) {
            self.flows = Some(CachedList::new(self.spill.clone()));
        }
        self.rates = None;
        self.discount = 1.0;
        self.sum = 0.0;
        self.value = Value::Null;
        self.phase = Phase::Started;
        Ok(())
    }

    fn on_row(&mut self, args: &[Value]) -> Result<()> {
        self.phase.check_started(self.mode.name())?;
        if self.mode == Mode::RunningNpv {
            // Every row carries its own rate.
            self.rates = None;
        }
        self.capture_rates(args)?;

        let cf = arg(args, 0);
        if cf.is_null() {
            return Ok(());
        }
        let cf = cf.to_f64()?;

        match self.mode {
            Mode::Npv | Mode::RunningNpv => {
                let (rate, _) = self.rates.unwrap_or_default();
                self.discount *= 1.0 + rate;
                self.sum += cf / self.discount;
                self.value = Value::Double(self.sum);
            }
            Mode::Irr | Mode::Mirr => {
                if let Some(flows) = self.flows.as_mut() {
                    flows.append(Value::Double(cf))?;
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.check_started(self.mode.name())?;
        self.phase = Phase::Finished;

        let Some(mut flows) = self.flows.take() else {
            return Ok(());
        };
        let result = match (self.mode, self.rates) {
            _ if flows.is_empty() => None,
            (Mode::Irr, rates) => Some(solve_irr(
                &mut flows,
                rates.map_or(IRR_DEFAULT_GUESS, |(g, _)| g),
            )),
            (Mode::Mirr, Some((finance, reinvest))) => Some(solve_mirr(&mut flows, finance, reinvest)),
            _ => None,
        };
        flows.discard()?;

        if let Some(result) = result {
            self.value = Value::Double(result?);
        }
        Ok(())
    }

    fn get_value(&self) -> Result<Value> {
        self.phase.check_not_idle(self.mode.name())?;
        Ok(self.value.clone())
    }

    fn reset(&mut self) {
        self.flows = None;
        self.rates = None;
        self.discount = 1.0;
        self.sum = 0.0;
        self.value = Value::Null;
        self.phase = Phase::Idle;
    }
}

pub fn npv_fn(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(FinancialAccumulator::new(Mode::Npv, spill))
}

pub fn running_npv(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(FinancialAccumulator::new(Mode::RunningNpv, spill))
}

pub fn irr_fn(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(FinancialAccumulator::new(Mode::Irr, spill))
}

pub fn mirr_fn(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(FinancialAccumulator::new(Mode::Mirr, spill))
}

pub(crate) fn functions() -> Vec<FunctionDescriptor> {
    use FunctionKind::*;

    let flow = || {
        ParameterDef::data_field("value")
            .types(&[DataType::Integer, DataType::Double])
            .describe("Cash flow", "Cash flow of the period")
    };
    let rate = |name: &str, text: &str| ParameterDef::numeric(name).describe(name, text);
    vec![
        FunctionDescriptor::new("NPV", Summary, DataType::Double, npv_fn)
            .describe("NPV", "Net present value of the cash flows")
            .parameter(flow())
            .parameter(rate("rate", "Discount rate per period")),
        FunctionDescriptor::new("RUNNINGNPV", Running, DataType::Double, running_npv)
            .describe("Running NPV", "Net present value of the cash flows so far")
            .parameter(flow())
            .parameter(rate("rate", "Discount rate of the row's period")),
        FunctionDescriptor::new("IRR", Summary, DataType::Double, irr_fn)
            .describe("IRR", "Internal rate of return of the cash flows")
            .parameter(flow())
            .parameter(rate("guess", "Starting estimate, 0.1 when omitted").optional()),
        FunctionDescriptor::new("MIRR", Summary, DataType::Double, mirr_fn)
            .describe("MIRR", "Modified internal rate of return of the cash flows")
            .parameter(flow())
            .parameter(rate("finance_rate", "Rate paid on negative flows"))
            .parameter(rate("reinvest_rate", "Rate earned on positive flows")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const NPV_FLOWS: [f64; 4] = [-10000.0, 3000.0, 4200.0, 6800.0];
    const IRR_FLOWS: [f64; 6] = [-70000.0, 12000.0, 15000.0, 18000.0, 21000.0, 26000.0];
    const MIRR_FLOWS: [f64; 6] = [-120000.0, 39000.0, 30000.0, 21000.0, 37000.0, 46000.0];

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn drive(
        factory: fn(&Arc<SpillArea>) -> Box<dyn Accumulator>,
        rows: &[Vec<Value>],
    ) -> Result<(Vec<Value>, Value)> {
        drive_in(&Arc::new(SpillArea::in_memory(3)), factory, rows)
    }

    fn drive_in(
        spill: &Arc<SpillArea>,
        factory: fn(&Arc<SpillArea>) -> Box<dyn Accumulator>,
        rows: &[Vec<Value>],
    ) -> Result<(Vec<Value>, Value)> {
        let mut acc = factory(spill);
        acc.start()?;
        let mut running = Vec::new();
        for row in rows {
            acc.on_row(row)?;
            running.push(acc.get_value()?);
        }
        acc.finish()?;
        Ok((running, acc.get_summary_value()?))
    }

    fn rows(flows: &[f64], params: &[f64]) -> Vec<Vec<Value>> {
        flows
            .iter()
            .map(|cf| {
                std::iter::once(Value::from(*cf))
                    .chain(params.iter().map(|p| Value::from(*p)))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_npv() -> Result<()> {
        assert_eq!(npv(0.1, &NPV_FLOWS), 1188.4434123352207);

        let (_, value) = drive(npv_fn, &rows(&NPV_FLOWS, &[0.1]))?;
        assert_eq!(value, Value::from(1188.4434123352207));
        Ok(())
    }

    #[test]
    fn test_running_npv() -> Result<()> {
        let (running, _) = drive(running_npv, &rows(&NPV_FLOWS, &[0.1]))?;
        let expected = [-9090.90909090909, -6611.570247933883, -3456.0480841472577, 1188.4434123352207];
        assert_eq!(running, expected.map(Value::from).to_vec());

        // A missing rate is rejected on the row it is missing from.
        let mut bad = rows(&NPV_FLOWS, &[0.1]);
        bad[2][1] = Value::Null;
        assert!(matches!(
            drive(running_npv, &bad),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_irr() -> Result<()> {
        assert!(close(irr(&IRR_FLOWS, 0.1)?, 0.08663094803653162));
        assert!(close(irr(&IRR_FLOWS, -0.6)?, 0.08663094803653162));

        let (_, value) = drive(irr_fn, &rows(&IRR_FLOWS, &[]))?;
        assert!(close(value.to_f64()?, 0.08663094803653162));

        // Guess passed as a row argument, flows spilled and re-read per step.
        let spill = Arc::new(SpillArea::temp(2)?);
        let (_, value) = drive_in(&spill, irr_fn, &rows(&IRR_FLOWS, &[-0.6]))?;
        assert!(close(value.to_f64()?, 0.08663094803653162));
        assert_eq!(spill.document_count()?, 0);

        assert!(matches!(
            irr(&[100.0, 200.0], 0.1),
            Err(Error::Aggregation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_mirr() -> Result<()> {
        assert!(close(mirr(&MIRR_FLOWS, 0.1, 0.12)?, 0.1260941303659051));

        let (_, value) = drive(mirr_fn, &rows(&MIRR_FLOWS, &[0.1, 0.12]))?;
        assert!(close(value.to_f64()?, 0.1260941303659051));

        let spill = Arc::new(SpillArea::temp(2)?);
        let (_, value) = drive_in(&spill, mirr_fn, &rows(&MIRR_FLOWS, &[0.1, 0.12]))?;
        assert!(close(value.to_f64()?, 0.1260941303659051));

        assert!(matches!(
            mirr(&[-1.0, -2.0], 0.1, 0.1),
            Err(Error::Aggregation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_empty_and_idle() -> Result<()> {
        let spill = Arc::new(SpillArea::in_memory(3));
        for factory in [npv_fn, running_npv, irr_fn, mirr_fn] {
            let mut acc = factory(&spill);
            assert!(matches!(acc.get_value(), Err(Error::Aggregation(_))));
            acc.start()?;
            acc.finish()?;
            assert_eq!(acc.get_summary_value()?, Value::Null);
        }
        Ok(())
    }
}
