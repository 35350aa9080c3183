//! Two-pass ranking functions: top/bottom N membership, rank and percent
//! rank.
//!
//! The first pass appends every row's value to a [`CachedList`] (nulls
//! included, so positions line up with rows) and captures the parameter from
//! its first occurrence. The second `start` derives the targets from the
//! collected values, and the second pass reports each row against them.
//!
//! Values are ordered by [`Value`]'s total order. Deriving targets never
//! loads the collected list: top/bottom selection scans it once keeping the
//! N best rows in a heap, and ranking binary searches a sorted copy that
//! spills like any other list.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use super::{arg, Accumulator, FunctionDescriptor, FunctionKind, ParameterDef, Phase};
use crate::container::{CachedList, SpillArea};
use crate::error::Result;
use crate::value::{DataType, Value};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    TopN,
    BottomN,
    TopPercent,
    BottomPercent,
    Rank,
    PercentRank,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::TopN => "ISTOPN",
            Mode::BottomN => "ISBOTTOMN",
            Mode::TopPercent => "ISTOPNPERCENT",
            Mode::BottomPercent => "ISBOTTOMNPERCENT",
            Mode::Rank => "RANK",
            Mode::PercentRank => "PERCENTRANK",
        }
    }

    fn parameter_required(self) -> bool {
        !matches!(self, Mode::Rank | Mode::PercentRank)
    }
}

#[derive(Debug)]
enum Targets {
    /// Row positions selected by a top/bottom function.
    Positions(HashSet<usize>),
    /// Every collected value in ascending order; the first `nulls` are null.
    Sorted { values: CachedList, nulls: usize },
}

/// A row competing for a top/bottom slot. Compares worst first, so the root
/// of a max-heap is the row to evict.
#[derive(Debug)]
struct Candidate {
    value: Value,
    index: usize,
    top: bool,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_value = match (self.value.is_null(), other.value.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if self.top => other.value.cmp(&self.value),
            (false, false) => self.value.cmp(&other.value),
        };
        by_value.then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// First index in `lo..list.size()` where `pred` stops holding, for a list
/// on which `pred` holds for a prefix of that range.
fn partition_point(list: &mut CachedList, lo: usize, mut pred: impl FnMut(&Value) -> bool) -> Result<usize> {
    let (mut lo, mut hi) = (lo, list.size());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(&list.get(mid)?) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

#[derive(Debug)]
enum State {
    Idle,
    Collecting {
        values: CachedList,
        parameter: Option<Value>,
    },
    Ranking {
        targets: Targets,
        cursor: usize,
    },
}

#[derive(Debug)]
struct RankAccumulator {
    mode: Mode,
    spill: Arc<SpillArea>,
    state: State,
    phase: Phase,
    /// Ascending order for RANK, captured in pass one.
    ascending: bool,
    value: Value,
}

impl RankAccumulator {
    fn new(mode: Mode, spill: &Arc<SpillArea>) -> Self {
        Self {
            mode,
            spill: spill.clone(),
            state: State::Idle,
            phase: Phase::Idle,
            ascending: false,
            value: Value::Null,
        }
    }

    fn validate_parameter(&self, parameter: &Value) -> Result<Value> {
        let name = self.mode.name();
        match self.mode {
            Mode::TopN | Mode::BottomN => {
                let n = parameter.to_f64()?;
                if n < 0.0 || n.fract() != 0.0 {
                    return Err(Error::InvalidArgument(format!(
                        "{}: N must be a non-negative integer, got {}",
                        name, parameter
                    )));
                }
                Ok(Value::from(n as i64))
            }
            Mode::TopPercent | Mode::BottomPercent => {
                let percent = parameter.to_f64()?;
                if !(0.0..=100.0).contains(&percent) {
                    return Err(Error::InvalidArgument(format!(
                        "{}: percent must be within [0, 100], got {}",
                        name, parameter
                    )));
                }
                Ok(Value::from(percent))
            }
            Mode::Rank | Mode::PercentRank => Ok(Value::from(parameter.as_bool().unwrap_or(false))),
        }
    }

    fn collect(&mut self, args: &[Value]) -> Result<()> {
        let value = arg(args, 0).clone();
        let given = arg(args, 1);

        let mut captured = None;
        if let State::Collecting { parameter: None, .. } = &self.state {
            if given.is_null() {
                if self.mode.parameter_required() {
                    return Err(Error::InvalidArgument(format!(
                        "{}: missing N on first row",
                        self.mode.name()
                    )));
                }
            } else {
                captured = Some(self.validate_parameter(given)?);
            }
        }

        if let State::Collecting { values, parameter } = &mut self.state {
            if let Some(p) = captured {
                if let Value::Boolean(flag) = p {
                    self.ascending = flag;
                }
                *parameter = Some(p);
            }
            values.append(value)?;
        }
        Ok(())
    }

    /// Builds the pass two targets from the collected values.
    fn targets(&self, values: &mut CachedList, parameter: Option<&Value>) -> Result<Targets> {
        let size = values.size();

        let n = match (self.mode, parameter) {
            (Mode::Rank | Mode::PercentRank, _) => {
                let mut sorted = values.sorted()?;
                let nulls = partition_point(&mut sorted, 0, Value::is_null)?;
                return Ok(Targets::Sorted {
                    values: sorted,
                    nulls,
                });
            }
            // No rows: nothing to select.
            (_, None) => 0,
            (Mode::TopN | Mode::BottomN, Some(n)) => n.to_f64()? as usize,
            (_, Some(percent)) => (percent.to_f64()? / 100.0 * size as f64).round() as usize,
        };

        let top = matches!(self.mode, Mode::TopN | Mode::TopPercent);
        let mut best = BinaryHeap::with_capacity(n.min(size));
        for index in 0..size {
            let candidate = Candidate {
                value: values.get(index)?,
                index,
                top,
            };
            if best.len() < n {
                best.push(candidate);
            } else if let Some(mut worst) = best.peek_mut() {
                if candidate < *worst {
                    *worst = candidate;
                }
            }
        }
        Ok(Targets::Positions(
            best.into_iter().map(|candidate| candidate.index).collect(),
        ))
    }

    fn emit(&mut self, args: &[Value]) -> Result<()> {
        let State::Ranking { targets, cursor } = &mut self.state else {
            return Ok(());
        };
        let row = *cursor;
        *cursor += 1;

        self.value = match targets {
            Targets::Positions(positions) => Value::from(positions.contains(&row)),
            Targets::Sorted { values, nulls } => match arg(args, 0) {
                Value::Null => Value::Null,
                v => {
                    let nulls = *nulls;
                    let count = values.size() - nulls;
                    let below = partition_point(values, nulls, |x| x < v)? - nulls;
                    let above = values.size() - partition_point(values, nulls, |x| x <= v)?;
                    match self.mode {
                        Mode::PercentRank if count <= 1 => Value::from(1.0),
                        Mode::PercentRank => Value::from(below as f64 / (count - 1) as f64),
                        _ if self.ascending => Value::from(below + 1),
                        _ => Value::from(above + 1),
                    }
                }
            },
        };
        Ok(())
    }
}

impl Accumulator for RankAccumulator {
    fn start(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        self.state = match state {
            State::Collecting {
                mut values,
                parameter,
            } => {
                let targets = self.targets(&mut values, parameter.as_ref())?;
                values.discard()?;
                State::Ranking { targets, cursor: 0 }
            }
            State::Idle | State::Ranking { .. } => {
                self.ascending = false;
                State::Collecting {
                    values: CachedList::new(self.spill.clone()),
                    parameter: None,
                }
            }
        };
        self.value = Value::Null;
        self.phase = Phase::Started;
        Ok(())
    }

    fn on_row(&mut self, args: &[Value]) -> Result<()> {
        self.phase.check_started(self.mode.name())?;
        match self.state {
            State::Collecting { .. } => self.collect(args),
            State::Ranking { .. } => self.emit(args),
            State::Idle => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.phase.check_started(self.mode.name())?;
        self.phase = Phase::Finished;
        Ok(())
    }

    fn get_value(&self) -> Result<Value> {
        self.phase.check_not_idle(self.mode.name())?;
        Ok(self.value.clone())
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.phase = Phase::Idle;
        self.ascending = false;
        self.value = Value::Null;
    }
}

pub fn is_top_n(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(RankAccumulator::new(Mode::TopN, spill))
}

pub fn is_bottom_n(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(RankAccumulator::new(Mode::BottomN, spill))
}

pub fn is_top_n_percent(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(RankAccumulator::new(Mode::TopPercent, spill))
}

pub fn is_bottom_n_percent(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(RankAccumulator::new(Mode::BottomPercent, spill))
}

pub fn rank(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(RankAccumulator::new(Mode::Rank, spill))
}

pub fn percent_rank(spill: &Arc<SpillArea>) -> Box<dyn Accumulator> {
    Box::new(RankAccumulator::new(Mode::PercentRank, spill))
}

pub(crate) fn functions() -> Vec<FunctionDescriptor> {
    use FunctionKind::Running;

    let value = || ParameterDef::data_field("value").types(&[DataType::Integer, DataType::Double, DataType::String]);
    let n = || ParameterDef::numeric("n").describe("N", "Number of rows to select");
    let percent = || ParameterDef::numeric("percent").describe("Percent", "Share of rows to select, 0 to 100");
    let ascending = ParameterDef::numeric("ascending")
        .optional()
        .types(&[DataType::Boolean])
        .describe("Ascending", "Rank smallest values first");

    vec![
        FunctionDescriptor::new("ISTOPN", Running, DataType::Boolean, is_top_n)
            .describe("Is top N", "True for rows among the N largest values")
            .passes(2)
            .parameter(value())
            .parameter(n()),
        FunctionDescriptor::new("ISBOTTOMN", Running, DataType::Boolean, is_bottom_n)
            .describe("Is bottom N", "True for rows among the N smallest values")
            .passes(2)
            .parameter(value())
            .parameter(n()),
        FunctionDescriptor::new("ISTOPNPERCENT", Running, DataType::Boolean, is_top_n_percent)
            .describe("Is top N percent", "True for rows within the top percent of values")
            .passes(2)
            .parameter(value())
            .parameter(percent()),
        FunctionDescriptor::new("ISBOTTOMNPERCENT", Running, DataType::Boolean, is_bottom_n_percent)
            .describe("Is bottom N percent", "True for rows within the bottom percent of values")
            .passes(2)
            .parameter(value())
            .parameter(percent()),
        FunctionDescriptor::new("RANK", Running, DataType::Integer, rank)
            .describe("Rank", "Competition rank of the row's value")
            .passes(2)
            .parameter(value())
            .parameter(ascending),
        FunctionDescriptor::new("PERCENTRANK", Running, DataType::Double, percent_rank)
            .describe("Percent rank", "Share of values strictly below the row's value")
            .passes(2)
            .parameter(value()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives both passes over `values`, passing `parameter` on every row.
    fn two_pass(
        factory: fn(&Arc<SpillArea>) -> Box<dyn Accumulator>,
        values: &[Value],
        parameter: Value,
    ) -> Result<Vec<Value>> {
        two_pass_in(&Arc::new(SpillArea::in_memory(2)), factory, values, parameter)
    }

    fn two_pass_in(
        spill: &Arc<SpillArea>,
        factory: fn(&Arc<SpillArea>) -> Box<dyn Accumulator>,
        values: &[Value],
        parameter: Value,
    ) -> Result<Vec<Value>> {
        let mut acc = factory(spill);
        for pass in 0..2 {
            acc.start()?;
            let mut out = Vec::new();
            for v in values {
                acc.on_row(&[v.clone(), parameter.clone()])?;
                out.push(acc.get_value()?);
            }
            acc.finish()?;
            if pass == 1 {
                return Ok(out);
            }
        }
        unreachable!()
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().copied().map(Value::from).collect()
    }

    fn flags(values: &[bool]) -> Vec<Value> {
        values.iter().copied().map(Value::from).collect()
    }

    #[test]
    fn test_bottom_n() -> Result<()> {
        let out = two_pass(is_bottom_n, &ints(&[5, 3, 8, 1, 9]), Value::from(2))?;
        assert_eq!(out, flags(&[false, true, false, true, false]));
        Ok(())
    }

    #[test]
    fn test_top_n_ties_prefer_earliest() -> Result<()> {
        let out = two_pass(is_top_n, &ints(&[7, 9, 7, 7]), Value::from(2))?;
        assert_eq!(out, flags(&[true, true, false, false]));
        Ok(())
    }

    #[test]
    fn test_nulls_selected_last() -> Result<()> {
        let values = vec![Value::Null, Value::from(1), Value::from(2)];
        let out = two_pass(is_bottom_n, &values, Value::from(2))?;
        assert_eq!(out, flags(&[false, true, true]));

        let out = two_pass(is_top_n, &values, Value::from(3))?;
        assert_eq!(out, flags(&[true, true, true]));
        Ok(())
    }

    #[test]
    fn test_percent_variants() -> Result<()> {
        let values = ints(&[10, 40, 20, 30]);
        let out = two_pass(is_top_n_percent, &values, Value::from(50))?;
        assert_eq!(out, flags(&[false, true, false, true]));

        let out = two_pass(is_bottom_n_percent, &values, Value::from(25))?;
        assert_eq!(out, flags(&[true, false, false, false]));

        assert!(matches!(
            two_pass(is_top_n_percent, &values, Value::from(101)),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_parameter() {
        assert!(matches!(
            two_pass(is_top_n, &ints(&[1]), Value::Null),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            two_pass(is_top_n, &ints(&[1]), Value::from(-1)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rank() -> Result<()> {
        let values = vec![
            Value::from(10),
            Value::from(30),
            Value::from(20),
            Value::from(30),
            Value::Null,
        ];
        let out = two_pass(rank, &values, Value::Null)?;
        assert_eq!(
            out,
            vec![
                Value::from(4),
                Value::from(1),
                Value::from(3),
                Value::from(1),
                Value::Null
            ]
        );

        let out = two_pass(rank, &values, Value::from(true))?;
        assert_eq!(out[..4], ints(&[1, 3, 2, 3])[..]);
        Ok(())
    }

    #[test]
    fn test_rank_strings() -> Result<()> {
        let spill = Arc::new(SpillArea::temp(2)?);
        let mut values: Vec<Value> = ["pear", "apple", "fig", "apple", "kiwi", "banana"]
            .into_iter()
            .map(Value::from)
            .collect();
        values.push(Value::Null);

        let out = two_pass_in(&spill, rank, &values, Value::Null)?;
        assert_eq!(out[..6], ints(&[1, 5, 3, 5, 2, 4])[..]);
        assert_eq!(out[6], Value::Null);

        let out = two_pass_in(&spill, rank, &values, Value::from(true))?;
        assert_eq!(out[..6], ints(&[6, 1, 4, 1, 5, 3])[..]);

        let out = two_pass_in(&spill, is_bottom_n, &values, Value::from(2))?;
        assert_eq!(out, flags(&[false, true, false, true, false, false, false]));
        Ok(())
    }

    #[test]
    fn test_top_n_over_spilled_values_keeps_n_positions() -> Result<()> {
        let spill = Arc::new(SpillArea::temp(2)?);
        let mut acc = RankAccumulator::new(Mode::TopN, &spill);
        let values: Vec<Value> = (0..40).map(|i| Value::from((i * 7) % 40)).collect();

        acc.start()?;
        for v in &values {
            acc.on_row(&[v.clone(), Value::from(3)])?;
        }
        acc.finish()?;
        assert_eq!(spill.document_count()?, 2);

        acc.start()?;
        match &acc.state {
            State::Ranking {
                targets: Targets::Positions(positions),
                ..
            } => assert_eq!(positions.len(), 3),
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(spill.document_count()?, 0);

        let mut selected = Vec::new();
        for v in &values {
            acc.on_row(&[v.clone()])?;
            if acc.get_value()? == Value::from(true) {
                selected.push(v.clone());
            }
        }
        acc.finish()?;
        selected.sort();
        assert_eq!(selected, ints(&[37, 38, 39]));
        Ok(())
    }

    #[test]
    fn test_percent_rank() -> Result<()> {
        let out = two_pass(percent_rank, &ints(&[10, 30, 20, 40, 50]), Value::Null)?;
        assert_eq!(
            out,
            [0.0, 0.5, 0.25, 0.75, 1.0].map(Value::from).to_vec()
        );

        let out = two_pass(percent_rank, &ints(&[7]), Value::Null)?;
        assert_eq!(out, vec![Value::from(1.0)]);
        Ok(())
    }

    #[test]
    fn test_spilled_collection_and_restart() -> Result<()> {
        let spill = Arc::new(SpillArea::in_memory(2));
        let mut acc = is_top_n(&spill);
        let values = ints(&[4, 8, 1, 6, 3]);

        for _group in 0..2 {
            acc.start()?;
            for v in &values {
                acc.on_row(&[v.clone(), Value::from(1)])?;
            }
            acc.finish()?;
            assert_eq!(spill.document_count()?, 2);

            acc.start()?;
            assert_eq!(spill.document_count()?, 0);
            let mut selected = Vec::new();
            for v in &values {
                acc.on_row(&[v.clone()])?;
                selected.push(acc.get_value()?);
            }
            acc.finish()?;
            assert_eq!(selected, flags(&[false, true, false, false, false]));
        }
        Ok(())
    }

    #[test]
    fn test_empty_group() -> Result<()> {
        let spill = Arc::new(SpillArea::in_memory(2));
        let mut acc = is_top_n(&spill);
        assert!(acc.get_value().is_err());
        acc.start()?;
        acc.finish()?;
        acc.start()?;
        acc.finish()?;
        assert_eq!(acc.get_value()?, Value::Null);
        Ok(())
    }
}
