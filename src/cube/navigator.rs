use super::{AggregationResultSet, ResultRow};
use crate::error::Result;
use crate::value::Value;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    Row(usize),
    AfterLast,
}

/// Scrollable cursor over the rows of an aggregation result set.
///
/// The cursor starts before the first row. Moves that leave the visible rows
/// park it before the first or after the last row and return `false`.
/// Problems that do not stop navigation are collected as warnings.
#[derive(Debug)]
pub struct EdgeNavigator<'a> {
    set: &'a AggregationResultSet,
    position: Position,
    fetch_size: usize,
    warnings: Vec<String>,
}

impl<'a> EdgeNavigator<'a> {
    pub fn new(set: &'a AggregationResultSet) -> Self {
        Self {
            set,
            position: Position::BeforeFirst,
            fetch_size: set.len(),
            warnings: Vec::new(),
        }
    }

    /// Number of rows the cursor can reach.
    pub fn len(&self) -> usize {
        self.fetch_size
    }

    pub fn is_empty(&self) -> bool {
        self.fetch_size == 0
    }

    /// Limits the reachable rows. A size beyond the result is clamped; any
    /// size other than the result length leaves a warning.
    pub fn set_fetch_size(&mut self, size: usize) {
        let available = self.set.len();
        if size > available {
            self.warnings.push(format!(
                "fetch size {} exceeds the {} available rows; using {}",
                size, available, available
            ));
        } else if size < available {
            self.warnings.push(format!(
                "fetch size {} hides {} of {} rows",
                size,
                available - size,
                available
            ));
        }
        self.fetch_size = size.min(available);
        if let Position::Row(i) = self.position {
            if i >= self.fetch_size {
                self.position = Position::AfterLast;
            }
        }
    }

    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    /// Moves to zero-based row `index`. Negative indexes park the cursor
    /// before the first row, indexes past the end after the last.
    pub fn absolute(&mut self, index: i64) -> bool {
        self.position = if index < 0 {
            Position::BeforeFirst
        } else if index as u64 >= self.fetch_size as u64 {
            Position::AfterLast
        } else {
            Position::Row(index as usize)
        };
        matches!(self.position, Position::Row(_))
    }

    /// Moves `offset` rows from the current position.
    pub fn relative(&mut self, offset: i64) -> bool {
        let current = match self.position {
            Position::BeforeFirst => -1,
            Position::Row(i) => i as i64,
            Position::AfterLast => self.fetch_size as i64,
        };
        self.absolute(current.saturating_add(offset))
    }

    pub fn first(&mut self) -> bool {
        self.absolute(0)
    }

    pub fn last(&mut self) -> bool {
        if self.fetch_size == 0 {
            self.position = Position::BeforeFirst;
            return false;
        }
        self.absolute(self.fetch_size as i64 - 1)
    }

    pub fn next(&mut self) -> bool {
        self.relative(1)
    }

    pub fn previous(&mut self) -> bool {
        self.relative(-1)
    }

    pub fn before_first(&mut self) {
        self.position = Position::BeforeFirst;
    }

    pub fn after_last(&mut self) {
        self.position = Position::AfterLast;
    }

    pub fn is_before_first(&self) -> bool {
        self.position == Position::BeforeFirst
    }

    pub fn is_after_last(&self) -> bool {
        self.position == Position::AfterLast
    }

    pub fn is_first(&self) -> bool {
        self.position == Position::Row(0)
    }

    pub fn is_last(&self) -> bool {
        self.fetch_size > 0 && self.position == Position::Row(self.fetch_size - 1)
    }

    /// Zero-based index of the current row.
    pub fn position(&self) -> Option<usize> {
        match self.position {
            Position::Row(i) => Some(i),
            _ => None,
        }
    }

    fn current(&self) -> Result<(usize, &'a ResultRow)> {
        let set: &'a AggregationResultSet = self.set;
        match self.position {
            Position::Row(i) => set
                .row(i)
                .map(|row| (i, row))
                .ok_or(Error::IndexOutOfRange {
                    index: i,
                    size: set.len(),
                }),
            _ => Err(Error::InvalidState(
                "navigator is not positioned on a row".to_string(),
            )),
        }
    }

    fn check_level(&self, level: usize) -> Result<()> {
        let levels = self.set.levels().len();
        if level >= levels {
            return Err(Error::IndexOutOfRange {
                index: level,
                size: levels,
            });
        }
        Ok(())
    }

    /// Keys of the current row's member on grouped level `level`.
    pub fn member_keys(&self, level: usize) -> Result<&'a [Value]> {
        self.check_level(level)?;
        let (_, row) = self.current()?;
        Ok(&row.keys[level])
    }

    /// Value of the named measure on the current row.
    pub fn measure(&self, name: &str) -> Result<&'a Value> {
        let index = self
            .set
            .measure_index(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown measure {}", name)))?;
        let (_, row) = self.current()?;
        Ok(&row.values[index])
    }

    fn same_group(a: &ResultRow, b: &ResultRow, level: usize) -> bool {
        a.positions[..=level] == b.positions[..=level]
    }

    /// First row of the current row's group on `level`: the rows sharing
    /// its members on levels `0..=level`.
    pub fn level_start(&self, level: usize) -> Result<usize> {
        self.check_level(level)?;
        let (index, row) = self.current()?;
        let rows = self.set.rows();
        let mut start = index;
        while start > 0 && Self::same_group(&rows[start - 1], row, level) {
            start -= 1;
        }
        Ok(start)
    }

    /// Last row of the current row's group on `level`, within the fetch size.
    pub fn level_end(&self, level: usize) -> Result<usize> {
        self.check_level(level)?;
        let (index, row) = self.current()?;
        let rows = self.set.rows();
        let mut end = index;
        while end + 1 < self.fetch_size && Self::same_group(&rows[end + 1], row, level) {
            end += 1;
        }
        Ok(end)
    }
}
