//! Forward-only row sources and the expressions evaluated against them.

use std::fmt::Debug;

use crate::error::Result;
use crate::value::Value;
use crate::Error;

/// A forward-only cursor over rows of indexed values.
///
/// `next_row` returns `Ok(false)` at end of data; callers never see an error
/// for the normal end of the stream.
pub trait RowSource {
    /// Column names, in index order.
    fn columns(&self) -> &[String];

    /// Advances to the next row.
    fn next_row(&mut self) -> Result<bool>;

    /// Value of the given column on the current row.
    fn value(&self, index: usize) -> Result<&Value>;

    /// Index of the named column, compared case-insensitively.
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns()
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Row source over rows held in memory.
#[derive(Debug, Clone)]
pub struct VecRowSource {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
}

impl VecRowSource {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
            cursor: None,
        }
    }

    /// Single column source, handy for feeding one expression.
    pub fn single<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let rows = values.into_iter().map(|v| vec![v.into()]).collect();
        Self::new([column], rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowSource for VecRowSource {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.rows.len() {
            self.cursor = Some(self.rows.len());
            return Ok(false);
        }
        self.cursor = Some(next);
        Ok(true)
    }

    fn value(&self, index: usize) -> Result<&Value> {
        let row = self
            .cursor
            .and_then(|c| self.rows.get(c))
            .ok_or_else(|| Error::InvalidState("row source is not positioned on a row".into()))?;
        row.get(index).ok_or(Error::IndexOutOfRange {
            index,
            size: row.len(),
        })
    }
}

/// Opaque expression producing a value for the current row.
pub trait Expression: Debug + Send + Sync {
    fn evaluate(&self, row: &dyn RowSource) -> Result<Value>;
}

/// Reads one column of the current row.
#[derive(Debug, Clone, Copy)]
pub struct Column(pub usize);

impl Expression for Column {
    fn evaluate(&self, row: &dyn RowSource) -> Result<Value> {
        row.value(self.0).cloned()
    }
}

/// Yields the same value for every row.
#[derive(Debug, Clone)]
pub struct Literal(pub Value);

impl Expression for Literal {
    fn evaluate(&self, _row: &dyn RowSource) -> Result<Value> {
        Ok(self.0.clone())
    }
}
