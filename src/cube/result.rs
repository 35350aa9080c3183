use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{read_document, write_document, EdgeNavigator, LevelRef};
use crate::document::DocumentObjectCache;
use crate::encoding::{expect_string, read_string_list, read_values, write_string, write_string_list, write_values};
use crate::error::Result;
use crate::value::Value;

/// One group of an aggregation: the member it belongs to on every grouped
/// level, and the measure values.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    /// Member position per level.
    pub positions: Vec<usize>,
    /// Member keys per level.
    pub keys: Vec<Vec<Value>>,
    pub values: Vec<Value>,
}

/// Rows of one pre-aggregation, ordered by member position level by level.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResultSet {
    name: String,
    levels: Vec<LevelRef>,
    measures: Vec<String>,
    rows: Vec<ResultRow>,
}

impl AggregationResultSet {
    pub fn new(name: &str, levels: Vec<LevelRef>, measures: Vec<String>, rows: Vec<ResultRow>) -> Self {
        Self {
            name: name.to_string(),
            levels,
            measures,
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[LevelRef] {
        &self.levels
    }

    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    pub fn measure_index(&self, name: &str) -> Option<usize> {
        self.measures.iter().position(|m| m.eq_ignore_ascii_case(name))
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&ResultRow> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn navigator(&self) -> EdgeNavigator<'_> {
        EdgeNavigator::new(self)
    }

    pub(crate) fn save(&self, cache: &mut DocumentObjectCache, document: &str) -> Result<()> {
        let mut buf = Vec::new();
        write_string(&mut buf, &self.name)?;
        buf.write_u32::<BigEndian>(self.levels.len() as u32)?;
        for level in &self.levels {
            write_string(&mut buf, &level.dimension)?;
            write_string(&mut buf, &level.level)?;
        }
        write_string_list(&mut buf, &self.measures)?;
        buf.write_u32::<BigEndian>(self.rows.len() as u32)?;
        for row in &self.rows {
            for (position, keys) in row.positions.iter().zip(&row.keys) {
                buf.write_u32::<BigEndian>(*position as u32)?;
                write_values(&mut buf, keys)?;
            }
            write_values(&mut buf, &row.values)?;
        }
        write_document(cache, document, &buf)
    }

    pub(crate) fn load(cache: &mut DocumentObjectCache, document: &str) -> Result<Self> {
        let bytes = read_document(cache, document)?;
        let mut reader = &bytes[..];
        let name = expect_string(&mut reader, "aggregation name")?;
        let level_count = reader.read_u32::<BigEndian>()? as usize;
        let mut levels = Vec::with_capacity(level_count);
        for _ in 0..level_count {
            let dimension = expect_string(&mut reader, "dimension name")?;
            let level = expect_string(&mut reader, "level name")?;
            levels.push(LevelRef { dimension, level });
        }
        let measures = read_string_list(&mut reader)?;
        let row_count = reader.read_u32::<BigEndian>()? as usize;
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let mut positions = Vec::with_capacity(level_count);
            let mut keys = Vec::with_capacity(level_count);
            for _ in 0..level_count {
                positions.push(reader.read_u32::<BigEndian>()? as usize);
                keys.push(read_values(&mut reader)?);
            }
            let values = read_values(&mut reader)?;
            rows.push(ResultRow {
                positions,
                keys,
                values,
            });
        }
        Ok(Self {
            name,
            levels,
            measures,
            rows,
        })
    }
}
