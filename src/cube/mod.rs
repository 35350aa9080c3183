//! Cube materialization: dimensions with their hierarchies, fact tables,
//! pre-aggregated result sets, archive export and a cursor over results.
//!
//! # Document layout
//!
//! ```text
//! dim/<d>/meta                     dimension name, hierarchy name
//! dim/<d>/hier/<h>/meta            hierarchy name, level definitions
//! dim/<d>/hier/<h>/level/<l>       sorted members of one level
//! dim/<d>/hier/<h>/index           leaf position -> ancestor positions
//! cube/<c>/meta                    measures, dimensions, row counts
//! cube/<c>/fact                    one row per fact: leaf positions, measures
//! cube/<c>/aggr/<i>                one result set per aggregation definition
//! cube/<c>/manifest                every document above, written last
//! ```
//!
//! A cube is only visible through [`Cube::load`] once its manifest exists,
//! so a cancelled or failed build leaves documents that nothing refers to.

pub mod dimension;
pub mod materializer;
pub mod navigator;
pub mod result;

pub use dimension::{Dimension, Hierarchy, Level, Member};
pub use materializer::CubeMaterializer;
pub use navigator::EdgeNavigator;
pub use result::{AggregationResultSet, ResultRow};

use byteorder::{BigEndian, ReadBytesExt};

use crate::document::{DocumentHandle, DocumentObjectCache};
use crate::encoding::{expect_string, read_manifest, read_string_list};
use crate::error::Result;
use crate::Error;

pub(crate) fn dimension_meta(dimension: &str) -> String {
    format!("dim/{}/meta", dimension)
}

pub(crate) fn hierarchy_meta(dimension: &str, hierarchy: &str) -> String {
    format!("dim/{}/hier/{}/meta", dimension, hierarchy)
}

pub(crate) fn level_document(dimension: &str, hierarchy: &str, level: &str) -> String {
    format!("dim/{}/hier/{}/level/{}", dimension, hierarchy, level)
}

pub(crate) fn hierarchy_index(dimension: &str, hierarchy: &str) -> String {
    format!("dim/{}/hier/{}/index", dimension, hierarchy)
}

pub(crate) fn cube_meta(cube: &str) -> String {
    format!("cube/{}/meta", cube)
}

pub(crate) fn fact_document(cube: &str) -> String {
    format!("cube/{}/fact", cube)
}

pub(crate) fn aggregation_document(cube: &str, index: usize) -> String {
    format!("cube/{}/aggr/{}", cube, index)
}

pub(crate) fn cube_manifest(cube: &str) -> String {
    format!("cube/{}/manifest", cube)
}

/// Reads the whole content of an existing document through the cache.
pub(crate) fn read_document(cache: &mut DocumentObjectCache, name: &str) -> Result<Vec<u8>> {
    if !cache.is_cached(name) && !cache.manager().exists(name) {
        return Err(Error::DocumentNotFound(name.to_string()));
    }
    let handle = cache.get(name)?;
    let mut doc = handle.lock()?;
    doc.read_all()
}

/// Opens `name` empty for writing, dropping any previous content.
pub(crate) fn create_document(cache: &mut DocumentObjectCache, name: &str) -> Result<DocumentHandle> {
    cache.invalidate(name)?;
    if cache.manager().exists(name) {
        cache.manager_mut().remove(name)?;
    }
    cache.get(name)
}

/// Replaces the content of `name` with `bytes`.
pub(crate) fn write_document(cache: &mut DocumentObjectCache, name: &str, bytes: &[u8]) -> Result<()> {
    let handle = create_document(cache, name)?;
    let mut doc = handle.lock()?;
    doc.append(bytes)?;
    doc.flush()
}

/// Definition of one level: the columns identifying a member and the
/// columns carried along as attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDef {
    pub name: String,
    pub key_columns: Vec<String>,
    pub attribute_columns: Vec<String>,
}

impl LevelDef {
    /// Level keyed by a single column of the same name.
    pub fn new(name: &str) -> Self {
        Self::keyed(name, &[name])
    }

    pub fn keyed(name: &str, key_columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            attribute_columns: Vec::new(),
        }
    }

    pub fn attributes(mut self, columns: &[&str]) -> Self {
        self.attribute_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Names a level of one of the cube's dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRef {
    pub dimension: String,
    pub level: String,
}

impl LevelRef {
    pub fn new(dimension: &str, level: &str) -> Self {
        Self {
            dimension: dimension.to_string(),
            level: level.to_string(),
        }
    }
}

/// A measure of an aggregation: `function` applied to fact column `column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureDef {
    pub name: String,
    pub column: String,
    pub function: String,
}

impl MeasureDef {
    pub fn new(name: &str, column: &str, function: &str) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
            function: function.to_string(),
        }
    }
}

/// Pre-aggregation of the fact table grouped by `levels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationDef {
    pub name: String,
    pub levels: Vec<LevelRef>,
    pub measures: Vec<MeasureDef>,
}

impl AggregationDef {
    pub fn new(name: &str, levels: Vec<LevelRef>, measures: Vec<MeasureDef>) -> Self {
        Self {
            name: name.to_string(),
            levels,
            measures,
        }
    }
}

/// A materialized cube.
#[derive(Debug)]
pub struct Cube {
    name: String,
    dimensions: Vec<Dimension>,
    measures: Vec<String>,
    fact_rows: u64,
    aggregations: Vec<AggregationResultSet>,
}

impl Cube {
    pub(crate) fn new(
        name: &str,
        dimensions: Vec<Dimension>,
        measures: Vec<String>,
        fact_rows: u64,
        aggregations: Vec<AggregationResultSet>,
    ) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            measures,
            fact_rows,
            aggregations,
        }
    }

    /// Reopens a cube materialized into the cache's manager, which may be a
    /// read-only archive. Fails with `DocumentNotFound` when the cube has no
    /// manifest.
    pub fn load(cache: &mut DocumentObjectCache, name: &str) -> Result<Self> {
        let manifest = read_manifest(&mut &read_document(cache, &cube_manifest(name))?[..])?;

        let meta = read_document(cache, &cube_meta(name))?;
        let mut reader = &meta[..];
        let stored = expect_string(&mut reader, "cube name")?;
        if stored != name {
            return Err(Error::CorruptedDocument(format!(
                "cube meta names {} instead of {}",
                stored, name
            )));
        }
        let fact_rows = reader.read_u64::<BigEndian>()?;
        let dimension_names = read_string_list(&mut reader)?;
        let measures = read_string_list(&mut reader)?;
        let aggregation_count = reader.read_u32::<BigEndian>()? as usize;

        let dimensions = dimension_names
            .iter()
            .map(|d| Dimension::load(cache, d))
            .collect::<Result<Vec<_>>>()?;
        let aggregations = (0..aggregation_count)
            .map(|i| {
                let doc = aggregation_document(name, i);
                if !manifest.contains(&doc) {
                    return Err(Error::CorruptedDocument(format!(
                        "{} is missing from the manifest",
                        doc
                    )));
                }
                AggregationResultSet::load(cache, &doc)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(cube = %name, documents = manifest.len(), "Cube loaded");
        Ok(Self::new(name, dimensions, measures, fact_rows, aggregations))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name() == name)
    }

    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    pub fn fact_rows(&self) -> u64 {
        self.fact_rows
    }

    pub fn aggregations(&self) -> &[AggregationResultSet] {
        &self.aggregations
    }

    pub fn aggregation(&self, name: &str) -> Option<&AggregationResultSet> {
        self.aggregations.iter().find(|a| a.name() == name)
    }
}
