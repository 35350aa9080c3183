use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};

use super::{
    aggregation_document, create_document, cube_manifest, cube_meta, fact_document,
    hierarchy_meta, read_document, write_document, AggregationDef, AggregationResultSet, Cube,
    Dimension, Hierarchy, LevelDef, ResultRow,
};
use crate::aggregation::{Accumulator, AggregationFunction, AggregationRegistry, FunctionKind};
use crate::cancel::CancelToken;
use crate::container::SpillArea;
use crate::document::{ArchiveWriter, DocumentObjectCache};
use crate::encoding::{read_manifest, write_manifest, write_string, write_string_list, write_values};
use crate::error::Result;
use crate::row::RowSource;
use crate::Error;

/// Resolved aggregation definition: grouped levels as (dimension, level)
/// indexes and measures as (fact column, function).
struct AggregationPlan<'a> {
    def: &'a AggregationDef,
    levels: Vec<(usize, usize)>,
    measures: Vec<(usize, Arc<dyn AggregationFunction>)>,
    groups: BTreeMap<Vec<usize>, Vec<Box<dyn Accumulator>>>,
}

/// Builds dimensions and cubes into the documents of a cache.
pub struct CubeMaterializer {
    cache: DocumentObjectCache,
    registry: Arc<AggregationRegistry>,
    spill: Arc<SpillArea>,
}

impl CubeMaterializer {
    pub fn new(
        cache: DocumentObjectCache,
        registry: Arc<AggregationRegistry>,
        spill: Arc<SpillArea>,
    ) -> Self {
        Self {
            cache,
            registry,
            spill,
        }
    }

    pub fn cache(&self) -> &DocumentObjectCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut DocumentObjectCache {
        &mut self.cache
    }

    /// Streams member rows into a hierarchy of `dimension` and persists it.
    pub fn create_hierarchy(
        &mut self,
        dimension: &str,
        hierarchy: &str,
        member_rows: &mut dyn RowSource,
        level_defs: &[LevelDef],
        cancel: &CancelToken,
    ) -> Result<Hierarchy> {
        let built = Hierarchy::build(hierarchy, member_rows, level_defs, cancel)?;
        built.save(&mut self.cache, dimension)?;
        tracing::info!(
            dimension = %dimension,
            hierarchy = %hierarchy,
            levels = built.levels().len(),
            leaves = built.leaf_level().map_or(0, |l| l.len()),
            "Hierarchy materialized"
        );
        Ok(built)
    }

    /// Persists the dimension meta, and the hierarchy too when it was built
    /// under another dimension name.
    pub fn create_dimension(&mut self, name: &str, hierarchy: Hierarchy) -> Result<Dimension> {
        if !self.cache.manager().exists(&hierarchy_meta(name, hierarchy.name())) {
            hierarchy.save(&mut self.cache, name)?;
        }
        let dimension = Dimension::new(name, hierarchy);
        dimension.save_meta(&mut self.cache)?;
        tracing::info!(dimension = %name, "Dimension materialized");
        Ok(dimension)
    }

    fn plan<'a>(
        &self,
        def: &'a AggregationDef,
        dimensions: &[Dimension],
        fact_rows: &dyn RowSource,
    ) -> Result<AggregationPlan<'a>> {
        let levels = def
            .levels
            .iter()
            .map(|r| {
                let (d, dimension) = dimensions
                    .iter()
                    .enumerate()
                    .find(|(_, d)| d.name() == r.dimension)
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "aggregation {} references unknown dimension {}",
                            def.name, r.dimension
                        ))
                    })?;
                let (l, _) = dimension.hierarchy().level(&r.level).ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "aggregation {} references unknown level {}.{}",
                        def.name, r.dimension, r.level
                    ))
                })?;
                Ok((d, l))
            })
            .collect::<Result<Vec<_>>>()?;

        let measures = def
            .measures
            .iter()
            .map(|m| {
                let column = fact_rows.column_index(&m.column).ok_or_else(|| {
                    Error::InvalidArgument(format!("fact rows have no column {}", m.column))
                })?;
                let function = self.registry.get(&m.function).ok_or_else(|| {
                    Error::InvalidArgument(format!("unknown aggregation function {}", m.function))
                })?;
                if function.number_of_passes() != 1 || function.kind() != FunctionKind::Summary {
                    return Err(Error::InvalidArgument(format!(
                        "{} cannot roll up measure {}: only single pass summary functions can",
                        function.name(),
                        m.name
                    )));
                }
                Ok((column, function))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AggregationPlan {
            def,
            levels,
            measures,
            groups: BTreeMap::new(),
        })
    }

    /// Streams fact rows into cube `name`: every row is resolved to the leaf
    /// member of each dimension through the columns named like the leaf
    /// level's keys. The fact table and each aggregation are persisted, then
    /// the manifest. `cancel` is checked on every row.
    pub fn create_cube(
        &mut self,
        name: &str,
        dimensions: &[Dimension],
        fact_rows: &mut dyn RowSource,
        measure_columns: &[&str],
        aggregations: &[AggregationDef],
        cancel: &CancelToken,
    ) -> Result<Cube> {
        let mut seen = HashSet::new();
        if let Some(dup) = dimensions.iter().find(|d| !seen.insert(d.name())) {
            return Err(Error::InvalidArgument(format!(
                "dimension {} used twice in cube {}",
                dup.name(),
                name
            )));
        }

        let mut leaf_columns = Vec::with_capacity(dimensions.len());
        for dimension in dimensions {
            let leaf = dimension.hierarchy().leaf_level().ok_or_else(|| {
                Error::InvalidArgument(format!("dimension {} has no levels", dimension.name()))
            })?;
            let columns = leaf
                .key_columns()
                .iter()
                .map(|c| {
                    fact_rows.column_index(c).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "fact rows have no column {} for dimension {}",
                            c,
                            dimension.name()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            leaf_columns.push(columns);
        }
        let measure_indexes = measure_columns
            .iter()
            .map(|c| {
                fact_rows
                    .column_index(c)
                    .ok_or_else(|| Error::InvalidArgument(format!("fact rows have no column {}", c)))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut plans = aggregations
            .iter()
            .map(|def| self.plan(def, dimensions, &*fact_rows))
            .collect::<Result<Vec<_>>>()?;

        let fact = create_document(&mut self.cache, &fact_document(name))?;
        let mut rows = 0u64;
        {
            let mut doc = fact.lock()?;
            let mut leaves = vec![0usize; dimensions.len()];
            // One fact record, encoded then appended in a single write.
            let mut record = Vec::new();
            while fact_rows.next_row()? {
                cancel.check()?;
                record.clear();
                for (d, (dimension, columns)) in dimensions.iter().zip(&leaf_columns).enumerate() {
                    let keys = columns
                        .iter()
                        .map(|i| fact_rows.value(*i).cloned())
                        .collect::<Result<Vec<_>>>()?;
                    leaves[d] = dimension
                        .hierarchy()
                        .leaf_level()
                        .and_then(|leaf| leaf.position(&keys))
                        .ok_or_else(|| {
                            Error::InvalidArgument(format!(
                                "fact row {} references unknown member {:?} of dimension {}",
                                rows,
                                keys,
                                dimension.name()
                            ))
                        })?;
                    record.write_u32::<BigEndian>(leaves[d] as u32)?;
                }
                let measures = measure_indexes
                    .iter()
                    .map(|i| fact_rows.value(*i).cloned())
                    .collect::<Result<Vec<_>>>()?;
                write_values(&mut record, &measures)?;
                doc.append(&record)?;

                for plan in plans.iter_mut() {
                    self.accumulate(plan, dimensions, &leaves, &*fact_rows)?;
                }
                rows += 1;
            }
            doc.flush()?;
        }

        let mut results = Vec::with_capacity(plans.len());
        for (i, plan) in plans.into_iter().enumerate() {
            cancel.check()?;
            let result = Self::finish_plan(plan, dimensions)?;
            result.save(&mut self.cache, &aggregation_document(name, i))?;
            results.push(result);
        }

        let dimension_names = dimensions.iter().map(|d| d.name().to_string()).collect::<Vec<_>>();
        let measures = measure_columns.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        let mut meta = Vec::new();
        write_string(&mut meta, name)?;
        meta.write_u64::<BigEndian>(rows)?;
        write_string_list(&mut meta, &dimension_names)?;
        write_string_list(&mut meta, &measures)?;
        meta.write_u32::<BigEndian>(results.len() as u32)?;
        write_document(&mut self.cache, &cube_meta(name), &meta)?;

        cancel.check()?;
        let mut manifest = Vec::new();
        for dimension in dimensions {
            manifest.extend(dimension.document_names());
        }
        manifest.push(cube_meta(name));
        manifest.push(fact_document(name));
        manifest.extend((0..results.len()).map(|i| aggregation_document(name, i)));
        let mut buf = Vec::new();
        write_manifest(&mut buf, &manifest)?;
        write_document(&mut self.cache, &cube_manifest(name), &buf)?;

        tracing::info!(
            cube = %name,
            rows = rows,
            aggregations = results.len(),
            documents = manifest.len() + 1,
            "Cube materialized"
        );
        Ok(Cube::new(
            name,
            dimensions.to_vec(),
            measures,
            rows,
            results,
        ))
    }

    fn accumulate(
        &self,
        plan: &mut AggregationPlan<'_>,
        dimensions: &[Dimension],
        leaves: &[usize],
        fact_rows: &dyn RowSource,
    ) -> Result<()> {
        let key = plan
            .levels
            .iter()
            .map(|&(d, l)| {
                dimensions[d]
                    .hierarchy()
                    .ancestor(leaves[d], l)
                    .ok_or(Error::IndexOutOfRange {
                        index: leaves[d],
                        size: dimensions[d].hierarchy().leaf_level().map_or(0, |leaf| leaf.len()),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        if !plan.groups.contains_key(&key) {
            let mut accumulators = Vec::with_capacity(plan.measures.len());
            for (_, function) in &plan.measures {
                let mut accumulator = function.new_accumulator(&self.spill);
                accumulator.start()?;
                accumulators.push(accumulator);
            }
            plan.groups.insert(key.clone(), accumulators);
        }
        if let Some(accumulators) = plan.groups.get_mut(&key) {
            for ((column, _), accumulator) in plan.measures.iter().zip(accumulators.iter_mut()) {
                accumulator.on_row(std::slice::from_ref(fact_rows.value(*column)?))?;
            }
        }
        Ok(())
    }

    fn finish_plan(plan: AggregationPlan<'_>, dimensions: &[Dimension]) -> Result<AggregationResultSet> {
        let mut rows = Vec::with_capacity(plan.groups.len());
        for (positions, mut accumulators) in plan.groups {
            let mut values = Vec::with_capacity(accumulators.len());
            for accumulator in accumulators.iter_mut() {
                accumulator.finish()?;
                values.push(accumulator.get_summary_value()?);
            }
            let keys = plan
                .levels
                .iter()
                .zip(&positions)
                .map(|(&(d, l), &p)| {
                    dimensions[d].hierarchy().levels()[l]
                        .member(p)
                        .map(|m| m.keys.clone())
                        .unwrap_or_default()
                })
                .collect();
            rows.push(ResultRow {
                positions,
                keys,
                values,
            });
        }
        Ok(AggregationResultSet::new(
            &plan.def.name,
            plan.def.levels.clone(),
            plan.def.measures.iter().map(|m| m.name.clone()).collect(),
            rows,
        ))
    }

    /// Reopens a cube materialized earlier into this cache.
    pub fn load_cube(&mut self, name: &str) -> Result<Cube> {
        Cube::load(&mut self.cache, name)
    }

    /// Copies every document of `cube` into `writer`, manifest last.
    /// `cancel` is checked between documents.
    pub fn save_to_archive<W: Write>(
        &mut self,
        cube: &Cube,
        writer: &mut ArchiveWriter<W>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let manifest_name = cube_manifest(cube.name());
        let manifest = read_manifest(&mut &read_document(&mut self.cache, &manifest_name)?[..])?;

        let mut bytes = 0u64;
        for name in manifest.iter().chain(std::iter::once(&manifest_name)) {
            cancel.check()?;
            let content = read_document(&mut self.cache, name)?;
            bytes += writer.write_stream(name, &mut &content[..])?;
        }
        tracing::info!(
            cube = %cube.name(),
            streams = manifest.len() + 1,
            bytes = bytes,
            "Cube saved to archive"
        );
        Ok(())
    }

    /// Closes every cached document and the underlying manager.
    pub fn close(&mut self) -> Result<()> {
        self.cache.close()
    }
}
