use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{
    dimension_meta, hierarchy_index, hierarchy_meta, level_document, read_document,
    write_document, LevelDef,
};
use crate::cancel::CancelToken;
use crate::document::DocumentObjectCache;
use crate::encoding::{expect_string, read_string_list, read_values, write_string, write_string_list, write_values};
use crate::error::Result;
use crate::row::RowSource;
use crate::value::Value;
use crate::Error;

const NO_PARENT: u32 = u32::MAX;

/// One distinct member of a level.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub keys: Vec<Value>,
    pub attributes: Vec<Value>,
    /// Position of the parent member in the level above; `None` on the top
    /// level.
    pub parent: Option<usize>,
}

/// Members of one level, sorted by key.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    name: String,
    key_columns: Vec<String>,
    attribute_columns: Vec<String>,
    members: Vec<Member>,
}

impl Level {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn attribute_columns(&self) -> &[String] {
        &self.attribute_columns
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, position: usize) -> Option<&Member> {
        self.members.get(position)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Position of the member with the given keys.
    pub fn position(&self, keys: &[Value]) -> Option<usize> {
        self.members
            .binary_search_by(|m| m.keys.as_slice().cmp(keys))
            .ok()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(self.members.len() as u32)?;
        for member in &self.members {
            write_values(&mut buf, &member.keys)?;
            write_values(&mut buf, &member.attributes)?;
            buf.write_u32::<BigEndian>(member.parent.map_or(NO_PARENT, |p| p as u32))?;
        }
        Ok(buf)
    }

    fn decode(def: LevelDef, mut reader: &[u8]) -> Result<Self> {
        let count = reader.read_u32::<BigEndian>()? as usize;
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            let keys = read_values(&mut reader)?;
            let attributes = read_values(&mut reader)?;
            let parent = match reader.read_u32::<BigEndian>()? {
                NO_PARENT => None,
                p => Some(p as usize),
            };
            members.push(Member {
                keys,
                attributes,
                parent,
            });
        }
        Ok(Self {
            name: def.name,
            key_columns: def.key_columns,
            attribute_columns: def.attribute_columns,
            members,
        })
    }
}

/// Member collected while streaming rows, before positions are known.
struct PendingMember {
    attributes: Vec<Value>,
    parent_keys: Option<Vec<Value>>,
}

/// Column positions of one level inside the member rows.
struct LevelColumns {
    keys: Vec<usize>,
    attributes: Vec<usize>,
}

fn resolve_columns(rows: &dyn RowSource, columns: &[String]) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            rows.column_index(c)
                .ok_or_else(|| Error::InvalidArgument(format!("member rows have no column {}", c)))
        })
        .collect()
}

fn row_values(rows: &dyn RowSource, columns: &[usize]) -> Result<Vec<Value>> {
    columns.iter().map(|i| rows.value(*i).cloned()).collect()
}

/// Ordered levels, top first, plus the ancestors of every leaf member.
#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy {
    name: String,
    levels: Vec<Level>,
    /// For each leaf position, the member position on every level.
    ancestors: Vec<Vec<usize>>,
}

impl Hierarchy {
    /// Builds the hierarchy from member rows, each row naming one member of
    /// every level. A key that shows up under two different parents is an
    /// invalid argument.
    pub fn build(
        name: &str,
        rows: &mut dyn RowSource,
        level_defs: &[LevelDef],
        cancel: &CancelToken,
    ) -> Result<Self> {
        if level_defs.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "hierarchy {} needs at least one level",
                name
            )));
        }
        let mut seen = HashSet::new();
        for def in level_defs {
            if def.key_columns.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "level {} has no key columns",
                    def.name
                )));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "level {} defined twice in hierarchy {}",
                    def.name, name
                )));
            }
        }

        let columns = level_defs
            .iter()
            .map(|def| {
                Ok(LevelColumns {
                    keys: resolve_columns(&*rows, &def.key_columns)?,
                    attributes: resolve_columns(&*rows, &def.attribute_columns)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pending: Vec<BTreeMap<Vec<Value>, PendingMember>> =
            level_defs.iter().map(|_| BTreeMap::new()).collect();
        while rows.next_row()? {
            cancel.check()?;
            let mut parent_keys: Option<Vec<Value>> = None;
            for (level, cols) in columns.iter().enumerate() {
                let keys = row_values(&*rows, &cols.keys)?;
                let attributes = row_values(&*rows, &cols.attributes)?;
                match pending[level].entry(keys.clone()) {
                    Entry::Occupied(existing) => {
                        if existing.get().parent_keys != parent_keys {
                            return Err(Error::InvalidArgument(format!(
                                "member {:?} of level {} appears under two parents",
                                keys, level_defs[level].name
                            )));
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(PendingMember {
                            attributes,
                            parent_keys: parent_keys.clone(),
                        });
                    }
                }
                parent_keys = Some(keys);
            }
        }

        let mut levels: Vec<Level> = Vec::with_capacity(level_defs.len());
        for (def, members) in level_defs.iter().zip(pending) {
            let above = levels.last();
            let members = members
                .into_iter()
                .map(|(keys, pending)| Member {
                    keys,
                    attributes: pending.attributes,
                    parent: pending
                        .parent_keys
                        .and_then(|pk| above.and_then(|level| level.position(&pk))),
                })
                .collect();
            levels.push(Level {
                name: def.name.clone(),
                key_columns: def.key_columns.clone(),
                attribute_columns: def.attribute_columns.clone(),
                members,
            });
        }

        let mut hierarchy = Self {
            name: name.to_string(),
            levels,
            ancestors: Vec::new(),
        };
        hierarchy.ancestors = hierarchy.compute_ancestors();
        Ok(hierarchy)
    }

    fn compute_ancestors(&self) -> Vec<Vec<usize>> {
        let depth = self.levels.len();
        let Some(leaf) = self.levels.last() else {
            return Vec::new();
        };
        (0..leaf.len())
            .map(|position| {
                let mut path = vec![0; depth];
                let mut current = Some(position);
                for level in (0..depth).rev() {
                    let Some(p) = current else { break };
                    path[level] = p;
                    current = self.levels[level].members[p].parent;
                }
                path
            })
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Index and definition of the named level.
    pub fn level(&self, name: &str) -> Option<(usize, &Level)> {
        self.levels.iter().enumerate().find(|(_, l)| l.name == name)
    }

    pub fn leaf_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Position on `level` of the ancestor of leaf member `leaf`.
    pub fn ancestor(&self, leaf: usize, level: usize) -> Option<usize> {
        self.ancestors.get(leaf)?.get(level).copied()
    }

    pub(crate) fn document_names(&self, dimension: &str) -> Vec<String> {
        let mut names = vec![hierarchy_meta(dimension, &self.name)];
        names.extend(
            self.levels
                .iter()
                .map(|l| level_document(dimension, &self.name, &l.name)),
        );
        names.push(hierarchy_index(dimension, &self.name));
        names
    }

    pub(crate) fn save(&self, cache: &mut DocumentObjectCache, dimension: &str) -> Result<()> {
        let mut meta = Vec::new();
        write_string(&mut meta, &self.name)?;
        meta.write_u32::<BigEndian>(self.levels.len() as u32)?;
        for level in &self.levels {
            write_string(&mut meta, &level.name)?;
            write_string_list(&mut meta, &level.key_columns)?;
            write_string_list(&mut meta, &level.attribute_columns)?;
        }
        write_document(cache, &hierarchy_meta(dimension, &self.name), &meta)?;

        for level in &self.levels {
            write_document(
                cache,
                &level_document(dimension, &self.name, &level.name),
                &level.encode()?,
            )?;
        }

        let mut index = Vec::new();
        index.write_u32::<BigEndian>(self.ancestors.len() as u32)?;
        index.write_u32::<BigEndian>(self.levels.len() as u32)?;
        for path in &self.ancestors {
            for position in path {
                index.write_u32::<BigEndian>(*position as u32)?;
            }
        }
        write_document(cache, &hierarchy_index(dimension, &self.name), &index)
    }

    pub(crate) fn load(cache: &mut DocumentObjectCache, dimension: &str, name: &str) -> Result<Self> {
        let meta = read_document(cache, &hierarchy_meta(dimension, name))?;
        let mut reader = &meta[..];
        let stored = expect_string(&mut reader, "hierarchy name")?;
        let level_count = reader.read_u32::<BigEndian>()? as usize;
        let mut defs = Vec::with_capacity(level_count);
        for _ in 0..level_count {
            defs.push(LevelDef {
                name: expect_string(&mut reader, "level name")?,
                key_columns: read_string_list(&mut reader)?,
                attribute_columns: read_string_list(&mut reader)?,
            });
        }

        let mut levels = Vec::with_capacity(level_count);
        for def in defs {
            let bytes = read_document(cache, &level_document(dimension, name, &def.name))?;
            levels.push(Level::decode(def, &bytes)?);
        }

        let index = read_document(cache, &hierarchy_index(dimension, name))?;
        let mut reader = &index[..];
        let leaves = reader.read_u32::<BigEndian>()? as usize;
        let depth = reader.read_u32::<BigEndian>()? as usize;
        let mut ancestors = Vec::with_capacity(leaves);
        for _ in 0..leaves {
            let path = (0..depth)
                .map(|_| Ok(reader.read_u32::<BigEndian>()? as usize))
                .collect::<Result<Vec<_>>>()?;
            ancestors.push(path);
        }

        Ok(Self {
            name: stored,
            levels,
            ancestors,
        })
    }
}

/// A named dimension owning one hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    name: String,
    hierarchy: Hierarchy,
}

impl Dimension {
    pub fn new(name: &str, hierarchy: Hierarchy) -> Self {
        Self {
            name: name.to_string(),
            hierarchy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Every document persisted for this dimension, meta first.
    pub(crate) fn document_names(&self) -> Vec<String> {
        let mut names = vec![dimension_meta(&self.name)];
        names.extend(self.hierarchy.document_names(&self.name));
        names
    }

    pub(crate) fn save_meta(&self, cache: &mut DocumentObjectCache) -> Result<()> {
        let mut meta = Vec::new();
        write_string(&mut meta, &self.name)?;
        write_string(&mut meta, &self.hierarchy.name)?;
        write_document(cache, &dimension_meta(&self.name), &meta)
    }

    pub(crate) fn load(cache: &mut DocumentObjectCache, name: &str) -> Result<Self> {
        let meta = read_document(cache, &dimension_meta(name))?;
        let mut reader = &meta[..];
        let stored = expect_string(&mut reader, "dimension name")?;
        let hierarchy = expect_string(&mut reader, "hierarchy name")?;
        Ok(Self {
            hierarchy: Hierarchy::load(cache, &stored, &hierarchy)?,
            name: stored,
        })
    }
}
