//! Append-only value list that spills to disk.
//!
//! A [`CachedList`] keeps values in memory until the [`SpillArea`] threshold
//! is exceeded, then moves everything into two documents of the spill
//! area's manager and keeps appending there:
//!
//! ```text
//! spill/<id>/data   bincode value | bincode value | ...
//! spill/<id>/index  offset:u64    | offset:u64    | ...   (big-endian)
//! ```
//!
//! Entry `i` lives at the offset stored in bytes `8*i..8*i+8` of the index,
//! so random reads cost two positioned reads regardless of list size.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder};
use itertools::Itertools;

use crate::config::DEFAULT_SPILL_THRESHOLD;
use crate::document::{Document, DocumentManager, FileDocumentManager, MemoryDocumentManager};
use crate::encoding::bincode::{deserialize_from, serialize};
use crate::error::Result;
use crate::value::Value;
use crate::Error;

/// Shared home for spilled lists: a document manager, normally over a temp
/// directory, plus the in-memory threshold lists use before spilling.
pub struct SpillArea {
    manager: Mutex<Box<dyn DocumentManager>>,
    threshold: usize,
    next_id: AtomicU64,
}

impl SpillArea {
    pub fn new(manager: Box<dyn DocumentManager>, threshold: usize) -> Self {
        Self {
            manager: Mutex::new(manager),
            threshold: threshold.max(1),
            next_id: AtomicU64::new(0),
        }
    }

    /// Spill area over a fresh temp directory.
    pub fn temp(threshold: usize) -> Result<Self> {
        Ok(Self::new(Box::new(FileDocumentManager::temp()?), threshold))
    }

    /// Spill area over a fresh temp directory created under `parent`.
    pub fn temp_in(parent: impl AsRef<Path>, threshold: usize) -> Result<Self> {
        Ok(Self::new(
            Box::new(FileDocumentManager::temp_in(parent)?),
            threshold,
        ))
    }

    /// Spill area whose "disk" is process memory; useful in tests.
    pub fn in_memory(threshold: usize) -> Self {
        Self::new(Box::new(MemoryDocumentManager::new()), threshold)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of spill documents currently alive.
    pub fn document_count(&self) -> Result<usize> {
        Ok(self.manager.lock()?.names()?.len())
    }

    fn allocate(&self) -> Result<DiskList> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("spill/{}", id);
        let mut manager = self.manager.lock()?;
        let data = manager.open_or_create(&format!("{}/data", name))?;
        let index = manager.open_or_create(&format!("{}/index", name))?;
        Ok(DiskList { name, data, index })
    }

    fn release(&self, list: DiskList) -> Result<()> {
        let DiskList {
            name,
            mut data,
            mut index,
        } = list;
        data.close()?;
        index.close()?;
        let mut manager = self.manager.lock()?;
        manager.remove(&format!("{}/data", name))?;
        manager.remove(&format!("{}/index", name))?;
        Ok(())
    }
}

impl Default for SpillArea {
    fn default() -> Self {
        Self::in_memory(DEFAULT_SPILL_THRESHOLD)
    }
}

impl std::fmt::Debug for SpillArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillArea")
            .field("threshold", &self.threshold)
            .finish()
    }
}

#[derive(Debug)]
struct DiskList {
    name: String,
    data: Document,
    index: Document,
}

impl DiskList {
    fn push(&mut self, value: &Value) -> Result<()> {
        let offset = self.data.write_position();
        self.data.append(&serialize(value)?)?;
        self.index.append(&offset.to_be_bytes())?;
        Ok(())
    }

    fn get(&mut self, index: usize) -> Result<Value> {
        let mut offset = [0u8; 8];
        self.index.read_exact_at(index as u64 * 8, &mut offset)?;
        self.data.seek_read(BigEndian::read_u64(&offset));
        deserialize_from(&mut self.data)
    }
}

#[derive(Debug)]
enum Storage {
    Memory(Vec<Value>),
    Disk(DiskList),
}

/// Order preserving, value indexed list backing accumulators.
#[derive(Debug)]
pub struct CachedList {
    spill: Arc<SpillArea>,
    storage: Storage,
    len: usize,
}

impl CachedList {
    pub fn new(spill: Arc<SpillArea>) -> Self {
        Self {
            spill,
            storage: Storage::Memory(Vec::new()),
            len: 0,
        }
    }

    /// Appends a value and returns its index.
    pub fn append(&mut self, value: Value) -> Result<usize> {
        if let Storage::Memory(values) = &mut self.storage {
            if values.len() >= self.spill.threshold() {
                let mut disk = self.spill.allocate()?;
                if let Err(e) = values.iter().try_for_each(|v| disk.push(v)) {
                    if let Err(cleanup) = self.spill.release(disk) {
                        tracing::warn!(error = %cleanup, "Failed to release partially spilled list");
                    }
                    return Err(e);
                }
                tracing::debug!(list = %disk.name, values = values.len(), "Cached list spilled to disk");
                self.storage = Storage::Disk(disk);
            }
        }

        match &mut self.storage {
            Storage::Memory(values) => values.push(value),
            Storage::Disk(disk) => disk.push(&value)?,
        }
        self.len += 1;
        Ok(self.len - 1)
    }

    pub fn get(&mut self, index: usize) -> Result<Value> {
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index,
                size: self.len,
            });
        }
        match &mut self.storage {
            Storage::Memory(values) => Ok(values[index].clone()),
            Storage::Disk(disk) => disk.get(index),
        }
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, Storage::Disk(_))
    }

    /// Returns a new list holding this list's values in ascending order.
    ///
    /// Works as an external merge sort: runs of at most `threshold + 1`
    /// values are sorted in memory and written out, then merged back one
    /// value per run at a time, so no more than one run is ever resident.
    pub fn sorted(&mut self) -> Result<CachedList> {
        let run_len = self.spill.threshold() + 1;
        let mut runs = Vec::new();
        let mut start = 0;
        while start < self.len {
            let end = (start + run_len).min(self.len);
            let mut chunk = (start..end)
                .map(|i| self.get(i))
                .collect::<Result<Vec<_>>>()?;
            chunk.sort();
            let mut run = CachedList::new(self.spill.clone());
            for value in chunk {
                run.append(value)?;
            }
            runs.push(run);
            start = end;
        }
        if runs.len() <= 1 {
            return Ok(runs
                .pop()
                .unwrap_or_else(|| CachedList::new(self.spill.clone())));
        }

        tracing::debug!(values = self.len, runs = runs.len(), "Merging sorted runs");
        let mut merged = CachedList::new(self.spill.clone());
        let heads = runs.into_iter().map(|mut run| {
            let len = run.size();
            (0..len).map(move |i| run.get(i))
        });
        for value in heads.kmerge_by(|a: &Result<Value>, b: &Result<Value>| match (a, b) {
            (Ok(a), Ok(b)) => a < b,
            (Err(_), _) => true,
            _ => false,
        }) {
            merged.append(value?)?;
        }
        Ok(merged)
    }

    /// Releases backing storage and empties the list; it can be reused.
    pub fn discard(&mut self) -> Result<()> {
        let storage = std::mem::replace(&mut self.storage, Storage::Memory(Vec::new()));
        self.len = 0;
        match storage {
            Storage::Memory(_) => Ok(()),
            Storage::Disk(disk) => self.spill.release(disk),
        }
    }
}

impl Drop for CachedList {
    fn drop(&mut self) {
        if let Err(e) = self.discard() {
            tracing::warn!(error = %e, "Failed to release spilled list");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(spill: &Arc<SpillArea>, n: i64) -> Result<CachedList> {
        let mut list = CachedList::new(spill.clone());
        for i in 0..n {
            let value = if i % 3 == 0 { Value::Null } else { Value::from(i) };
            assert_eq!(list.append(value)?, i as usize);
        }
        Ok(list)
    }

    #[test]
    fn test_memory_list() -> Result<()> {
        let spill = Arc::new(SpillArea::in_memory(100));
        let mut list = filled(&spill, 10)?;

        assert!(!list.is_spilled());
        assert_eq!(list.size(), 10);
        assert_eq!(list.get(0)?, Value::Null);
        assert_eq!(list.get(4)?, Value::from(4));
        assert!(matches!(
            list.get(10),
            Err(Error::IndexOutOfRange { index: 10, size: 10 })
        ));
        Ok(())
    }

    #[test]
    fn test_spill_is_transparent() -> Result<()> {
        let spill = Arc::new(SpillArea::temp(4)?);
        let mut list = filled(&spill, 50)?;

        assert!(list.is_spilled());
        assert_eq!(spill.document_count()?, 2);
        assert_eq!(list.size(), 50);

        // Random order reads.
        for i in [49, 0, 17, 3, 4, 48] {
            let expected = if i % 3 == 0 { Value::Null } else { Value::from(i) };
            assert_eq!(list.get(i as usize)?, expected);
        }

        // Appends keep working after reads moved the data cursor.
        list.append(Value::from("tail"))?;
        assert_eq!(list.get(50)?, Value::from("tail"));

        let all = (0..list.size())
            .map(|i| list.get(i))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(all.len(), 51);
        assert_eq!(all[49], Value::from(49));
        Ok(())
    }

    #[test]
    fn test_sorted_merges_spilled_runs() -> Result<()> {
        let spill = Arc::new(SpillArea::temp(3)?);
        let mut list = CachedList::new(spill.clone());
        for i in 0..30i64 {
            let value = if i % 7 == 0 { Value::Null } else { Value::from((i * 11) % 30) };
            list.append(value)?;
        }
        list.append(Value::from("zeta"))?;
        list.append(Value::from(2.5))?;

        let mut sorted = list.sorted()?;
        assert!(sorted.is_spilled());
        assert_eq!(sorted.size(), list.size());
        // Runs are released once merged; only the source and result remain.
        assert_eq!(spill.document_count()?, 4);

        let values = (0..sorted.size())
            .map(|i| sorted.get(i))
            .collect::<Result<Vec<_>>>()?;
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(values[..5], [Value::Null, Value::Null, Value::Null, Value::Null, Value::Null]);
        assert_eq!(values[values.len() - 1], Value::from("zeta"));
        assert!(values.contains(&Value::from(2.5)));

        // The source keeps its insertion order.
        assert_eq!(list.get(1)?, Value::from(11));
        Ok(())
    }

    #[test]
    fn test_sorted_small_and_empty_lists() -> Result<()> {
        let spill = Arc::new(SpillArea::in_memory(10));
        let mut list = CachedList::new(spill.clone());
        assert!(list.sorted()?.is_empty());

        for v in [3, 1, 2] {
            list.append(Value::from(v))?;
        }
        let mut sorted = list.sorted()?;
        assert!(!sorted.is_spilled());
        assert_eq!(sorted.get(0)?, Value::from(1));
        assert_eq!(sorted.get(2)?, Value::from(3));
        Ok(())
    }

    #[derive(Debug)]
    struct FullStorage;

    impl crate::document::Storage for FullStorage {
        fn read_at(&mut self, _pos: u64, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }

        fn write_at(&mut self, _pos: u64, _buf: &[u8]) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left").into())
        }

        fn len(&mut self) -> Result<u64> {
            Ok(0)
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Registers documents like the memory manager but refuses every write.
    #[derive(Debug, Default)]
    struct FullDisk {
        names: MemoryDocumentManager,
    }

    impl DocumentManager for FullDisk {
        fn open_or_create(&mut self, name: &str) -> Result<Document> {
            self.names.open_or_create(name)?;
            Document::new(name, Box::new(FullStorage))
        }

        fn open(&mut self, name: &str) -> Result<Document> {
            self.names.open(name)?;
            Document::new(name, Box::new(FullStorage))
        }

        fn exists(&self, name: &str) -> bool {
            self.names.exists(name)
        }

        fn names(&self) -> Result<Vec<String>> {
            self.names.names()
        }

        fn remove(&mut self, name: &str) -> Result<()> {
            self.names.remove(name)
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.names.close()
        }
    }

    #[test]
    fn test_failed_spill_releases_documents() -> Result<()> {
        let spill = Arc::new(SpillArea::new(Box::new(FullDisk::default()), 2));
        let mut list = CachedList::new(spill.clone());
        list.append(Value::from(1))?;
        list.append(Value::from(2))?;

        assert!(matches!(list.append(Value::from(3)), Err(Error::IoError(_))));
        assert_eq!(spill.document_count()?, 0);

        // The list stays in memory and usable.
        assert!(!list.is_spilled());
        assert_eq!(list.size(), 2);
        assert_eq!(list.get(1)?, Value::from(2));
        Ok(())
    }

    #[test]
    fn test_discard_releases_documents() -> Result<()> {
        let spill = Arc::new(SpillArea::in_memory(2));
        {
            let mut list = filled(&spill, 5)?;
            assert_eq!(spill.document_count()?, 2);
            list.discard()?;
            assert_eq!(spill.document_count()?, 0);
            assert_eq!(list.size(), 0);

            filled(&spill, 5)?;
            // Dropped lists release their documents too.
            assert_eq!(spill.document_count()?, 0);
            list.append(Value::from(1))?;
        }
        assert_eq!(spill.document_count()?, 0);
        Ok(())
    }
}
