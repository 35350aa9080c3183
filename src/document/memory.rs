use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{Document, DocumentManager, Storage};
use crate::error::Result;
use crate::Error;

type Buffer = Arc<Mutex<Vec<u8>>>;

/// Keeps every document in process memory. Content survives closing and
/// reopening a document but not closing the manager.
#[derive(Debug, Default)]
pub struct MemoryDocumentManager {
    docs: BTreeMap<String, Buffer>,
}

impl MemoryDocumentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held across documents.
    pub fn size(&self) -> Result<usize> {
        let mut total = 0;
        for buffer in self.docs.values() {
            total += buffer.lock()?.len();
        }
        Ok(total)
    }
}

impl DocumentManager for MemoryDocumentManager {
    fn open_or_create(&mut self, name: &str) -> Result<Document> {
        let buffer = self.docs.entry(name.to_string()).or_default().clone();
        Document::new(name, Box::new(MemoryStorage { buffer }))
    }

    fn open(&mut self, name: &str) -> Result<Document> {
        let buffer = self
            .docs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DocumentNotFound(name.to_string()))?;
        Document::new(name, Box::new(MemoryStorage { buffer }))
    }

    fn exists(&self, name: &str) -> bool {
        self.docs.contains_key(name)
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.docs.keys().cloned().collect())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        self.docs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::DocumentNotFound(name.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.docs.clear();
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryStorage {
    buffer: Buffer,
}

impl Storage for MemoryStorage {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.buffer.lock()?;
        let start = (pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.buffer.lock()?;
        let start = pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.buffer.lock()?.len() as u64)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
