use std::sync::{Arc, Mutex};

use super::{Document, DocumentManager};
use crate::cache::Cache;
use crate::config::DEFAULT_CACHE_CAPACITY;
use crate::error::Result;

/// Shared handle to an open document.
pub type DocumentHandle = Arc<Mutex<Document>>;

/// Bounds the number of open documents of a manager.
///
/// At most one handle per name is cached; asking for a cached name returns
/// the same handle without touching the manager. When the cache is full the
/// least recently used handle is closed and dropped. Callers serialize
/// access to one cache instance.
pub struct DocumentObjectCache {
    manager: Box<dyn DocumentManager>,
    handles: Cache<String, DocumentHandle>,
    opened: usize,
}

impl DocumentObjectCache {
    pub fn new(manager: Box<dyn DocumentManager>) -> Self {
        Self::with_capacity(manager, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(manager: Box<dyn DocumentManager>, capacity: usize) -> Self {
        let evicted_fn = Box::new(|name: String, handle: DocumentHandle| {
            let closed = handle.lock().map(|mut doc| doc.close());
            match closed {
                Ok(Ok(())) => tracing::debug!(document = %name, "Evicted document handle"),
                Ok(Err(e)) => {
                    tracing::warn!(document = %name, error = %e, "Failed to close evicted document")
                }
                Err(_) => tracing::warn!(document = %name, "Evicted document lock poisoned"),
            }
        });
        Self {
            manager,
            handles: Cache::new(capacity, Some(evicted_fn)),
            opened: 0,
        }
    }

    /// Returns the cached handle for `name`, or opens it. Writable managers
    /// create missing documents; read-only ones fail with `DocumentNotFound`.
    pub fn get(&mut self, name: &str) -> Result<DocumentHandle> {
        let key = name.to_string();
        if let Some(handle) = self.handles.get(&key) {
            return Ok(handle.clone());
        }

        let doc = if self.manager.is_read_only() {
            self.manager.open(name)?
        } else {
            self.manager.open_or_create(name)?
        };
        self.opened += 1;
        let handle = Arc::new(Mutex::new(doc));
        self.handles.insert(key, handle.clone());
        Ok(handle)
    }

    /// Closes and forgets the cached handle for `name`, if any.
    pub fn invalidate(&mut self, name: &str) -> Result<()> {
        if let Some(handle) = self.handles.remove(&name.to_string()) {
            handle.lock()?.close()?;
        }
        Ok(())
    }

    /// Closes every cached handle. Every handle is attempted; the first
    /// failure is returned.
    pub fn close_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for (_, handle) in self.handles.drain() {
            let result = match handle.lock() {
                Ok(mut doc) => doc.close(),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Closes every handle, then the manager itself.
    pub fn close(&mut self) -> Result<()> {
        self.close_all()?;
        self.manager.close()
    }

    pub fn manager(&self) -> &dyn DocumentManager {
        self.manager.as_ref()
    }

    pub fn manager_mut(&mut self) -> &mut dyn DocumentManager {
        self.manager.as_mut()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.handles.capacity()
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.handles.contains(&name.to_string())
    }

    /// Number of times the underlying manager was asked to open a document.
    pub fn open_count(&self) -> usize {
        self.opened
    }

    /// (hits, misses)
    pub fn stats(&self) -> (usize, usize) {
        self.handles.stats()
    }
}

impl Drop for DocumentObjectCache {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            tracing::warn!(error = %e, "Failed to close cached documents");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocumentManager;
    use crate::Error;
    use std::io::Write;

    #[test]
    fn test_cached_handle_is_reused() -> Result<()> {
        let mut cache = DocumentObjectCache::new(Box::new(MemoryDocumentManager::new()));
        assert_eq!(cache.capacity(), 200);

        let first = cache.get("fact")?;
        let second = cache.get("fact")?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.open_count(), 1);
        assert_eq!(cache.stats(), (1, 1));
        Ok(())
    }

    #[test]
    fn test_capacity_bounds_open_handles() -> Result<()> {
        let mut cache =
            DocumentObjectCache::with_capacity(Box::new(MemoryDocumentManager::new()), 3);

        let oldest = cache.get("d0")?;
        oldest.lock()?.write_all(b"kept")?;
        for i in 1..10 {
            cache.get(&format!("d{}", i))?;
            assert!(cache.len() <= 3);
        }

        // The evicted handle was closed, but its content survives in the manager.
        assert!(oldest.lock()?.is_closed());
        assert!(!cache.is_cached("d0"));
        let reopened = cache.get("d0")?;
        assert_eq!(reopened.lock()?.read_all()?, b"kept");
        Ok(())
    }

    #[test]
    fn test_recently_used_survives_eviction() -> Result<()> {
        let mut cache =
            DocumentObjectCache::with_capacity(Box::new(MemoryDocumentManager::new()), 2);
        cache.get("a")?;
        cache.get("b")?;
        cache.get("a")?;
        cache.get("c")?;

        assert!(cache.is_cached("a"));
        assert!(!cache.is_cached("b"));
        assert!(cache.is_cached("c"));
        Ok(())
    }

    #[test]
    fn test_close_all() -> Result<()> {
        let mut cache = DocumentObjectCache::new(Box::new(MemoryDocumentManager::new()));
        let handle = cache.get("x")?;
        cache.get("y")?;

        cache.close_all()?;
        assert!(cache.is_empty());
        assert!(handle.lock()?.is_closed());
        assert!(matches!(
            handle.lock()?.append(b"1"),
            Err(Error::DocumentClosed(_))
        ));
        Ok(())
    }
}
