use std::path::PathBuf;

use crate::error::Result;
use crate::Error;

/// Default number of concurrently open document handles.
pub const DEFAULT_CACHE_CAPACITY: usize = 200;

/// Default number of values a cached list keeps in memory before spilling.
pub const DEFAULT_SPILL_THRESHOLD: usize = 10_000;

/// Where materialized documents live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// One file per document inside `EngineConfig::dir`.
    Directory,
    /// Documents are kept in process memory and vanish on close.
    Memory,
}

/// Configuration for a cube session
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory path for materialized documents
    pub dir: PathBuf,

    /// Storage backend (default: Directory)
    pub storage: StorageMode,

    /// Maximum number of open document handles (default: 200)
    pub cache_capacity: usize,

    /// Values held in memory by a cached list before it spills (default: 10000)
    pub spill_threshold: usize,

    /// Directory for spill files, `None` uses the system temp directory
    pub spill_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cubecore"),
            storage: StorageMode::Directory,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            spill_dir: None,
        }
    }
}

impl EngineConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Create a config whose documents live only in memory
    pub fn in_memory() -> Self {
        Self {
            storage: StorageMode::Memory,
            ..Default::default()
        }
    }

    /// Set the storage backend
    pub fn storage(mut self, mode: StorageMode) -> Self {
        self.storage = mode;
        self
    }

    /// Set the document cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the in-memory threshold of cached lists
    pub fn spill_threshold(mut self, threshold: usize) -> Self {
        self.spill_threshold = threshold;
        self
    }

    /// Set the directory used for spill files
    pub fn spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    /// Reject option values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(Error::Configuration(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.spill_threshold == 0 {
            return Err(Error::Configuration(
                "spill threshold must be at least 1".to_string(),
            ));
        }
        if self.storage == StorageMode::Directory && self.dir.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "directory storage requires a directory path".to_string(),
            ));
        }
        Ok(())
    }
}
