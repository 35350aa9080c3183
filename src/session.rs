use std::sync::Arc;

use crate::aggregation::{evaluate, AggregationRegistry, Evaluation};
use crate::config::{EngineConfig, StorageMode};
use crate::container::SpillArea;
use crate::cube::{Cube, CubeMaterializer};
use crate::document::{DocumentManager, DocumentObjectCache, FileDocumentManager, MemoryDocumentManager};
use crate::error::Result;
use crate::row::{Expression, RowSource};
use crate::Error;

/// Everything needed to materialize and query cubes: a storage backend
/// behind a document cache, a spill area and the function registry.
pub struct Session {
    config: EngineConfig,
    materializer: CubeMaterializer,
    registry: Arc<AggregationRegistry>,
    spill: Arc<SpillArea>,
    closed: bool,
}

impl Session {
    /// Validates `config` and acquires the storage backend. Directory
    /// storage holds an exclusive lock on the directory until close.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let manager: Box<dyn DocumentManager> = match config.storage {
            StorageMode::Directory => Box::new(FileDocumentManager::open(&config.dir)?),
            StorageMode::Memory => Box::new(MemoryDocumentManager::new()),
        };
        let spill = Arc::new(match (&config.spill_dir, config.storage) {
            (Some(dir), _) => SpillArea::temp_in(dir, config.spill_threshold)?,
            (None, StorageMode::Directory) => SpillArea::temp(config.spill_threshold)?,
            (None, StorageMode::Memory) => SpillArea::in_memory(config.spill_threshold),
        });
        let registry = Arc::new(AggregationRegistry::builtin()?);
        let cache = DocumentObjectCache::with_capacity(manager, config.cache_capacity);
        let materializer = CubeMaterializer::new(cache, registry.clone(), spill.clone());

        tracing::info!(
            dir = %config.dir.display(),
            storage = ?config.storage,
            cache_capacity = config.cache_capacity,
            spill_threshold = config.spill_threshold,
            "Session opened"
        );
        Ok(Self {
            config,
            materializer,
            registry,
            spill,
            closed: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("session is closed".to_string()));
        }
        Ok(())
    }

    pub fn materializer(&mut self) -> Result<&mut CubeMaterializer> {
        self.check_open()?;
        Ok(&mut self.materializer)
    }

    pub fn registry(&self) -> &Arc<AggregationRegistry> {
        &self.registry
    }

    pub fn spill(&self) -> &Arc<SpillArea> {
        &self.spill
    }

    /// Reopens a cube materialized into this session's storage.
    pub fn load_cube(&mut self, name: &str) -> Result<Cube> {
        self.check_open()?;
        self.materializer.load_cube(name)
    }

    /// Runs the named registered function over the rows `open_rows` yields.
    pub fn evaluate<R, F>(
        &self,
        function: &str,
        open_rows: F,
        args: &[Box<dyn Expression>],
    ) -> Result<Evaluation>
    where
        R: RowSource,
        F: FnMut() -> Result<R>,
    {
        self.check_open()?;
        let function = self
            .registry
            .get(function)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown aggregation function {}", function)))?;
        evaluate(function.as_ref(), &self.spill, open_rows, args)
    }

    /// Closes the cached documents and the storage backend, releasing the
    /// directory lock. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.materializer.close()?;
        tracing::info!(dir = %self.config.dir.display(), "Session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::cube::LevelDef;
    use crate::row::{Column, Literal, VecRowSource};
    use crate::value::Value;

    #[test]
    fn test_open_rejects_bad_config() {
        let config = EngineConfig::in_memory().cache_capacity(0);
        assert!(matches!(Session::open(config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_directory_is_locked_until_close() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = Session::open(EngineConfig::new(dir.path()))?;
        assert!(matches!(
            Session::open(EngineConfig::new(dir.path())),
            Err(Error::LockError(_))
        ));

        session.close()?;
        session.close()?;
        assert!(session.materializer().is_err());

        let mut reopened = Session::open(EngineConfig::new(dir.path()))?;
        reopened.close()
    }

    #[test]
    fn test_materialize_and_reload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let spill_dir = tempfile::tempdir()?;
        let config = EngineConfig::new(dir.path()).spill_dir(spill_dir.path());
        {
            let mut session = Session::open(config.clone())?;
            let materializer = session.materializer()?;
            let mut members = VecRowSource::single("region", ["north", "south"]);
            let hierarchy = materializer.create_hierarchy(
                "region",
                "regions",
                &mut members,
                &[LevelDef::new("region")],
                &CancelToken::new(),
            )?;
            let region = materializer.create_dimension("region", hierarchy)?;
            let mut facts = VecRowSource::new(
                ["region", "amount"],
                vec![
                    vec![Value::from("south"), Value::from(3)],
                    vec![Value::from("north"), Value::from(4)],
                ],
            );
            materializer.create_cube("sales", &[region], &mut facts, &["amount"], &[], &CancelToken::new())?;
        }

        let mut session = Session::open(config)?;
        let cube = session.load_cube("sales")?;
        assert_eq!(cube.fact_rows(), 2);
        assert_eq!(cube.dimensions()[0].name(), "region");
        Ok(())
    }

    #[test]
    fn test_evaluate_by_name() -> Result<()> {
        let session = Session::open(EngineConfig::in_memory().spill_threshold(2))?;
        let source = VecRowSource::single("cf", [-10000.0, 3000.0, 4200.0, 6800.0]);
        let args: Vec<Box<dyn Expression>> = vec![Box::new(Column(0)), Box::new(Literal(Value::from(0.1)))];

        let Evaluation::Summary(npv) = session.evaluate("npv", || Ok(source.clone()), &args)? else {
            return Err(Error::InvalidState("expected a summary".into()));
        };
        assert!((npv.to_f64()? - 1188.4434123352207).abs() < 1e-6);

        assert!(matches!(
            session.evaluate("nope", || Ok(source.clone()), &args),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }
}
