use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::{basic, financial, percentile, rank, AggregationFunction};
use crate::error::Result;
use crate::Error;

/// Name to function lookup, shared across threads.
///
/// Names are stored upper-cased and looked up case-insensitively.
#[derive(Debug, Default)]
pub struct AggregationRegistry {
    functions: RwLock<BTreeMap<String, Arc<dyn AggregationFunction>>>,
}

impl AggregationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in function.
    pub fn builtin() -> Result<Self> {
        let registry = Self::new();
        registry.rebuild()?;
        Ok(registry)
    }

    fn builtin_functions() -> Vec<Arc<dyn AggregationFunction>> {
        basic::functions()
            .into_iter()
            .chain(rank::functions())
            .chain(percentile::functions())
            .chain(financial::functions())
            .map(|f| Arc::new(f) as Arc<dyn AggregationFunction>)
            .collect()
    }

    /// Adds a function. A name already taken is a configuration error.
    pub fn register(&self, function: Arc<dyn AggregationFunction>) -> Result<()> {
        let name = function.name().to_ascii_uppercase();
        let mut functions = self.functions.write()?;
        if functions.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "aggregation {} is already registered",
                name
            )));
        }
        functions.insert(name, function);
        Ok(())
    }

    /// Registers what a provider yields. Entries the provider failed to
    /// produce are skipped with a warning; the number registered is returned.
    pub fn register_all<I>(&self, provider: &str, functions: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<Arc<dyn AggregationFunction>>>,
    {
        let mut registered = 0;
        for function in functions {
            match function {
                Ok(function) => {
                    self.register(function)?;
                    registered += 1;
                }
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "Skipping aggregation function")
                }
            }
        }
        Ok(registered)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AggregationFunction>> {
        let functions = self.functions.read().ok()?;
        functions.get(&name.to_ascii_uppercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.functions.read()?.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.functions.read().map_or(0, |f| f.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<()> {
        self.functions.write()?.clear();
        Ok(())
    }

    /// Drops every registration and reinstalls the built-in functions.
    pub fn rebuild(&self) -> Result<()> {
        let mut functions = self.functions.write()?;
        functions.clear();
        for function in Self::builtin_functions() {
            functions.insert(function.name().to_ascii_uppercase(), function);
        }
        tracing::debug!(functions = functions.len(), "Aggregation registry rebuilt");
        Ok(())
    }
}
