use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::job::SearcherKind;

/// A loaded search configuration for one searcher.
#[async_trait]
pub trait SearchParameters: Send + Sync {
    fn name(&self) -> &str;

    /// Database file the search runs against, e.g. `human.fasta`.
    fn database(&self) -> &str;

    /// Writes the searcher's parameter file into `dir` and returns its path.
    async fn write_local(&self, dir: &Path, filename: &str) -> anyhow::Result<PathBuf>;

    /// Fields reported alongside job statistics.
    fn stats(&self) -> BTreeMap<String, String>;
}

/// Loads search configurations of one searcher kind by id.
#[async_trait]
pub trait SearchConfigLoader: Send + Sync {
    async fn load(&self, id: Uuid) -> anyhow::Result<Option<Arc<dyn SearchParameters>>>;
}

/// Loaders keyed by the searcher they serve.
#[derive(Clone, Default)]
pub struct SearchConfigRegistry {
    loaders: HashMap<SearcherKind, Arc<dyn SearchConfigLoader>>,
}

impl SearchConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader(mut self, kind: SearcherKind, loader: Arc<dyn SearchConfigLoader>) -> Self {
        self.loaders.insert(kind, loader);
        self
    }

    pub fn register(&mut self, kind: SearcherKind, loader: Arc<dyn SearchConfigLoader>) {
        self.loaders.insert(kind, loader);
    }

    pub async fn load(
        &self,
        kind: SearcherKind,
        id: Uuid,
    ) -> anyhow::Result<Arc<dyn SearchParameters>> {
        let loader = self
            .loaders
            .get(&kind)
            .ok_or_else(|| PipelineError::UnregisteredSearcher(kind.to_string()))?;
        let parameters = loader
            .load(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("search configuration", id))?;
        Ok(parameters)
    }
}

/// Database name without its `.fasta` extension.
pub fn search_database_name(database: &str) -> &str {
    database.strip_suffix(".fasta").unwrap_or(database)
}
