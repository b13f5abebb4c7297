use std::fmt;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::lifecycle::JobLifecycle;
use crate::node::NodeIdentity;
use crate::object_store::ObjectStore;
use crate::queue::{MessageQueue, Outbox};
use crate::reporter::{ErrorReporter, StatisticsSink, TracingErrorReporter};
use crate::search_config::SearchConfigRegistry;
use crate::store::{CatalogProcessor, EntityStore};

use super::dispatcher::Dispatcher;
use super::worker::{NodeWorker, Searcher};

/// Builder for a head [`Dispatcher`] with explicit dependencies.
///
/// The reporter defaults to [`TracingErrorReporter`] and the identity to
/// [`NodeIdentity::from_env`]; every other dependency is required.
///
/// # Example
///
/// ```ignore
/// use pepflow::runtime::DispatcherBuilder;
///
/// let dispatcher = DispatcherBuilder::new(config)
///     .with_queue(queue)
///     .with_store(store)
///     .with_objects(objects)
///     .with_search_configs(registry)
///     .with_catalog(catalog)
///     .with_statistics(statistics)
///     .build()?;
/// ```
pub struct DispatcherBuilder {
    config: Arc<PipelineConfig>,
    queue: Option<Arc<dyn MessageQueue>>,
    store: Option<Arc<dyn EntityStore>>,
    objects: Option<Arc<dyn ObjectStore>>,
    search_configs: Option<Arc<SearchConfigRegistry>>,
    catalog: Option<Arc<dyn CatalogProcessor>>,
    statistics: Option<Arc<dyn StatisticsSink>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    identity: Option<NodeIdentity>,
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("config", &self.config)
            .field("queue_set", &self.queue.is_some())
            .field("store_set", &self.store.is_some())
            .field("objects_set", &self.objects.is_some())
            .field("search_configs_set", &self.search_configs.is_some())
            .field("catalog_set", &self.catalog.is_some())
            .field("statistics_set", &self.statistics.is_some())
            .field("reporter_set", &self.reporter.is_some())
            .field("identity", &self.identity)
            .finish()
    }
}

impl DispatcherBuilder {
    pub fn new(config: impl Into<Arc<PipelineConfig>>) -> Self {
        Self {
            config: config.into(),
            queue: None,
            store: None,
            objects: None,
            search_configs: None,
            catalog: None,
            statistics: None,
            reporter: None,
            identity: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn with_search_configs(mut self, registry: Arc<SearchConfigRegistry>) -> Self {
        self.search_configs = Some(registry);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogProcessor>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsSink>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_identity(mut self, identity: NodeIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// # Errors
    ///
    /// Returns an error if any required dependency is missing.
    pub fn build(self) -> anyhow::Result<Dispatcher> {
        let queue = self
            .queue
            .ok_or_else(|| anyhow::anyhow!("queue dependency missing"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let objects = self
            .objects
            .ok_or_else(|| anyhow::anyhow!("objects dependency missing"))?;
        let search_configs = self
            .search_configs
            .ok_or_else(|| anyhow::anyhow!("search_configs dependency missing"))?;
        let catalog = self
            .catalog
            .ok_or_else(|| anyhow::anyhow!("catalog dependency missing"))?;
        let statistics = self
            .statistics
            .ok_or_else(|| anyhow::anyhow!("statistics dependency missing"))?;
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingErrorReporter));
        let identity = self.identity.unwrap_or_else(NodeIdentity::from_env);

        let outbox = Outbox::new(queue, Arc::clone(&self.config));
        let lifecycle = JobLifecycle::new(store, objects, outbox, search_configs, self.config);
        Ok(Dispatcher::new(lifecycle, catalog, statistics, reporter, identity))
    }
}

/// Builder for a [`NodeWorker`].
///
/// The registry is optional; without one the worker skips node
/// registration.
pub struct NodeWorkerBuilder {
    config: Arc<PipelineConfig>,
    queue: Option<Arc<dyn MessageQueue>>,
    objects: Option<Arc<dyn ObjectStore>>,
    searcher: Option<Arc<dyn Searcher>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    registry: Option<Arc<dyn EntityStore>>,
    identity: Option<NodeIdentity>,
}

impl fmt::Debug for NodeWorkerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeWorkerBuilder")
            .field("config", &self.config)
            .field("queue_set", &self.queue.is_some())
            .field("objects_set", &self.objects.is_some())
            .field("searcher_set", &self.searcher.is_some())
            .field("reporter_set", &self.reporter.is_some())
            .field("registry_set", &self.registry.is_some())
            .field("identity", &self.identity)
            .finish()
    }
}

impl NodeWorkerBuilder {
    pub fn new(config: impl Into<Arc<PipelineConfig>>) -> Self {
        Self {
            config: config.into(),
            queue: None,
            objects: None,
            searcher: None,
            reporter: None,
            registry: None,
            identity: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn with_searcher(mut self, searcher: Arc<dyn Searcher>) -> Self {
        self.searcher = Some(searcher);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Store the worker registers its node record in at startup.
    pub fn with_registry(mut self, registry: Arc<dyn EntityStore>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_identity(mut self, identity: NodeIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// # Errors
    ///
    /// Returns an error if any required dependency is missing.
    pub fn build(self) -> anyhow::Result<NodeWorker> {
        let queue = self
            .queue
            .ok_or_else(|| anyhow::anyhow!("queue dependency missing"))?;
        let objects = self
            .objects
            .ok_or_else(|| anyhow::anyhow!("objects dependency missing"))?;
        let searcher = self
            .searcher
            .ok_or_else(|| anyhow::anyhow!("searcher dependency missing"))?;
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingErrorReporter));
        let identity = self.identity.unwrap_or_else(NodeIdentity::from_env);

        let outbox = Outbox::new(queue, Arc::clone(&self.config));
        Ok(NodeWorker::new(
            outbox,
            objects,
            searcher,
            reporter,
            self.registry,
            identity,
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_requires_a_queue() {
        let err = DispatcherBuilder::new(PipelineConfig::default())
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "queue dependency missing");
    }

    #[test]
    fn node_worker_requires_a_queue() {
        let err = NodeWorkerBuilder::new(PipelineConfig::default())
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "queue dependency missing");
    }
}
