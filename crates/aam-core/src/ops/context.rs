//! Shared state for one engine invocation.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lockfile::{LockFile, LockManager};
use crate::ops::fetch::{Fetcher, StoreFetcher};
use crate::platform::AdapterSet;
use crate::registry::LocalRegistry;
use crate::reporter::Reporter;
use crate::source::SourceStore;

/// Groups everything the pipelines need, so each operation takes one value.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    /// Open registries, in configured lookup order.
    pub registries: Arc<Vec<LocalRegistry>>,
    pub sources: Arc<SourceStore>,
    pub lock: LockManager,
    pub adapters: AdapterSet,
    pub fetcher: Arc<dyn Fetcher>,
    pub reporter: Arc<dyn Reporter>,
    pub cancel: CancellationToken,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("project_root", &self.config.project_root)
            .field("registries", &self.registries)
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Open every configured registry and wire up the default fetcher and
    /// layout adapters.
    pub fn new(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let registries = config
            .registries
            .iter()
            .map(|r| LocalRegistry::open(&r.name, &r.path))
            .collect::<Result<Vec<_>>>()?;
        let registries = Arc::new(registries);
        let sources = Arc::new(SourceStore::new(&config));
        let config = Arc::new(config);
        let fetcher = Arc::new(StoreFetcher::new(
            Arc::clone(&config),
            Arc::clone(&registries),
            Arc::clone(&sources),
        ));

        Ok(Self {
            lock: LockManager::for_config(&config),
            adapters: AdapterSet::layout(&config.project_root),
            registries,
            sources,
            fetcher,
            reporter,
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_adapters(mut self, adapters: AdapterSet) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self, name: &str) -> Option<&LocalRegistry> {
        self.registries.iter().find(|r| r.name() == name)
    }

    /// [`LockManager::read`] on the blocking pool.
    pub async fn read_lock(&self) -> Result<LockFile> {
        let lock = self.lock.clone();
        tokio::task::spawn_blocking(move || lock.read())
            .await
            .map_err(|e| Error::Other(format!("lock read task failed: {e}")))?
    }

    /// [`LockManager::update`] on the blocking pool. Waiting for the file
    /// lock never stalls the runtime.
    pub async fn update_lock<T, F>(&self, f: F) -> Result<(T, LockFile)>
    where
        T: Send + 'static,
        F: FnOnce(&mut LockFile) -> T + Send + 'static,
    {
        let lock = self.lock.clone();
        tokio::task::spawn_blocking(move || lock.update(f))
            .await
            .map_err(|e| Error::Other(format!("lock update task failed: {e}")))?
    }
}
