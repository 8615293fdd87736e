//! Activate handler: garbage-collect stale generations.
//!
//! Deletions run concurrently and independently. A failed delete is logged
//! and reported; it never stops or rolls back its siblings, and the stale
//! generation stays behind until the next activation retries it.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use shellcache_core::{CacheDb, Error};

use crate::WorkerError;

/// The slice of the store the activator needs.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn generation_names(&self) -> Result<Vec<String>, Error>;

    /// Delete a whole generation; false if it did not exist.
    async fn delete_generation(&self, name: &str) -> Result<bool, Error>;
}

#[async_trait]
impl GenerationStore for CacheDb {
    async fn generation_names(&self) -> Result<Vec<String>, Error> {
        self.cache_names().await
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        self.delete_cache(name).await
    }
}

/// What an activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    /// The current generation, if it existed when activation ran.
    pub kept: Option<String>,
    pub deleted: Vec<String>,
    /// Generations whose deletion failed, with the error text.
    pub failed: Vec<(String, String)>,
}

impl ActivateReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Activator<S = CacheDb> {
    store: S,
    generation: String,
}

impl<S: GenerationStore> Activator<S> {
    pub fn new(store: S, generation: impl Into<String>) -> Self {
        Self { store, generation: generation.into() }
    }

    /// Activation never takes over already-open clients.
    pub const fn claims_clients(&self) -> bool {
        false
    }

    /// Delete every generation other than the current one.
    ///
    /// # Errors
    ///
    /// Only fails if the generation names cannot be listed.
    pub async fn run(&self) -> Result<ActivateReport, WorkerError> {
        let names = self.store.generation_names().await?;
        let (current, stale): (Vec<String>, Vec<String>) = names.into_iter().partition(|n| *n == self.generation);

        let results = join_all(stale.iter().map(|name| self.store.delete_generation(name))).await;

        let mut report = ActivateReport { kept: current.into_iter().next(), ..Default::default() };
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(true) => {
                    tracing::info!(generation = %name, "cleared stale generation");
                    report.deleted.push(name);
                }
                Ok(false) => tracing::debug!(generation = %name, "stale generation already gone"),
                Err(e) => {
                    tracing::warn!(generation = %name, error = %e, "failed to clear stale generation");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        tracing::info!(
            generation = %self.generation,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "activation complete"
        );
        Ok(report)
    }
}
