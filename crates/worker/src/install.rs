//! Install handler: seed a generation with the shell manifest.
//!
//! Every manifest resource is fetched before anything is written, and the
//! writes share one transaction, so a failed install leaves the generation
//! without entries rather than half-populated.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::Serialize;
use shellcache_client::Network;
use shellcache_core::cache::hash::compute_install_fingerprint;
use shellcache_core::{CacheDb, Request, Response};
use url::Url;

use crate::WorkerError;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub generation: String,
    /// Number of manifest entries written.
    pub cached: usize,
    /// Ask the host to activate without waiting for controlled clients to close.
    pub skip_waiting: bool,
}

/// Populates the current generation from the network.
pub struct Installer {
    storage: CacheDb,
    network: Arc<dyn Network>,
    generation: String,
    manifest: Vec<Url>,
    fingerprint: String,
}

impl Installer {
    pub fn new(storage: CacheDb, network: Arc<dyn Network>, generation: impl Into<String>, manifest: Vec<Url>) -> Self {
        let generation = generation.into();
        let fingerprint = compute_install_fingerprint(&generation, manifest.iter().map(Url::as_str));
        Self { storage, network, generation, manifest, fingerprint }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Identity of this install, recorded alongside the entries it writes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether the store already holds a completed install with this
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// Returns the store error if the lookup fails.
    pub async fn is_installed(&self) -> Result<bool, WorkerError> {
        let recorded = self.storage.installed_fingerprint(&self.generation).await?;
        Ok(recorded.as_deref() == Some(self.fingerprint.as_str()))
    }

    /// Run the install step.
    ///
    /// # Errors
    ///
    /// Fails if the manifest lists a resource twice, or if any manifest
    /// fetch errors or answers non-2xx; in that case nothing is written.
    pub async fn run(&self) -> Result<InstallOutcome, WorkerError> {
        let cache = self.storage.open_cache(&self.generation).await?;

        let mut seen = HashSet::new();
        if let Some(dup) = self.manifest.iter().find(|u| !seen.insert(u.as_str())) {
            return Err(WorkerError::InstallDuplicate { generation: self.generation.clone(), url: dup.to_string() });
        }

        tracing::info!(generation = %self.generation, resources = self.manifest.len(), "installing shell");

        let pairs = try_join_all(self.manifest.iter().map(|url| self.fetch_resource(url))).await?;
        let cached = cache.install(pairs, &self.fingerprint).await?;

        tracing::info!(generation = %self.generation, cached, "install complete");

        Ok(InstallOutcome { generation: self.generation.clone(), cached, skip_waiting: true })
    }

    async fn fetch_resource(&self, url: &Url) -> Result<(Request, Response), WorkerError> {
        let request = Request::get(url.clone());
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|source| WorkerError::InstallFetch {
                generation: self.generation.clone(),
                url: url.to_string(),
                source,
            })?;

        if !response.is_ok() {
            return Err(WorkerError::InstallStatus {
                generation: self.generation.clone(),
                url: url.to_string(),
                status: response.status(),
            });
        }

        Ok((request, response))
    }
}
