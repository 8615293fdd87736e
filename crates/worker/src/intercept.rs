//! Fetch handler: cache-first resolution with selective write-through.
//!
//! The store is always consulted before the network. A hit is returned as
//! stored, with no freshness check. A miss goes to the network; if the URL
//! ends in an image suffix, a copy of the response is written back.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use shellcache_client::Network;
use shellcache_core::{CacheDb, Request, Response};
use url::Url;

use crate::WorkerError;

/// Suffixes whose network responses are persisted on a miss.
static WRITE_THROUGH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.(jpg|png)$").expect("valid regex"));

const PARTIAL_CONTENT: u16 = 206;

/// Whether a miss on `url` is written back to the store.
///
/// Matched case-sensitively against the full URL, query included, so
/// `/photo.jpg?w=200` and `/PHOTO.JPG` are not written back.
pub fn is_write_through(url: &Url) -> bool {
    WRITE_THROUGH.is_match(url.as_str())
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    Network,
}

/// The answer to one intercepted request.
#[derive(Debug)]
pub struct Interception {
    pub response: Response,
    pub source: Source,
    /// True when a copy of a network response was written to the store.
    pub stored: bool,
}

/// Resolves requests for one generation.
pub struct Interceptor {
    storage: CacheDb,
    network: Arc<dyn Network>,
    generation: String,
}

impl Interceptor {
    pub fn new(storage: CacheDb, network: Arc<dyn Network>, generation: impl Into<String>) -> Self {
        Self { storage, network, generation: generation.into() }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Resolve one request.
    ///
    /// # Errors
    ///
    /// A network failure on a miss is returned as is; there is no retry and
    /// no fallback response. Store read failures are returned too.
    pub async fn handle(&self, request: Request) -> Result<Interception, WorkerError> {
        let cache = self.storage.open_cache(&self.generation).await?;

        if let Some(response) = cache.match_request(&request).await? {
            tracing::debug!(url = %request.url(), generation = %self.generation, "cache hit");
            return Ok(Interception { response, source: Source::Cache, stored: false });
        }

        let response = self.network.fetch(&request).await?;

        if !(request.is_get() && is_write_through(request.url())) {
            tracing::debug!(url = %request.url(), status = response.status(), "cache miss, passthrough");
            return Ok(Interception { response, source: Source::Network, stored: false });
        }

        // a partial body must never be served later as the whole resource
        if response.status() == PARTIAL_CONTENT {
            tracing::debug!(url = %request.url(), "partial content, not written back");
            return Ok(Interception { response, source: Source::Network, stored: false });
        }

        let (response, copy) = response.tee();
        let stored = match cache.put(&request, copy).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(url = %request.url(), error = %e, "write-back failed");
                false
            }
        };
        tracing::debug!(url = %request.url(), status = response.status(), stored, "cache miss, written back");

        Ok(Interception { response, source: Source::Network, stored })
    }
}
