//! Structured errors for the lifecycle handlers.

use shellcache_core::Error;

/// Errors surfaced by install, activate and fetch handling.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A manifest resource could not be fetched.
    #[error("INSTALL_FAILED: {generation}: {url}: {source}")]
    InstallFetch {
        generation: String,
        url: String,
        #[source]
        source: Error,
    },

    /// A manifest resource answered with a non-2xx status.
    #[error("INSTALL_FAILED: {generation}: {url}: status {status}")]
    InstallStatus { generation: String, url: String, status: u16 },

    /// The manifest lists the same resource more than once.
    #[error("INSTALL_FAILED: {generation}: {url}: duplicate manifest entry")]
    InstallDuplicate { generation: String, url: String },

    /// A manifest path does not resolve inside the scope.
    #[error("INVALID_MANIFEST: {0}")]
    InvalidManifest(String),

    /// The client id is not known to the registration.
    #[error("UNKNOWN_CLIENT: {0}")]
    UnknownClient(u64),

    /// Store or network failure.
    #[error(transparent)]
    Core(#[from] Error),
}

impl WorkerError {
    /// Whether this error aborted an install.
    pub fn is_install_failure(&self) -> bool {
        matches!(
            self,
            WorkerError::InstallFetch { .. } | WorkerError::InstallStatus { .. } | WorkerError::InstallDuplicate { .. }
        )
    }
}
