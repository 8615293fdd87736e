//! Lifecycle handlers for the shellcache offline worker.
//!
//! Three independent handlers share one store and one generation name:
//!
//! - [`Installer`] seeds a fresh generation with the shell manifest
//! - [`Activator`] deletes every generation except the current one
//! - [`Interceptor`] answers requests cache-first, writing image misses back
//!
//! [`Registration`] plays the host: it decides when each handler runs and
//! which version controls which client.

pub mod activate;
pub mod error;
pub mod install;
pub mod intercept;
pub mod lifecycle;

#[cfg(test)]
mod testing;

pub use activate::{ActivateReport, Activator, GenerationStore};
pub use error::WorkerError;
pub use install::{InstallOutcome, Installer};
pub use intercept::{Interception, Interceptor, Source, is_write_through};
pub use lifecycle::{ClientId, Registration, WorkerId, WorkerScript, WorkerState};
