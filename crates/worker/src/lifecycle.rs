//! Host-side lifecycle driver.
//!
//! Stands in for the runtime that owns worker versions: it runs install
//! once per distinct script, activates when the new version may take over,
//! and routes each client's requests to the version that controlled it at
//! load time. Handlers never call each other; they only share the store.
//!
//! ```text
//! register(script)
//!     │
//!     ├── Installing ──fail──▶ Redundant
//!     │       │
//!     │       ▼
//!     │   Installed ──(clients on old version, no skip_waiting)──▶ waiting
//!     │       │                                                      │
//!     │       ▼                                   last client closed │
//!     └── Activating ◀───────────────────────────────────────────────┘
//!             │
//!             ▼
//!         Activated (controls newly opened clients)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use shellcache_client::{Network, Scope};
use shellcache_core::{AppConfig, CacheDb, Request};

use crate::{ActivateReport, Activator, Installer, Interception, Interceptor, Source, WorkerError};

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier for an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Registered, install not started.
    Parsed,
    Installing,
    /// Installed, waiting for activation.
    Installed,
    Activating,
    /// Controlling newly opened clients.
    Activated,
    /// Failed to install or replaced by a newer version.
    Redundant,
}

/// What distinguishes one worker version from another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerScript {
    pub generation: String,
    pub manifest: Vec<String>,
}

impl WorkerScript {
    pub fn new(generation: impl Into<String>, manifest: &[&str]) -> Self {
        Self { generation: generation.into(), manifest: manifest.iter().map(|p| (*p).to_string()).collect() }
    }
}

impl From<&AppConfig> for WorkerScript {
    fn from(config: &AppConfig) -> Self {
        Self { generation: config.generation.clone(), manifest: config.manifest.clone() }
    }
}

struct Worker {
    script: WorkerScript,
    state: WorkerState,
    skip_waiting: bool,
    interceptor: Arc<Interceptor>,
}

/// One registration scope and the worker versions it has seen.
pub struct Registration {
    scope: Scope,
    storage: CacheDb,
    network: Arc<dyn Network>,
    workers: HashMap<WorkerId, Worker>,
    active: Option<WorkerId>,
    waiting: Option<WorkerId>,
    /// Each open client and the version that controls it, if any.
    clients: HashMap<ClientId, Option<WorkerId>>,
}

impl Registration {
    pub fn new(scope: Scope, storage: CacheDb, network: Arc<dyn Network>) -> Self {
        Self {
            scope,
            storage,
            network,
            workers: HashMap::new(),
            active: None,
            waiting: None,
            clients: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Register a worker script.
    ///
    /// A script equal to the active or waiting one is not reinstalled, and
    /// neither is one whose generation the store already holds a completed
    /// install of (from an earlier run against the same database).
    /// Otherwise the new version installs, and activates right away unless
    /// it has to wait for clients of the current version to close.
    ///
    /// # Errors
    ///
    /// Returns the install failure; the version is then redundant and the
    /// previously active version keeps control.
    pub async fn register(&mut self, script: WorkerScript) -> Result<WorkerId, WorkerError> {
        if let Some(id) = self.find(&script) {
            tracing::debug!(generation = %script.generation, "script unchanged, skipping install");
            return Ok(id);
        }

        let manifest = script
            .manifest
            .iter()
            .map(|path| self.scope.resolve(path))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WorkerError::InvalidManifest(e.to_string()))?;
        if let Some(outside) = manifest.iter().find(|u| !self.scope.contains(u)) {
            return Err(WorkerError::InvalidManifest(format!("{outside} is outside {}", self.scope.base())));
        }

        let id = WorkerId::new();
        let interceptor =
            Arc::new(Interceptor::new(self.storage.clone(), self.network.clone(), script.generation.clone()));
        let installer = Installer::new(self.storage.clone(), self.network.clone(), script.generation.clone(), manifest);
        self.workers.insert(
            id,
            Worker { script, state: WorkerState::Parsed, skip_waiting: false, interceptor },
        );

        self.set_state(id, WorkerState::Installing);
        let skip_waiting = match Self::install(&installer).await {
            Ok(skip_waiting) => skip_waiting,
            Err(e) => {
                tracing::warn!(generation = installer.generation(), error = %e, "install failed");
                self.set_state(id, WorkerState::Redundant);
                self.prune();
                return Err(e);
            }
        };

        if let Some(worker) = self.workers.get_mut(&id) {
            worker.skip_waiting = skip_waiting;
        }
        self.set_state(id, WorkerState::Installed);
        if let Some(replaced) = self.waiting.replace(id) {
            self.set_state(replaced, WorkerState::Redundant);
        }

        self.try_activate().await;
        self.prune();
        Ok(id)
    }

    /// Open a document; it is controlled by the currently active version.
    pub fn open_client(&mut self) -> ClientId {
        let id = ClientId::new();
        self.clients.insert(id, self.active);
        id
    }

    /// Close a document, possibly letting a waiting version activate.
    pub async fn close_client(&mut self, id: ClientId) -> Result<(), WorkerError> {
        self.clients.remove(&id).ok_or(WorkerError::UnknownClient(id.0))?;
        self.try_activate().await;
        self.prune();
        Ok(())
    }

    /// Resolve a request made by `client`.
    ///
    /// Requests outside the scope, and requests from uncontrolled clients,
    /// go straight to the network.
    pub async fn fetch(&self, client: ClientId, request: Request) -> Result<Interception, WorkerError> {
        let controller = *self.clients.get(&client).ok_or(WorkerError::UnknownClient(client.0))?;

        let interceptor = controller
            .filter(|_| self.scope.contains(request.url()))
            .and_then(|id| self.workers.get(&id))
            .map(|worker| worker.interceptor.clone());

        match interceptor {
            Some(interceptor) => interceptor.handle(request).await,
            None => {
                let response = self.network.fetch(&request).await?;
                Ok(Interception { response, source: Source::Network, stored: false })
            }
        }
    }

    /// State of a worker version, if it is still tracked.
    pub fn state(&self, id: WorkerId) -> Option<WorkerState> {
        self.workers.get(&id).map(|w| w.state)
    }

    pub fn active_generation(&self) -> Option<&str> {
        self.generation_of(self.active)
    }

    pub fn waiting_generation(&self) -> Option<&str> {
        self.generation_of(self.waiting)
    }

    /// Generation controlling `client`, if any.
    pub fn controller_of(&self, client: ClientId) -> Option<&str> {
        self.generation_of(self.clients.get(&client).copied().flatten())
    }

    fn generation_of(&self, id: Option<WorkerId>) -> Option<&str> {
        id.and_then(|id| self.workers.get(&id))
            .map(|w| w.script.generation.as_str())
    }

    fn find(&self, script: &WorkerScript) -> Option<WorkerId> {
        [self.active, self.waiting]
            .into_iter()
            .flatten()
            .find(|id| self.workers.get(id).is_some_and(|w| w.script == *script))
    }

    /// Run the installer unless this exact install is already stored.
    /// Returns whether the version may skip waiting.
    async fn install(installer: &Installer) -> Result<bool, WorkerError> {
        if installer.is_installed().await? {
            tracing::info!(generation = installer.generation(), "already installed, reusing stored shell");
            return Ok(true);
        }
        Ok(installer.run().await?.skip_waiting)
    }

    fn set_state(&mut self, id: WorkerId, state: WorkerState) {
        if let Some(worker) = self.workers.get_mut(&id) {
            tracing::info!(generation = %worker.script.generation, from = ?worker.state, to = ?state, "worker state");
            worker.state = state;
        }
    }

    /// Activate the waiting version if nothing holds it back.
    async fn try_activate(&mut self) -> Option<ActivateReport> {
        let id = self.waiting?;
        let (generation, skip_waiting) = {
            let worker = self.workers.get(&id)?;
            (worker.script.generation.clone(), worker.skip_waiting)
        };

        let held = self.active.is_some_and(|active| self.clients.values().any(|c| *c == Some(active)));
        if held && !skip_waiting {
            tracing::debug!(generation = %generation, "waiting for controlled clients to close");
            return None;
        }

        self.waiting = None;
        if let Some(previous) = self.active.take() {
            self.set_state(previous, WorkerState::Redundant);
        }
        self.set_state(id, WorkerState::Activating);

        let report = match Activator::new(self.storage.clone(), generation).run().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "activation cleanup failed");
                None
            }
        };

        self.set_state(id, WorkerState::Activated);
        self.active = Some(id);
        report
    }

    /// Forget redundant versions no client depends on.
    fn prune(&mut self) {
        let in_use: Vec<WorkerId> = self.clients.values().flatten().copied().collect();
        self.workers
            .retain(|id, w| w.state != WorkerState::Redundant || in_use.contains(id));
    }
}
