//! Test doubles shared by the handler tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shellcache_client::Network;
use shellcache_core::{Error, Request, Response};
use tokio::sync::Barrier;
use url::Url;

pub const ORIGIN: &str = "https://app.example";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Canned origin server that records every request it sees.
#[derive(Default)]
pub struct SpyNetwork {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    offline: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Barrier>>>,
    calls: Mutex<Vec<String>>,
}

impl SpyNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path` with `status` and `body`.
    pub fn route(self, path: &str, status: u16, body: &str) -> Self {
        self.set_route(path, status, body);
        self
    }

    pub fn set_route(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.as_bytes().to_vec()));
    }

    /// Make `path` fail at the transport level.
    pub fn fail(self, path: &str) -> Self {
        self.offline.lock().unwrap().insert(path.to_string());
        self
    }

    /// Hold each fetch of `path` until `n` of them are in flight at once.
    pub fn gate(self, path: &str, n: usize) -> Self {
        self.gates.lock().unwrap().insert(path.to_string(), Arc::new(Barrier::new(n)));
        self
    }

    /// Paths requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl Network for SpyNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        let path = request.url().path().to_string();
        self.calls.lock().unwrap().push(path.clone());

        let gate = self.gates.lock().unwrap().get(&path).cloned();
        if let Some(gate) = gate {
            gate.wait().await;
        }

        if self.offline.lock().unwrap().contains(&path) {
            return Err(Error::Network(format!("{}: connection refused", request.url())));
        }

        let route = self.routes.lock().unwrap().get(&path).cloned();
        let (status, body) = route.unwrap_or((404, b"not found".to_vec()));
        Ok(Response::new(request.url().clone(), status, vec![], body))
    }
}
