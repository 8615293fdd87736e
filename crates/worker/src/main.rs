//! shellcache host entry point.
//!
//! Registers the configured worker script (install, then activate; a
//! generation already installed in the store is reused without touching
//! the network), opens one controlled client and resolves request paths read from stdin, one
//! per line. Each resolution is written to stdout as a JSON line.
//! Logging goes to stderr so stdout stays machine-readable.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use shellcache_client::{FetchClient, FetchConfig, Scope};
use shellcache_core::{AppConfig, CacheDb, Request};
use shellcache_worker::{Registration, Source, WorkerScript};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

/// One output line per resolved request.
#[derive(Serialize)]
struct Resolved<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<Source>,
    stored: bool,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let scope = Scope::new(config.origin_url()?);
    let storage = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening cache store at {}", config.db_path.display()))?;
    let network = Arc::new(FetchClient::new(FetchConfig::from(&config))?);

    tracing::info!(origin = %scope.base(), generation = %config.generation, "starting shellcache host");

    let mut registration = Registration::new(scope, storage, network);
    registration
        .register(WorkerScript::from(&config))
        .await
        .context("registering worker script")?;
    let client = registration.open_client();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let url = match registration.scope().resolve(input) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(input, error = %e, "skipping unresolvable request");
                continue;
            }
        };

        let resolved = match registration.fetch(client, Request::get(url.clone())).await {
            Ok(interception) => Resolved {
                url: url.as_str(),
                status: Some(interception.response.status()),
                source: Some(interception.source),
                stored: interception.stored,
                bytes: interception.response.body().len(),
                error: None,
            },
            Err(e) => Resolved {
                url: url.as_str(),
                status: None,
                source: None,
                stored: false,
                bytes: 0,
                error: Some(e.to_string()),
            },
        };

        let mut json = serde_json::to_vec(&resolved)?;
        json.push(b'\n');
        stdout.write_all(&json).await?;
        stdout.flush().await?;
    }

    Ok(())
}
