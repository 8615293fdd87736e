//! URL resolution and origin scoping for intercepted requests.

use url::{Origin, Url};

/// Error type for URL resolution failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Resolve a path or absolute URL against `origin`.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Join relative input onto the origin
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn resolve(origin: &Url, input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = if trimmed.contains("://") {
        Url::parse(trimmed)
    } else {
        origin.join(trimmed)
    }
    .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let lowered = host.to_lowercase();
        parsed
            .set_host(Some(&lowered))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}

/// The set of URLs a registration controls: everything on one origin.
#[derive(Debug, Clone)]
pub struct Scope {
    base: Url,
    origin: Origin,
}

impl Scope {
    pub fn new(base: Url) -> Self {
        let origin = base.origin();
        Self { base, origin }
    }

    /// Whether `url` shares the scope's scheme, host and port.
    pub fn contains(&self, url: &Url) -> bool {
        url.origin() == self.origin
    }

    /// Resolve `input` against the scope's base URL.
    pub fn resolve(&self, input: &str) -> Result<Url, UrlError> {
        resolve(&self.base, input)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}
