//! Cache key derivation from request identity.

use sha2::{Digest, Sha256};

use crate::Request;

/// Compute the entry key for a request: SHA-256 over method and URL.
pub fn compute_cache_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Entry key for a [`Request`].
pub fn request_key(request: &Request) -> String {
    compute_cache_key(request.method(), request.url().as_str())
}

/// Fingerprint of an install: generation name plus the manifest URLs, in
/// order. Equal fingerprints mean the generation was seeded from the same
/// manifest.
pub fn compute_install_fingerprint<'a>(generation: &str, urls: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(generation.as_bytes());
    for url in urls {
        hasher.update(b"\n");
        hasher.update(url.as_bytes());
    }
    hex::encode(hasher.finalize())
}
