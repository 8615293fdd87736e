//! Network fetch for shell installs and cache misses.
//!
//! ### Semantics
//! - Any HTTP answer is a successful fetch, whatever its status; callers
//!   decide what a 404 means (install treats it as failure, interception
//!   passes it through).
//! - Only transport failures, timeouts and over-limit bodies are errors.
//!
//! ### Limits
//! - Per-fetch timeout (default 20s)
//! - Max redirects: 5
//! - Max body bytes (default 20MB)

pub mod url;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use std::time::{Duration, Instant};

use shellcache_core::{AppConfig, Error, Request, Response};

pub use self::url::{Scope, UrlError, resolve};

/// Where requests go when the cache cannot answer them.
#[async_trait]
pub trait Network: Send + Sync {
    /// Issue `request` and return the full response.
    async fn fetch(&self, request: &Request) -> Result<Response, Error>;
}

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "shellcache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 20MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "shellcache/0.1".to_string(),
            max_bytes: 20 * 1024 * 1024,
            timeout: Duration::from_millis(20_000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: config.max_redirects,
        }
    }
}

/// reqwest-backed [`Network`].
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn too_large(&self, len: impl std::fmt::Display) -> Error {
        Error::FetchTooLarge(format!("{len} bytes exceeds {}", self.config.max_bytes))
    }
}

/// Whether a declared body length is over `max_bytes`, saturating where
/// `usize` is narrower than `u64`.
fn over_limit(len: u64, max_bytes: usize) -> bool {
    usize::try_from(len).unwrap_or(usize::MAX) > max_bytes
}

/// Copy response headers into owned pairs. Values that are not visible
/// ASCII cannot be kept as text and are left out.
fn snapshot_headers(url: &::url::Url, headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(text) => Some((name.as_str().to_string(), text.to_string())),
            Err(_) => {
                tracing::debug!(url = %url, header = %name, bytes = value.len(), "dropping non-text header value");
                None
            }
        })
        .collect()
}

fn transport_error(url: &::url::Url, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(format!("{url}: {err}"))
    } else {
        Error::Network(format!("{url}: {err}"))
    }
}

#[async_trait]
impl Network for FetchClient {
    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        let start = Instant::now();
        let url = request.url();
        let method = Method::from_bytes(request.method().as_bytes())
            .map_err(|e| Error::InvalidInput(format!("bad method {}: {e}", request.method())))?;

        let response = self
            .http
            .request(method, url.clone())
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        if let Some(len) = response.content_length()
            && over_limit(len, self.config.max_bytes)
        {
            return Err(self.too_large(len));
        }

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = snapshot_headers(url, response.headers());

        let bytes = response.bytes().await.map_err(|e| transport_error(url, &e))?;

        if bytes.len() > self.config.max_bytes {
            return Err(self.too_large(bytes.len()));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            url = %url,
            final_url = %final_url,
            status,
            bytes = bytes.len(),
            fetch_ms,
            "fetched"
        );

        Ok(Response::new(final_url, status, headers, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::url::Url;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response on a loopback port.
    async fn serve_once(raw: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            socket.write_all(raw.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "shellcache/0.1");
        assert_eq!(config.max_bytes, 20 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20_000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { user_agent: "test-agent".into(), timeout_ms: 1500, ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.user_agent, "test-agent");
        assert_eq!(config.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_over_limit_saturates() {
        assert!(!over_limit(4, 4));
        assert!(over_limit(5, 4));
        assert!(over_limit(u64::MAX, usize::MAX - 1));
    }

    #[test]
    fn test_snapshot_headers_skips_non_text_values() {
        use reqwest::header::{CONTENT_TYPE, HeaderValue};

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        headers.insert("x-raw", HeaderValue::from_bytes(b"caf\xe9").unwrap());

        let snapshot = snapshot_headers(&Url::parse("https://app.example/logo.png").unwrap(), &headers);

        assert_eq!(snapshot, vec![("content-type".to_string(), "image/png".to_string())]);
    }

    #[tokio::test]
    async fn test_fetch_client_new() {
        assert!(FetchClient::new(FetchConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_headers() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 4\r\nConnection: close\r\n\r\nPNG!",
        )
        .await;
        let client = FetchClient::new(FetchConfig::default()).unwrap();

        let response = client.fetch(&Request::get(base.join("/photo.png").unwrap())).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.content_type(), Some("image/png"));
        assert_eq!(response.body().len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_non_success_is_not_an_error() {
        let base =
            serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnope").await;
        let client = FetchClient::new(FetchConfig::default()).unwrap();

        let response = client.fetch(&Request::get(base.join("/missing.css").unwrap())).await.unwrap();

        assert_eq!(response.status(), 404);
        assert!(!response.is_ok());
        assert_eq!(response.body().as_ref(), b"nope");
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let base = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n0123456789").await;
        let client = FetchClient::new(FetchConfig { max_bytes: 4, ..Default::default() }).unwrap();

        let err = client.fetch(&Request::get(base)).await.unwrap_err();

        assert!(matches!(err, Error::FetchTooLarge(_)));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = FetchClient::new(FetchConfig::default()).unwrap();

        let err = client
            .fetch(&Request::get(Url::parse(&format!("http://{addr}/")).unwrap()))
            .await
            .unwrap_err();

        assert!(err.is_network());
    }
}
