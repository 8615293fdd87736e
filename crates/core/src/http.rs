//! Request and response model shared by the store and the network client.
//!
//! A [`Response`] owns its body and is not `Clone`. Any path that both hands a
//! response to a caller and persists it must split it with [`Response::tee`].

use bytes::Bytes;
use url::Url;

/// An intercepted or outgoing request.
///
/// Identity for cache matching is the method plus the URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    url: Url,
}

impl Request {
    /// Create a request, upper-casing the method and dropping any fragment.
    pub fn new(method: &str, mut url: Url) -> Self {
        url.set_fragment(None);
        Self { method: method.to_ascii_uppercase(), url }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// A response snapshot.
///
/// Headers are kept in arrival order as name/value pairs; names are stored
/// lower-cased.
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    url: Url,
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Response {
    pub fn new(url: Url, status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self { url, status, headers, body: body.into() }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// True for any 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response, returning its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Split the response into two independent owners of equal content.
    pub fn tee(self) -> (Response, Response) {
        let copy = Response {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        };
        (self, copy)
    }
}
