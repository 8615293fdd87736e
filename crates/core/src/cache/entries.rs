//! Entry operations on a single generation.
//!
//! Matching follows the host `Cache` defaults: only `GET` requests match or
//! can be stored, identity is method plus URL, and response headers such as
//! `Vary` or `Cache-Control` play no part.

use super::connection::CacheDb;
use super::hash::request_key;
use crate::{Error, Request, Response};
use tokio_rusqlite::{params, rusqlite};
use url::Url;

/// Handle to one named generation.
#[derive(Clone, Debug)]
pub struct Cache {
    db: CacheDb,
    name: String,
}

/// Row shape shared by reads, decoded outside the connection thread.
struct EntryRow {
    response_url: String,
    status: i64,
    headers_json: String,
    body: Vec<u8>,
}

impl EntryRow {
    fn into_response(self) -> Result<Response, Error> {
        let url = Url::parse(&self.response_url).map_err(|e| Error::CorruptEntry(e.to_string()))?;
        let status = u16::try_from(self.status).map_err(|_| Error::CorruptEntry(format!("status {}", self.status)))?;
        let headers: Vec<(String, String)> = serde_json::from_str(&self.headers_json)?;
        Ok(Response::new(url, status, headers, self.body))
    }
}

/// A response ready to be written, with its headers already encoded.
struct PendingEntry {
    key: String,
    method: String,
    url: String,
    response_url: String,
    status: i64,
    headers_json: String,
    body: Vec<u8>,
}

impl PendingEntry {
    fn new(request: &Request, response: Response) -> Result<Self, Error> {
        if !request.is_get() {
            return Err(Error::InvalidInput(format!(
                "only GET requests can be cached, got {} {}",
                request.method(),
                request.url()
            )));
        }
        Ok(Self {
            key: request_key(request),
            method: request.method().to_string(),
            url: request.url().to_string(),
            response_url: response.url().to_string(),
            status: i64::from(response.status()),
            headers_json: serde_json::to_string(response.headers())?,
            body: response.into_body().to_vec(),
        })
    }

    fn write(&self, conn: &rusqlite::Connection, generation: &str, stored_at: &str) -> Result<(), Error> {
        conn.execute(
            "INSERT INTO entries (
                generation, key, method, url, response_url, status, headers_json, body, stored_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(generation, key) DO UPDATE SET
                response_url = excluded.response_url,
                status = excluded.status,
                headers_json = excluded.headers_json,
                body = excluded.body,
                stored_at = excluded.stored_at",
            params![
                generation,
                &self.key,
                &self.method,
                &self.url,
                &self.response_url,
                self.status,
                &self.headers_json,
                &self.body,
                stored_at,
            ],
        )?;
        Ok(())
    }
}

/// Make sure the owning generation row exists; writing through a handle
/// whose generation was deleted recreates it.
fn ensure_generation(conn: &rusqlite::Connection, generation: &str, now: &str) -> Result<(), Error> {
    conn.execute(
        "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
        params![generation, now],
    )?;
    Ok(())
}

impl Cache {
    pub(crate) fn new(db: CacheDb, name: &str) -> Self {
        Self { db, name: name.to_string() }
    }

    /// Generation name this handle writes to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the stored response for a request.
    ///
    /// Non-GET requests never match.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, Error> {
        if !request.is_get() {
            return Ok(None);
        }

        let generation = self.name.clone();
        let key = request_key(request);
        let row = self
            .db
            .conn
            .call(move |conn| -> Result<Option<EntryRow>, Error> {
                let result = conn.query_row(
                    "SELECT response_url, status, headers_json, body
                     FROM entries WHERE generation = ?1 AND key = ?2",
                    params![generation, key],
                    |row| {
                        Ok(EntryRow {
                            response_url: row.get(0)?,
                            status: row.get(1)?,
                            headers_json: row.get(2)?,
                            body: row.get(3)?,
                        })
                    },
                );

                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(EntryRow::into_response).transpose()
    }

    /// Store a response under the request's identity, replacing any
    /// previous entry.
    pub async fn put(&self, request: &Request, response: Response) -> Result<(), Error> {
        let entry = PendingEntry::new(request, response)?;
        let generation = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let now = chrono::Utc::now().to_rfc3339();
                ensure_generation(conn, &generation, &now)?;
                entry.write(conn, &generation, &now)
            })
            .await
            .map_err(Error::from)
    }

    /// Store several responses in one transaction: either all are written
    /// or none are.
    pub async fn put_all(&self, pairs: Vec<(Request, Response)>) -> Result<usize, Error> {
        self.write_batch(pairs, None).await
    }

    /// Seed the generation with its manifest responses and record the
    /// install `fingerprint`, all in one transaction.
    ///
    /// See [`CacheDb::installed_fingerprint`].
    pub async fn install(&self, pairs: Vec<(Request, Response)>, fingerprint: &str) -> Result<usize, Error> {
        self.write_batch(pairs, Some(fingerprint.to_string())).await
    }

    async fn write_batch(&self, pairs: Vec<(Request, Response)>, fingerprint: Option<String>) -> Result<usize, Error> {
        let entries = pairs
            .into_iter()
            .map(|(request, response)| PendingEntry::new(&request, response))
            .collect::<Result<Vec<_>, _>>()?;
        let generation = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let now = chrono::Utc::now().to_rfc3339();
                let tx = conn.transaction()?;
                ensure_generation(&tx, &generation, &now)?;
                for entry in &entries {
                    entry.write(&tx, &generation, &now)?;
                }
                if let Some(fingerprint) = fingerprint {
                    tx.execute(
                        "INSERT INTO installs (generation, fingerprint, installed_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(generation) DO UPDATE SET
                            fingerprint = excluded.fingerprint,
                            installed_at = excluded.installed_at",
                        params![generation, fingerprint, now],
                    )?;
                }
                tx.commit()?;
                Ok(entries.len())
            })
            .await
            .map_err(Error::from)
    }

    /// Requests with a stored entry, in insertion order.
    pub async fn keys(&self) -> Result<Vec<Request>, Error> {
        let generation = self.name.clone();
        let rows = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<(String, String)>, Error> {
                let mut stmt =
                    conn.prepare("SELECT method, url FROM entries WHERE generation = ?1 ORDER BY rowid ASC")?;
                let rows = stmt
                    .query_map(params![generation], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(method, url)| -> Result<Request, Error> {
                let url = Url::parse(&url).map_err(|e| Error::CorruptEntry(e.to_string()))?;
                Ok(Request::new(&method, url))
            })
            .collect()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<usize, Error> {
        let generation = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE generation = ?1", params![generation], |row| {
                        row.get(0)
                    })?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://app.example").unwrap().join(path).unwrap()
    }

    fn ok(path: &str, body: &'static str) -> Response {
        Response::new(url(path), 200, vec![("Content-Type".into(), "text/plain".into())], body)
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();
        let req = Request::get(url("/index.css"));

        cache.put(&req, ok("/index.css", "body{}")).await.unwrap();

        let hit = cache.match_request(&req).await.unwrap().unwrap();
        assert_eq!(hit.status(), 200);
        assert_eq!(hit.body().as_ref(), b"body{}");
        assert_eq!(hit.content_type(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_match_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();
        assert!(cache.match_request(&Request::get(url("/nope"))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generations_are_isolated() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let a = db.open_cache("cache-a").await.unwrap();
        let b = db.open_cache("cache-b").await.unwrap();
        let req = Request::get(url("/"));

        a.put(&req, ok("/", "a")).await.unwrap();

        assert!(b.match_request(&req).await.unwrap().is_none());
        assert_eq!(a.len().await.unwrap(), 1);
        assert!(b.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();
        let req = Request::get(url("/photo.jpg"));

        cache.put(&req, ok("/photo.jpg", "first")).await.unwrap();
        cache.put(&req, ok("/photo.jpg", "second")).await.unwrap();

        let hit = cache.match_request(&req).await.unwrap().unwrap();
        assert_eq!(hit.body().as_ref(), b"second");
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_non_get_rejected_and_never_matches() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();
        let post = Request::new("POST", url("/photo.jpg"));

        let err = cache.put(&post, ok("/photo.jpg", "x")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        cache.put(&Request::get(url("/photo.jpg")), ok("/photo.jpg", "x")).await.unwrap();
        assert!(cache.match_request(&post).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_all_and_keys() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();

        let written = cache
            .put_all(vec![
                (Request::get(url("/")), ok("/", "<html>")),
                (Request::get(url("/index.css")), ok("/index.css", "body{}")),
            ])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let keys: Vec<String> = cache.keys().await.unwrap().iter().map(|r| r.url().path().to_string()).collect();
        assert_eq!(keys, vec!["/", "/index.css"]);
    }

    #[tokio::test]
    async fn test_put_all_rejects_whole_batch() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();

        let result = cache
            .put_all(vec![
                (Request::get(url("/")), ok("/", "<html>")),
                (Request::new("PUT", url("/index.css")), ok("/index.css", "body{}")),
            ])
            .await;

        assert!(result.is_err());
        assert!(cache.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_install_records_fingerprint() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();
        assert!(db.installed_fingerprint("cache-v0").await.unwrap().is_none());

        cache.install(vec![(Request::get(url("/")), ok("/", "<html>"))], "abc123").await.unwrap();

        assert_eq!(db.installed_fingerprint("cache-v0").await.unwrap().as_deref(), Some("abc123"));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_install_records_nothing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();

        let result = cache
            .install(vec![(Request::new("POST", url("/")), ok("/", "<html>"))], "abc123")
            .await;

        assert!(result.is_err());
        assert!(db.installed_fingerprint("cache-v0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_recreates_deleted_generation() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();
        db.delete_cache("cache-v0").await.unwrap();

        cache.put(&Request::get(url("/a.png")), ok("/a.png", "png")).await.unwrap();

        assert!(db.has_cache("cache-v0").await.unwrap());
    }

    #[tokio::test]
    async fn test_repeated_match_is_stable() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let cache = db.open_cache("cache-v0").await.unwrap();
        let req = Request::get(url("/"));
        cache.put(&req, ok("/", "<html>shell</html>")).await.unwrap();

        let first = cache.match_request(&req).await.unwrap().unwrap();
        for _ in 0..3 {
            assert_eq!(cache.match_request(&req).await.unwrap().unwrap(), first);
        }
    }
}
