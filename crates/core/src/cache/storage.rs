//! Generation-level operations: open, enumerate, delete.
//!
//! These mirror the host `caches` object. A generation is a named row in
//! `generations`; deleting it drops every entry it owns.

use super::connection::CacheDb;
use super::entries::Cache;
use crate::Error;
use tokio_rusqlite::params;

impl CacheDb {
    /// Open the named generation, creating it if absent.
    pub async fn open_cache(&self, name: &str) -> Result<Cache, Error> {
        let owned = name.to_string();
        let created = self
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![owned, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(inserted > 0)
            })
            .await
            .map_err(Error::from)?;

        if created {
            tracing::debug!(generation = name, "created cache generation");
        }
        Ok(Cache::new(self.clone(), name))
    }

    /// Whether a generation with this name exists.
    pub async fn has_cache(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists =
                    conn.query_row("SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)", params![name], |row| {
                        row.get(0)
                    })?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Names of all existing generations, oldest first.
    pub async fn cache_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY id ASC")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Fingerprint recorded by the last completed install of `name`.
    ///
    /// `None` if the generation was never fully installed, or was deleted
    /// and later recreated by a write-back.
    pub async fn installed_fingerprint(&self, name: &str) -> Result<Option<String>, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let result =
                    conn.query_row("SELECT fingerprint FROM installs WHERE generation = ?1", params![name], |row| {
                        row.get(0)
                    });
                match result {
                    Ok(fingerprint) => Ok(Some(fingerprint)),
                    Err(tokio_rusqlite::rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and all of its entries.
    ///
    /// Returns false if no generation had that name.
    pub async fn delete_cache(&self, name: &str) -> Result<bool, Error> {
        let owned = name.to_string();
        let deleted = self
            .conn
            .call(move |conn| -> Result<usize, Error> {
                Ok(conn.execute("DELETE FROM generations WHERE name = ?1", params![owned])?)
            })
            .await
            .map_err(Error::from)?;

        if deleted > 0 {
            tracing::debug!(generation = name, "deleted cache generation");
        }
        Ok(deleted > 0)
    }
}
