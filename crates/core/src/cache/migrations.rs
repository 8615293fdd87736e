//! Schema migrations for the generation store.
//!
//! Applied versions are recorded in `_migrations`; each run applies only
//! what is newer than the highest recorded version.

use super::Error;
use tokio_rusqlite::{Connection, params};

/// A single schema step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version. Every step is idempotent (CREATE ... IF NOT EXISTS).
const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "generations", sql: include_str!("../../migrations/001_generations.sql") },
    Migration { version: 2, name: "entries", sql: include_str!("../../migrations/002_entries.sql") },
    Migration { version: 3, name: "installs", sql: include_str!("../../migrations/003_installs.sql") },
];

/// Bring the schema up to date.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` naming the step whose SQL failed.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    let applied = conn
        .call(|conn| -> Result<Vec<&'static str>, Error> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at TEXT NOT NULL
                )",
                [],
            )?;

            let current: i64 =
                conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

            let mut applied = Vec::new();
            for step in MIGRATIONS.iter().filter(|m| m.version > current) {
                conn.execute_batch(step.sql)
                    .map_err(|e| Error::MigrationFailed(format!("{} ({}): {e}", step.version, step.name)))?;
                conn.execute(
                    "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                    params![step.version, step.name, chrono::Utc::now().to_rfc3339()],
                )?;
                applied.push(step.name);
            }
            Ok(applied)
        })
        .await
        .map_err(Error::from)?;

    if !applied.is_empty() {
        tracing::debug!(?applied, "applied cache schema migrations");
    }
    Ok(())
}
