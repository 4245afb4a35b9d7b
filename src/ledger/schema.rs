//! Table layout and migrations for the ledger database.
//!
//! Migrations are applied in order inside one transaction each and are
//! recorded in `schema_migrations`, so reopening an existing ledger only
//! applies what is missing.

use std::time::Duration;

use rusqlite::{Connection, params};

use super::error::{LedgerError, LedgerResult};

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    "
    CREATE TABLE IF NOT EXISTS artifacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT UNIQUE NOT NULL,
        fingerprint TEXT NOT NULL,
        size INTEGER NOT NULL,
        discovered_at TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT 'watch',
        metadata_attached INTEGER NOT NULL DEFAULT 0,

        activity_type TEXT,
        activity_name TEXT,
        started_at TEXT,
        duration_secs INTEGER,
        distance_m REAL,
        calories INTEGER,
        avg_power_w INTEGER,
        max_power_w INTEGER,
        norm_power_w INTEGER,
        avg_hr INTEGER,
        max_hr INTEGER,
        avg_cadence INTEGER,
        avg_speed_mps REAL,
        total_ascent_m REAL,
        device_name TEXT,
        software_version TEXT
    );

    CREATE TABLE IF NOT EXISTS delivery_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        artifact_id INTEGER NOT NULL REFERENCES artifacts(id),
        destination TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'succeeded', 'failed')),
        attempted_at TEXT,
        completed_at TEXT,
        remote_id TEXT,
        remote_locator TEXT,
        error TEXT,
        retries INTEGER NOT NULL DEFAULT 0,
        UNIQUE(artifact_id, destination)
    );

    CREATE INDEX IF NOT EXISTS idx_artifacts_fingerprint ON artifacts(fingerprint);
    CREATE INDEX IF NOT EXISTS idx_artifacts_started ON artifacts(started_at);
    CREATE INDEX IF NOT EXISTS idx_delivery_pending
        ON delivery_records(destination, status) WHERE status = 'pending';
    CREATE INDEX IF NOT EXISTS idx_delivery_failed
        ON delivery_records(status) WHERE status = 'failed';
    ",
)];

/// Latest schema version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0)
}

/// Apply connection pragmas: WAL journaling, enforced foreign keys.
pub fn configure(conn: &Connection) -> LedgerResult<()> {
    // journal_mode returns a row, so it cannot go through execute_batch.
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        tracing::warn!("[ledger] journal mode is '{mode}', expected WAL");
    }
    conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA synchronous=FULL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Bring the schema up to [`latest_version`].
pub fn migrate(conn: &mut Connection) -> LedgerResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| LedgerError::Migration(format!("version {version}: {e}")))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, super::store::ts_to_sql(&chrono::Utc::now())],
        )?;
        tx.commit()?;
        crate::debug_event!("ledger", "migrated", "schema version {version}");
    }

    Ok(())
}

/// Schema version recorded in the database.
pub fn current_version(conn: &Connection) -> LedgerResult<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}
