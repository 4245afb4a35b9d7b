//! SQLite-backed ledger.
//!
//! One connection guarded by a mutex. Every mutation is a single statement
//! or an explicit transaction, so a crash leaves each row at either its
//! pre-write or post-write value. WAL journaling keeps readers in other
//! connections (or other processes inspecting the file) consistent while
//! a write is in flight.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::error::{LedgerError, LedgerResult};
use super::schema;
use super::types::{
    ActivityMetadata, Artifact, ArtifactId, DeliveryRecord, DeliveryStatus, DestinationTally,
    LedgerStats, NewArtifact,
};

const ARTIFACT_COLUMNS: &str = "
    a.id, a.path, a.fingerprint, a.size, a.discovered_at, a.source,
    a.activity_type, a.activity_name, a.started_at, a.duration_secs,
    a.distance_m, a.calories, a.avg_power_w, a.max_power_w, a.norm_power_w,
    a.avg_hr, a.max_hr, a.avg_cadence, a.avg_speed_mps, a.total_ascent_m,
    a.device_name, a.software_version";

const RECORD_COLUMNS: &str = "
    id, artifact_id, destination, status, attempted_at, completed_at,
    remote_id, remote_locator, error, retries";

/// Durable record of discovered artifacts and their delivery state.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open or create a ledger file, applying pending migrations.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path).map_err(|e| LedgerError::Open {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        schema::configure(&conn)?;
        schema::migrate(&mut conn)?;

        crate::debug_event!("ledger", "opened", "{}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a throwaway ledger held in memory.
    pub fn in_memory() -> LedgerResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::configure(&conn)?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Schema version of the open database.
    pub fn schema_version(&self) -> LedgerResult<u32> {
        schema::current_version(&self.conn.lock())
    }

    /// Insert a newly discovered artifact.
    ///
    /// Returns `None` when the path is already recorded. The stored row is
    /// left untouched in that case.
    pub fn record_artifact(&self, artifact: &NewArtifact) -> LedgerResult<Option<ArtifactId>> {
        let conn = self.conn.lock();
        let m = &artifact.metadata;
        let changed = conn.execute(
            "INSERT INTO artifacts (
                path, fingerprint, size, discovered_at, source, metadata_attached,
                activity_type, activity_name, started_at, duration_secs,
                distance_m, calories, avg_power_w, max_power_w, norm_power_w,
                avg_hr, max_hr, avg_cadence, avg_speed_mps, total_ascent_m,
                device_name, software_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22)
            ON CONFLICT(path) DO NOTHING",
            params![
                path_to_sql(&artifact.path),
                artifact.fingerprint,
                size_to_sql(artifact.size)?,
                ts_to_sql(&artifact.discovered_at),
                artifact.source.as_str(),
                !m.is_empty(),
                m.activity_type,
                m.activity_name,
                m.started_at.as_ref().map(ts_to_sql),
                m.duration_secs,
                m.distance_m,
                m.calories,
                m.avg_power_w,
                m.max_power_w,
                m.norm_power_w,
                m.avg_hr,
                m.max_hr,
                m.avg_cadence,
                m.avg_speed_mps,
                m.total_ascent_m,
                m.device_name,
                m.software_version,
            ],
        )?;

        if changed == 0 {
            crate::debug_event!(
                "ledger",
                "path already recorded",
                "{}",
                artifact.path.display()
            );
            return Ok(None);
        }

        Ok(Some(ArtifactId::new(conn.last_insert_rowid())))
    }

    /// Attach decoded metadata to an artifact recorded without it.
    ///
    /// Metadata can be attached once; returns false if it already was.
    pub fn attach_metadata(&self, id: ArtifactId, m: &ActivityMetadata) -> LedgerResult<bool> {
        if m.is_empty() {
            return Ok(false);
        }
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE artifacts SET
                metadata_attached = 1,
                activity_type = ?2, activity_name = ?3, started_at = ?4, duration_secs = ?5,
                distance_m = ?6, calories = ?7, avg_power_w = ?8, max_power_w = ?9,
                norm_power_w = ?10, avg_hr = ?11, max_hr = ?12, avg_cadence = ?13,
                avg_speed_mps = ?14, total_ascent_m = ?15, device_name = ?16,
                software_version = ?17
            WHERE id = ?1 AND metadata_attached = 0",
            params![
                id.value(),
                m.activity_type,
                m.activity_name,
                m.started_at.as_ref().map(ts_to_sql),
                m.duration_secs,
                m.distance_m,
                m.calories,
                m.avg_power_w,
                m.max_power_w,
                m.norm_power_w,
                m.avg_hr,
                m.max_hr,
                m.avg_cadence,
                m.avg_speed_mps,
                m.total_ascent_m,
                m.device_name,
                m.software_version,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn find_by_id(&self, id: ArtifactId) -> LedgerResult<Option<Artifact>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts a WHERE a.id = ?1");
        Ok(conn
            .query_row(&sql, params![id.value()], map_artifact)
            .optional()?)
    }

    pub fn find_by_path(&self, path: &Path) -> LedgerResult<Option<Artifact>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts a WHERE a.path = ?1");
        Ok(conn
            .query_row(&sql, params![path_to_sql(path)], map_artifact)
            .optional()?)
    }

    /// First artifact recorded with this content fingerprint.
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> LedgerResult<Option<Artifact>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts a
             WHERE a.fingerprint = ?1 ORDER BY a.id ASC LIMIT 1"
        );
        Ok(conn
            .query_row(&sql, params![fingerprint], map_artifact)
            .optional()?)
    }

    /// True if either the path or the fingerprint is already known.
    pub fn exists(&self, path: &Path, fingerprint: &str) -> LedgerResult<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE path = ?1 OR fingerprint = ?2",
            params![path_to_sql(path), fingerprint],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Most recent artifacts first. A limit of zero returns everything.
    pub fn list_artifacts(&self, limit: usize) -> LedgerResult<Vec<Artifact>> {
        let conn = self.conn.lock();
        let mut sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts a
             ORDER BY COALESCE(a.started_at, a.discovered_at) DESC, a.id DESC"
        );
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_artifact)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Queue an artifact for a destination.
    ///
    /// Returns false when a record for the pair already exists; the
    /// existing record is not modified.
    pub fn create_delivery_record(&self, id: ArtifactId, destination: &str) -> LedgerResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT INTO delivery_records (artifact_id, destination, status)
             VALUES (?1, ?2, 'pending')
             ON CONFLICT(artifact_id, destination) DO NOTHING",
            params![id.value(), destination],
        )?;
        Ok(changed > 0)
    }

    /// Stamp the attempt time on a record about to be pushed.
    pub fn mark_attempted(&self, id: ArtifactId, destination: &str) -> LedgerResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE delivery_records SET attempted_at = ?3
             WHERE artifact_id = ?1 AND destination = ?2",
            params![id.value(), destination, ts_to_sql(&Utc::now())],
        )?;
        ensure_found(changed, id, destination)
    }

    /// Transition a record to `succeeded`.
    ///
    /// Returns false if the record was already `succeeded`.
    pub fn mark_succeeded(
        &self,
        id: ArtifactId,
        destination: &str,
        remote_id: Option<&str>,
        remote_locator: Option<&str>,
    ) -> LedgerResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = ts_to_sql(&Utc::now());
        let changed = tx.execute(
            "UPDATE delivery_records
             SET status = 'succeeded', attempted_at = COALESCE(attempted_at, ?3),
                 completed_at = ?3, remote_id = ?4, remote_locator = ?5, error = NULL
             WHERE artifact_id = ?1 AND destination = ?2 AND status != 'succeeded'",
            params![id.value(), destination, now, remote_id, remote_locator],
        )?;
        let transitioned = changed > 0;
        if !transitioned {
            ensure_found(record_count(&tx, id, destination)?, id, destination)?;
        }
        tx.commit()?;
        Ok(transitioned)
    }

    /// Transition a record to `failed`, incrementing its retry counter.
    ///
    /// A `succeeded` record is terminal and is left alone (returns false).
    pub fn mark_failed(&self, id: ArtifactId, destination: &str, error: &str) -> LedgerResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE delivery_records
             SET status = 'failed', attempted_at = ?3, error = ?4, retries = retries + 1
             WHERE artifact_id = ?1 AND destination = ?2 AND status != 'succeeded'",
            params![id.value(), destination, ts_to_sql(&Utc::now()), error],
        )?;
        let transitioned = changed > 0;
        if !transitioned {
            ensure_found(record_count(&tx, id, destination)?, id, destination)?;
        }
        tx.commit()?;
        Ok(transitioned)
    }

    pub fn delivery_record(
        &self,
        id: ArtifactId,
        destination: &str,
    ) -> LedgerResult<Option<DeliveryRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM delivery_records
             WHERE artifact_id = ?1 AND destination = ?2"
        );
        Ok(conn
            .query_row(&sql, params![id.value(), destination], map_record)
            .optional()?)
    }

    /// All delivery records of one artifact, by destination name.
    pub fn deliveries_for(&self, id: ArtifactId) -> LedgerResult<Vec<DeliveryRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM delivery_records
             WHERE artifact_id = ?1 ORDER BY destination ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![id.value()], map_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Artifacts waiting on a destination, oldest activity first.
    ///
    /// Ordered by activity start time, falling back to discovery time when
    /// the start is unknown; ties are broken by discovery time.
    pub fn pending_for(&self, destination: &str) -> LedgerResult<Vec<Artifact>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts a
             JOIN delivery_records d ON a.id = d.artifact_id
             WHERE d.destination = ?1 AND d.status = 'pending'
             ORDER BY COALESCE(a.started_at, a.discovered_at) ASC, a.discovered_at ASC, a.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![destination], map_artifact)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Failed records still under the retry ceiling.
    pub fn retry_eligible(
        &self,
        destination: &str,
        max_retries: u32,
    ) -> LedgerResult<Vec<DeliveryRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM delivery_records
             WHERE destination = ?1 AND status = 'failed' AND retries < ?2
             ORDER BY attempted_at ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![destination, max_retries], map_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Flip failed records under the retry ceiling back to `pending`.
    ///
    /// Returns the number of records re-queued.
    pub fn reset_to_retry(&self, destination: &str, max_retries: u32) -> LedgerResult<usize> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE delivery_records SET status = 'pending'
             WHERE destination = ?1 AND status = 'failed' AND retries < ?2",
            params![destination, max_retries],
        )?;
        Ok(changed)
    }

    pub fn stats(&self) -> LedgerResult<LedgerStats> {
        let conn = self.conn.lock();
        let total_artifacts: i64 =
            conn.query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))?;
        let total_deliveries: i64 =
            conn.query_row("SELECT COUNT(*) FROM delivery_records", [], |row| row.get(0))?;

        let mut stats = LedgerStats {
            total_artifacts: total_artifacts as usize,
            total_deliveries: total_deliveries as usize,
            ..Default::default()
        };

        let mut stmt = conn.prepare(
            "SELECT destination, status, COUNT(*) FROM delivery_records
             GROUP BY destination, status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        for row in rows {
            let (destination, status, count) = row?;
            let tally: &mut DestinationTally = stats.by_destination.entry(destination).or_default();
            let count = count as usize;
            match status.parse::<DeliveryStatus>() {
                Ok(DeliveryStatus::Pending) => tally.pending = count,
                Ok(DeliveryStatus::Succeeded) => tally.succeeded = count,
                Ok(DeliveryStatus::Failed) => tally.failed = count,
                Err(reason) => {
                    return Err(LedgerError::CorruptRow {
                        table: "delivery_records",
                        reason,
                    });
                }
            }
        }

        Ok(stats)
    }
}

/// Fixed-width UTC timestamp text, so lexical order equals time order.
pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_from_sql(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => ts_from_sql(idx, &text).map(Some),
        None => Ok(None),
    }
}

fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn size_to_sql(size: u64) -> LedgerResult<i64> {
    i64::try_from(size).map_err(|_| LedgerError::CorruptRow {
        table: "artifacts",
        reason: format!("size {size} does not fit in a signed 64-bit column"),
    })
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn map_artifact(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    let size: i64 = row.get(3)?;
    let discovered_at: String = row.get(4)?;
    let source: String = row.get(5)?;

    Ok(Artifact {
        id: ArtifactId::new(row.get(0)?),
        path: PathBuf::from(row.get::<_, String>(1)?),
        fingerprint: row.get(2)?,
        size: u64::try_from(size)
            .map_err(|_| conversion_error(3, format!("negative size {size}")))?,
        discovered_at: ts_from_sql(4, &discovered_at)?,
        source: source.parse().map_err(|e| conversion_error(5, e))?,
        metadata: ActivityMetadata {
            activity_type: row.get(6)?,
            activity_name: row.get(7)?,
            started_at: opt_ts(row, 8)?,
            duration_secs: row.get(9)?,
            distance_m: row.get(10)?,
            calories: row.get(11)?,
            avg_power_w: row.get(12)?,
            max_power_w: row.get(13)?,
            norm_power_w: row.get(14)?,
            avg_hr: row.get(15)?,
            max_hr: row.get(16)?,
            avg_cadence: row.get(17)?,
            avg_speed_mps: row.get(18)?,
            total_ascent_m: row.get(19)?,
            device_name: row.get(20)?,
            software_version: row.get(21)?,
        },
    })
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<DeliveryRecord> {
    let status: String = row.get(3)?;
    Ok(DeliveryRecord {
        id: row.get(0)?,
        artifact_id: ArtifactId::new(row.get(1)?),
        destination: row.get(2)?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        attempted_at: opt_ts(row, 4)?,
        completed_at: opt_ts(row, 5)?,
        remote_id: row.get(6)?,
        remote_locator: row.get(7)?,
        error: row.get(8)?,
        retries: row.get(9)?,
    })
}

fn record_count(conn: &Connection, id: ArtifactId, destination: &str) -> LedgerResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM delivery_records WHERE artifact_id = ?1 AND destination = ?2",
        params![id.value(), destination],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn ensure_found(changed: usize, id: ArtifactId, destination: &str) -> LedgerResult<()> {
    if changed == 0 {
        return Err(LedgerError::RecordNotFound {
            artifact_id: id.value(),
            destination: destination.to_string(),
        });
    }
    Ok(())
}
