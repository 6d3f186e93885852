use crate::{
    geo::BoundingBox,
    transform::{FlatRecord, RecordKey},
    window::TimeWindow,
    SatFlashResult,
};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

/// Where flattened records end up.
///
/// A store must enforce uniqueness of [RecordKey]. Writes are grouped into batches, a batch that
/// fails part way is rolled back so it can simply be loaded again.
pub trait RecordStore {
    /// Start a batch of writes.
    fn begin_batch(&mut self) -> SatFlashResult<()> {
        Ok(())
    }

    /// Insert the record unless one with the same key is already stored.
    ///
    /// Returns whether the record was inserted. An existing record is never modified.
    fn upsert_if_absent(
        &mut self,
        key: RecordKey<'_>,
        record: &FlatRecord,
    ) -> SatFlashResult<bool>;

    /// Make the current batch permanent.
    fn commit_batch(&mut self) -> SatFlashResult<()> {
        Ok(())
    }

    /// Throw away the current batch.
    fn rollback_batch(&mut self) -> SatFlashResult<()> {
        Ok(())
    }

    /// All records in the window and inside (or on the edge of) the area, ordered by time.
    fn query(&self, window: &TimeWindow, area: &BoundingBox) -> SatFlashResult<Vec<FlatRecord>>;

    /// Total number of stored records.
    fn count(&self) -> SatFlashResult<u64>;
}

/// Store a batch of records, skipping any that are already present.
///
/// Returns the number of records actually inserted. The batch is all or nothing, if the store
/// fails part way nothing from this call is kept and the error is returned. Loading the same
/// records again is always safe.
pub fn load<S: RecordStore + ?Sized>(
    records: &[FlatRecord],
    store: &mut S,
) -> SatFlashResult<usize> {
    store.begin_batch()?;

    let inserted = match write_batch(records, store) {
        Ok(inserted) => inserted,
        Err(err) => {
            if let Err(rollback_err) = store.rollback_batch() {
                debug!("rollback after failed load also failed: {}", rollback_err);
            }
            return Err(err);
        }
    };

    info!(
        "loaded {} new records, {} already present",
        inserted,
        records.len() - inserted
    );

    Ok(inserted)
}

/// Insert everything and commit. Nothing is rolled back here.
fn write_batch<S: RecordStore + ?Sized>(
    records: &[FlatRecord],
    store: &mut S,
) -> SatFlashResult<usize> {
    let mut inserted = 0;
    for record in records {
        if store.upsert_if_absent(record.key(), record)? {
            inserted += 1;
        }
    }

    store.commit_batch()?;

    Ok(inserted)
}

/// Represents a connection to the SQLite database where the flattened events are stored.
pub struct FlashDatabase {
    conn: Connection,
}

impl FlashDatabase {
    /// Initialize a database.
    ///
    /// Make sure it exists and has the expected tables. This should be run in the main thread
    /// before any other threads open a connection to the database.
    pub fn initialize<P: AsRef<Path>>(path: P) -> SatFlashResult<()> {
        let _conn = Self::open_database_to_write(path.as_ref())?;
        Ok(())
    }

    /// Open a connection to the database, creating it if needed.
    pub fn connect<P: AsRef<Path>>(path: P) -> SatFlashResult<Self> {
        let conn = Self::open_database_to_write(path.as_ref())?;
        Ok(FlashDatabase { conn })
    }

    /// A private, throw away database.
    pub fn in_memory() -> SatFlashResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_tables(&conn)?;
        Ok(FlashDatabase { conn })
    }

    fn open_database_to_write(path: &Path) -> SatFlashResult<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // A 5-second busy time out is WAY too much. If we hit this something has gone terribly
        // wrong.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::create_tables(&conn)?;

        Ok(conn)
    }

    fn create_tables(conn: &Connection) -> SatFlashResult<()> {
        const QUERY: &str = include_str!("database/create_flash_db.sql");
        conn.execute_batch(QUERY)?;
        Ok(())
    }

    /// How long a write waits on another connection's lock before giving up.
    pub fn busy_timeout(&self, timeout: std::time::Duration) -> SatFlashResult<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// The time of the most recent event in the database, if there are any.
    pub fn newest_event_time(&self) -> SatFlashResult<Option<DateTime<Utc>>> {
        let newest: Option<i64> =
            self.conn
                .query_row("SELECT MAX(event_time) FROM events", [], |row| row.get(0))?;

        Ok(newest.map(from_micros))
    }
}

impl RecordStore for FlashDatabase {
    fn begin_batch(&mut self) -> SatFlashResult<()> {
        if !self.conn.is_autocommit() {
            debug!("rolling back a transaction left open by an earlier batch");
            self.conn.execute("ROLLBACK", [])?;
        }
        self.conn.execute("BEGIN TRANSACTION", [])?;
        Ok(())
    }

    fn upsert_if_absent(
        &mut self,
        key: RecordKey<'_>,
        record: &FlatRecord,
    ) -> SatFlashResult<bool> {
        const QUERY: &str = include_str!("database/add_event.sql");
        let mut stmt = self.conn.prepare_cached(QUERY)?;

        let changed = stmt.execute(params![
            key.source_file,
            key.event_id,
            record.group_id,
            record.flash_id,
            record.timestamp.timestamp_micros(),
            record.group_time.timestamp_micros(),
            record.flash_time.timestamp_micros(),
            record.latitude,
            record.longitude,
            record.intensity,
        ])?;

        Ok(changed > 0)
    }

    fn commit_batch(&mut self) -> SatFlashResult<()> {
        self.conn.execute("COMMIT", [])?;
        Ok(())
    }

    fn rollback_batch(&mut self) -> SatFlashResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute("ROLLBACK", [])?;
        }
        Ok(())
    }

    fn query(&self, window: &TimeWindow, area: &BoundingBox) -> SatFlashResult<Vec<FlatRecord>> {
        const QUERY: &str = include_str!("database/query_events.sql");
        let mut stmt = self.conn.prepare_cached(QUERY)?;

        let rows = stmt.query_map(
            params![
                window.start().timestamp_micros(),
                window.end().timestamp_micros(),
                area.ll.lat,
                area.ur.lat,
                area.ll.lon,
                area.ur.lon,
            ],
            |row| {
                Ok(FlatRecord {
                    source_file: row.get(0)?,
                    event_id: row.get(1)?,
                    group_id: row.get(2)?,
                    flash_id: row.get(3)?,
                    timestamp: from_micros(row.get(4)?),
                    group_time: from_micros(row.get(5)?),
                    flash_time: from_micros(row.get(6)?),
                    latitude: row.get::<_, Option<f64>>(7)?.unwrap_or(f64::NAN),
                    longitude: row.get::<_, Option<f64>>(8)?.unwrap_or(f64::NAN),
                    intensity: row.get::<_, Option<f64>>(9)?.unwrap_or(f64::NAN),
                })
            },
        )?;

        let records = rows.collect::<Result<Vec<_>, rusqlite::Error>>()?;
        debug!("query {} returned {} records", window, records.len());

        Ok(records)
    }

    fn count(&self) -> SatFlashResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(micros.saturating_mul(1_000))
}
