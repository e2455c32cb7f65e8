//! Store handle and transaction discipline.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use rusqlite::{Connection, ErrorCode, TransactionBehavior};

use super::schema;
use crate::error::StorageError;

/// Maximum attempts for a transaction that keeps hitting a busy database.
const RETRY_ATTEMPTS: u32 = 10;
/// Exponential backoff factor between attempts.
const BACKOFF_FACTOR: f64 = 1.5;
/// Transactions slower than this emit a debug diagnostic.
const LONG_TXN_DURATION: Duration = Duration::from_secs(1);

/// A durable keyed store backed by SQLite. Single writer; every public
/// mutator runs inside one serializable transaction.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// An in-memory database, for testing.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        configure_connection(&conn)?;
        schema::init(&conn)?;
        Ok(Store { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::ConnectionFailed("lock poisoned".into()))
    }

    /// Execute `f` within a transaction, committing if it returns `Ok` and
    /// rolling back otherwise. Busy errors are retried with jittered
    /// exponential backoff; any other error is returned to the caller as-is.
    pub(crate) fn transaction<T>(
        &self,
        mut f: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let start = Instant::now();
        let mut last_err = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            let attempt_start = Instant::now();
            let result = {
                let mut conn = self.lock_conn()?;
                run_transaction(&mut conn, &mut f)
            };
            match result {
                Ok(v) => return Ok(v),
                Err(err) if is_busy(&err) => {
                    tracing::debug!(
                        attempt,
                        elapsed = ?attempt_start.elapsed(),
                        total_elapsed = ?start.elapsed(),
                        "database locked"
                    );
                    jitter_sleep(backoff(attempt));
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(StorageError::TransactionFailed(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "retries exhausted".into()),
        ))
    }
}

fn run_transaction<T>(
    conn: &mut Connection,
    f: &mut impl FnMut(&rusqlite::Transaction<'_>) -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    let start = Instant::now();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let result = f(&tx);
    if start.elapsed() > LONG_TXN_DURATION {
        tracing::debug!(elapsed = ?start.elapsed(), failed = result.is_err(), "long transaction");
    }
    match result {
        Ok(v) => {
            tx.commit()?;
            Ok(v)
        }
        Err(e) => Err(e), // tx rolls back on drop
    }
}

fn configure_connection(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", -65536)?; // 64 MiB
    Ok(())
}

fn is_busy(err: &StorageError) -> bool {
    matches!(
        err,
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_FACTOR.powi(attempt as i32) as u64)
}

fn jitter_sleep(d: Duration) {
    let jitter = rand::thread_rng().gen_range(0..=d.as_millis() as u64);
    std::thread::sleep(d + Duration::from_millis(jitter));
}
