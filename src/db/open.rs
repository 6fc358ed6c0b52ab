//! Connection open helpers.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure the pragmas repository code relies on.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`, verified after setting.
//! - Returned connections have a busy timeout applied.

use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a SQLite database file ready for repository use.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with_mode("file", || Connection::open(path))
}

/// Opens an in-memory SQLite database ready for repository use.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with_mode("memory", Connection::open_in_memory)
}

fn open_with_mode(
    mode: &'static str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let result = open().map_err(DbError::from).and_then(bootstrap_connection);

    match result {
        Ok(conn) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: Connection) -> DbResult<Connection> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    let enabled: i64 = conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?;
    if enabled != 1 {
        return Err(DbError::ForeignKeysUnavailable);
    }
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}
