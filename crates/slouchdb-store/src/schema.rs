//! Schema definition and connection establishment.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use slouchdb_core::{Result, SlouchError};

use crate::db_err;

/// DDL for a fresh database, executed in order by [`Store::setup`].
///
/// [`Store::setup`]: crate::Store::setup
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE documents (
      _id TEXT NOT NULL,
      _rev TEXT NOT NULL,
      _deleted INTEGER DEFAULT 0 CHECK (_deleted = 0 OR _deleted = 1),
      generation INTEGER DEFAULT 1 CHECK (generation > 0),
      leaf INTEGER DEFAULT 1 CHECK (leaf = 0 OR leaf = 1),
      body TEXT,
      UNIQUE (_id, _rev) ON CONFLICT IGNORE
    )",
    // Revision forest per document as a closure table: one row per
    // reachable (ancestor, descendant) pair, depth 0 being the self-edge.
    "CREATE TABLE ancestors (
      ancestor INTEGER NOT NULL,
      descendant INTEGER NOT NULL,
      depth INTEGER NOT NULL CHECK (depth >= 0),
      FOREIGN KEY(ancestor) REFERENCES documents(rowid),
      FOREIGN KEY(descendant) REFERENCES documents(rowid)
    )",
    "CREATE TABLE changes (
      doc_row INTEGER NOT NULL,
      seq TEXT NOT NULL,
      FOREIGN KEY(doc_row) REFERENCES documents(rowid)
    )",
    "CREATE INDEX seq_idx ON changes (seq)",
    "CREATE VIEW changes_feed AS
      SELECT c.seq, d.rowid AS doc_row, d._deleted, d._id, d._rev
      FROM changes c, documents d
      WHERE c.doc_row = d.rowid
      ORDER BY d.rowid",
];

const CONNECT_ATTEMPTS: u32 = 5;

/// Open a connection, retrying a few times at short intervals before
/// giving up. A busy on-disk file can reject the first attempt when
/// another handle holds the lock.
pub(crate) fn connect(path: &Path) -> Result<Connection> {
    let mut attempts = 0;
    loop {
        match Connection::open(path) {
            Ok(conn) => return Ok(conn),
            Err(err) if attempts + 1 < CONNECT_ATTEMPTS => {
                attempts += 1;
                log::warn!(
                    "connection attempt {} to {} failed: {}",
                    attempts,
                    path.display(),
                    err
                );
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => {
                return Err(SlouchError::Storage(format!(
                    "can't connect to sqlite database {}: {}",
                    path.display(),
                    err
                )));
            }
        }
    }
}

/// Create every table, index, and view on a connection.
pub(crate) fn create_all(conn: &Connection) -> Result<()> {
    for statement in SCHEMA {
        conn.execute(statement, []).map_err(db_err)?;
    }
    Ok(())
}
