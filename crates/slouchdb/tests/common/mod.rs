//! Shared helpers for the integration suites.

use slouchdb::{Database, WriteResult};

/// A fresh in-memory database.
pub fn fresh_db() -> Database {
    Database::memory().unwrap()
}

/// Insert a child revision of `(id, rev)` carrying `body`.
pub fn insert_child(
    db: &mut Database,
    id: &str,
    rev: &str,
    body: serde_json::Value,
) -> slouchdb::Result<WriteResult> {
    db.update_rev(id, rev, body)
}
