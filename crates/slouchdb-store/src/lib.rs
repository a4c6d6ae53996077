//! SQLite storage engine for SlouchDB.
//!
//! One revision ever written is one row in `documents`; the revision
//! forest per document is kept as a transitive-closure table so that
//! ancestry reads are a single indexed join instead of a recursive walk.
//! Nothing is ever overwritten except the one allowed demotion of a
//! parent's `leaf` flag when it gains a child.
//!
//! A [`Store`] holds a single connection. Reads take `&self`, writes take
//! `&mut self`, and streaming reads borrow the handle, so a stream must be
//! consumed or dropped before the next write; the borrow checker enforces
//! the serialization the engine requires. A `Store` is not meant to be
//! shared across threads; open one handle per thread against the same
//! file and let SQLite's own locking arbitrate.

pub mod changes;
pub mod read;
pub mod schema;
pub mod store;
pub mod stream;

pub use changes::ChangesIter;
pub use read::ListIter;
pub use store::Store;
pub use stream::QueryRows;

use slouchdb_core::SlouchError;

/// Map a backing-engine failure into the library error taxonomy.
pub(crate) fn db_err(err: rusqlite::Error) -> SlouchError {
    SlouchError::Storage(err.to_string())
}
