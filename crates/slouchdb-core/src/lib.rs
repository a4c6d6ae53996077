//! Core types for SlouchDB: revisions, documents, the error taxonomy,
//! and identity generation (document ids, revision ids, sequence tokens).
//!
//! Everything here is independent of the backing engine; the SQLite
//! storage layer lives in `slouchdb-store`.

pub mod document;
pub mod error;
pub mod ident;

pub use document::{
    ChangeRow, ChangesOptions, Document, ListOptions, ListRow, OpenRev, Revision, WriteResult,
};
pub use error::{Result, SlouchError};
