//! SlouchDB: a CouchDB-style multi-version document database over SQLite.
//!
//! Documents are never overwritten. Every edit appends a new revision to a
//! per-document revision tree; conflicting branches coexist until one side
//! deletes, and a deterministic winner is chosen for plain reads. An
//! append-only changes feed replays every write in order and can resume
//! from an opaque sequence token, and a declarative selector compiler
//! answers field queries with parameterized SQL over the JSON bodies.
//!
//! ```no_run
//! use slouchdb::Database;
//!
//! let mut db = Database::open("movies.db")?;
//! let written = db.insert(serde_json::json!({"title": "ghi", "year": 2010}))?;
//! let doc = db.get(&written.id)?;
//! # Ok::<(), slouchdb::SlouchError>(())
//! ```
//!
//! A `Database` holds one connection and serializes its operations; it is
//! not meant to be shared across threads. Open one handle per thread
//! against the same file and SQLite's locking arbitrates between them.

use std::path::Path;

use serde_json::Value;

pub use slouchdb_core::document::{
    ChangeRow, ChangesOptions, Document, ListOptions, ListRow, OpenRev, Revision, WriteResult,
};
pub use slouchdb_core::error::{Result, SlouchError};
pub use slouchdb_query::{CompiledQuery, FindQuery};
pub use slouchdb_store::{ChangesIter, ListIter, QueryRows, Store};

use slouchdb_core::document::DEFAULT_CHUNK;

/// A handle on one database file.
pub struct Database {
    store: Store,
}

impl Database {
    /// Open a database file, creating the schema if the file is fresh.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Store::open(path)?;
        if !store.is_initialized()? {
            store.setup()?;
        }
        Ok(Database { store })
    }

    /// Open a fresh in-memory database.
    pub fn memory() -> Result<Self> {
        let store = Store::open_in_memory()?;
        store.setup()?;
        Ok(Database { store })
    }

    // -- writes ------------------------------------------------------------

    /// Write a document: a root if the body has no `_rev`, otherwise a
    /// child of the revision the body names.
    pub fn insert(&mut self, body: Value) -> Result<WriteResult> {
        self.store.insert(body)
    }

    /// Like [`insert`](Database::insert) but the body must name an
    /// existing document via `_id`.
    pub fn update(&mut self, body: Value) -> Result<WriteResult> {
        self.store.update(body)
    }

    /// Multi-document write in one transaction; all rows share a sequence
    /// token and any conflict rolls the whole batch back.
    pub fn bulk(&mut self, docs: Vec<Value>) -> Result<Vec<WriteResult>> {
        self.store.bulk(docs)
    }

    /// Delete by writing a tombstone child of `(id, rev)`.
    pub fn destroy(&mut self, id: &str, rev: &str) -> Result<WriteResult> {
        self.store.destroy(id, rev)
    }

    /// Create a root document under a caller-chosen id.
    pub fn put(&mut self, id: &str, body: Value) -> Result<WriteResult> {
        self.insert(with_fields(body, id, None))
    }

    /// Append a new revision under `(id, rev)`.
    pub fn update_rev(&mut self, id: &str, rev: &str, body: Value) -> Result<WriteResult> {
        self.insert(with_fields(body, id, Some(rev)))
    }

    /// Alias of [`destroy`](Database::destroy).
    pub fn remove(&mut self, id: &str, rev: &str) -> Result<WriteResult> {
        self.destroy(id, rev)
    }

    // -- reads -------------------------------------------------------------

    /// Fetch the winner of a document.
    pub fn get(&self, id: &str) -> Result<Value> {
        self.store.get(id)
    }

    /// Fetch exactly the named revision.
    pub fn get_rev(&self, id: &str, rev: &str) -> Result<Value> {
        self.store.get_rev(id, rev)
    }

    /// Every open branch tip of a document, annotated with `_revisions`.
    pub fn open_revs(&self, id: &str) -> Result<Vec<OpenRev>> {
        self.store.open_revs(id)
    }

    /// Stream current live leaves.
    pub fn list(&self, opts: ListOptions) -> ListIter<'_> {
        self.store.list(opts)
    }

    /// Stream the changes feed.
    pub fn changes(&self, opts: ChangesOptions) -> Result<ChangesIter<'_>> {
        self.store.changes(opts)
    }

    // -- queries -----------------------------------------------------------

    /// Compile and stream a declarative selector query:
    ///
    /// ```json
    /// { "selector": { "year": {"$gt": 2000} },
    ///   "fields":   ["_id", "year"],
    ///   "sort":     [{"year": "asc"}] }
    /// ```
    pub fn find(&self, query: Value) -> Result<QueryRows<'_>> {
        self.find_chunked(query, DEFAULT_CHUNK)
    }

    /// [`find`](Database::find) with an explicit fetch chunk size.
    pub fn find_chunked(&self, query: Value, chunk: usize) -> Result<QueryRows<'_>> {
        let compiled = FindQuery::from_json(query)?.compile()?;
        Ok(self.store.query_rows(&compiled.sql, compiled.params, chunk))
    }
}

fn with_fields(body: Value, id: &str, rev: Option<&str>) -> Value {
    match body {
        Value::Object(mut obj) => {
            obj.insert("_id".into(), Value::String(id.to_string()));
            if let Some(rev) = rev {
                obj.insert("_rev".into(), Value::String(rev.to_string()));
            }
            Value::Object(obj)
        }
        // Non-objects pass through so the write path rejects them.
        other => other,
    }
}
