//! The read path: winner lookup, explicit revisions, open leaves, and
//! chunked listing of live documents.

use std::collections::VecDeque;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;

use slouchdb_core::document::{DEFAULT_CHUNK, ListOptions, ListRow, OpenRev, Revision};
use slouchdb_core::error::{Result, SlouchError};

use crate::db_err;
use crate::store::Store;

const GET_WINNER: &str = "SELECT body FROM documents
     WHERE _id = ?1 AND leaf = 1 AND _deleted = 0
     ORDER BY generation DESC, _rev DESC LIMIT 1";
const GET_SPECIFIC_REV: &str = "SELECT body FROM documents WHERE _id = ?1 AND _rev = ?2";
const FIND_OPEN_BRANCHES: &str = "SELECT rowid, body, generation FROM documents
     WHERE _id = ?1 AND leaf = 1 AND _deleted = 0
     ORDER BY generation DESC, _rev DESC";
const FIND_ANCESTRAL_REVS: &str = "SELECT d._rev FROM documents d
     JOIN ancestors a ON (d.rowid = a.ancestor)
     WHERE a.descendant = ?1
     ORDER BY d.generation DESC";

impl Store {
    /// Fetch the winner of a document: among non-deleted leaves, the one
    /// with the greatest generation, ties broken by the lexicographically
    /// greatest revision id.
    pub fn get(&self, docid: &str) -> Result<Value> {
        let body: Option<String> = self
            .conn
            .query_row(GET_WINNER, params![docid], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        let body = body.ok_or_else(|| SlouchError::NotFound(docid.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch exactly the named revision, tombstones included.
    pub fn get_rev(&self, docid: &str, revid: &str) -> Result<Value> {
        let body: Option<String> = self
            .conn
            .query_row(GET_SPECIFIC_REV, params![docid, revid], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        let body =
            body.ok_or_else(|| SlouchError::NotFound(format!("{docid} rev {revid}")))?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Every open branch tip of a document, leaf-first.
    ///
    /// Each entry is the leaf body annotated with `_revisions`: the
    /// starting generation and the digest part of every ancestor revision,
    /// ordered from the leaf back to the root. The ancestry is one indexed
    /// join against the closure table per leaf.
    pub fn open_revs(&self, docid: &str) -> Result<Vec<OpenRev>> {
        let mut branches = self.conn.prepare(FIND_OPEN_BRANCHES).map_err(db_err)?;
        let leaves = branches
            .query_map(params![docid], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u64>(2)?,
                ))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let mut revs = self.conn.prepare(FIND_ANCESTRAL_REVS).map_err(db_err)?;
        let mut result = Vec::with_capacity(leaves.len());
        for (rowid, body, generation) in leaves {
            let ids = revs
                .query_map(params![rowid], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?
                .into_iter()
                .map(|rev| rev.parse::<Revision>().map(|r| r.hash).unwrap_or(rev))
                .collect::<Vec<_>>();

            let mut document: Value = serde_json::from_str(&body)?;
            document["_revisions"] = serde_json::json!({
                "start": generation,
                "ids": ids,
            });
            result.push(OpenRev { ok: document });
        }
        Ok(result)
    }

    /// Enumerate current live leaves as a lazy chunked stream.
    ///
    /// By default one row per document (the winner); with
    /// `conflicts = true` (honored only together with `include_docs`)
    /// every live leaf is emitted. `keys` restricts the scan to the given
    /// ids.
    pub fn list(&self, opts: ListOptions) -> ListIter<'_> {
        ListIter::new(&self.conn, opts)
    }
}

/// Streaming cursor over live leaves. Pulls `chunk` rows per fetch;
/// dropping it cancels the scan at the current chunk boundary.
pub struct ListIter<'conn> {
    conn: &'conn Connection,
    sql: String,
    keys: Vec<String>,
    include_docs: bool,
    conflicts: bool,
    chunk: usize,
    offset: i64,
    buffer: VecDeque<(String, String, Option<String>)>,
    current_id: Option<String>,
    done: bool,
}

impl<'conn> ListIter<'conn> {
    fn new(conn: &'conn Connection, opts: ListOptions) -> Self {
        // Conflicts are only meaningful when bodies are materialized.
        let conflicts = opts.conflicts && opts.include_docs;
        let chunk = if opts.chunk == 0 {
            DEFAULT_CHUNK
        } else {
            opts.chunk
        };
        let keys = opts.keys.unwrap_or_default();

        let mut sql = String::from(if opts.include_docs {
            "SELECT _id, _rev, body FROM documents WHERE leaf = 1 AND _deleted = 0"
        } else {
            "SELECT _id, _rev FROM documents WHERE leaf = 1 AND _deleted = 0"
        });
        if !keys.is_empty() {
            let bindings = vec!["?"; keys.len()].join(",");
            sql.push_str(&format!(" AND _id IN ({bindings})"));
        }
        // Grouping by id keeps each document's leaves adjacent so the
        // winner is always the first row of its group.
        sql.push_str(" ORDER BY _id, generation DESC, _rev DESC LIMIT ? OFFSET ?");

        ListIter {
            conn,
            sql,
            keys,
            include_docs: opts.include_docs,
            conflicts,
            chunk,
            offset: 0,
            buffer: VecDeque::new(),
            current_id: None,
            done: false,
        }
    }

    fn fetch(&mut self) -> Result<()> {
        let mut stmt = self.conn.prepare(&self.sql).map_err(db_err)?;

        let mut bind: Vec<rusqlite::types::Value> = self
            .keys
            .iter()
            .map(|k| rusqlite::types::Value::Text(k.clone()))
            .collect();
        bind.push(rusqlite::types::Value::Integer(self.chunk as i64));
        bind.push(rusqlite::types::Value::Integer(self.offset));

        let include_docs = self.include_docs;
        let rows = stmt
            .query_map(params_from_iter(bind), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    if include_docs {
                        Some(row.get::<_, String>(2)?)
                    } else {
                        None
                    },
                ))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        if rows.len() < self.chunk {
            self.done = true;
        }
        self.offset += rows.len() as i64;
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for ListIter<'_> {
    type Item = Result<ListRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((id, rev, body)) = self.buffer.pop_front() {
                if !self.conflicts {
                    // Winner only: the first row of each id group.
                    if self.current_id.as_deref() == Some(id.as_str()) {
                        continue;
                    }
                    self.current_id = Some(id.clone());
                }

                let doc = match body.map(|b| serde_json::from_str(&b)).transpose() {
                    Ok(doc) => doc,
                    Err(err) => {
                        self.done = true;
                        self.buffer.clear();
                        return Some(Err(err.into()));
                    }
                };
                return Some(Ok(ListRow { id, rev, doc }));
            }

            if self.done {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}
