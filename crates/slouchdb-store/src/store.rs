//! The write path: transactional revision-tree inserts.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde_json::{Map, Value};

use slouchdb_core::document::{Document, WriteResult};
use slouchdb_core::error::{Result, SlouchError};
use slouchdb_core::ident;

use crate::{db_err, schema};

const INSERT_DOCUMENT: &str = "INSERT INTO documents (_id, _rev, _deleted, generation, leaf, body)
     VALUES (?1, ?2, ?3, ?4, 1, json(?5))";
const FIND_PARENT: &str =
    "SELECT rowid, generation FROM documents WHERE _id = ?1 AND _rev = ?2 AND _deleted = 0";
const ANCESTRAL_IDENTITY: &str =
    "INSERT INTO ancestors (ancestor, descendant, depth) VALUES (?1, ?2, 0)";
const ANCESTRAL_CLOSURE: &str = "INSERT INTO ancestors (ancestor, descendant, depth)
     SELECT ancestor, ?1, depth + 1 FROM ancestors WHERE descendant = ?2";
const DEMOTE_PARENT: &str = "UPDATE documents SET leaf = 0 WHERE rowid = ?1";
const RECORD_CHANGE: &str = "INSERT INTO changes (doc_row, seq) VALUES (?1, ?2)";

/// A handle on one database file.
///
/// Holds a single connection; operations on a handle are serialized.
/// Writes take `&mut self` so that an outstanding streaming read (which
/// borrows `&self`) must be finished or dropped first.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = schema::connect(path.as_ref())?;
        Ok(Store { conn })
    }

    /// Open a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Store { conn })
    }

    /// Create the schema. Call once on a fresh database.
    pub fn setup(&self) -> Result<()> {
        schema::create_all(&self.conn)
    }

    /// Whether the schema already exists in this file.
    pub fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Write one document: a root if the body carries no `_rev`, otherwise
    /// a child of the `(_id, _rev)` revision named in the body.
    pub fn insert(&mut self, body: Value) -> Result<WriteResult> {
        let mut results = self.bulk(vec![body])?;
        Ok(results.remove(0))
    }

    /// Like [`insert`](Store::insert), but requires the body to name an
    /// existing document via `_id`.
    pub fn update(&mut self, body: Value) -> Result<WriteResult> {
        if body.get("_id").and_then(Value::as_str).is_none() {
            return Err(SlouchError::BadRequest("no _id given".into()));
        }
        self.insert(body)
    }

    /// Write a tombstone child of `(id, rev)`: empty body, `_deleted` set.
    /// The branch ends here; a tombstone cannot receive children.
    pub fn destroy(&mut self, id: &str, rev: &str) -> Result<WriteResult> {
        self.insert(serde_json::json!({
            "_id": id,
            "_rev": rev,
            "_deleted": true
        }))
    }

    /// Multi-document write in a single transaction.
    ///
    /// Every row written here shares one sequence token, so the whole
    /// batch occupies one position in the changes feed's resume order. Any
    /// conflict or malformed document rolls the entire transaction back.
    pub fn bulk(&mut self, docs: Vec<Value>) -> Result<Vec<WriteResult>> {
        let seq = ident::seq_token();
        let tx = self.conn.transaction().map_err(db_err)?;

        let mut results = Vec::with_capacity(docs.len());
        for body in docs {
            results.push(write_one(&tx, body, &seq)?);
        }

        tx.commit().map_err(db_err)?;
        Ok(results)
    }
}

/// Append one revision inside an open transaction.
fn write_one(tx: &Transaction<'_>, body: Value, seq: &str) -> Result<WriteResult> {
    let doc = Document::from_json(body)?;

    if doc.id.is_none() && doc.rev.is_some() {
        return Err(SlouchError::BadRequest("_rev given without _id".into()));
    }

    let docid = doc.id.clone().unwrap_or_else(ident::doc_id);

    // A parent must exist and must not be a tombstone; a deleted revision
    // cannot receive children. A parent rev that matches nothing, even
    // garbage that never was a revision id, is the same conflict.
    let mut generation: u64 = 1;
    let mut parent_row: Option<i64> = None;
    if let Some(parent_rev) = &doc.rev {
        let parent = tx
            .query_row(FIND_PARENT, params![docid, parent_rev], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, u64>(1)?))
            })
            .optional()
            .map_err(db_err)?;

        let (row, parent_generation) = parent.ok_or(SlouchError::Conflict)?;
        parent_row = Some(row);
        generation = parent_generation + 1;
    }

    // The digest covers the payload including `_deleted` but never
    // `_id`/`_rev`, which are merged in afterwards.
    let mut stored = match doc.data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if doc.deleted {
        stored.insert("_deleted".into(), Value::Bool(true));
    }
    let revid = ident::rev_id(generation, &stored);
    stored.insert("_id".into(), Value::String(docid.clone()));
    stored.insert("_rev".into(), Value::String(revid.clone()));
    let body_text = Value::Object(stored).to_string();

    let inserted = tx
        .execute(
            INSERT_DOCUMENT,
            params![
                docid,
                revid,
                doc.deleted as i64,
                generation as i64,
                body_text
            ],
        )
        .map_err(db_err)?;

    // The uniqueness constraint ignores a replayed (_id, _rev) pair; the
    // ancestry, leaf flags and changes log already describe that revision,
    // so the remaining steps are skipped and the write reports ok.
    if inserted == 0 {
        return Ok(WriteResult {
            ok: true,
            id: docid,
            rev: revid,
        });
    }

    let doc_row = tx.last_insert_rowid();

    tx.execute(ANCESTRAL_IDENTITY, params![doc_row, doc_row])
        .map_err(db_err)?;
    if let Some(parent_row) = parent_row {
        // Copy every ancestor edge of the parent down to the new child,
        // one level deeper; the parent's own self-edge becomes the direct
        // parent edge at depth 1.
        tx.execute(ANCESTRAL_CLOSURE, params![doc_row, parent_row])
            .map_err(db_err)?;
        tx.execute(DEMOTE_PARENT, params![parent_row])
            .map_err(db_err)?;
    }

    tx.execute(RECORD_CHANGE, params![doc_row, seq])
        .map_err(db_err)?;

    Ok(WriteResult {
        ok: true,
        id: docid,
        rev: revid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.setup().unwrap();
        store
    }

    fn count(store: &Store, sql: &str) -> i64 {
        store.conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn insert_root_document() {
        let mut store = fresh();
        let result = store
            .insert(serde_json::json!({"name": "stefan"}))
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.id.len(), 32);
        assert!(result.rev.starts_with("1-"));
    }

    #[test]
    fn rev_without_id_is_bad_request() {
        let mut store = fresh();
        let err = store
            .insert(serde_json::json!({"_rev": "1-deadbeef", "name": "x"}))
            .unwrap_err();
        assert!(matches!(err, SlouchError::BadRequest(_)));
    }

    #[test]
    fn update_requires_id() {
        let mut store = fresh();
        let err = store.update(serde_json::json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, SlouchError::BadRequest(_)));
    }

    #[test]
    fn child_of_missing_parent_is_conflict() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"name": "stefan"})).unwrap();
        let err = store
            .insert(serde_json::json!({
                "_id": r1.id,
                "_rev": "1-00000000000000000000000000000000",
                "name": "stefan astrup"
            }))
            .unwrap_err();
        assert!(matches!(err, SlouchError::Conflict));
    }

    #[test]
    fn tombstone_blocks_children() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"name": "bob"})).unwrap();
        let r2 = store.destroy(&r1.id, &r1.rev).unwrap();
        assert!(r2.rev.starts_with("2-"));

        let err = store
            .insert(serde_json::json!({
                "_id": r1.id,
                "_rev": r2.rev,
                "name": "resurrected"
            }))
            .unwrap_err();
        assert!(matches!(err, SlouchError::Conflict));
    }

    #[test]
    fn generation_increments_along_a_branch() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"v": 1})).unwrap();
        let r2 = store
            .insert(serde_json::json!({"_id": r1.id, "_rev": r1.rev, "v": 2}))
            .unwrap();
        let r3 = store
            .insert(serde_json::json!({"_id": r2.id, "_rev": r2.rev, "v": 3}))
            .unwrap();
        assert!(r2.rev.starts_with("2-"));
        assert!(r3.rev.starts_with("3-"));
    }

    #[test]
    fn closure_is_complete_along_a_chain() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"v": 1})).unwrap();
        let r2 = store
            .insert(serde_json::json!({"_id": r1.id, "_rev": r1.rev, "v": 2}))
            .unwrap();
        let _r3 = store
            .insert(serde_json::json!({"_id": r2.id, "_rev": r2.rev, "v": 3}))
            .unwrap();

        // Three self-edges, two direct edges, one grandparent edge.
        assert_eq!(count(&store, "SELECT COUNT(*) FROM ancestors"), 6);
        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM ancestors WHERE depth = 0"),
            3
        );
        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM ancestors WHERE depth = 1"),
            2
        );
        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM ancestors WHERE depth = 2"),
            1
        );
    }

    #[test]
    fn leaf_flags_track_children() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"v": 1})).unwrap();
        store
            .insert(serde_json::json!({"_id": r1.id, "_rev": r1.rev, "v": 2}))
            .unwrap();

        // A row is a leaf iff nothing descends from it at depth >= 1.
        let violations = count(
            &store,
            "SELECT COUNT(*) FROM documents d
             WHERE d.leaf = 1 AND EXISTS (
               SELECT 1 FROM ancestors a WHERE a.ancestor = d.rowid AND a.depth >= 1
             )",
        ) + count(
            &store,
            "SELECT COUNT(*) FROM documents d
             WHERE d.leaf = 0 AND NOT EXISTS (
               SELECT 1 FROM ancestors a WHERE a.ancestor = d.rowid AND a.depth >= 1
             )",
        );
        assert_eq!(violations, 0);
    }

    #[test]
    fn replay_is_idempotent() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"name": "stefan"})).unwrap();
        let r2 = store
            .insert(serde_json::json!({
                "_id": r1.id,
                "_rev": r1.rev,
                "name": "stefan astrup"
            }))
            .unwrap();

        let docs_before = count(&store, "SELECT COUNT(*) FROM documents");
        let edges_before = count(&store, "SELECT COUNT(*) FROM ancestors");
        let changes_before = count(&store, "SELECT COUNT(*) FROM changes");

        // Same parent, same payload: the same (_id, _rev) pair again.
        let replayed = store
            .insert(serde_json::json!({
                "_id": r1.id,
                "_rev": r1.rev,
                "name": "stefan astrup"
            }))
            .unwrap();
        assert_eq!(replayed.rev, r2.rev);

        assert_eq!(count(&store, "SELECT COUNT(*) FROM documents"), docs_before);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM ancestors"), edges_before);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM changes"), changes_before);
    }

    #[test]
    fn bulk_rolls_back_on_conflict() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"name": "a"})).unwrap();

        let docs_before = count(&store, "SELECT COUNT(*) FROM documents");
        let err = store
            .bulk(vec![
                serde_json::json!({"name": "b"}),
                serde_json::json!({"_id": r1.id, "_rev": "9-ffffffffffffffffffffffffffffffff", "name": "c"}),
            ])
            .unwrap_err();
        assert!(matches!(err, SlouchError::Conflict));

        // The good document in the batch must not have landed either.
        assert_eq!(count(&store, "SELECT COUNT(*) FROM documents"), docs_before);
    }

    #[test]
    fn bulk_shares_one_sequence_token() {
        let mut store = fresh();
        store
            .bulk(vec![
                serde_json::json!({"name": "adam"}),
                serde_json::json!({"name": "bob"}),
                serde_json::json!({"name": "charlie"}),
            ])
            .unwrap();

        assert_eq!(
            count(&store, "SELECT COUNT(DISTINCT seq) FROM changes"),
            1
        );
        assert_eq!(count(&store, "SELECT COUNT(*) FROM changes"), 3);
    }

    #[test]
    fn body_carries_merged_underscore_fields() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"name": "adam"})).unwrap();

        let body: String = store
            .conn
            .query_row(
                "SELECT body FROM documents WHERE _id = ?1",
                params![r1.id],
                |row| row.get(0),
            )
            .unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["_id"], r1.id.as_str());
        assert_eq!(value["_rev"], r1.rev.as_str());
        assert_eq!(value["name"], "adam");
    }
}
