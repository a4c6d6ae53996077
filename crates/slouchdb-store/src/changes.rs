//! Incremental changes feed.
//!
//! Every write transaction tags the rows it produces with one shared
//! sequence token; the feed replays document rows in row-identity order,
//! which equals insertion order within and across transactions. Passing a
//! previously observed token resumes strictly after the first row of the
//! batch that token identifies.

use std::collections::VecDeque;

use rusqlite::{Connection, params};

use slouchdb_core::document::{ChangeRow, ChangesOptions, DEFAULT_CHUNK};
use slouchdb_core::error::Result;

use crate::db_err;
use crate::store::Store;

const RESUME_BOUNDARY: &str = "SELECT MIN(doc_row) FROM changes WHERE seq = ?1";
const FETCH_CHANGES: &str = "SELECT seq, doc_row, _deleted, _id, _rev FROM changes_feed
     WHERE doc_row > ?1 ORDER BY doc_row LIMIT ?2";

impl Store {
    /// Stream the changes feed, optionally resuming after a sequence token.
    ///
    /// An unknown token yields an empty stream.
    pub fn changes(&self, opts: ChangesOptions) -> Result<ChangesIter<'_>> {
        let chunk = if opts.chunk == 0 {
            DEFAULT_CHUNK
        } else {
            opts.chunk
        };

        let mut done = false;
        let mut last_row = 0;
        if let Some(token) = &opts.since {
            let boundary: Option<i64> = self
                .conn
                .query_row(RESUME_BOUNDARY, params![token], |row| row.get(0))
                .map_err(db_err)?;
            match boundary {
                Some(row) => last_row = row,
                None => done = true,
            }
        }

        Ok(ChangesIter {
            conn: &self.conn,
            last_row,
            chunk,
            buffer: VecDeque::new(),
            done,
        })
    }
}

/// Streaming cursor over the changes feed. Pulls `chunk` rows per fetch,
/// strictly forward; dropping it cancels at the current chunk boundary.
pub struct ChangesIter<'conn> {
    conn: &'conn Connection,
    last_row: i64,
    chunk: usize,
    buffer: VecDeque<ChangeRow>,
    done: bool,
}

impl ChangesIter<'_> {
    fn fetch(&mut self) -> Result<()> {
        let mut stmt = self.conn.prepare(FETCH_CHANGES).map_err(db_err)?;
        let rows = stmt
            .query_map(params![self.last_row, self.chunk as i64], |row| {
                let entry = ChangeRow {
                    seq: row.get(0)?,
                    id: row.get(3)?,
                    rev: row.get(4)?,
                    deleted: row.get::<_, i64>(2)? == 1,
                };
                Ok((row.get::<_, i64>(1)?, entry))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        if rows.len() < self.chunk {
            self.done = true;
        }
        for (doc_row, entry) in rows {
            self.last_row = doc_row;
            self.buffer.push_back(entry);
        }
        Ok(())
    }
}

impl Iterator for ChangesIter<'_> {
    type Item = Result<ChangeRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
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

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.setup().unwrap();
        store
    }

    fn collect(store: &Store, opts: ChangesOptions) -> Vec<ChangeRow> {
        store
            .changes(opts)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn feed_replays_every_write_in_order() {
        let mut store = fresh();
        let mut ids = Vec::new();
        for i in 0..5 {
            let r = store.insert(serde_json::json!({"i": i})).unwrap();
            ids.push(r.id);
        }

        let entries = collect(&store, ChangesOptions::default());
        assert_eq!(entries.len(), 5);
        let seen: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(seen, ids.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn resume_after_token() {
        let mut store = fresh();
        for i in 0..5 {
            store.insert(serde_json::json!({"i": i})).unwrap();
        }

        let all = collect(&store, ChangesOptions::default());
        let bookmark = all[2].seq.clone();

        let resumed = collect(
            &store,
            ChangesOptions {
                since: Some(bookmark),
                ..Default::default()
            },
        );
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed[0].id, all[3].id);
        assert_eq!(resumed[1].id, all[4].id);
    }

    #[test]
    fn resume_from_unknown_token_is_empty() {
        let mut store = fresh();
        store.insert(serde_json::json!({"v": 1})).unwrap();

        let resumed = collect(
            &store,
            ChangesOptions {
                since: Some("ffffffffffffffffffffffffffffffff".into()),
                ..Default::default()
            },
        );
        assert!(resumed.is_empty());
    }

    #[test]
    fn deletions_are_flagged() {
        let mut store = fresh();
        let r1 = store.insert(serde_json::json!({"name": "bob"})).unwrap();
        store.destroy(&r1.id, &r1.rev).unwrap();

        let entries = collect(&store, ChangesOptions::default());
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].deleted);
        assert!(entries[1].deleted);
    }

    #[test]
    fn chunked_pull_covers_the_whole_feed() {
        let mut store = fresh();
        for i in 0..5 {
            store.insert(serde_json::json!({"i": i})).unwrap();
        }

        let entries = collect(
            &store,
            ChangesOptions {
                chunk: 2,
                ..Default::default()
            },
        );
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn bulk_batch_shares_a_seq_and_resumes_past_it() {
        let mut store = fresh();
        store.insert(serde_json::json!({"a": 1})).unwrap();
        store
            .bulk(vec![
                serde_json::json!({"b": 1}),
                serde_json::json!({"b": 2}),
            ])
            .unwrap();
        store.insert(serde_json::json!({"c": 1})).unwrap();

        let all = collect(&store, ChangesOptions::default());
        assert_eq!(all.len(), 4);
        assert_eq!(all[1].seq, all[2].seq);

        // Resuming from the batch token lands just after its first row.
        let resumed = collect(
            &store,
            ChangesOptions {
                since: Some(all[1].seq.clone()),
                ..Default::default()
            },
        );
        assert_eq!(resumed.len(), 2);
    }
}
