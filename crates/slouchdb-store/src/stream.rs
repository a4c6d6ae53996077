//! Chunked execution of compiled selector queries.
//!
//! The selector compiler produces a parameterized `SELECT` and a list of
//! JSON values to bind; this module runs it against the handle's
//! connection and streams each result row as a mapping of the projected
//! fields.

use std::collections::VecDeque;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, params_from_iter};
use serde_json::{Map, Value};

use slouchdb_core::document::DEFAULT_CHUNK;
use slouchdb_core::error::Result;

use crate::db_err;
use crate::store::Store;

impl Store {
    /// Run a compiled, parameterized query and stream its rows in chunks.
    ///
    /// User values travel only through `params`; the statement text is
    /// produced by the compiler from validated field names.
    pub fn query_rows(&self, sql: &str, params: Vec<Value>, chunk: usize) -> QueryRows<'_> {
        QueryRows::new(&self.conn, sql, params, chunk)
    }
}

/// Streaming cursor over an arbitrary projected query. Pagination is
/// appended to the compiled statement, so each fetch re-binds the same
/// parameters plus the window.
#[derive(Debug)]
pub struct QueryRows<'conn> {
    conn: &'conn Connection,
    sql: String,
    params: Vec<rusqlite::types::Value>,
    chunk: usize,
    offset: i64,
    buffer: VecDeque<Map<String, Value>>,
    done: bool,
}

impl<'conn> QueryRows<'conn> {
    pub(crate) fn new(
        conn: &'conn Connection,
        sql: &str,
        params: Vec<Value>,
        chunk: usize,
    ) -> Self {
        let chunk = if chunk == 0 { DEFAULT_CHUNK } else { chunk };
        QueryRows {
            conn,
            sql: format!("{sql} LIMIT ? OFFSET ?"),
            params: params.iter().map(bind_value).collect(),
            chunk,
            offset: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn fetch(&mut self) -> Result<()> {
        let mut stmt = self.conn.prepare(&self.sql).map_err(db_err)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut bind = self.params.clone();
        bind.push(rusqlite::types::Value::Integer(self.chunk as i64));
        bind.push(rusqlite::types::Value::Integer(self.offset));

        let mut rows = stmt.query(params_from_iter(bind)).map_err(db_err)?;
        let mut fetched = 0;
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut record = Map::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(db_err)?;
                record.insert(column.clone(), column_to_json(value));
            }
            self.buffer.push_back(record);
            fetched += 1;
        }

        if fetched < self.chunk {
            self.done = true;
        }
        self.offset += fetched as i64;
        Ok(())
    }
}

impl Iterator for QueryRows<'_> {
    type Item = Result<Map<String, Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
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

/// Convert a JSON parameter into the engine's native binding.
///
/// Scalars map onto the storage classes `json_extract` yields for the
/// matching JSON types (booleans become 0/1); arrays and objects are bound
/// as their compact JSON text.
fn bind_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

/// Convert an engine column value back into JSON.
fn column_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}
