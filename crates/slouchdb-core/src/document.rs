use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlouchError};

/// Default number of rows a streaming read pulls per fetch.
pub const DEFAULT_CHUNK: usize = 1000;

// ---------------------------------------------------------------------------
// Revision
// ---------------------------------------------------------------------------

/// A revision identifier: `{pos}-{hash}`.
///
/// - `pos` is the generation number (starts at 1, increments each edit).
/// - `hash` is a 32-character hex digest of the canonical body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub pos: u64,
    pub hash: String,
}

impl Revision {
    pub fn new(pos: u64, hash: String) -> Self {
        Self { pos, hash }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pos, self.hash)
    }
}

impl FromStr for Revision {
    type Err = SlouchError;

    fn from_str(s: &str) -> Result<Self> {
        let (pos_str, hash) = s
            .split_once('-')
            .ok_or_else(|| SlouchError::InvalidRev(s.to_string()))?;
        let pos: u64 = pos_str
            .parse()
            .map_err(|_| SlouchError::InvalidRev(s.to_string()))?;
        Ok(Revision {
            pos,
            hash: hash.to_string(),
        })
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pos
            .cmp(&other.pos)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A document as seen by the write path: the user payload with the
/// underscore fields split out.
///
/// The parent `_rev` is kept as the raw string: the write path matches it
/// against stored revisions by equality, so a malformed value simply
/// fails to find its parent and surfaces as a conflict.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Option<String>,
    pub rev: Option<String>,
    pub deleted: bool,
    pub data: serde_json::Value,
}

impl Document {
    /// Split a JSON body into a `Document`.
    ///
    /// Extracts `_id`, `_rev`, and `_deleted` from the value and leaves the
    /// remaining fields in `data`. The body must be a JSON object.
    pub fn from_json(mut value: serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object_mut()
            .ok_or_else(|| SlouchError::BadRequest("document must be a JSON object".into()))?;

        let id = obj.remove("_id").and_then(|v| v.as_str().map(String::from));

        let rev = obj.remove("_rev").and_then(|v| v.as_str().map(String::from));

        let deleted = obj
            .remove("_deleted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Document {
            id,
            rev,
            deleted,
            data: value,
        })
    }

    /// Merge the underscore fields back into the payload, producing the body
    /// that is persisted.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = match &self.data {
            serde_json::Value::Object(m) => m.clone(),
            _ => serde_json::Map::new(),
        };

        if let Some(id) = &self.id {
            obj.insert("_id".into(), serde_json::Value::String(id.clone()));
        }
        if let Some(rev) = &self.rev {
            obj.insert("_rev".into(), serde_json::Value::String(rev.clone()));
        }
        if self.deleted {
            obj.insert("_deleted".into(), serde_json::Value::Bool(true));
        }

        serde_json::Value::Object(obj)
    }
}

// ---------------------------------------------------------------------------
// Write results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Materialize the full body into each row.
    pub include_docs: bool,
    /// Emit every live leaf instead of only the winner per id.
    /// Ignored unless `include_docs` is set.
    pub conflicts: bool,
    /// Restrict to the given document ids.
    pub keys: Option<Vec<String>>,
    /// Rows pulled per fetch.
    pub chunk: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            include_docs: false,
            conflicts: false,
            keys: None,
            chunk: DEFAULT_CHUNK,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub rev: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ChangesOptions {
    /// Opaque sequence token to resume after. `None` replays the whole feed.
    pub since: Option<String>,
    /// Rows pulled per fetch. Zero falls back to the default.
    pub chunk: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRow {
    pub seq: String,
    pub id: String,
    pub rev: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

// ---------------------------------------------------------------------------
// Open revisions
// ---------------------------------------------------------------------------

/// One open branch tip, as returned by `open_revs`: the leaf body with a
/// `_revisions` ancestry annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRev {
    pub ok: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
