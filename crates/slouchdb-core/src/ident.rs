//! Identity generation: document ids, sequence tokens, and revision ids.
//!
//! Revision ids have the form `{generation}-{digest}` where the digest is a
//! 128-bit MD5 over a canonical serialization of the body with `_id` and
//! `_rev` removed. The canonical form is JSON with object keys sorted by
//! byte value, no whitespace, and lowercase `true`/`false`/`null`, so the
//! key order of the incoming body never affects the digest.

use md5::{Digest, Md5};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A fresh document id: 32 hex characters from a uniform source.
pub fn doc_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A fresh sequence token, shared by every row a transaction writes.
pub fn seq_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Compute the revision id for `body` at the given generation.
///
/// `_id` and `_rev` never participate in the digest; `_deleted` does, so a
/// tombstone hashes differently from an empty document.
pub fn rev_id(generation: u64, body: &Map<String, Value>) -> String {
    let mut content = body.clone();
    content.remove("_id");
    content.remove("_rev");

    let canonical = canonicalize(&Value::Object(content)).to_string();
    let digest = Md5::digest(canonical.as_bytes());
    format!("{}-{:x}", generation, digest)
}

/// Rebuild a value with every object's keys in sorted order. Serializing
/// the result with the compact writer yields the canonical form.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
