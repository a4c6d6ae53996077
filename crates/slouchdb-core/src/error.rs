use thiserror::Error;

/// All errors that SlouchDB can produce.
#[derive(Debug, Error)]
pub enum SlouchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: document update conflict")]
    Conflict,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad selector: {0}")]
    BadSelector(String),

    #[error("invalid revision format: {0}")]
    InvalidRev(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SlouchError {
    /// CouchDB-style structured error payload: `{error, reason}`.
    pub fn payload(&self) -> serde_json::Value {
        let (error, reason) = match self {
            SlouchError::NotFound(_) => ("not_found", "missing".to_string()),
            SlouchError::Conflict => ("conflict", "Document update conflict.".to_string()),
            SlouchError::BadRequest(r) => ("bad_request", r.clone()),
            SlouchError::BadSelector(r) => ("bad_selector", r.clone()),
            SlouchError::InvalidRev(r) => ("bad_request", format!("invalid revision: {r}")),
            SlouchError::Storage(r) => ("storage_error", r.clone()),
            SlouchError::Json(e) => ("bad_request", e.to_string()),
        };
        serde_json::json!({ "error": error, "reason": reason })
    }
}

pub type Result<T> = std::result::Result<T, SlouchError>;
