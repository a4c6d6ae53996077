//! SQL assembly: projection, predicates, ordering.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use slouchdb_core::error::{Result, SlouchError};

use crate::selector::FindQuery;

/// A compiled statement plus its positional parameters, ready for the
/// storage layer to execute.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// The identifier allow-list: dotted chains of `[A-Za-z_][A-Za-z0-9_]*`
/// segments. Everything else is rejected before it can reach the
/// statement text.
fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("field name pattern")
    })
}

fn validate_field(name: &str) -> Result<()> {
    if field_pattern().is_match(name) {
        Ok(())
    } else {
        Err(SlouchError::BadSelector(format!(
            "invalid field name: {name}"
        )))
    }
}

/// Alias for a projected field; dotted paths need identifier quoting.
fn alias(field: &str) -> String {
    if field.contains('.') {
        format!("\"{field}\"")
    } else {
        field.to_string()
    }
}

/// The expression a field is referenced by in WHERE and ORDER BY:
/// `_id`/`_rev` are raw columns, a projected field goes by its alias,
/// anything else is extracted from the body on the spot.
fn column_expr(field: &str, projected: &[String]) -> String {
    if field == "_id" || field == "_rev" {
        field.to_string()
    } else if projected.iter().any(|f| f == field) {
        alias(field)
    } else {
        format!("json_extract(body, '$.{field}')")
    }
}

impl FindQuery {
    /// Assemble `SELECT {fields} FROM documents [WHERE …] [ORDER BY …]`.
    ///
    /// Every field name in the query is validated against the identifier
    /// allow-list first; user values only ever appear as parameters.
    pub fn compile(&self) -> Result<CompiledQuery> {
        if self.fields.is_empty() {
            return Err(SlouchError::BadSelector(
                "fields must name at least one column".into(),
            ));
        }

        let mut projection = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            validate_field(field)?;
            if field == "_id" || field == "_rev" {
                projection.push(field.clone());
            } else {
                projection.push(format!(
                    "json_extract(body, '$.{field}') AS {}",
                    alias(field)
                ));
            }
        }

        let mut terms = Vec::with_capacity(self.predicates.len());
        let mut params = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            validate_field(&predicate.path)?;
            terms.push(format!(
                "{} {} ?",
                column_expr(&predicate.path, &self.fields),
                predicate.op.sql()
            ));
            params.push(predicate.value.clone());
        }

        let mut order = Vec::with_capacity(self.sort.len());
        for (field, direction) in &self.sort {
            validate_field(field)?;
            order.push(format!(
                "{} {}",
                column_expr(field, &self.fields),
                direction.sql()
            ));
        }

        let mut sql = format!("SELECT {} FROM documents", projection.join(", "));
        if !terms.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&terms.join(" AND "));
        }
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        log::debug!("compiled find: {sql}");

        Ok(CompiledQuery { sql, params })
    }
}
