//! Parsing the selector AST into tagged variants and flattening nested
//! paths into dotted predicates.

use serde_json::{Map, Value};

use slouchdb_core::error::{Result, SlouchError};

// ---------------------------------------------------------------------------
// Comparison operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    /// Map a `$`-prefixed operator key. Anything unknown is rejected.
    pub fn parse(op: &str) -> Result<Self> {
        Ok(match op {
            "$eq" => CompareOp::Eq,
            "$ne" => CompareOp::Ne,
            "$lt" => CompareOp::Lt,
            "$lte" => CompareOp::Lte,
            "$gt" => CompareOp::Gt,
            "$gte" => CompareOp::Gte,
            _ => {
                return Err(SlouchError::BadSelector(format!(
                    "unknown operator: {op}"
                )));
            }
        })
    }

    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

// ---------------------------------------------------------------------------
// Selector values
// ---------------------------------------------------------------------------

/// One selector entry, as a tagged variant rather than runtime type
/// sniffing: a scalar to match, a map of operators, or a nested object
/// to flatten into dotted paths.
#[derive(Debug, Clone)]
pub enum SelectorValue {
    Scalar(Value),
    Operators(Vec<(CompareOp, Value)>),
    Nested(Vec<(String, SelectorValue)>),
}

impl SelectorValue {
    pub fn parse(value: Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => return Ok(SelectorValue::Scalar(other)),
        };

        let has_operators = map.keys().any(|k| k.starts_with('$'));
        let has_fields = map.keys().any(|k| !k.starts_with('$'));

        if has_operators && has_fields {
            return Err(SlouchError::BadSelector(
                "operators and fields cannot mix at one level".into(),
            ));
        }

        if has_operators {
            let mut operators = Vec::with_capacity(map.len());
            for (key, value) in map {
                operators.push((CompareOp::parse(&key)?, value));
            }
            Ok(SelectorValue::Operators(operators))
        } else if has_fields {
            let mut entries = Vec::with_capacity(map.len());
            for (key, value) in map {
                entries.push((key, SelectorValue::parse(value)?));
            }
            Ok(SelectorValue::Nested(entries))
        } else {
            // An empty object matches an empty object.
            Ok(SelectorValue::Scalar(Value::Object(Map::new())))
        }
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// A flattened comparison: dotted path, operator, bound value.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub path: String,
    pub op: CompareOp,
    pub value: Value,
}

/// Depth-first flattening of a selector entry: `a.b.c → leaf`. A scalar
/// becomes an equality; an operator map becomes one predicate per
/// operator applied to the path so far.
pub fn flatten(path: &str, value: &SelectorValue, out: &mut Vec<Predicate>) {
    match value {
        SelectorValue::Scalar(v) => out.push(Predicate {
            path: path.to_string(),
            op: CompareOp::Eq,
            value: v.clone(),
        }),
        SelectorValue::Operators(operators) => {
            for (op, v) in operators {
                out.push(Predicate {
                    path: path.to_string(),
                    op: *op,
                    value: v.clone(),
                });
            }
        }
        SelectorValue::Nested(entries) => {
            for (key, sub) in entries {
                flatten(&format!("{path}.{key}"), sub, out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(direction: &str) -> Result<Self> {
        match direction.to_uppercase().as_str() {
            "ASC" => Ok(SortDirection::Asc),
            "DESC" => Ok(SortDirection::Desc),
            other => Err(SlouchError::BadSelector(format!(
                "invalid sort direction: {other}"
            ))),
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

// ---------------------------------------------------------------------------
// The query AST
// ---------------------------------------------------------------------------

/// A parsed find query:
///
/// ```json
/// { "selector": { "year": 2010, "rating": { "imdb": { "$gt": 6 } } },
///   "fields":   ["_id", "_rev", "year"],
///   "sort":     [{ "year": "asc" }] }
/// ```
#[derive(Debug, Clone)]
pub struct FindQuery {
    pub predicates: Vec<Predicate>,
    pub fields: Vec<String>,
    pub sort: Vec<(String, SortDirection)>,
}

impl FindQuery {
    pub fn from_json(query: Value) -> Result<Self> {
        let mut query = match query {
            Value::Object(map) => map,
            _ => {
                return Err(SlouchError::BadSelector(
                    "query must be a JSON object".into(),
                ));
            }
        };

        let selector = match query.remove("selector") {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(SlouchError::BadSelector(
                    "selector must be a JSON object".into(),
                ));
            }
            None => return Err(SlouchError::BadSelector("missing selector".into())),
        };

        let fields = match query.remove("fields") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(SlouchError::BadSelector("fields must be strings".into())),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(SlouchError::BadSelector("fields must be an array".into()));
            }
            None => return Err(SlouchError::BadSelector("missing fields".into())),
        };

        let mut predicates = Vec::new();
        for (field, value) in selector {
            if field.starts_with('$') {
                return Err(SlouchError::BadSelector(format!(
                    "operator {field} without a field"
                )));
            }
            let parsed = SelectorValue::parse(value)?;
            flatten(&field, &parsed, &mut predicates);
        }

        let mut sort = Vec::new();
        if let Some(value) = query.remove("sort") {
            let entries = match value {
                Value::Array(items) => items,
                _ => return Err(SlouchError::BadSelector("sort must be an array".into())),
            };
            for entry in entries {
                let map = match entry {
                    Value::Object(map) => map,
                    _ => {
                        return Err(SlouchError::BadSelector(
                            "sort entries must be objects".into(),
                        ));
                    }
                };
                for (field, direction) in map {
                    let direction = direction.as_str().ok_or_else(|| {
                        SlouchError::BadSelector("sort direction must be a string".into())
                    })?;
                    sort.push((field, SortDirection::parse(direction)?));
                }
            }
        }

        Ok(FindQuery {
            predicates,
            fields,
            sort,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
