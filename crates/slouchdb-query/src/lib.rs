//! Selector compiler: turns a declarative query AST (selector,
//! projection, sort) into one parameterized SQL statement over the
//! `documents` table.
//!
//! Field names are copied into the statement text only after validation
//! against a strict identifier allow-list; user values never are, they
//! travel as positional parameters. See [`FindQuery`] for the accepted
//! AST shape.

pub mod plan;
pub mod selector;

pub use plan::CompiledQuery;
pub use selector::{CompareOp, FindQuery, Predicate, SelectorValue, SortDirection};
