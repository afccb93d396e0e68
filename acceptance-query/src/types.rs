//! Core types for the acceptance-query library
//!
//! This module defines the error taxonomy and the cell values that flow through
//! the reshaper, the event table and the query executor.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Result type for acceptance-query operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// Errors that can occur while parsing or evaluating an acceptance query
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The query text does not match the aggregate/comparison grammar.
    #[error("Malformed query at position {position}: {message}")]
    MalformedQuery { position: usize, message: String },

    #[error("Query evaluation failed: {0}")]
    Evaluation(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl QueryError {
    pub(crate) fn malformed(position: usize, message: impl Into<String>) -> Self {
        QueryError::MalformedQuery {
            position,
            message: message.into(),
        }
    }

    /// True for errors that fail a single run's verdict rather than the query itself
    pub fn is_evaluation_error(&self) -> bool {
        matches!(
            self,
            QueryError::Evaluation(_) | QueryError::ColumnNotFound(_)
        )
    }
}

/// Declared or inferred type of a table column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    #[serde(alias = "string", alias = "str")]
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => write!(f, "int"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Bool => write!(f, "bool"),
            ColumnType::Text => write!(f, "text"),
        }
    }
}

/// A single table cell
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value (empty CSV cell, unmatched join row, shift boundary)
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used by arithmetic, ordering and reductions.
    ///
    /// Text participates when it looks like a number, so event parameter
    /// values (always stored as text) can be compared against numeric literals.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(v) => v.trim().parse::<f64>().ok(),
        }
    }

    /// Truthiness of a filter result
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0 && !v.is_nan(),
            Value::Text(v) => !v.is_empty(),
        }
    }

    fn as_bool_text(&self) -> Option<bool> {
        match self {
            Value::Text(v) => parse_bool(v),
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Equality with the loose coercions the filter language allows
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Text(_), Value::Bool(_)) | (Value::Bool(_), Value::Text(_)) => {
                self.as_bool_text() == other.as_bool_text() && self.as_bool_text().is_some()
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Ordering used by `<`, `<=`, `>`, `>=`; `None` when not comparable
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

/// Parse Python/CSV style boolean spellings
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}
