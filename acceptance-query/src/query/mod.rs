//! Acceptance queries
//!
//! A query has the shape `<reduction>(<column> | <filter>) <op> <threshold>`,
//! for example `count(AgentId | Velocity > 30 and #(Collision) == True) = 0`.
//! The filter may reference events (`#(name)`, `#(name):key`) and time-shifted
//! columns (`Velocity-2`); [`parse`] rewrites those references to concrete
//! column names and compiles the filter into an [`Expr`].

pub mod aggregate;
pub mod expr;
pub mod lexer;
pub mod parser;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use aggregate::Aggregate;
pub use expr::{BinaryOp, Expr};
pub use parser::parse;

/// Relative tolerance of the `~=` operator
pub const APPROX_RELATIVE_TOLERANCE: f64 = 1e-6;

/// A parsed acceptance query; immutable and reusable across runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    /// Query text as written
    pub raw_text: String,
    /// Query text with event and shift references replaced by column names
    pub rewritten_text: String,
    /// Filter part of `rewritten_text` (empty when the query has no filter)
    pub residual_filter: String,
    /// Compiled filter
    #[serde(skip)]
    pub filter: Option<Expr>,
    /// Referenced events and the parameter keys read from each
    pub referenced_events: BTreeMap<String, BTreeSet<String>>,
    /// Time-shifted columns to materialize, in order of first appearance
    pub shifted_columns: Vec<ShiftedColumn>,
    pub reduction: Reduction,
    pub operator: ComparisonOperator,
    /// Threshold compared against the reduction result
    pub value: f64,
}

impl Query {
    /// Parse a query string; see [`parser::parse`]
    pub fn new(raw: &str) -> crate::Result<Self> {
        parse(raw)
    }

    /// Compare a reduction result against the threshold
    pub fn accepts(&self, result: f64) -> bool {
        self.operator.compare(result, self.value)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rewritten_text)
    }
}

/// A request to materialize `name[row] = source[row + shift]` per agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftedColumn {
    /// Generated column name, `<source>_prev<digits>`
    pub name: String,
    pub source: String,
    pub shift: usize,
}

/// Aggregate applied to the filtered rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reduction {
    pub function: Aggregate,
    pub column: String,
}

/// Final comparison between reduction result and threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    /// Approximately equal, within [`APPROX_RELATIVE_TOLERANCE`] of the threshold
    #[serde(rename = "~=")]
    Approx,
}

impl ComparisonOperator {
    /// A NaN result (an empty `mean`, `max`, ...) fails every operator, `!=` included
    pub fn compare(&self, result: f64, threshold: f64) -> bool {
        if result.is_nan() {
            return false;
        }
        match self {
            ComparisonOperator::Eq => result == threshold,
            ComparisonOperator::NotEq => result != threshold,
            ComparisonOperator::Lt => result < threshold,
            ComparisonOperator::Le => result <= threshold,
            ComparisonOperator::Gt => result > threshold,
            ComparisonOperator::Ge => result >= threshold,
            ComparisonOperator::Approx => approx_eq(result, threshold),
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::NotEq => "!=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Le => "<=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Ge => ">=",
            ComparisonOperator::Approx => "~=",
        };
        write!(f, "{}", op)
    }
}

/// Relative closeness: the band scales with the threshold and collapses at zero.
///
/// Bounds are inclusive and widened by a few ulps, so a result sitting exactly
/// on the nominal band edge (100.0001 against 100) still counts as equal.
pub fn approx_eq(result: f64, threshold: f64) -> bool {
    let band = threshold.abs() * (APPROX_RELATIVE_TOLERANCE + 4.0 * f64::EPSILON);
    (result - threshold).abs() <= band
}
