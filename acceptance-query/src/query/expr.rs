//! Filter expressions
//!
//! The residual filter compiles into a small expression tree that is evaluated
//! once per row of the joined table.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::table::Table;
use crate::types::{QueryError, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Every column name the expression reads
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_columns(&mut names);
        names
    }

    fn collect_columns<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Column(name) => {
                names.insert(name.as_str());
            }
            Expr::Literal(_) => {}
            Expr::List(items) => items.iter().for_each(|i| i.collect_columns(names)),
            Expr::Not(inner) | Expr::Negate(inner) => inner.collect_columns(names),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(names);
                right.collect_columns(names);
            }
        }
    }

    /// Indices of the rows for which the expression is truthy
    pub fn filter_rows(&self, table: &Table) -> Result<Vec<usize>> {
        for name in self.columns() {
            table.require(name)?;
        }

        let mut rows = Vec::new();
        for row in 0..table.num_rows() {
            if self.evaluate(table, row)?.is_truthy() {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Evaluate the expression against one row
    pub fn evaluate(&self, table: &Table, row: usize) -> Result<Value> {
        match self {
            Expr::Column(name) => table
                .value(row, name)
                .cloned()
                .ok_or_else(|| QueryError::ColumnNotFound(name.clone())),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(_) => Err(QueryError::Evaluation(
                "a list can only appear on the right of 'in'".to_string(),
            )),
            Expr::Not(inner) => Ok(Value::Bool(!inner.evaluate(table, row)?.is_truthy())),
            Expr::Negate(inner) => match inner.evaluate(table, row)? {
                Value::Null => Ok(Value::Null),
                Value::Int(v) => Ok(Value::Int(-v)),
                other => other.as_f64().map(|v| Value::Float(-v)).ok_or_else(|| {
                    QueryError::Evaluation(format!("cannot negate '{}'", other))
                }),
            },
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => Ok(Value::Bool(
                    left.evaluate(table, row)?.is_truthy() && right.evaluate(table, row)?.is_truthy(),
                )),
                BinaryOp::Or => Ok(Value::Bool(
                    left.evaluate(table, row)?.is_truthy() || right.evaluate(table, row)?.is_truthy(),
                )),
                BinaryOp::In | BinaryOp::NotIn => {
                    let needle = left.evaluate(table, row)?;
                    let found = match right.as_ref() {
                        Expr::List(items) => {
                            let mut found = false;
                            for item in items {
                                if needle.loose_eq(&item.evaluate(table, row)?) {
                                    found = true;
                                    break;
                                }
                            }
                            found
                        }
                        other => needle.loose_eq(&other.evaluate(table, row)?),
                    };
                    Ok(Value::Bool(found == (*op == BinaryOp::In)))
                }
                _ => {
                    let lhs = left.evaluate(table, row)?;
                    let rhs = right.evaluate(table, row)?;
                    apply_binary(*op, &lhs, &rhs)
                }
            },
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let ordering = |pred: fn(Ordering) -> bool| Value::Bool(lhs.loose_cmp(rhs).is_some_and(pred));

    let value = match op {
        BinaryOp::Eq => Value::Bool(lhs.loose_eq(rhs)),
        BinaryOp::NotEq => Value::Bool(!lhs.loose_eq(rhs)),
        BinaryOp::Lt => ordering(|o| o == Ordering::Less),
        BinaryOp::Le => ordering(|o| o != Ordering::Greater),
        BinaryOp::Gt => ordering(|o| o == Ordering::Greater),
        BinaryOp::Ge => ordering(|o| o != Ordering::Less),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, lhs, rhs)?
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::In | BinaryOp::NotIn => {
            return Err(QueryError::Evaluation(format!(
                "operator {:?} is not arithmetic",
                op
            )))
        }
    };
    Ok(value)
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }

    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        match op {
            BinaryOp::Add => return Ok(Value::Int(a.wrapping_add(*b))),
            BinaryOp::Sub => return Ok(Value::Int(a.wrapping_sub(*b))),
            BinaryOp::Mul => return Ok(Value::Int(a.wrapping_mul(*b))),
            BinaryOp::Mod if *b != 0 => return Ok(Value::Int(a.rem_euclid(*b))),
            _ => {}
        }
    }

    let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) if !matches!(lhs, Value::Text(_)) && !matches!(rhs, Value::Text(_)) => {
            (a, b)
        }
        _ => {
            return Err(QueryError::Evaluation(format!(
                "cannot apply {:?} to '{}' and '{}'",
                op, lhs, rhs
            )))
        }
    };

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a.rem_euclid(b),
        _ => f64::NAN,
    };
    Ok(Value::Float(result))
}
