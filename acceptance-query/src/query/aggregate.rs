//! Reduction functions applied to the filtered rows

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::types::{QueryError, Result, Value};

/// Supported reductions, named like their pandas counterparts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    /// Number of non-null cells
    Count,
    Sum,
    Mean,
    Median,
    Min,
    Max,
    /// Sample standard deviation (ddof = 1)
    Std,
    /// Sample variance (ddof = 1)
    Var,
    /// Number of distinct non-null cells
    NUnique,
}

impl Aggregate {
    /// Look up a reduction by its query name
    pub fn from_name(name: &str) -> Option<Self> {
        let aggregate = match name {
            "count" => Aggregate::Count,
            "sum" => Aggregate::Sum,
            "mean" => Aggregate::Mean,
            "median" => Aggregate::Median,
            "min" => Aggregate::Min,
            "max" => Aggregate::Max,
            "std" => Aggregate::Std,
            "var" => Aggregate::Var,
            "nunique" => Aggregate::NUnique,
            _ => return None,
        };
        Some(aggregate)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Mean => "mean",
            Aggregate::Median => "median",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Std => "std",
            Aggregate::Var => "var",
            Aggregate::NUnique => "nunique",
        }
    }

    /// Reduce a column to a scalar. Nulls are skipped; empty input yields
    /// 0 for `count`, `sum` and `nunique` and NaN otherwise.
    pub fn apply<'a, I>(&self, values: I) -> Result<f64>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let present: Vec<&Value> = values.into_iter().filter(|v| !v.is_null()).collect();

        match self {
            Aggregate::Count => return Ok(present.len() as f64),
            Aggregate::NUnique => {
                let distinct: HashSet<String> = present
                    .iter()
                    .map(|v| match v.as_f64() {
                        Some(n) if !matches!(v, Value::Text(_)) => format!("n:{}", n),
                        _ => format!("s:{}", v),
                    })
                    .collect();
                return Ok(distinct.len() as f64);
            }
            _ => {}
        }

        let mut numbers = present
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    QueryError::Evaluation(format!(
                        "{} requires numeric values, found '{}'",
                        self.name(),
                        v
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        if numbers.is_empty() {
            return Ok(if *self == Aggregate::Sum { 0.0 } else { f64::NAN });
        }

        let n = numbers.len() as f64;
        let result = match self {
            Aggregate::Sum => numbers.iter().sum(),
            Aggregate::Mean => numbers.iter().sum::<f64>() / n,
            Aggregate::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregate::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregate::Median => {
                numbers.sort_by(|a, b| a.total_cmp(b));
                let mid = numbers.len() / 2;
                if numbers.len() % 2 == 0 {
                    (numbers[mid - 1] + numbers[mid]) / 2.0
                } else {
                    numbers[mid]
                }
            }
            Aggregate::Std | Aggregate::Var => {
                if numbers.len() < 2 {
                    f64::NAN
                } else {
                    let mean = numbers.iter().sum::<f64>() / n;
                    let var = numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
                    if *self == Aggregate::Std {
                        var.sqrt()
                    } else {
                        var
                    }
                }
            }
            Aggregate::Count | Aggregate::NUnique => unreachable!("handled above"),
        };
        Ok(result)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
