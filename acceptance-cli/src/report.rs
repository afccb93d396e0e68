//! Success-rate record shared with the report generator
//!
//! `rates.csv` holds a header line and a single value line:
//!
//! ```text
//! expected;actual;failed_runs
//! 0.9;0.8;[1, 3]
//! ```
//!
//! Floats and the id list are rendered the way the report side expects them
//! (`1.0`, `[]`, `[1, 3]`) and the file has no trailing newline. The expected
//! rate keeps the form it was configured with, so `1` stays `1`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// File name of the record inside a scope's result directory
pub const RATES_FILE: &str = "rates.csv";

const HEADER: &str = "expected;actual;failed_runs";

/// Configured success rate, as an integer or a float literal
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SuccessRate {
    Int(i64),
    Float(f64),
}

impl SuccessRate {
    pub fn value(self) -> f64 {
        match self {
            SuccessRate::Int(v) => v as f64,
            SuccessRate::Float(v) => v,
        }
    }
}

impl fmt::Display for SuccessRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessRate::Int(v) => write!(f, "{}", v),
            SuccessRate::Float(v) => write!(f, "{}", format_float(*v)),
        }
    }
}

impl std::str::FromStr for SuccessRate {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.parse::<i64>() {
            Ok(v) => Ok(SuccessRate::Int(v)),
            Err(_) => s.parse::<f64>().map(SuccessRate::Float),
        }
    }
}

/// Expected and actual success rate of one scope, with the failed run ids
#[derive(Debug, Clone, PartialEq)]
pub struct RateRecord {
    pub expected: SuccessRate,
    pub actual: f64,
    pub failed_runs: Vec<usize>,
}

impl RateRecord {
    /// Compute the actual rate from the failed runs of `invocations` runs
    pub fn from_runs(
        expected: SuccessRate,
        invocations: usize,
        mut failed_runs: Vec<usize>,
    ) -> Self {
        failed_runs.sort_unstable();
        let actual = if invocations == 0 {
            0.0
        } else {
            (invocations - failed_runs.len()) as f64 / invocations as f64
        };
        Self {
            expected,
            actual,
            failed_runs,
        }
    }

    pub fn passed(&self) -> bool {
        self.actual >= self.expected.value()
    }

    /// Render the record exactly as written to `rates.csv`
    pub fn render(&self) -> String {
        let ids: Vec<String> = self.failed_runs.iter().map(|id| id.to_string()).collect();
        format!(
            "{}\n{};{};[{}]",
            HEADER,
            self.expected,
            format_float(self.actual),
            ids.join(", ")
        )
    }

    /// Write the record, creating the parent directory if needed
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        fs::write(path, self.render())
            .with_context(|| format!("Failed to write rates file: {:?}", path))?;
        log::info!("Wrote {:?}", path);
        Ok(())
    }

    /// Parse a record written by [`RateRecord::render`]
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        match lines.next() {
            Some(header) if header.trim() == HEADER => {}
            other => bail!("Unexpected rates header: {:?}", other),
        }
        let values = lines.next().context("Missing rates value line")?;

        let fields: Vec<&str> = values.splitn(3, ';').collect();
        let [expected, actual, failed] = fields.as_slice() else {
            bail!("Expected 3 fields in rates line, found {}", fields.len());
        };

        let expected: SuccessRate = expected
            .trim()
            .parse()
            .with_context(|| format!("Invalid expected rate '{}'", expected))?;
        let actual: f64 = actual
            .trim()
            .parse()
            .with_context(|| format!("Invalid actual rate '{}'", actual))?;

        let list = failed
            .trim()
            .strip_prefix('[')
            .and_then(|l| l.strip_suffix(']'))
            .with_context(|| format!("Invalid failed run list '{}'", failed))?;
        let failed_runs = list
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                id.parse::<usize>()
                    .with_context(|| format!("Invalid run id '{}'", id))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            expected,
            actual,
            failed_runs,
        })
    }

    /// Read a record from a file
    pub fn read_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rates file: {:?}", path))?;
        Self::parse(&text).with_context(|| format!("Failed to parse rates file: {:?}", path))
    }
}

/// Shortest round-trip float repr with a mandatory fraction, `1e-05` style
/// exponents below 1e-4 and from 1e16 on
fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let repr = format!("{:e}", value);
        let (mantissa, exponent) = repr.split_once('e').unwrap_or((repr.as_str(), "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{}e{}{:0>2}", mantissa, sign, digits);
    }

    let repr = value.to_string();
    if repr.contains('.') {
        repr
    } else {
        format!("{}.0", repr)
    }
}
