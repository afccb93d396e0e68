//! Scope evaluation
//!
//! Evaluates one acceptance query against every run of a scope and aggregates
//! the verdicts into a success rate. Runs are independent, so they are
//! evaluated in parallel; the query and the event table are shared read-only.

use acceptance_query::{read_export, EventTable, Query, QueryExecutor, Table};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::report::{RateRecord, SuccessRate};

/// Name of the simulator export for run `run_id`
pub fn run_file_name(run_id: usize) -> String {
    format!("Cyclics_Run_{:03}.csv", run_id)
}

/// Inputs shared by all runs of a scope
pub struct ScopeEvaluation<'a> {
    pub artifacts: &'a Path,
    pub invocations: usize,
    pub query: &'a Query,
    pub events: &'a EventTable,
    pub executor: &'a QueryExecutor,
}

impl ScopeEvaluation<'_> {
    /// Evaluate every run and return the ids of those that failed
    pub fn failed_runs(&self) -> Vec<usize> {
        let mut failed: Vec<usize> = (0..self.invocations)
            .into_par_iter()
            .filter(|&run_id| !self.run_passes(run_id))
            .collect();
        failed.sort_unstable();
        failed
    }

    /// Evaluate all runs and build the rate record
    pub fn rate(&self, expected: SuccessRate) -> RateRecord {
        let failed = self.failed_runs();
        let record = RateRecord::from_runs(expected, self.invocations, failed);
        log::info!(
            "Success rate {:.2}% (expected {:.2}%), failed runs {:?}",
            record.actual * 100.0,
            record.expected.value() * 100.0,
            record.failed_runs
        );
        record
    }

    /// A run fails on a false verdict, an evaluation error or an unreadable export
    fn run_passes(&self, run_id: usize) -> bool {
        let path = self.artifacts.join(run_file_name(run_id));
        let signals = match read_export(&path, &self.executor.config().explicit_types) {
            Ok(signals) => signals,
            Err(e) => {
                log::warn!("Run {}: cannot read {:?}: {}", run_id, path, e);
                return false;
            }
        };

        match self
            .executor
            .evaluate(&signals, self.events, run_id as i64, self.query)
        {
            Ok(passed) => passed,
            Err(e) => {
                log::warn!("Run {}: {}", run_id, e);
                false
            }
        }
    }
}

/// Load the event table, or an empty one when the scope produced no events
pub fn load_events(path: Option<&Path>) -> Result<EventTable> {
    match path {
        Some(path) if path.exists() => EventTable::from_csv_path(path)
            .with_context(|| format!("Failed to load event table: {:?}", path)),
        Some(path) => {
            log::warn!("No event table at {:?}, assuming no events", path);
            Ok(EventTable::default())
        }
        None => Ok(EventTable::default()),
    }
}

/// Result of comparing two exports of the same configuration
#[derive(Debug, Clone, PartialEq)]
pub enum Determinism {
    /// Byte-identical files
    Identical,
    /// Different bytes but the same reshaped table
    Equivalent,
    /// Tables differ; the message names the first difference
    Different(String),
}

/// Compare a base run against a rerun with the same seed
pub fn compare_runs(base: &Path, rerun: &Path) -> Result<Determinism> {
    let base_bytes =
        std::fs::read(base).with_context(|| format!("Failed to read {:?}", base))?;
    let rerun_bytes =
        std::fs::read(rerun).with_context(|| format!("Failed to read {:?}", rerun))?;
    if base_bytes == rerun_bytes {
        return Ok(Determinism::Identical);
    }

    let types = Default::default();
    let base_table =
        read_export(base, &types).with_context(|| format!("Failed to reshape {:?}", base))?;
    let rerun_table =
        read_export(rerun, &types).with_context(|| format!("Failed to reshape {:?}", rerun))?;

    Ok(match first_difference(&base_table, &rerun_table) {
        None => Determinism::Equivalent,
        Some(message) => Determinism::Different(message),
    })
}

fn first_difference(base: &Table, rerun: &Table) -> Option<String> {
    let base_names: Vec<&str> = base.column_names().collect();
    let rerun_names: Vec<&str> = rerun.column_names().collect();
    if base_names != rerun_names {
        return Some(format!("columns {:?} vs {:?}", base_names, rerun_names));
    }
    if base.num_rows() != rerun.num_rows() {
        return Some(format!("{} rows vs {} rows", base.num_rows(), rerun.num_rows()));
    }
    for (left, right) in base.columns().iter().zip(rerun.columns()) {
        if left.dtype != right.dtype {
            return Some(format!(
                "column '{}' is {} vs {}",
                left.name, left.dtype, right.dtype
            ));
        }
        if let Some(row) = (0..left.len()).find(|&r| left.values[r] != right.values[r]) {
            return Some(format!(
                "column '{}' row {}: '{}' vs '{}'",
                left.name, row, left.values[row], right.values[row]
            ));
        }
    }
    None
}

/// Directory for debug dumps of one invocation, stamped with the current UTC time
pub fn debug_dump_dir(artifacts: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
    artifacts.join(format!("debug_{}", stamp))
}
