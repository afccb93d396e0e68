//! Query executor
//!
//! Evaluates a parsed [`Query`] against the signal table and the event table of
//! one run:
//!
//! 1. outer-join every referenced event onto the signals on (Timestep, AgentId)
//! 2. forward-fill event columns per agent (`Event_<name>` defaults to false)
//! 3. synthesize event columns for events that never occurred
//! 4. materialize time-shifted columns per agent
//! 5. filter, reduce the group column and compare against the threshold
//!
//! Inputs are only read. Every step builds a new table.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::config::EvaluationConfig;
use crate::events::EventTable;
use crate::normalize::{event_column, event_key_column, KEY_SEPARATOR};
use crate::query::{Query, ShiftedColumn};
use crate::table::{Column, Table, AGENT_ID, TIMESTEP};
use crate::types::{ColumnType, QueryError, Result, Value};

/// Outcome of one query evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub run_id: i64,
    /// Rows left after filtering
    pub selected_rows: usize,
    /// Reduction result
    pub result: f64,
    pub passed: bool,
}

/// Evaluates acceptance queries run by run
#[derive(Debug, Clone, Default)]
pub struct QueryExecutor {
    config: EvaluationConfig,
}

impl QueryExecutor {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluate `query` for `run_id`; true when the run passes
    pub fn evaluate(
        &self,
        signals: &Table,
        events: &EventTable,
        run_id: i64,
        query: &Query,
    ) -> Result<bool> {
        self.verdict(signals, events, run_id, query).map(|v| v.passed)
    }

    /// Evaluate `query` and report the intermediate result as well
    pub fn verdict(
        &self,
        signals: &Table,
        events: &EventTable,
        run_id: i64,
        query: &Query,
    ) -> Result<Verdict> {
        let joined = self.prepare(signals, events, run_id, query)?;
        self.dump(&joined, run_id);

        log::debug!("Run {}: filter '{}'", run_id, query.residual_filter);
        let rows = match &query.filter {
            Some(filter) => filter.filter_rows(&joined)?,
            None => (0..joined.num_rows()).collect(),
        };

        let column = joined.require(&query.reduction.column)?;
        let result = query
            .reduction
            .function
            .apply(rows.iter().map(|&r| &column.values[r]))?;
        let passed = query.accepts(result);

        log::info!(
            "Run {}: {}({}) over {} rows = {} {} {} -> {}",
            run_id,
            query.reduction.function,
            query.reduction.column,
            rows.len(),
            result,
            query.operator,
            query.value,
            passed
        );

        Ok(Verdict {
            run_id,
            selected_rows: rows.len(),
            result,
            passed,
        })
    }

    /// Build the joined table the filter runs on (steps 1 to 4)
    pub fn prepare(
        &self,
        signals: &Table,
        events: &EventTable,
        run_id: i64,
        query: &Query,
    ) -> Result<Table> {
        let mut joined = signals.clone();

        for event in query.referenced_events.keys() {
            if let Some(frame) = events.event_frame(run_id, event)? {
                joined = outer_join(&joined, &frame)?;
            } else {
                log::debug!("Run {}: event '{}' never occurs", run_id, event);
            }
        }
        let joined = joined.sorted_by_keys();
        let mut joined = fill_event_columns(&joined, query)?;

        for (event, keys) in &query.referenced_events {
            let presence = event_column(event);
            if !joined.has_column(&presence) {
                joined.push_column(Column::new(
                    presence,
                    ColumnType::Bool,
                    vec![Value::Bool(false); joined.num_rows()],
                ))?;
            }
            for key in keys {
                let name = event_key_column(key, event);
                if !joined.has_column(&name) {
                    joined.push_column(Column::new(
                        name,
                        ColumnType::Text,
                        vec![Value::Text(String::new()); joined.num_rows()],
                    ))?;
                }
            }
        }

        for shift in &query.shifted_columns {
            let column = shifted_column(&joined, shift)?;
            joined.push_column(column)?;
        }

        log::debug!(
            "Run {}: joined table has {} rows x {} columns",
            run_id,
            joined.num_rows(),
            joined.num_columns()
        );
        Ok(joined)
    }

    fn dump(&self, table: &Table, run_id: i64) {
        let Some(path) = self.config.dump_path(&format!("{}.csv", run_id)) else {
            return;
        };
        let written = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .map_err(QueryError::from)
            .and_then(|_| table.write_csv_path(&path));
        match written {
            Ok(()) => log::debug!("Dumped joined table to {:?}", path),
            Err(e) => log::warn!("Could not dump joined table to {:?}: {}", path, e),
        }
    }
}

/// Full outer join on (Timestep, AgentId); `right` must have unique keys.
///
/// Rows of `left` keep their order, unmatched rows of `right` are appended.
/// A column present on both sides takes the right value where it is not null.
fn outer_join(left: &Table, right: &Table) -> Result<Table> {
    let key = |table: &Table, row: usize| -> Result<(i64, i64)> {
        match (table.key_at(row, TIMESTEP), table.key_at(row, AGENT_ID)) {
            (Some(t), Some(a)) => Ok((t, a)),
            _ => Err(QueryError::InvalidData(format!(
                "row {} has no integer {}/{} key",
                row, TIMESTEP, AGENT_ID
            ))),
        }
    };

    left.require(TIMESTEP)?;
    left.require(AGENT_ID)?;

    let mut right_rows: HashMap<(i64, i64), usize> = HashMap::new();
    for row in 0..right.num_rows() {
        right_rows.insert(key(right, row)?, row);
    }

    // (left row, right row) pairs
    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    let mut matched = vec![false; right.num_rows()];
    for row in 0..left.num_rows() {
        let other = right_rows.get(&key(left, row)?).copied();
        if let Some(r) = other {
            matched[r] = true;
        }
        pairs.push((Some(row), other));
    }
    pairs.extend(
        matched
            .iter()
            .enumerate()
            .filter(|&(_, &m)| !m)
            .map(|(r, _)| (None, Some(r))),
    );

    let pick = |column: Option<&Column>, row: Option<usize>| -> Value {
        match (column, row) {
            (Some(c), Some(r)) => c.values[r].clone(),
            _ => Value::Null,
        }
    };

    let mut columns = Vec::new();
    for column in left.columns() {
        let shared = right.column(&column.name);
        let is_key = column.name == TIMESTEP || column.name == AGENT_ID;
        let values = pairs
            .iter()
            .map(|&(l, r)| {
                let theirs = pick(shared, r);
                if l.is_none() || (!is_key && !theirs.is_null()) {
                    theirs
                } else {
                    pick(Some(column), l)
                }
            })
            .collect();
        let merged = Column::new(column.name.clone(), column.dtype, values);
        columns.push(if is_key { merged.cast(column.dtype)? } else { merged });
    }
    for column in right.columns() {
        if left.has_column(&column.name) {
            continue;
        }
        let values = pairs.iter().map(|&(_, r)| pick(Some(column), r)).collect();
        columns.push(Column::new(column.name.clone(), column.dtype, values));
    }

    Table::from_columns(columns)
}

/// Forward-fill the columns of every referenced event, agent by agent
fn fill_event_columns(table: &Table, query: &Query) -> Result<Table> {
    let mut targets: Vec<(&str, bool)> = Vec::new();
    for event in query.referenced_events.keys() {
        let presence = event_column(event);
        let key_prefix = format!("{}{}", presence, KEY_SEPARATOR);
        for name in table.column_names() {
            if name == presence {
                targets.push((name, true));
            } else if name.starts_with(&key_prefix) {
                targets.push((name, false));
            }
        }
    }
    if targets.is_empty() {
        return Ok(table.clone());
    }

    let partitions = table.partition_by_agent()?;
    let mut filled = table.clone();
    for (name, is_presence) in targets {
        let column = table.require(name)?;
        let mut column = forward_fill(column, &partitions);
        if is_presence {
            for value in column.values.iter_mut().filter(|v| v.is_null()) {
                *value = Value::Bool(false);
            }
        }
        filled.push_column(column)?;
    }
    Ok(filled)
}

/// Carry the last non-null value forward within each agent's rows
fn forward_fill(column: &Column, partitions: &BTreeMap<i64, Vec<usize>>) -> Column {
    let mut values = column.values.clone();
    for rows in partitions.values() {
        let mut last = Value::Null;
        for &row in rows {
            if values[row].is_null() {
                values[row] = last.clone();
            } else {
                last = values[row].clone();
            }
        }
    }
    Column::new(column.name.clone(), column.dtype, values)
}

/// `name[row] = source[row + shift]` within each agent's timestep order,
/// forward-filled at the end of the sequence and cast back to the source type
fn shifted_column(table: &Table, shift: &ShiftedColumn) -> Result<Column> {
    let source = table.require(&shift.source)?;
    let partitions = table.partition_by_agent()?;

    let mut values = vec![Value::Null; table.num_rows()];
    for rows in partitions.values() {
        for (i, &row) in rows.iter().enumerate() {
            if let Some(&ahead) = rows.get(i + shift.shift) {
                values[row] = source.values[ahead].clone();
            }
        }
    }

    log::trace!(
        "Shifted '{}' by {} into '{}'",
        shift.source,
        shift.shift,
        shift.name
    );
    let shifted = Column::new(shift.name.clone(), source.dtype, values);
    forward_fill(&shifted, &partitions).cast(source.dtype)
}
