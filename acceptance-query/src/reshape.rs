//! Output reshaper
//!
//! The simulator writes one row per timestep with one column per (agent,
//! channel), named `<agentIndex>:<channelName>`. The query executor works on a
//! long table with one row per (timestep, agent) instead.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use crate::table::{Column, Table, AGENT_ID, TIMESTEP};
use crate::types::{ColumnType, QueryError, Result, Value};

/// Read a simulator CSV export and reshape it into a signal table
pub fn read_export(path: &Path, explicit_types: &BTreeMap<String, ColumnType>) -> Result<Table> {
    log::info!("Reading simulation output: {:?}", path);
    let file = std::fs::File::open(path)?;
    let table = read_export_from_reader(file, explicit_types)?;
    log::info!(
        "Reshaped {:?} into {} rows x {} columns",
        path,
        table.num_rows(),
        table.num_columns()
    );
    Ok(table)
}

/// Parse CSV export data (header row first) and reshape it
pub fn read_export_from_reader<R: Read>(
    reader: R,
    explicit_types: &BTreeMap<String, ColumnType>,
) -> Result<Table> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in csv_reader.records() {
        let record = record?;
        for (i, column) in cells.iter_mut().enumerate() {
            column.push(record.get(i).unwrap_or("").to_string());
        }
    }

    let wide = Table::from_columns(
        headers
            .iter()
            .zip(&cells)
            .map(|(name, column)| Column::from_cells(name.clone(), column))
            .collect(),
    )?;
    reshape(&wide, explicit_types)
}

/// Split `<agentIndex>:<channel>` into its parts
fn split_agent_column(name: &str) -> Option<(i64, &str)> {
    let (index, channel) = name.split_once(':')?;
    let index = index.trim().parse().ok()?;
    Some((index, channel.trim()))
}

/// Pivot a wide export into one row per (timestep, agent).
///
/// Rows where every channel of an agent is absent are dropped (the agent was
/// not spawned yet or already despawned). Columns without an agent prefix are
/// repeated on every row of their timestep. `explicit_types` entries naming
/// unknown columns are ignored.
pub fn reshape(wide: &Table, explicit_types: &BTreeMap<String, ColumnType>) -> Result<Table> {
    let timesteps = wide.require(TIMESTEP).map_err(|_| {
        QueryError::InvalidData(format!("simulation output has no '{}' column", TIMESTEP))
    })?;

    // agent -> channel -> wide column
    let mut agents: BTreeMap<i64, BTreeMap<&str, &Column>> = BTreeMap::new();
    let mut channels: BTreeSet<&str> = BTreeSet::new();
    let mut shared: Vec<&Column> = Vec::new();

    for column in wide.columns() {
        if column.name == TIMESTEP {
            continue;
        }
        match split_agent_column(&column.name) {
            Some((agent, channel)) => {
                agents.entry(agent).or_default().insert(channel, column);
                channels.insert(channel);
            }
            None => shared.push(column),
        }
    }

    // (timestep row, agent) pairs with at least one value, ordered by (Timestep, AgentId)
    let mut order: Vec<usize> = (0..wide.num_rows()).collect();
    order.sort_by_key(|&r| wide.key_at(r, TIMESTEP).unwrap_or(i64::MIN));

    let mut rows: Vec<(usize, i64)> = Vec::new();
    for &row in &order {
        for (&agent, agent_channels) in &agents {
            if agent_channels.values().any(|c| !c.values[row].is_null()) {
                rows.push((row, agent));
            }
        }
    }

    let mut columns = vec![
        Column::new(
            TIMESTEP,
            timesteps.dtype,
            rows.iter()
                .map(|&(row, _)| timesteps.values[row].clone())
                .collect(),
        ),
        Column::new(
            AGENT_ID,
            ColumnType::Int,
            rows.iter().map(|&(_, agent)| Value::Int(agent)).collect(),
        ),
    ];

    for channel in &channels {
        let mut values = Vec::with_capacity(rows.len());
        let mut sources: Vec<&Column> = Vec::new();
        for &(row, agent) in &rows {
            match agents[&agent].get(channel) {
                Some(column) => {
                    values.push(column.values[row].clone());
                    sources.push(column);
                }
                None => values.push(Value::Null),
            }
        }
        let dtype = unify_types(&sources);
        let column = Column::new(*channel, dtype, values);
        // agents inferred to different types get their cells converted too
        if sources.iter().any(|c| c.dtype != dtype) {
            columns.push(column.cast(dtype)?);
        } else {
            columns.push(column);
        }
    }

    for column in shared {
        columns.push(Column::new(
            column.name.clone(),
            column.dtype,
            rows.iter().map(|&(row, _)| column.values[row].clone()).collect(),
        ));
    }

    let table = Table::from_columns(columns)?;
    apply_explicit_types(table, explicit_types)
}

/// Widest type among the agent columns feeding one channel. Agents that never
/// reported the channel do not take part.
fn unify_types(sources: &[&Column]) -> ColumnType {
    let mut types = sources
        .iter()
        .filter(|c| c.values.iter().any(|v| !v.is_null()))
        .map(|c| c.dtype);
    let Some(first) = types.next() else {
        return ColumnType::Float;
    };
    types.fold(first, |acc, ty| match (acc, ty) {
        (a, b) if a == b => a,
        (ColumnType::Int, ColumnType::Float) | (ColumnType::Float, ColumnType::Int) => {
            ColumnType::Float
        }
        _ => ColumnType::Text,
    })
}

/// Apply declared column types, ignoring entries for columns that do not exist
pub fn apply_explicit_types(
    mut table: Table,
    explicit_types: &BTreeMap<String, ColumnType>,
) -> Result<Table> {
    for (name, dtype) in explicit_types {
        let Some(column) = table.column(name) else {
            log::debug!("Ignoring type {} for missing column '{}'", dtype, name);
            continue;
        };
        if column.dtype != *dtype {
            let cast = column.cast(*dtype)?;
            table.push_column(cast)?;
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reshape_csv(csv: &str) -> Table {
        read_export_from_reader(csv.as_bytes(), &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_full_export_yields_agent_rows() {
        let table = reshape_csv(
            "Timestep, 00:some, 00:other, 01:some, 01:other\n\
             0, 1, 2, 3, 4\n\
             100, 5, 6, 7, 8\n",
        );
        assert_eq!(table.num_rows(), 4);
        let names: Vec<_> = table.column_names().collect();
        assert_eq!(names, vec!["Timestep", "AgentId", "other", "some"]);
        assert_eq!(table.value(1, "AgentId"), Some(&Value::Int(1)));
        assert_eq!(table.value(1, "some"), Some(&Value::Int(3)));
        assert_eq!(table.value(3, "other"), Some(&Value::Int(8)));
    }

    #[test]
    fn test_absent_agent_rows_are_dropped() {
        let table = reshape_csv(
            "Timestep,00:some,00:other,01:some,01:other\n\
             0,1,2,3,4\n\
             100,5,6,7,8\n\
             200,9,10,,\n\
             300,11,12,,\n",
        );
        assert_eq!(table.num_rows(), 6);
        assert_eq!(table.key_at(4, TIMESTEP), Some(200));
        assert_eq!(table.key_at(4, AGENT_ID), Some(0));
        assert_eq!(table.key_at(5, TIMESTEP), Some(300));
    }

    #[test]
    fn test_partially_present_agent_row_is_kept() {
        let table = reshape_csv("Timestep,00:a,00:b\n0,1,\n100,,\n");
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.value(0, "b"), Some(&Value::Null));
    }

    #[test]
    fn test_channels_missing_for_some_agents() {
        let table = reshape_csv("Timestep,00:a,01:b\n0,1,2\n");
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.value(0, "b"), Some(&Value::Null));
        assert_eq!(table.value(1, "a"), Some(&Value::Null));
    }

    #[test]
    fn test_mixed_int_and_float_agents_unify_to_float() {
        let table = reshape_csv("Timestep,00:v,01:v\n0,1,1.5\n");
        assert_eq!(table.column("v").unwrap().dtype, ColumnType::Float);
        assert_eq!(table.value(0, "v"), Some(&Value::Float(1.0)));
    }

    #[test]
    fn test_mixed_int_and_bool_agents_unify_to_text() {
        let table = reshape_csv("Timestep,00:flag,01:flag\n0,1,True\n100,0,False\n");
        let column = table.column("flag").unwrap();
        assert_eq!(column.dtype, ColumnType::Text);
        assert!(column.values.iter().all(|v| matches!(v, Value::Text(_))));
        assert_eq!(table.value(0, "flag"), Some(&Value::Text("1".to_string())));
        assert_eq!(table.value(1, "flag"), Some(&Value::Text("True".to_string())));
        assert_eq!(table.value(3, "flag"), Some(&Value::Text("False".to_string())));
    }

    #[test]
    fn test_empty_agent_column_does_not_widen_the_channel() {
        let table = reshape_csv("Timestep,00:flag,00:v,01:flag,01:v\n0,True,1,,2\n");
        let column = table.column("flag").unwrap();
        assert_eq!(column.dtype, ColumnType::Bool);
        assert_eq!(column.values, vec![Value::Bool(true), Value::Null]);
    }

    #[test]
    fn test_explicit_types() {
        let mut types = BTreeMap::new();
        types.insert("some".to_string(), ColumnType::Text);
        types.insert("other".to_string(), ColumnType::Float);
        types.insert("does_not_exist".to_string(), ColumnType::Int);

        let table = read_export_from_reader(
            "Timestep,00:some,00:other\n0,1,2\n".as_bytes(),
            &types,
        )
        .unwrap();
        assert_eq!(table.value(0, "some"), Some(&Value::Text("1".to_string())));
        assert_eq!(table.value(0, "other"), Some(&Value::Float(2.0)));
        assert!(!table.has_column("does_not_exist"));
    }

    #[test]
    fn test_shared_columns_are_repeated() {
        let table = reshape_csv("Timestep,Weather,00:a,01:a\n0,rain,1,2\n");
        assert_eq!(table.value(0, "Weather"), Some(&Value::Text("rain".to_string())));
        assert_eq!(table.value(1, "Weather"), Some(&Value::Text("rain".to_string())));
    }

    #[test]
    fn test_missing_timestep_column() {
        let result = read_export_from_reader("00:a\n1\n".as_bytes(), &BTreeMap::new());
        assert!(matches!(result, Err(QueryError::InvalidData(_))));
    }

    #[test]
    fn test_input_table_is_not_modified() {
        let wide = Table::from_columns(vec![
            Column::from_cells(TIMESTEP, &["0".to_string()]),
            Column::from_cells("00:a", &["1".to_string()]),
        ])
        .unwrap();
        let before = wide.clone();
        let mut types = BTreeMap::new();
        types.insert("a".to_string(), ColumnType::Float);
        let _ = reshape(&wide, &types).unwrap();
        assert_eq!(wide, before);
    }
}
