//! Column-oriented tables shared by the reshaper, the event table and the executor
//!
//! Tables are plain owned values. Every transformation in this crate takes a
//! table by reference and returns a new one, so a caller's copy is never
//! modified behind its back.

use crate::types::{parse_bool, ColumnType, QueryError, Result, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

/// Name of the timestep key column
pub const TIMESTEP: &str = "Timestep";
/// Name of the agent key column
pub const AGENT_ID: &str = "AgentId";

/// A named, typed column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: ColumnType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    /// Build a column from raw CSV cells, inferring its type
    pub fn from_cells(name: impl Into<String>, cells: &[String]) -> Self {
        let dtype = infer_type(cells);
        let values = cells.iter().map(|c| parse_cell(c, dtype)).collect();
        Self::new(name, dtype, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert every value to `dtype`; nulls stay null
    pub fn cast(&self, dtype: ColumnType) -> Result<Column> {
        let values = self
            .values
            .iter()
            .map(|v| cast_value(v, dtype))
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(|e| {
                QueryError::InvalidData(format!("cannot cast column '{}' to {}: {}", self.name, dtype, e))
            })?;
        Ok(Column::new(self.name.clone(), dtype, values))
    }
}

/// Infer the narrowest type that fits every non-empty cell
pub fn infer_type(cells: &[String]) -> ColumnType {
    let present: Vec<&str> = cells
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();

    if present.is_empty() {
        // pandas reads an all-empty column as float NaN
        return ColumnType::Float;
    }
    if present.iter().all(|c| c.parse::<i64>().is_ok()) {
        ColumnType::Int
    } else if present.iter().all(|c| c.parse::<f64>().is_ok()) {
        ColumnType::Float
    } else if present.iter().all(|c| parse_bool(c).is_some()) {
        ColumnType::Bool
    } else {
        ColumnType::Text
    }
}

fn parse_cell(cell: &str, dtype: ColumnType) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    match dtype {
        ColumnType::Int => cell.parse().map(Value::Int).unwrap_or(Value::Null),
        ColumnType::Float => cell.parse().map(Value::Float).unwrap_or(Value::Null),
        ColumnType::Bool => parse_bool(cell).map(Value::Bool).unwrap_or(Value::Null),
        ColumnType::Text => Value::Text(cell.to_string()),
    }
}

fn cast_value(value: &Value, dtype: ColumnType) -> std::result::Result<Value, String> {
    let cast = match (value, dtype) {
        (Value::Null, _) => Value::Null,
        (Value::Text(t), ColumnType::Text) => Value::Text(t.clone()),
        (other, ColumnType::Text) => Value::Text(other.to_string()),
        (Value::Bool(b), ColumnType::Bool) => Value::Bool(*b),
        (Value::Text(t), ColumnType::Bool) => {
            Value::Bool(parse_bool(t).ok_or_else(|| format!("'{}' is not a boolean", t))?)
        }
        (other, ColumnType::Bool) => Value::Bool(other.is_truthy()),
        (Value::Int(i), ColumnType::Int) => Value::Int(*i),
        (other, ColumnType::Int) => {
            let f = other
                .as_f64()
                .ok_or_else(|| format!("'{}' is not numeric", other))?;
            if f.is_nan() {
                Value::Null
            } else {
                Value::Int(f.trunc() as i64)
            }
        }
        (other, ColumnType::Float) => Value::Float(
            other
                .as_f64()
                .ok_or_else(|| format!("'{}' is not numeric", other))?,
        ),
    };
    Ok(cast)
}

/// A table with named columns of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns; all columns must have the same length
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut table = Table::new();
        for column in columns {
            table.push_column(column)?;
        }
        Ok(table)
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    /// Lookup that reports a missing column as an evaluation error
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| QueryError::ColumnNotFound(name.to_string()))
    }

    /// Append a column, or replace an existing one with the same name
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if self.columns.is_empty() {
            self.rows = column.len();
        } else if column.len() != self.rows {
            return Err(QueryError::InvalidData(format!(
                "column '{}' has {} rows, table has {}",
                column.name,
                column.len(),
                self.rows
            )));
        }
        match self.index.get(&column.name) {
            Some(&i) => self.columns[i] = column,
            None => {
                self.index.insert(column.name.clone(), self.columns.len());
                self.columns.push(column);
            }
        }
        Ok(())
    }

    /// Value at (row, column)
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name).and_then(|c| c.values.get(row))
    }

    /// Keep only the rows at `rows`, in that order
    pub fn take_rows(&self, rows: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let values = rows.iter().map(|&r| c.values[r].clone()).collect();
                Column::new(c.name.clone(), c.dtype, values)
            })
            .collect::<Vec<_>>();
        Table {
            index: self.index.clone(),
            rows: rows.len(),
            columns,
        }
    }

    /// Integer key at (row, column), used for `Timestep` / `AgentId`
    pub fn key_at(&self, row: usize, name: &str) -> Option<i64> {
        match self.value(row, name)? {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Row indices grouped by agent, each group ordered by ascending timestep
    pub fn partition_by_agent(&self) -> Result<BTreeMap<i64, Vec<usize>>> {
        self.require(AGENT_ID)?;
        self.require(TIMESTEP)?;

        let mut partitions: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for row in 0..self.rows {
            let agent = self.key_at(row, AGENT_ID).ok_or_else(|| {
                QueryError::InvalidData(format!("row {} has no integer {}", row, AGENT_ID))
            })?;
            partitions.entry(agent).or_default().push(row);
        }
        for rows in partitions.values_mut() {
            rows.sort_by_key(|&r| self.key_at(r, TIMESTEP).unwrap_or(i64::MIN));
        }
        Ok(partitions)
    }

    /// Row order sorted by (Timestep, AgentId)
    pub fn sorted_by_keys(&self) -> Table {
        let mut order: Vec<usize> = (0..self.rows).collect();
        order.sort_by_key(|&r| {
            (
                self.key_at(r, TIMESTEP).unwrap_or(i64::MIN),
                self.key_at(r, AGENT_ID).unwrap_or(i64::MIN),
            )
        });
        self.take_rows(&order)
    }

    /// Write the table as CSV (debug dumps)
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.column_names())?;
        for row in 0..self.rows {
            csv_writer.write_record(self.columns.iter().map(|c| c.values[row].to_string()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Write the table to a CSV file
    pub fn write_csv_path(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_type_inference() {
        assert_eq!(infer_type(&cells(&["1", "", "3"])), ColumnType::Int);
        assert_eq!(infer_type(&cells(&["1", "2.5"])), ColumnType::Float);
        assert_eq!(infer_type(&cells(&["True", "false"])), ColumnType::Bool);
        assert_eq!(infer_type(&cells(&["a", "1"])), ColumnType::Text);
        assert_eq!(infer_type(&cells(&["", ""])), ColumnType::Float);
    }

    #[test]
    fn test_from_cells_keeps_nulls() {
        let column = Column::from_cells("speed", &cells(&["1", " ", "3"]));
        assert_eq!(
            column.values,
            vec![Value::Int(1), Value::Null, Value::Int(3)]
        );
    }

    #[test]
    fn test_cast() {
        let column = Column::new(
            "x",
            ColumnType::Float,
            vec![Value::Float(1.0), Value::Null, Value::Float(2.7)],
        );
        let cast = column.cast(ColumnType::Int).unwrap();
        assert_eq!(cast.values, vec![Value::Int(1), Value::Null, Value::Int(2)]);
        let text = column.cast(ColumnType::Text).unwrap();
        assert_eq!(text.values[0], Value::Text("1".to_string()));

        let bad = Column::new("y", ColumnType::Text, vec![Value::Text("abc".to_string())]);
        assert!(bad.cast(ColumnType::Float).is_err());
    }

    #[test]
    fn test_failed_cast_names_the_column() {
        let column = Column::new(
            "Lane",
            ColumnType::Text,
            vec![Value::Text("2".to_string()), Value::Text("left".to_string())],
        );
        match column.cast(ColumnType::Int) {
            Err(QueryError::InvalidData(message)) => {
                assert!(message.contains("'Lane'"), "{}", message);
                assert!(message.contains("'left' is not numeric"), "{}", message);
            }
            other => panic!("expected a cast error, got {:?}", other),
        }
    }

    #[test]
    fn test_push_column_length_mismatch() {
        let mut table = Table::new();
        table
            .push_column(Column::new("a", ColumnType::Int, vec![Value::Int(1)]))
            .unwrap();
        let result = table.push_column(Column::new("b", ColumnType::Int, vec![]));
        assert!(result.is_err());
    }

    #[test]
    fn test_partition_by_agent_orders_by_timestep() {
        let table = Table::from_columns(vec![
            Column::new(
                TIMESTEP,
                ColumnType::Int,
                vec![Value::Int(200), Value::Int(0), Value::Int(100), Value::Int(0)],
            ),
            Column::new(
                AGENT_ID,
                ColumnType::Int,
                vec![Value::Int(1), Value::Int(1), Value::Int(1), Value::Int(0)],
            ),
        ])
        .unwrap();

        let partitions = table.partition_by_agent().unwrap();
        assert_eq!(partitions[&0], vec![3]);
        assert_eq!(partitions[&1], vec![1, 2, 0]);
    }

    #[test]
    fn test_missing_column_is_evaluation_error() {
        let table = Table::new();
        let err = table.require("nope").unwrap_err();
        assert!(err.is_evaluation_error());
    }

    #[test]
    fn test_write_csv() {
        let table = Table::from_columns(vec![
            Column::new("a", ColumnType::Int, vec![Value::Int(1), Value::Null]),
            Column::new("b", ColumnType::Bool, vec![Value::Bool(true), Value::Bool(false)]),
        ])
        .unwrap();
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a,b\n1,True\n,False\n");
    }
}
