//! Event table
//!
//! The simulator trace is flattened externally into one row per
//! (event occurrence, agent, parameter). This module loads that tabular form,
//! can build it from structured occurrences, and derives the per-event columns
//! the executor joins onto the signal table.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use crate::normalize::{event_column, event_key_column};
use crate::table::{Column, Table, AGENT_ID, TIMESTEP};
use crate::types::{parse_bool, ColumnType, QueryError, Result, Value};

/// One row of the event table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRecord {
    pub run_id: i64,
    pub timestep: i64,
    pub source: String,
    pub name: String,
    pub agent_id: i64,
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_triggering: bool,
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_affected: bool,
    /// Parameter key; empty for the placeholder row of a parameterless event
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    match text.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => parse_bool(other)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid flag '{}'", other))),
    }
}

/// A single event as it appears in the simulator trace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventOccurrence {
    pub run_id: i64,
    pub timestep: i64,
    pub source: String,
    pub name: String,
    pub triggering: Vec<i64>,
    pub affected: Vec<i64>,
    pub parameters: BTreeMap<String, String>,
}

impl EventOccurrence {
    /// Flatten into event table rows: one row per (agent, parameter).
    ///
    /// Triggering agents come first; an agent that is also affected keeps a
    /// single row with both flags set.
    pub fn to_records(&self) -> Vec<EventRecord> {
        let mut agents: Vec<(i64, bool, bool)> = self
            .triggering
            .iter()
            .map(|&id| (id, true, self.affected.contains(&id)))
            .collect();
        agents.extend(
            self.affected
                .iter()
                .filter(|id| !self.triggering.contains(*id))
                .map(|&id| (id, false, true)),
        );

        let mut records = Vec::new();
        for (agent_id, is_triggering, is_affected) in agents {
            let record = |key: &str, value: &str| EventRecord {
                run_id: self.run_id,
                timestep: self.timestep,
                source: self.source.clone(),
                name: self.name.clone(),
                agent_id,
                is_triggering,
                is_affected,
                key: key.to_string(),
                value: value.to_string(),
            };
            if self.parameters.is_empty() {
                records.push(record("", ""));
            }
            for (key, value) in &self.parameters {
                records.push(record(key, value));
            }
        }
        records
    }
}

/// All event rows of a simulation, across runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    records: Vec<EventRecord>,
}

impl EventTable {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self { records }
    }

    pub fn from_occurrences<'a, I>(occurrences: I) -> Self
    where
        I: IntoIterator<Item = &'a EventOccurrence>,
    {
        Self::new(
            occurrences
                .into_iter()
                .flat_map(EventOccurrence::to_records)
                .collect(),
        )
    }

    /// Load the event table from a CSV file
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        log::info!("Loading event table: {:?}", path);
        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(file)?;
        log::info!("Loaded {} event rows from {:?}", table.len(), path);
        Ok(table)
    }

    /// Load the event table from CSV data with a header row
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let records = csv_reader
            .deserialize()
            .collect::<std::result::Result<Vec<EventRecord>, _>>()?;
        Ok(Self::new(records))
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Names of all events that occur in `run_id`
    pub fn event_names(&self, run_id: i64) -> BTreeSet<&str> {
        self.records
            .iter()
            .filter(|r| r.run_id == run_id)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Per-event table for one run, keyed by (Timestep, AgentId).
    ///
    /// Contains `Event_<name>` (always true) and one text column per parameter
    /// key seen for the event. When several rows share a position and key, the
    /// later row wins. Returns `None` when the event never occurs in the run.
    pub fn event_frame(&self, run_id: i64, event_name: &str) -> Result<Option<Table>> {
        let mut positions: BTreeMap<(i64, i64), BTreeMap<&str, &str>> = BTreeMap::new();
        let mut keys: BTreeSet<&str> = BTreeSet::new();

        for record in self
            .records
            .iter()
            .filter(|r| r.run_id == run_id && r.name == event_name)
        {
            let slot = positions.entry((record.timestep, record.agent_id)).or_default();
            if !record.key.is_empty() {
                slot.insert(record.key.as_str(), record.value.as_str());
                keys.insert(record.key.as_str());
            }
        }

        if positions.is_empty() {
            return Ok(None);
        }

        let rows = positions.len();
        let mut columns = vec![
            Column::new(
                TIMESTEP,
                ColumnType::Int,
                positions.keys().map(|&(t, _)| Value::Int(t)).collect(),
            ),
            Column::new(
                AGENT_ID,
                ColumnType::Int,
                positions.keys().map(|&(_, a)| Value::Int(a)).collect(),
            ),
            Column::new(
                event_column(event_name),
                ColumnType::Bool,
                vec![Value::Bool(true); rows],
            ),
        ];
        for key in keys {
            let values = positions
                .values()
                .map(|slot| {
                    slot.get(key)
                        .map(|v| Value::Text(v.to_string()))
                        .unwrap_or(Value::Null)
                })
                .collect();
            columns.push(Column::new(
                event_key_column(key, event_name),
                ColumnType::Text,
                values,
            ));
        }

        log::debug!(
            "Event '{}' in run {}: {} positions, {} parameter columns",
            event_name,
            run_id,
            rows,
            columns.len() - 3
        );
        Table::from_columns(columns).map(Some)
    }

    /// The event table in its flat tabular form (debug dumps)
    pub fn to_table(&self) -> Result<Table> {
        let int = |f: fn(&EventRecord) -> i64| -> Vec<Value> {
            self.records.iter().map(|r| Value::Int(f(r))).collect()
        };
        let text = |f: fn(&EventRecord) -> &str| -> Vec<Value> {
            self.records
                .iter()
                .map(|r| Value::Text(f(r).to_string()))
                .collect()
        };
        let flag = |f: fn(&EventRecord) -> bool| -> Vec<Value> {
            self.records.iter().map(|r| Value::Bool(f(r))).collect()
        };

        Table::from_columns(vec![
            Column::new("RunId", ColumnType::Int, int(|r| r.run_id)),
            Column::new(TIMESTEP, ColumnType::Int, int(|r| r.timestep)),
            Column::new("Source", ColumnType::Text, text(|r| r.source.as_str())),
            Column::new("Name", ColumnType::Text, text(|r| r.name.as_str())),
            Column::new(AGENT_ID, ColumnType::Int, int(|r| r.agent_id)),
            Column::new("IsTriggering", ColumnType::Bool, flag(|r| r.is_triggering)),
            Column::new("IsAffected", ColumnType::Bool, flag(|r| r.is_affected)),
            Column::new("Key", ColumnType::Text, text(|r| r.key.as_str())),
            Column::new("Value", ColumnType::Text, text(|r| r.value.as_str())),
        ])
        .map_err(|e| QueryError::InvalidData(format!("event table: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
RunId,Timestep,Source,Name,AgentId,IsTriggering,IsAffected,Key,Value
0,100,OpenSCENARIO,Collision,3,True,True,CollisionWithAgent,True
0,100,OpenSCENARIO,Collision,3,True,True,Partner,1
0,200,OpenSCENARIO,Collision,1,False,True,CollisionWithAgent,False
1,100,OpenSCENARIO,Collision,2,True,False,CollisionWithAgent,True
0,50,Detector,Spawn,0,True,False,,
";

    #[test]
    fn test_load_from_csv() {
        let table = EventTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.len(), 5);
        let first = &table.records()[0];
        assert_eq!(first.run_id, 0);
        assert_eq!(first.agent_id, 3);
        assert!(first.is_triggering);
        assert_eq!(first.key, "CollisionWithAgent");
        assert_eq!(table.records()[4].key, "");
    }

    #[test]
    fn test_invalid_flag_is_rejected() {
        let csv = "RunId,Timestep,Source,Name,AgentId,IsTriggering,IsAffected,Key,Value\n\
                   0,1,S,E,0,maybe,True,,\n";
        assert!(EventTable::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_event_frame() {
        let table = EventTable::from_reader(CSV.as_bytes()).unwrap();
        let frame = table.event_frame(0, "Collision").unwrap().unwrap();

        assert_eq!(frame.num_rows(), 2);
        assert_eq!(frame.key_at(0, TIMESTEP), Some(100));
        assert_eq!(frame.key_at(0, AGENT_ID), Some(3));
        assert_eq!(frame.value(0, "Event_Collision"), Some(&Value::Bool(true)));
        assert_eq!(
            frame.value(0, "Event_Collision__Partner"),
            Some(&Value::Text("1".to_string()))
        );
        assert_eq!(frame.value(1, "Event_Collision__Partner"), Some(&Value::Null));
        assert_eq!(
            frame.value(1, "Event_Collision__CollisionWithAgent"),
            Some(&Value::Text("False".to_string()))
        );
    }

    #[test]
    fn test_event_frame_without_parameters() {
        let table = EventTable::from_reader(CSV.as_bytes()).unwrap();
        let frame = table.event_frame(0, "Spawn").unwrap().unwrap();
        assert_eq!(frame.num_columns(), 3);
        assert!(table.event_frame(1, "Spawn").unwrap().is_none());
    }

    #[test]
    fn test_occurrence_flattening() {
        let occurrence = EventOccurrence {
            run_id: 2,
            timestep: 300,
            source: "Algorithm".to_string(),
            name: "Brake".to_string(),
            triggering: vec![1, 2],
            affected: vec![2, 5],
            parameters: BTreeMap::new(),
        };
        let records = occurrence.to_records();
        let flags: Vec<(i64, bool, bool)> = records
            .iter()
            .map(|r| (r.agent_id, r.is_triggering, r.is_affected))
            .collect();
        assert_eq!(flags, vec![(1, true, false), (2, true, true), (5, false, true)]);
        assert!(records.iter().all(|r| r.key.is_empty() && r.value.is_empty()));
    }

    #[test]
    fn test_occurrence_with_parameters() {
        let mut parameters = BTreeMap::new();
        parameters.insert("a".to_string(), "1".to_string());
        parameters.insert("b".to_string(), "2".to_string());
        let occurrence = EventOccurrence {
            name: "E".to_string(),
            triggering: vec![7],
            parameters,
            ..Default::default()
        };
        let table = EventTable::from_occurrences([&occurrence]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.event_names(0).into_iter().collect::<Vec<_>>(), vec!["E"]);
    }

    #[test]
    fn test_to_table() {
        let table = EventTable::from_reader(CSV.as_bytes()).unwrap();
        let flat = table.to_table().unwrap();
        assert_eq!(flat.num_rows(), 5);
        assert_eq!(flat.num_columns(), 9);
    }
}
