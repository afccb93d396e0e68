//! Acceptance Query Library
//!
//! Decides whether a single simulation run satisfies an acceptance criterion
//! written as a compact query over the run's output signals and events.
//!
//! # Architecture
//!
//! - `reshape` turns the simulator's wide CSV export (`<agent>:<channel>`
//!   columns) into a long signal table keyed by (Timestep, AgentId)
//! - `events` loads the flattened event table and derives per-event columns
//! - `query` parses `<reduction>(<column> | <filter>) <op> <threshold>` into an
//!   immutable [`Query`] that can be shared across runs and threads
//! - `executor` joins events onto the signals, materializes shifted columns,
//!   filters, reduces and compares
//!
//! The library does NOT:
//! - Launch simulations
//! - Parse XML simulator traces
//! - Aggregate success rates across runs
//!
//! Running a whole test scope is handled by the application layer
//! (acceptance-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use acceptance_query::{parse, read_export, EvaluationConfig, EventTable, QueryExecutor};
//! use std::path::Path;
//!
//! let config = EvaluationConfig::new();
//! let query = parse("count(AgentId | Velocity > 30 and #(Collision) == True) = 0").unwrap();
//!
//! let signals = read_export(Path::new("Cyclics_Run_000.csv"), &config.explicit_types).unwrap();
//! let events = EventTable::from_csv_path(Path::new("events.csv")).unwrap();
//!
//! let executor = QueryExecutor::new(config);
//! let passed = executor.evaluate(&signals, &events, 0, &query).unwrap();
//! println!("run 0 passed: {}", passed);
//! ```

// Public modules
pub mod config;
pub mod events;
pub mod executor;
pub mod normalize;
pub mod query;
pub mod reshape;
pub mod table;
pub mod types;

// Re-export main types for convenience
pub use config::EvaluationConfig;
pub use events::{EventOccurrence, EventRecord, EventTable};
pub use executor::{QueryExecutor, Verdict};
pub use normalize::{normalize, normalize_column};
pub use query::{parse, Aggregate, ComparisonOperator, Query, Reduction, ShiftedColumn};
pub use reshape::{read_export, read_export_from_reader, reshape};
pub use table::{Column, Table};
pub use types::{ColumnType, QueryError, Result, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: a query evaluates against an empty event table
        let signals = read_export_from_reader(
            "Timestep,00:v\n0,1\n".as_bytes(),
            &Default::default(),
        )
        .unwrap();
        let query = parse("count(AgentId | v > 0) = 1").unwrap();
        let executor = QueryExecutor::new(EvaluationConfig::new());
        assert!(executor
            .evaluate(&signals, &EventTable::default(), 0, &query)
            .unwrap());
        assert!(!VERSION.is_empty());
    }
}
