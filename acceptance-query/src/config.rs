//! Evaluation configuration
//!
//! Settings are passed explicitly to [`crate::QueryExecutor::new`]; the library
//! keeps no process-wide state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::ColumnType;

/// Configuration for the reshaper and the query executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// When set, joined tables are written here as `<run_id>.csv`
    #[serde(default)]
    pub debug_dump_dir: Option<PathBuf>,

    /// Column types overriding inference (unknown columns are ignored)
    #[serde(default, alias = "datatypes")]
    pub explicit_types: BTreeMap<String, ColumnType>,
}

impl EvaluationConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: dump intermediate tables into `dir`
    pub fn with_debug_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dump_dir = Some(dir.into());
        self
    }

    /// Builder method: declare the type of a column
    pub fn with_explicit_type(mut self, column: impl Into<String>, dtype: ColumnType) -> Self {
        self.explicit_types.insert(column.into(), dtype);
        self
    }

    /// Builder method: declare several column types at once
    pub fn with_explicit_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        self.explicit_types
            .extend(types.into_iter().map(|(name, ty)| (name.into(), ty)));
        self
    }

    /// Path of the debug dump for `file_name`, if dumping is enabled
    pub fn dump_path(&self, file_name: &str) -> Option<PathBuf> {
        self.debug_dump_dir
            .as_deref()
            .map(|dir: &Path| dir.join(file_name))
    }
}
