//! Test configuration loading and parsing
//!
//! A test configuration declares column types and named scopes. A scope lists
//! the simulation configurations under test, the base simulation settings and,
//! for specialized tests, the acceptance query with its expected success rate.

use acceptance_query::{ColumnType, EvaluationConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::report::SuccessRate;

/// Errors in an otherwise well-formed configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing section scopes")]
    MissingScopes,

    #[error("Invalid scope {0}")]
    UnknownScope(String),

    #[error("Scope {0} has no specialized section")]
    NotSpecialized(String),

    #[error("Scope {0} must run at least one invocation")]
    NoInvocations(String),
}

/// Whole test configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TestConfig {
    /// Column types applied when reshaping simulation output
    #[serde(default)]
    pub datatypes: BTreeMap<String, ColumnType>,

    #[serde(default)]
    pub scopes: Option<HashMap<String, ScopeConfig>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub configurations: Vec<String>,

    #[serde(rename = "baseConfig")]
    pub base_config: BaseConfig,

    #[serde(default)]
    pub specialized: Option<SpecializedConfig>,
}

/// Simulation settings shared by every configuration of a scope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BaseConfig {
    pub invocations: usize,

    #[serde(rename = "randomSeed", default)]
    pub random_seed: Option<u64>,

    /// Remaining simulator settings, passed through untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Acceptance criterion of a specialized scope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpecializedConfig {
    pub query: String,
    pub success_rate: SuccessRate,
}

impl TestConfig {
    /// Look up a scope by name
    pub fn scope(&self, name: &str) -> std::result::Result<&ScopeConfig, ConfigError> {
        self.scopes
            .as_ref()
            .ok_or(ConfigError::MissingScopes)?
            .get(name)
            .ok_or_else(|| ConfigError::UnknownScope(name.to_string()))
    }

    /// Look up a scope that carries an acceptance query
    pub fn specialized_scope(
        &self,
        name: &str,
    ) -> std::result::Result<(&ScopeConfig, &SpecializedConfig), ConfigError> {
        let scope = self.scope(name)?;
        let specialized = scope
            .specialized
            .as_ref()
            .ok_or_else(|| ConfigError::NotSpecialized(name.to_string()))?;
        if scope.base_config.invocations == 0 {
            return Err(ConfigError::NoInvocations(name.to_string()));
        }
        Ok((scope, specialized))
    }

    /// Evaluation settings derived from this configuration
    pub fn evaluation_config(&self) -> EvaluationConfig {
        EvaluationConfig::new().with_explicit_types(self.datatypes.clone())
    }
}

/// Load a test configuration from a JSON or TOML file (chosen by extension)
pub fn load_config(path: &Path) -> Result<TestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let config: TestConfig = if is_toml {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?
    };

    log::debug!(
        "Loaded {} scopes and {} column types from {:?}",
        config.scopes.as_ref().map_or(0, HashMap::len),
        config.datatypes.len(),
        path
    );
    Ok(config)
}
