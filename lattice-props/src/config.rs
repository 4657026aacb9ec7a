//! Runtime Configuration
//!
//! Knobs that affect how a [`Runtime`](crate::reactive::Runtime) compiles
//! schemas and drains transactions. Configuration is plain data and can be
//! loaded from JSON so host applications can keep it next to their own
//! settings.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How malformed schema entries are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Fail at compile time with [`Error::Schema`].
    #[default]
    Strict,
    /// Degrade the offending field to passthrough and log a warning.
    Permissive,
}

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Schema validation policy.
    pub schema_policy: SchemaPolicy,

    /// Upper bound on delivery rounds per flush. Listeners that keep
    /// enqueuing changes past this bound have the remainder dropped.
    pub max_flush_rounds: usize,

    /// Largest LCS table (old × new middle section) `replace` will build
    /// before falling back to a single splice over the differing range.
    pub diff_cell_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            schema_policy: SchemaPolicy::Strict,
            max_flush_rounds: 1_000,
            diff_cell_limit: 1 << 20,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::custom(format!("invalid runtime config: {e}")))
    }

    /// Builder-style policy override.
    pub fn with_schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.schema_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_strict() {
        let config = RuntimeConfig::default();
        assert_eq!(config.schema_policy, SchemaPolicy::Strict);
        assert_eq!(config.max_flush_rounds, 1_000);
    }

    #[test]
    fn parses_partial_json() {
        let config = RuntimeConfig::from_json(r#"{"schema_policy": "permissive"}"#).unwrap();
        assert_eq!(config.schema_policy, SchemaPolicy::Permissive);
        assert_eq!(config.diff_cell_limit, 1 << 20);
    }

    #[test]
    fn rejects_garbage() {
        assert!(RuntimeConfig::from_json("{nope").is_err());
    }
}
