//! Runtime Configuration
//!
//! Safety bounds for a [`Runtime`](crate::reactive::Runtime). The defaults
//! suit interactive UIs; hosts can load overrides from JSON.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunable limits for a reactive runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of rounds a single flush may run before it is aborted.
    ///
    /// Each round drains the effects queued by the previous one, so this
    /// bounds chains of effects that write signals read by other effects.
    pub max_flush_rounds: usize,

    /// Maximum nesting of computed evaluations during one pull.
    pub max_update_depth: usize,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_rounds: 100,
            max_update_depth: 1000,
        }
    }
}
