//! Runtime configuration for the execution core.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CortexError, CortexResult};

pub const ENV_ACCEPTED_DIRECTIVES: &str = "CORTEX_ACCEPTED_DIRECTIVES";
pub const ENV_MAX_STAGE_WIDTH: &str = "CORTEX_MAX_STAGE_WIDTH";
pub const ENV_EVENT_CAPACITY: &str = "CORTEX_EVENT_CAPACITY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CortexConfig {
    /// Directive types the scheduler accepts; anything else is rejected.
    pub accepted_directive_types: Vec<String>,
    /// Upper bound on commands per stage. `None` means unbounded fan-out.
    pub max_stage_width: Option<usize>,
    /// Buffer size of the pipeline event broadcast channel.
    pub event_capacity: usize,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            accepted_directive_types: vec![
                "goal".to_string(),
                "task".to_string(),
                "query".to_string(),
                "routine".to_string(),
            ],
            max_stage_width: None,
            event_capacity: 256,
        }
    }
}

impl CortexConfig {
    /// Load a configuration from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> CortexResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CortexError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: CortexConfig = toml::from_str(&content)
            .map_err(|e| CortexError::Config(format!("invalid {}: {}", path.display(), e)))?;
        config.validated()
    }

    /// Build a configuration from `CORTEX_*` environment variables over the defaults.
    pub fn from_env() -> CortexResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CortexConfig::from_env`], reading each `CORTEX_*` key through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CortexResult<Self> {
        let mut config = CortexConfig::default();

        if let Some(types) = lookup(ENV_ACCEPTED_DIRECTIVES) {
            config.accepted_directive_types = types
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(width) = lookup(ENV_MAX_STAGE_WIDTH) {
            let width = width.trim().parse::<usize>().map_err(|e| {
                CortexError::Config(format!("{} must be an integer: {}", ENV_MAX_STAGE_WIDTH, e))
            })?;
            config.max_stage_width = Some(width);
        }
        if let Some(capacity) = lookup(ENV_EVENT_CAPACITY) {
            config.event_capacity = capacity.trim().parse::<usize>().map_err(|e| {
                CortexError::Config(format!("{} must be an integer: {}", ENV_EVENT_CAPACITY, e))
            })?;
        }

        config.validated()
    }

    pub fn accepts(&self, directive_type: &str) -> bool {
        self.accepted_directive_types
            .iter()
            .any(|accepted| accepted == directive_type)
    }

    fn validated(self) -> CortexResult<Self> {
        if self.accepted_directive_types.is_empty() {
            return Err(CortexError::Config(
                "accepted_directive_types must not be empty".to_string(),
            ));
        }
        if self.max_stage_width == Some(0) {
            return Err(CortexError::Config(
                "max_stage_width must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(CortexError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}
