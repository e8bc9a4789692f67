// config.rs — Scheduler tuning options
//
// Knobs that are not part of the machine model: which inlining rules run and
// the bounds of the tile and task size searches. Loaded from JSON; missing
// fields take their defaults, unknown fields are rejected.
//
// Preconditions: none.
// Postconditions: a loaded `SchedulerOptions` has positive tile and task sizes.
// Failure modes: unreadable file → `ConfigError::Io`; bad JSON or unknown
//   field → `ConfigError::Json`; zero or inverted sizes → `ConfigError::Invalid`.
// Side effects: `load` reads one file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerOptions {
    /// Inline stages whose evaluation is no dearer than a load.
    pub inline_trivial: bool,
    /// Inline single-consumer element-wise stages.
    pub inline_element_wise: bool,
    /// Smallest number of points a parallel task should cover.
    pub min_task_points: u64,
    /// Largest tile extent tried along any dimension.
    pub max_tile_extent: i64,
    /// Smallest tile extent tried along non-innermost dimensions.
    pub min_tile_extent: i64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions {
            inline_trivial: true,
            inline_element_wise: true,
            min_task_points: 4096,
            max_tile_extent: 256,
            min_tile_extent: 8,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read options file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid options JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid option '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl SchedulerOptions {
    /// Options with both inlining rules disabled.
    pub fn without_inlining() -> Self {
        SchedulerOptions {
            inline_trivial: false,
            inline_element_wise: false,
            ..SchedulerOptions::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let options: SchedulerOptions = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_task_points == 0 {
            return Err(ConfigError::Invalid {
                field: "min_task_points",
                reason: "must be positive".to_string(),
            });
        }
        if self.min_tile_extent < 1 {
            return Err(ConfigError::Invalid {
                field: "min_tile_extent",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_tile_extent < self.min_tile_extent {
            return Err(ConfigError::Invalid {
                field: "max_tile_extent",
                reason: format!("must be at least min_tile_extent ({})", self.min_tile_extent),
            });
        }
        Ok(())
    }
}
