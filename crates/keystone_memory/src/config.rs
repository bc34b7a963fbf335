//! # Memory Configuration
//!
//! Arena sizing policy for the [`MemoryManager`](crate::MemoryManager).
//! Loaded once at startup, typically from a TOML section:
//!
//! ```toml
//! min_arena_size = 4194304
//! arena_alignment = 64
//! reuse_arenas = true
//! max_arenas = 8
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};

/// Default minimum arena size (1 MiB).
pub const DEFAULT_MIN_ARENA_SIZE: usize = 1024 * 1024;

/// Default arena base alignment.
pub const DEFAULT_ARENA_ALIGNMENT: usize = 16;

/// Arena sizing policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Smallest arena reserved from the host. Larger requests get an arena
    /// sized to fit.
    pub min_arena_size: usize,
    /// Base alignment of every arena, and granularity of arena sizes.
    pub arena_alignment: usize,
    /// Try existing arenas before reserving a new one.
    pub reuse_arenas: bool,
    /// Upper bound on live arenas. `None` is unlimited.
    pub max_arenas: Option<usize>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            min_arena_size: DEFAULT_MIN_ARENA_SIZE,
            arena_alignment: DEFAULT_ARENA_ALIGNMENT,
            reuse_arenas: true,
            max_arenas: None,
        }
    }
}

impl MemoryConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for malformed TOML or values
    /// rejected by [`MemoryConfig::validate`].
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| MemoryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the manager cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.min_arena_size == 0 {
            return Err(MemoryError::InvalidConfig(
                "min_arena_size must be greater than zero".into(),
            ));
        }
        if !self.arena_alignment.is_power_of_two() {
            return Err(MemoryError::InvalidConfig(format!(
                "arena_alignment {} is not a power of two",
                self.arena_alignment
            )));
        }
        if self.max_arenas == Some(0) {
            return Err(MemoryError::InvalidConfig(
                "max_arenas must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
