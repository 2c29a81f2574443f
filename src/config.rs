//! Hashtable configuration.
//!
//! Configuration can be built in code with the `with_*` setters or loaded
//! from a TOML table:
//!
//! ```toml
//! initial_size = 3079
//! num_locks = 193
//! ```

use crate::error::{ConfigError, ConfigResult};
use serde::Deserialize;

/// Default initial bucket count.
pub const DEFAULT_INITIAL_SIZE: usize = 47;

/// Default number of shard locks.
pub const DEFAULT_NUM_LOCKS: usize = 47;

/// Largest bucket count a table may have.
pub const MAX_SIZE: usize = i32::MAX as usize;

/// Hashtable sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashTableConfig {
    /// Bucket count at construction. Also the floor for automatic resizing.
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,

    /// Number of shard locks. Fixed for the lifetime of the table.
    #[serde(default = "default_num_locks")]
    pub num_locks: usize,
}

fn default_initial_size() -> usize {
    DEFAULT_INITIAL_SIZE
}

fn default_num_locks() -> usize {
    DEFAULT_NUM_LOCKS
}

impl Default for HashTableConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            num_locks: DEFAULT_NUM_LOCKS,
        }
    }
}

impl HashTableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    pub fn with_num_locks(mut self, num_locks: usize) -> Self {
        self.num_locks = num_locks;
        self
    }

    /// Check the configuration can build a table.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.initial_size == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if self.initial_size > MAX_SIZE {
            return Err(ConfigError::SizeTooLarge(self.initial_size));
        }
        if self.num_locks == 0 {
            return Err(ConfigError::ZeroLocks);
        }
        Ok(())
    }

    /// Parse and validate a TOML table.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
