//! Error types for hashtable construction and configuration.
//!
//! Routine negative outcomes (key not found, no memory, not eligible for
//! eviction, resize skipped) are not errors; see [`crate::MutationStatus`]
//! and [`crate::ResizeOutcome`].

/// Errors that can occur while configuring or building a hashtable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The initial bucket count must be at least one.
    #[error("initial size must be non-zero")]
    ZeroSize,

    /// The shard lock count must be at least one.
    #[error("lock count must be non-zero")]
    ZeroLocks,

    /// The initial bucket count exceeds the largest representable table.
    #[error("initial size {0} exceeds the maximum bucket count")]
    SizeTooLarge(usize),

    /// The configuration text could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(String),
}

/// Result type for configuration and construction.
pub type ConfigResult<T> = Result<T, ConfigError>;
