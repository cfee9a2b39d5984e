//! Error types for the pipeline runtime.

use thiserror::Error;

/// Errors raised by the configuration subsystem.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Lookup of a key that is not present in the mapping.
    #[error("config has no key '{key}'")]
    KeyMissing { key: String },

    /// Direct write to a sealed snapshot.
    #[error("config '{name}' is read only, set values on the master config")]
    ReadOnly { name: String },

    /// Snapshot requested after the pipeline has started.
    #[error("config snapshots cannot be created after the pipeline has started")]
    SnapshotAfterStart,

    #[error("config serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while declaring or validating the stage graph.
///
/// All of these fail `init()` hard; none of them can occur once the
/// pipeline is running.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown stage id {0}")]
    UnknownStage(usize),

    #[error("consumer stage {0} already has a primary connection")]
    DuplicatePrimary(usize),

    #[error("stage connections contain a cycle")]
    Cycle,
}
