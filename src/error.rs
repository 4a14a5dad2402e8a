//! Error types for the ML feedback loop

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core subsystems.
///
/// Variants are deliberately split so callers can tell "no data yet" apart from
/// transient storage failures and corrupt artifacts instead of collapsing all
/// three into a generic fallback.
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal at startup: missing or invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Repository (database) failure
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Filesystem or network I/O failure (artifacts, exports, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact exists but cannot be deserialized
    #[error("corrupt model artifact: {0}")]
    CorruptArtifact(#[from] serde_json::Error),

    /// Training artifacts have not been exported yet
    #[error("training data missing: {0}")]
    TrainingDataMissing(String),

    /// Training input failed a structural check (not a sample-size gate)
    #[error("invalid training data: {0}")]
    InvalidTrainingData(String),
}
