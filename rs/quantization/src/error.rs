use thiserror::Error;

/// Failure classes callers may want to tell apart. They travel inside `anyhow::Error`; use
/// `err.downcast_ref::<RabitqError>()` to inspect them.
#[derive(Error, Debug)]
pub enum RabitqError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cluster id {id} out of range for {num_clusters} clusters")]
    ClusterIdOutOfRange { id: u32, num_clusters: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted file: {0}")]
    CorruptedFile(String),
}
