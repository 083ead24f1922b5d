use thiserror::Error;

/// Errors reported by marker tree operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerTreeError {
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange { start: usize, end: usize },

    #[error("marker tree has been disposed")]
    Disposed,

    /// Partial-sum trees only hold zero-width, non-greedy markers
    #[error("unsupported marker [{start}, {end}) for a partial-sum tree")]
    UnsupportedMarker { start: usize, end: usize },

    #[error("marker tree corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, MarkerTreeError>;
