use thiserror::Error;

use crate::multigrid::DataKey;

// Unified error type for mulgrid

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MgError {
    #[error("operator not ready: {0}")]
    NotReady(String),
    #[error("already filled: {0}")]
    AlreadyFilled(String),
    #[error("index {index} out of range (bound {bound})")]
    OutOfRange { index: usize, bound: usize },
    #[error("no data or factory for {key:?} on level {level}")]
    MissingDependency { key: DataKey, level: usize },
    #[error("cyclic factory dependency while resolving {key:?} on level {level}")]
    CyclicDependency { key: DataKey, level: usize },
    #[error("level {level}: factory {factory} failed: {reason}")]
    BuildFailed { level: usize, factory: String, reason: String },
    #[error("level {level}: coarsening stalled ({fine_rows} -> {coarse_rows} rows)")]
    StallDetected { level: usize, fine_rows: usize, coarse_rows: usize },
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("invalid parameter {key:?}: {reason}")]
    InvalidParameter { key: String, reason: String },
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
    #[error("sparse kernel failed: {0}")]
    SparseKernel(#[from] faer::sparse::FaerError),
    #[error("invalid sparse structure: {0}")]
    SparseStructure(#[from] faer::sparse::CreationError),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl MgError {
    /// Numerical coarsening failures the hierarchy absorbs by truncating.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MgError::BuildFailed { .. } | MgError::StallDetected { .. })
    }

    pub(crate) fn dim(msg: impl Into<String>) -> Self {
        MgError::DimensionMismatch(msg.into())
    }
}
