//! Error types for spatial index construction and querying.

use thiserror::Error;
use wms_common::GridError;

/// Errors that can occur while building or querying a grid index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The cell source had no cells with finite coordinates.
    #[error("cannot build index over zero points ({cells} cells supplied, all skipped)")]
    EmptyInput { cells: usize },

    /// A query was issued before `build` completed.
    #[error("index not built")]
    NotBuilt,

    /// Query parameters or configuration out of range.
    #[error("invalid index configuration: {0}")]
    InvalidConfig(String),

    /// The underlying grid definition was rejected.
    #[error(transparent)]
    Grid(#[from] GridError),
}

impl IndexError {
    /// Create an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Result type for grid index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
