//! Error types for grid definitions.

use thiserror::Error;

/// Result type alias using GridError.
pub type GridResult<T> = Result<T, GridError>;

/// Errors raised while constructing or addressing a horizontal grid.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("Coordinate array length {actual} does not match grid shape {ni}x{nj}")]
    ShapeMismatch { ni: usize, nj: usize, actual: usize },

    #[error("Grid must have at least {min} cells along each axis, got {ni}x{nj}")]
    TooSmall { ni: usize, nj: usize, min: usize },

    #[error("Cell ({i}, {j}) is outside grid of {ni}x{nj} cells")]
    CellOutOfRange {
        i: usize,
        j: usize,
        ni: usize,
        nj: usize,
    },
}
