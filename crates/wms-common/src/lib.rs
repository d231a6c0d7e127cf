//! Common types shared by the grid index crates: bounding boxes and the curvilinear grid model.

pub mod bbox;
pub mod error;
pub mod grid;

pub use bbox::{BboxParseError, BoundingBox};
pub use error::{GridError, GridResult};
pub use grid::{
    constrain_lon_180, harmonize_longitudes, Cell, CellSource, CurvilinearGrid, GridCoord, LatLon,
};
