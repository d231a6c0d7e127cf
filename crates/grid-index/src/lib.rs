//! Spatial Index for Curvilinear Grids
//!
//! This crate maps lon/lat positions to cells of curvilinear (non-rectilinear)
//! grids such as ocean model output. It provides:
//!
//! - **Exact queries**: nearest neighbour and axis-aligned range search over
//!   cell centres via a static 2D k-d tree
//! - **Approximate search**: an expanding square window that returns the
//!   first non-empty set of nearby centres, bounded by a maximum distance
//! - **Grid lookup**: the containing cell for a position, refined by a short
//!   walk over edge neighbours, with built lookups cached per grid
//!
//! # Architecture
//!
//! ```text
//! CurvilinearGrid (centres + derived corners)
//!      │
//!      ▼
//! KdTree::build  (sort by lat, recursive median split)
//!      │
//!      ├─► nearest_neighbour / range_query      (exact)
//!      │
//!      ├─► approx_nearest_neighbour             (expanding window)
//!      │
//!      └─► KdTreeGrid::find_nearest_grid_point  (cell containment)
//!               │
//!               ▼
//!          GridCoord (i, j) for the renderer
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use grid_index::{IndexConfig, KdTreeGrid};
//! use wms_common::CurvilinearGrid;
//!
//! let grid = Arc::new(CurvilinearGrid::new(ni, nj, lons, lats)?);
//! let lookup = KdTreeGrid::generate(grid, &IndexConfig::from_env())?;
//!
//! if let Some(cell) = lookup.find_nearest_grid_point(-30.5, 45.2) {
//!     println!("cell ({}, {})", cell.i, cell.j);
//! }
//! ```

pub mod approx;
pub mod config;
pub mod error;
pub mod kdtree;
pub mod lookup;
pub mod verify;

// Re-export commonly used types at crate root
pub use approx::ApproxQueryStats;
pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use kdtree::{KdTree, Point, SplitNode, TreeNode};
pub use lookup::KdTreeGrid;
pub use verify::{verify_tree, TreeViolation};
