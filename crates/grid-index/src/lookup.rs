//! Lon/lat to grid-cell lookup for curvilinear grids.
//!
//! `KdTreeGrid` answers "which cell of this grid holds this position" for
//! the renderer. Each lookup runs the approximate k-d tree search, picks the
//! candidate cell whose centre is closest, and if that cell does not contain
//! the position walks to closer edge neighbours for a bounded number of
//! rounds.
//!
//! # Architecture
//!
//! ```text
//! GetMap pixel (lon, lat)
//!      │
//!      ▼
//! KdTree::approx_nearest_neighbour   (expanding window)
//!      │
//!      ├─► no candidates ─► None (outside the grid)
//!      │
//!      ▼
//! closest candidate cell
//!      │
//!      ├─► contains point ─► (i, j)
//!      │
//!      └─► neighbour walk (minimisation_iterations rounds) ─► (i, j)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use once_cell::sync::Lazy;
use rayon::prelude::*;
use tracing::debug;
use wms_common::{constrain_lon_180, BoundingBox, Cell, CurvilinearGrid, GridCoord, LatLon};

use crate::config::IndexConfig;
use crate::error::Result;
use crate::kdtree::KdTree;

/// Built lookups keyed by grid fingerprint.
static CACHE: Lazy<RwLock<HashMap<u64, Arc<KdTreeGrid>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// A curvilinear grid paired with a k-d tree over its cell centres.
#[derive(Debug)]
pub struct KdTreeGrid {
    grid: Arc<CurvilinearGrid>,
    tree: KdTree,
    config: IndexConfig,
    max_distance: f64,
    /// Grid extent widened by `max_distance`; nothing outside can match.
    coverage: Option<BoundingBox>,
}

impl KdTreeGrid {
    /// Get the lookup for `grid`, building and caching it on first use.
    ///
    /// A cached entry is reused only if it was built for an identical grid
    /// with the same configuration; otherwise it is replaced.
    pub fn generate(grid: Arc<CurvilinearGrid>, config: &IndexConfig) -> Result<Arc<Self>> {
        let key = grid.fingerprint();

        {
            let cache = CACHE.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(found) = cache.get(&key) {
                if *found.grid == *grid && found.config == *config {
                    debug!(fingerprint = key, "kd-tree found in cache");
                    return Ok(Arc::clone(found));
                }
            }
        }

        debug!(fingerprint = key, "Need to generate new kd-tree");
        let start = Instant::now();
        let lookup = Arc::new(Self::new(grid, config)?);
        debug!(
            fingerprint = key,
            cells = lookup.grid.size(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "Generated new kd-tree"
        );

        CACHE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&lookup));
        Ok(lookup)
    }

    /// Build an uncached lookup.
    pub fn new(grid: Arc<CurvilinearGrid>, config: &IndexConfig) -> Result<Self> {
        let tree = KdTree::build_from(grid.clone(), config)?;
        let max_distance = config.max_distance.unwrap_or_else(|| {
            grid.mean_cell_area()
                .sqrt()
                .max(config.nominal_minimum_resolution)
        });

        let coverage = grid.bbox().map(|b| {
            BoundingBox::new(
                b.min_x - max_distance,
                b.min_y - max_distance,
                b.max_x + max_distance,
                b.max_y + max_distance,
            )
        });

        Ok(Self {
            grid,
            tree,
            config: config.clone(),
            max_distance,
            coverage,
        })
    }

    /// Drop every cached lookup.
    pub fn clear_cache() {
        CACHE
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of cached lookups.
    pub fn cache_len() -> usize {
        CACHE.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn grid(&self) -> &CurvilinearGrid {
        &self.grid
    }

    pub fn tree(&self) -> &KdTree {
        &self.tree
    }

    /// Largest window half-width used by lookups, in degrees.
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Region outside which every lookup returns `None`.
    pub fn coverage(&self) -> Option<BoundingBox> {
        self.coverage
    }

    /// The grid cell holding (or nearest to) a position.
    ///
    /// Returns `None` when no cell centre lies within the maximum search
    /// distance, i.e. the position is outside the grid.
    pub fn find_nearest_grid_point(&self, lon: f64, lat: f64) -> Option<GridCoord> {
        let pos = LatLon::new(lat, constrain_lon_180(lon));
        if !self.coverage?.contains_point(pos.lon, pos.lat) {
            return None;
        }

        // The tree is always built here, so the only error is unreachable.
        let candidates = self
            .tree
            .approx_nearest_neighbour(pos.lat, pos.lon, self.max_distance)
            .ok()?;

        let mut best: Option<(Cell<'_>, f64)> = None;
        for point in &candidates {
            let coord = self.grid.coord_of(point.source_index);
            let cell = self.grid.cell(coord.i, coord.j).ok()?;
            let distance = cell.distance_sq(pos);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((cell, distance));
            }
        }
        let (mut closest, mut shortest) = best?;

        if closest.contains(pos) {
            return Some(closest.coord());
        }

        let mut examined = HashSet::from([closest.coord()]);
        let mut found_closer = true;
        let mut found_containing = false;
        for _ in 0..self.config.minimisation_iterations {
            if !found_closer || found_containing {
                break;
            }
            found_closer = false;
            for neighbour in closest.edge_neighbours() {
                if !examined.insert(neighbour.coord()) {
                    continue;
                }
                let distance = neighbour.distance_sq(pos);
                if distance < shortest {
                    closest = neighbour;
                    shortest = distance;
                    found_closer = true;
                    if neighbour.contains(pos) {
                        found_containing = true;
                        break;
                    }
                }
            }
        }

        Some(closest.coord())
    }

    /// [`find_nearest_grid_point`](Self::find_nearest_grid_point) for many
    /// positions in parallel.
    pub fn find_nearest_grid_points(&self, positions: &[LatLon]) -> Vec<Option<GridCoord>> {
        positions
            .par_iter()
            .map(|p| self.find_nearest_grid_point(p.lon, p.lat))
            .collect()
    }

    /// Flat source index (`j * ni + i`) for every pixel of a regular
    /// `width` x `height` image covering `bbox`, row 0 at the north edge.
    pub fn pixel_index(&self, bbox: &BoundingBox, width: usize, height: usize) -> Vec<Option<usize>> {
        (0..width * height)
            .into_par_iter()
            .map(|pixel| {
                let (lon, lat) = bbox.pixel_centre(pixel % width, pixel / width, width, height);
                self.find_nearest_grid_point(lon, lat)
                    .map(|c| self.grid.flat_index(c.i, c.j))
            })
            .collect()
    }
}
