//! Synthetic grids and point clouds for index tests and benchmarks.
//!
//! These generators create predictable, verifiable coordinate patterns
//! together with brute-force reference answers to check indexes against.

use std::ops::Range;

use rand::Rng;
use wms_common::{CurvilinearGrid, LatLon};

/// Creates a regular grid rotated about its first cell.
///
/// Cell (i, j) is centred at
/// `(lon0, lat0) + spacing * R(rotation) * (i, j)`, so with a rotation of 0
/// the i axis runs east and the j axis runs north.
///
/// # Arguments
///
/// * `ni`, `nj` - Number of cells along each axis (at least 2)
/// * `lon0`, `lat0` - Centre of cell (0, 0)
/// * `spacing` - Distance between neighbouring centres in degrees
/// * `rotation_deg` - Anticlockwise rotation of the grid axes
///
/// # Example
///
/// ```
/// use test_utils::rotated_grid;
///
/// let grid = rotated_grid(4, 3, 10.0, 20.0, 0.5, 0.0);
/// assert_eq!(grid.size(), 12);
/// ```
pub fn rotated_grid(
    ni: usize,
    nj: usize,
    lon0: f64,
    lat0: f64,
    spacing: f64,
    rotation_deg: f64,
) -> CurvilinearGrid {
    let (sin, cos) = rotation_deg.to_radians().sin_cos();
    let mut lons = Vec::with_capacity(ni * nj);
    let mut lats = Vec::with_capacity(ni * nj);
    for j in 0..nj {
        for i in 0..ni {
            let (x, y) = (i as f64 * spacing, j as f64 * spacing);
            lons.push(lon0 + x * cos - y * sin);
            lats.push(lat0 + x * sin + y * cos);
        }
    }
    CurvilinearGrid::new(ni, nj, lons, lats).expect("rotated grid dimensions are valid")
}

/// Creates a grid whose rows bend like an ocean-model grid near a pole.
///
/// Latitude increases with `j`; each row is shifted east by a sine of its
/// longitude, so no row or column follows a line of constant lat/lon.
pub fn warped_grid(ni: usize, nj: usize, spacing: f64, amplitude: f64) -> CurvilinearGrid {
    let mut lons = Vec::with_capacity(ni * nj);
    let mut lats = Vec::with_capacity(ni * nj);
    for j in 0..nj {
        for i in 0..ni {
            let lon = i as f64 * spacing;
            let lat = j as f64 * spacing + amplitude * (lon.to_radians() * 4.0).sin();
            lons.push(lon + amplitude * (j as f64 * 0.3).cos());
            lats.push(lat);
        }
    }
    CurvilinearGrid::new(ni, nj, lons, lats).expect("warped grid dimensions are valid")
}

/// Creates `n` points uniformly distributed over a lat/lon rectangle.
pub fn random_points<R: Rng>(
    rng: &mut R,
    n: usize,
    lat_range: Range<f64>,
    lon_range: Range<f64>,
) -> Vec<LatLon> {
    (0..n)
        .map(|_| {
            LatLon::new(
                rng.gen_range(lat_range.clone()),
                rng.gen_range(lon_range.clone()),
            )
        })
        .collect()
}

/// Index and squared distance of the closest finite point to (`lat`, `lon`).
///
/// Returns `None` if no point has finite coordinates.
pub fn brute_force_nearest(points: &[LatLon], lat: f64, lon: f64) -> Option<(usize, f64)> {
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.lat.is_finite() && p.lon.is_finite())
        .map(|(i, p)| {
            let (dlat, dlon) = (p.lat - lat, p.lon - lon);
            (i, dlat * dlat + dlon * dlon)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Sorted indices of every point inside the closed lat/lon rectangle.
pub fn brute_force_range(
    points: &[LatLon],
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            p.lat >= min_lat && p.lat <= max_lat && p.lon >= min_lon && p.lon <= max_lon
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use wms_common::CellSource;

    #[test]
    fn test_rotated_grid_unrotated() {
        let grid = rotated_grid(3, 2, 10.0, 20.0, 0.5, 0.0);
        let c = grid.centre(grid.flat_index(2, 1));
        crate::assert_approx_eq!(c.lon, 11.0, 1e-12);
        crate::assert_approx_eq!(c.lat, 20.5, 1e-12);
    }

    #[test]
    fn test_rotated_grid_quarter_turn() {
        // i axis points north after a 90 degree rotation
        let grid = rotated_grid(3, 3, 0.0, 0.0, 1.0, 90.0);
        let c = grid.centre(grid.flat_index(2, 0));
        crate::assert_approx_eq!(c.lon, 0.0, 1e-12);
        crate::assert_approx_eq!(c.lat, 2.0, 1e-12);
    }

    #[test]
    fn test_random_points_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let points = random_points(&mut rng, 100, -10.0..10.0, 100.0..120.0);
        assert_eq!(points.len(), 100);
        assert!(points
            .iter()
            .all(|p| (-10.0..10.0).contains(&p.lat) && (100.0..120.0).contains(&p.lon)));
    }

    #[test]
    fn test_brute_force_skips_nan() {
        let points = vec![
            LatLon::new(f64::NAN, 0.0),
            LatLon::new(3.0, 3.0),
            LatLon::new(1.0, 1.0),
        ];
        assert_eq!(brute_force_nearest(&points, 0.0, 0.0), Some((2, 2.0)));
        assert_eq!(brute_force_range(&points, 0.0, 5.0, 0.0, 5.0), vec![1, 2]);
        assert_eq!(brute_force_nearest(&points[..1], 0.0, 0.0), None);
    }
}
