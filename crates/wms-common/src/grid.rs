//! Curvilinear horizontal grids.
//!
//! A curvilinear grid is defined by explicit latitude and longitude
//! coordinates for the centre of every cell, stored as two flattened
//! `ni * nj` arrays with `i` varying fastest. Ocean models on tripolar or
//! rotated-pole grids and satellite swaths come in this form: there is no
//! closed-form mapping from lon/lat back to `(i, j)`, which is why a spatial
//! index is needed to render them.

use crate::error::{GridError, GridResult};
use crate::BoundingBox;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True if either coordinate is NaN.
    pub fn is_nan(&self) -> bool {
        self.lat.is_nan() || self.lon.is_nan()
    }
}

/// Anything that can enumerate a fixed set of cell centres.
///
/// Indices run from `0` to `cell_count() - 1` and must be stable for the
/// lifetime of the source: spatial indices hand these positions back to the
/// caller to address data arrays.
pub trait CellSource: Send + Sync {
    fn cell_count(&self) -> usize;

    fn centre(&self, index: usize) -> LatLon;
}

impl CellSource for [LatLon] {
    fn cell_count(&self) -> usize {
        self.len()
    }

    fn centre(&self, index: usize) -> LatLon {
        self[index]
    }
}

impl CellSource for Vec<LatLon> {
    fn cell_count(&self) -> usize {
        self.len()
    }

    fn centre(&self, index: usize) -> LatLon {
        self[index]
    }
}

/// Wrap a longitude into [-180, 180]. Values already in range are untouched.
pub fn constrain_lon_180(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) || !lon.is_finite() {
        return lon;
    }
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Returns the longitude equivalent to `test` that is closest to `reference`.
///
/// The result is not necessarily in [-180, 180]; it is what should be used
/// when comparing or averaging longitudes that straddle the anti-meridian.
pub fn harmonize_longitudes(reference: f64, test: f64) -> f64 {
    if !reference.is_finite() || !test.is_finite() {
        return test;
    }
    test + 360.0 * ((reference - test) / 360.0).round()
}

/// Grid coordinates of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCoord {
    pub i: usize,
    pub j: usize,
}

/// A horizontal grid defined by explicit lon/lat cell centres.
#[derive(Debug, Clone)]
pub struct CurvilinearGrid {
    ni: usize,
    nj: usize,
    longitudes: Vec<f64>,
    latitudes: Vec<f64>,
    /// `(ni + 1) * (nj + 1)` corner longitudes, harmonised per cell neighbourhood.
    corner_lons: Vec<f64>,
    corner_lats: Vec<f64>,
    fingerprint: u64,
}

impl CurvilinearGrid {
    /// Minimum number of cells along each axis, needed to extrapolate corners.
    pub const MIN_CELLS: usize = 2;

    /// Create a grid from flattened centre coordinates (`i` varies fastest).
    ///
    /// Longitudes are wrapped into [-180, 180]. NaN coordinates are kept:
    /// they mark cells with no position (e.g. land in an ocean model).
    pub fn new(
        ni: usize,
        nj: usize,
        mut longitudes: Vec<f64>,
        latitudes: Vec<f64>,
    ) -> GridResult<Self> {
        if ni < Self::MIN_CELLS || nj < Self::MIN_CELLS {
            return Err(GridError::TooSmall {
                ni,
                nj,
                min: Self::MIN_CELLS,
            });
        }
        for len in [longitudes.len(), latitudes.len()] {
            if len != ni * nj {
                return Err(GridError::ShapeMismatch {
                    ni,
                    nj,
                    actual: len,
                });
            }
        }

        for lon in longitudes.iter_mut() {
            *lon = constrain_lon_180(*lon);
        }

        let corner_lons = make_corners(&longitudes, ni, nj, true);
        let corner_lats = make_corners(&latitudes, ni, nj, false);

        let mut hasher = DefaultHasher::new();
        ni.hash(&mut hasher);
        nj.hash(&mut hasher);
        for v in longitudes.iter().chain(latitudes.iter()) {
            v.to_bits().hash(&mut hasher);
        }

        Ok(Self {
            ni,
            nj,
            longitudes,
            latitudes,
            corner_lons,
            corner_lats,
            fingerprint: hasher.finish(),
        })
    }

    /// Number of cells in the i direction.
    pub fn ni(&self) -> usize {
        self.ni
    }

    /// Number of cells in the j direction.
    pub fn nj(&self) -> usize {
        self.nj
    }

    /// Total number of cells.
    pub fn size(&self) -> usize {
        self.longitudes.len()
    }

    /// Hash of the grid shape and coordinates, used as a cache key.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Flat index of cell (i, j).
    pub fn flat_index(&self, i: usize, j: usize) -> usize {
        j * self.ni + i
    }

    /// Grid coordinates of a flat index.
    pub fn coord_of(&self, index: usize) -> GridCoord {
        GridCoord {
            i: index % self.ni,
            j: index / self.ni,
        }
    }

    pub fn cell(&self, i: usize, j: usize) -> GridResult<Cell<'_>> {
        if i >= self.ni || j >= self.nj {
            return Err(GridError::CellOutOfRange {
                i,
                j,
                ni: self.ni,
                nj: self.nj,
            });
        }
        Ok(Cell { grid: self, i, j })
    }

    /// Iterate over all cells with `i` varying fastest.
    pub fn cells(&self) -> impl Iterator<Item = Cell<'_>> + '_ {
        (0..self.size()).map(move |index| {
            let c = self.coord_of(index);
            Cell {
                grid: self,
                i: c.i,
                j: c.j,
            }
        })
    }

    /// Bounding box of all non-NaN cell centres.
    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::enclosing(
            self.longitudes
                .iter()
                .copied()
                .zip(self.latitudes.iter().copied()),
        )
    }

    /// Mean area of the cells with finite corners, in square degrees.
    pub fn mean_cell_area(&self) -> f64 {
        let (sum, count) = self
            .cells()
            .map(|c| c.area())
            .filter(|a| a.is_finite())
            .fold((0.0, 0usize), |(s, n), a| (s + a, n + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    fn corner(&self, ci: usize, cj: usize) -> LatLon {
        let idx = cj * (self.ni + 1) + ci;
        LatLon::new(self.corner_lats[idx], self.corner_lons[idx])
    }
}

impl CellSource for CurvilinearGrid {
    fn cell_count(&self) -> usize {
        self.size()
    }

    fn centre(&self, index: usize) -> LatLon {
        LatLon::new(self.latitudes[index], self.longitudes[index])
    }
}

impl PartialEq for CurvilinearGrid {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
            && self.ni == other.ni
            && self.nj == other.nj
            && bits_eq(&self.longitudes, &other.longitudes)
            && bits_eq(&self.latitudes, &other.latitudes)
    }
}

impl Eq for CurvilinearGrid {}

impl Hash for CurvilinearGrid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

fn bits_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

/// A cell within a [`CurvilinearGrid`].
#[derive(Debug, Clone, Copy)]
pub struct Cell<'a> {
    grid: &'a CurvilinearGrid,
    i: usize,
    j: usize,
}

impl<'a> Cell<'a> {
    pub fn i(&self) -> usize {
        self.i
    }

    pub fn j(&self) -> usize {
        self.j
    }

    pub fn coord(&self) -> GridCoord {
        GridCoord {
            i: self.i,
            j: self.j,
        }
    }

    pub fn centre(&self) -> LatLon {
        self.grid.centre(self.grid.flat_index(self.i, self.j))
    }

    /// The four corners, in order (i,j), (i+1,j), (i+1,j+1), (i,j+1).
    pub fn corners(&self) -> [LatLon; 4] {
        let (i, j) = (self.i, self.j);
        [
            self.grid.corner(i, j),
            self.grid.corner(i + 1, j),
            self.grid.corner(i + 1, j + 1),
            self.grid.corner(i, j + 1),
        ]
    }

    /// Up to four neighbours sharing an edge with this cell.
    ///
    /// Ordered so that joining their centres gives a non-self-intersecting
    /// polygon.
    pub fn edge_neighbours(&self) -> Vec<Cell<'a>> {
        let mut neighbours = Vec::with_capacity(4);
        let (i, j) = (self.i, self.j);
        if i > 0 {
            neighbours.push(Cell { i: i - 1, ..*self });
        }
        if j > 0 {
            neighbours.push(Cell { j: j - 1, ..*self });
        }
        if i + 1 < self.grid.ni {
            neighbours.push(Cell { i: i + 1, ..*self });
        }
        if j + 1 < self.grid.nj {
            neighbours.push(Cell { j: j + 1, ..*self });
        }
        neighbours
    }

    /// Squared lon/lat distance from the cell centre to `pos`.
    ///
    /// The centre longitude is harmonised with `pos` first, so cells on the
    /// other side of the anti-meridian are measured the short way round.
    pub fn distance_sq(&self, pos: LatLon) -> f64 {
        let centre = self.centre();
        let dlon = harmonize_longitudes(pos.lon, centre.lon) - pos.lon;
        let dlat = centre.lat - pos.lat;
        dlat * dlat + dlon * dlon
    }

    /// Whether `pos` lies inside the quadrilateral formed by the corners.
    pub fn contains(&self, pos: LatLon) -> bool {
        let corners = self.corners();
        if pos.is_nan() || corners.iter().any(LatLon::is_nan) {
            return false;
        }
        let xs: Vec<f64> = corners
            .iter()
            .map(|c| harmonize_longitudes(pos.lon, c.lon))
            .collect();

        // Ray casting along +x
        let mut inside = false;
        let mut prev = corners.len() - 1;
        for curr in 0..corners.len() {
            let (yi, yj) = (corners[curr].lat, corners[prev].lat);
            if (yi > pos.lat) != (yj > pos.lat) {
                let x_cross = xs[curr] + (pos.lat - yi) * (xs[prev] - xs[curr]) / (yj - yi);
                if pos.lon < x_cross {
                    inside = !inside;
                }
            }
            prev = curr;
        }
        inside
    }

    /// Area of the cell in square degrees (NaN if any corner is NaN).
    pub fn area(&self) -> f64 {
        let corners = self.corners();
        let reference = corners[0].lon;
        let mut twice_area = 0.0;
        for k in 0..corners.len() {
            let a = corners[k];
            let b = corners[(k + 1) % corners.len()];
            let ax = harmonize_longitudes(reference, a.lon);
            let bx = harmonize_longitudes(reference, b.lon);
            twice_area += ax * b.lat - bx * a.lat;
        }
        (twice_area / 2.0).abs()
    }
}

impl PartialEq for Cell<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.grid, other.grid) && self.i == other.i && self.j == other.j
    }
}

impl Eq for Cell<'_> {}

/// Compute `(ni + 1) * (nj + 1)` cell corners from cell centres.
///
/// The centre array is first padded by one cell on every side using linear
/// extrapolation, then every corner is the mean of the four padded centres
/// surrounding it. Longitudes are harmonised against the first value of each
/// group before extrapolating or averaging.
fn make_corners(centres: &[f64], ni: usize, nj: usize, is_longitude: bool) -> Vec<f64> {
    let adjust = |reference: f64, test: f64| {
        if is_longitude {
            harmonize_longitudes(reference, test)
        } else {
            test
        }
    };

    let w = ni + 2;
    let mut ext = vec![f64::NAN; w * (nj + 2)];
    for j in 0..nj {
        for i in 0..ni {
            ext[(j + 1) * w + i + 1] = centres[j * ni + i];
        }
    }

    for j in 1..=nj {
        let row = j * w;
        let first = ext[row + 1];
        ext[row] = 2.0 * first - adjust(first, ext[row + 2]);
        let last = ext[row + ni];
        ext[row + ni + 1] = 2.0 * last - adjust(last, ext[row + ni - 1]);
    }
    for i in 0..w {
        let first = ext[w + i];
        ext[i] = 2.0 * first - adjust(first, ext[2 * w + i]);
        let last = ext[nj * w + i];
        ext[(nj + 1) * w + i] = 2.0 * last - adjust(last, ext[(nj - 1) * w + i]);
    }

    let mut corners = Vec::with_capacity((ni + 1) * (nj + 1));
    for cj in 0..=nj {
        for ci in 0..=ni {
            let reference = ext[cj * w + ci];
            let sum = reference
                + adjust(reference, ext[cj * w + ci + 1])
                + adjust(reference, ext[(cj + 1) * w + ci])
                + adjust(reference, ext[(cj + 1) * w + ci + 1]);
            corners.push(sum / 4.0);
        }
    }
    corners
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Regular 1-degree grid with centres at integer lon/lat.
    fn regular_grid(ni: usize, nj: usize, lon0: f64, lat0: f64) -> CurvilinearGrid {
        let mut lons = Vec::with_capacity(ni * nj);
        let mut lats = Vec::with_capacity(ni * nj);
        for j in 0..nj {
            for i in 0..ni {
                lons.push(lon0 + i as f64);
                lats.push(lat0 + j as f64);
            }
        }
        CurvilinearGrid::new(ni, nj, lons, lats).unwrap()
    }

    #[test]
    fn test_constrain_lon_180() {
        assert_eq!(constrain_lon_180(10.0), 10.0);
        assert_eq!(constrain_lon_180(180.0), 180.0);
        assert!((constrain_lon_180(190.0) - (-170.0)).abs() < 1e-12);
        assert!((constrain_lon_180(-190.0) - 170.0).abs() < 1e-12);
        assert!((constrain_lon_180(720.0 + 45.0) - 45.0).abs() < 1e-12);
        assert!(constrain_lon_180(f64::NAN).is_nan());
    }

    #[test]
    fn test_harmonize_longitudes() {
        assert_eq!(harmonize_longitudes(179.0, -179.0), 181.0);
        assert_eq!(harmonize_longitudes(-179.0, 179.0), -181.0);
        assert_eq!(harmonize_longitudes(10.0, 20.0), 20.0);
    }

    #[test]
    fn test_shape_validation() {
        let err = CurvilinearGrid::new(3, 3, vec![0.0; 9], vec![0.0; 8]).unwrap_err();
        assert!(matches!(err, GridError::ShapeMismatch { actual: 8, .. }));

        let err = CurvilinearGrid::new(1, 5, vec![0.0; 5], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, GridError::TooSmall { .. }));
    }

    #[test]
    fn test_regular_grid_corners_and_containment() {
        let grid = regular_grid(4, 3, 10.0, 50.0);
        let cell = grid.cell(1, 1).unwrap();

        let corners = cell.corners();
        assert!((corners[0].lon - 10.5).abs() < 1e-9);
        assert!((corners[0].lat - 50.5).abs() < 1e-9);
        assert!((corners[2].lon - 11.5).abs() < 1e-9);
        assert!((corners[2].lat - 51.5).abs() < 1e-9);

        assert!(cell.contains(LatLon::new(51.2, 11.1)));
        assert!(!cell.contains(LatLon::new(51.7, 11.1)));
        assert!((cell.area() - 1.0).abs() < 1e-9);
        assert!((grid.mean_cell_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_edge_cells_use_extrapolated_corners() {
        let grid = regular_grid(2, 2, 0.0, 0.0);
        let corner_cell = grid.cell(0, 0).unwrap();
        assert!(corner_cell.contains(LatLon::new(-0.4, -0.4)));
        assert!(!corner_cell.contains(LatLon::new(-0.6, 0.0)));
    }

    #[test]
    fn test_edge_neighbours() {
        let grid = regular_grid(3, 3, 0.0, 0.0);
        let centre: Vec<GridCoord> = grid
            .cell(1, 1)
            .unwrap()
            .edge_neighbours()
            .iter()
            .map(Cell::coord)
            .collect();
        assert_eq!(
            centre,
            vec![
                GridCoord { i: 0, j: 1 },
                GridCoord { i: 1, j: 0 },
                GridCoord { i: 2, j: 1 },
                GridCoord { i: 1, j: 2 },
            ]
        );
        assert_eq!(grid.cell(0, 0).unwrap().edge_neighbours().len(), 2);
    }

    #[test]
    fn test_anti_meridian_cell() {
        // Centres at 179, -180 (=180), -179: the middle cell straddles the line
        let lons = vec![179.0, 180.0, 181.0, 179.0, 180.0, 181.0];
        let lats = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let grid = CurvilinearGrid::new(3, 2, lons, lats).unwrap();
        let cell = grid.cell(1, 0).unwrap();

        assert!(cell.contains(LatLon::new(0.2, -179.8)));
        assert!(cell.contains(LatLon::new(0.2, 179.8)));
        assert!(cell.distance_sq(LatLon::new(0.0, -179.9)) < 0.02);
    }

    #[test]
    fn test_cell_out_of_range() {
        let grid = regular_grid(2, 2, 0.0, 0.0);
        assert!(matches!(
            grid.cell(2, 0),
            Err(GridError::CellOutOfRange { i: 2, .. })
        ));
    }

    #[test]
    fn test_fingerprint_and_equality() {
        let a = regular_grid(3, 3, 0.0, 0.0);
        let b = regular_grid(3, 3, 0.0, 0.0);
        let c = regular_grid(3, 3, 1.0, 0.0);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a, c);
    }

    #[test]
    fn test_slice_cell_source() {
        let points = vec![LatLon::new(1.0, 2.0), LatLon::new(3.0, 4.0)];
        assert_eq!(points.cell_count(), 2);
        assert_eq!(points.centre(1), LatLon::new(3.0, 4.0));
    }
}
