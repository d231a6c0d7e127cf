//! Small point sets with hand-checked answers.

use wms_common::LatLon;

/// The corners of the unit square, in the order
/// (0,0), (0,1), (1,0), (1,1) as (lat, lon).
pub fn four_point_grid() -> Vec<LatLon> {
    vec![
        LatLon::new(0.0, 0.0),
        LatLon::new(0.0, 1.0),
        LatLon::new(1.0, 0.0),
        LatLon::new(1.0, 1.0),
    ]
}

pub fn single_point() -> Vec<LatLon> {
    vec![LatLon::new(42.0, -7.0)]
}

/// `n` points along the meridian at longitude 0, one degree apart from the equator.
pub fn collinear_points(n: usize) -> Vec<LatLon> {
    (0..n).map(|i| LatLon::new(i as f64, 0.0)).collect()
}

/// Points every ten degrees of longitude along the equator.
pub fn equator_points(n: usize) -> Vec<LatLon> {
    (0..n).map(|i| LatLon::new(0.0, i as f64 * 10.0)).collect()
}
