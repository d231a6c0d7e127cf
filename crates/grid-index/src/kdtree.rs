//! Static 2D k-d tree over grid cell centres.
//!
//! The tree is stored as an implicit complete binary tree: the node at slot
//! `i` has children at `2(i+1)-1` (low side) and `2(i+1)` (high side). The
//! number of slots is `2 * leaf_count - 1` where `leaf_count` is the smallest
//! power of two holding every point. Split axes are chosen per node from
//! whichever of latitude or longitude spans more, which keeps cells compact
//! on grids that are not aligned with lon/lat.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use wms_common::{BoundingBox, CellSource};

use crate::approx::{ApproxCounters, QueryParameters};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};

/// A cell centre stored in a leaf of the tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
    /// Position of the cell in the source enumeration.
    pub source_index: usize,
}

impl Point {
    /// Squared Euclidean distance in lat/lon degrees.
    #[inline]
    pub fn squared_distance(&self, latitude: f64, longitude: f64) -> f64 {
        let dlat = self.latitude - latitude;
        let dlon = self.longitude - longitude;
        dlat * dlat + dlon * dlon
    }

    #[inline]
    fn coordinate(&self, on_latitude: bool) -> f64 {
        if on_latitude {
            self.latitude
        } else {
            self.longitude
        }
    }
}

/// An internal node: a line of constant latitude or longitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitNode {
    pub discriminator: f64,
    pub splits_on_latitude: bool,
}

/// One slot of the implicit tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeNode {
    Split(SplitNode),
    Leaf(Point),
}

#[inline]
pub(crate) fn low_child(index: usize) -> usize {
    2 * (index + 1) - 1
}

#[inline]
pub(crate) fn high_child(index: usize) -> usize {
    2 * (index + 1)
}

/// Spatial index over the cell centres of a [`CellSource`].
///
/// Construct with [`KdTree::new`], then call [`KdTree::build`]. Once built the
/// tree is read-only and every query takes `&self`, so one index can serve
/// many rendering threads.
pub struct KdTree {
    source: Arc<dyn CellSource>,
    tree: Vec<Option<TreeNode>>,
    num_points: usize,
    skipped_cells: usize,
    leaf_count: usize,
    pub(crate) params: QueryParameters,
    pub(crate) counters: ApproxCounters,
}

impl std::fmt::Debug for KdTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KdTree")
            .field("num_points", &self.num_points)
            .field("skipped_cells", &self.skipped_cells)
            .field("leaf_count", &self.leaf_count)
            .field("params", &self.params)
            .finish()
    }
}

impl KdTree {
    /// Bind an index to a cell source. Nothing is built yet.
    pub fn new(source: Arc<dyn CellSource>, config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            tree: Vec::new(),
            num_points: 0,
            skipped_cells: 0,
            leaf_count: 0,
            params: QueryParameters::from(config),
            counters: ApproxCounters::default(),
        })
    }

    /// Bind and build in one step.
    pub fn build_from(source: Arc<dyn CellSource>, config: &IndexConfig) -> Result<Self> {
        let mut tree = Self::new(source, config)?;
        tree.build()?;
        Ok(tree)
    }

    /// Build (or rebuild from scratch) the tree from the bound cell source.
    ///
    /// Cells with a non-finite latitude or longitude are skipped; the
    /// remaining points keep their original enumeration position as
    /// `source_index`.
    pub fn build(&mut self) -> Result<()> {
        let start = Instant::now();
        let total = self.source.cell_count();

        let mut points = Vec::with_capacity(total);
        for index in 0..total {
            let centre = self.source.centre(index);
            if !centre.lat.is_finite() || !centre.lon.is_finite() {
                continue;
            }
            points.push(Point {
                latitude: centre.lat,
                longitude: centre.lon,
                source_index: index,
            });
        }

        self.tree = Vec::new();
        self.num_points = 0;
        self.leaf_count = 0;
        self.skipped_cells = total - points.len();

        if points.is_empty() {
            return Err(IndexError::EmptyInput { cells: total });
        }

        sort_by_axis(&mut points, true);

        let leaf_count = points.len().next_power_of_two();
        let mut tree = vec![None; 2 * leaf_count - 1];
        let last = points.len() - 1;
        recursive_build(&mut points, &mut tree, 0, last, 0, true);

        self.num_points = points.len();
        self.leaf_count = leaf_count;
        self.tree = tree;

        debug!(
            points = self.num_points,
            skipped = self.skipped_cells,
            slots = self.tree.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Built kd-tree"
        );

        Ok(())
    }

    pub fn is_built(&self) -> bool {
        !self.tree.is_empty()
    }

    pub(crate) fn ensure_built(&self) -> Result<()> {
        if self.is_built() {
            Ok(())
        } else {
            Err(IndexError::NotBuilt)
        }
    }

    /// Number of points stored in the tree.
    pub fn len(&self) -> usize {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Cells skipped during the last build because of non-finite coordinates.
    pub fn skipped_cells(&self) -> usize {
        self.skipped_cells
    }

    /// Smallest power of two >= number of points (0 before build).
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of slots in the implicit tree array.
    pub fn slot_count(&self) -> usize {
        self.tree.len()
    }

    /// Number of levels below the root.
    pub fn depth(&self) -> usize {
        self.leaf_count.trailing_zeros() as usize
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&TreeNode> {
        self.tree.get(index).and_then(Option::as_ref)
    }

    /// All points stored in the tree, in slot order.
    pub fn leaves(&self) -> impl Iterator<Item = &Point> + '_ {
        self.tree.iter().filter_map(|slot| match slot {
            Some(TreeNode::Leaf(p)) => Some(p),
            _ => None,
        })
    }

    /// The point closest to (`latitude`, `longitude`) by squared lat/lon distance.
    pub fn nearest_neighbour(&self, latitude: f64, longitude: f64) -> Result<Point> {
        self.ensure_built()?;
        self.nearest_recurse(latitude, longitude, 0)
            .copied()
            .ok_or(IndexError::NotBuilt)
    }

    fn nearest_recurse(&self, latitude: f64, longitude: f64, index: usize) -> Option<&Point> {
        let node = match self.slot(index)? {
            TreeNode::Leaf(point) => return Some(point),
            TreeNode::Split(node) => node,
        };

        let pivot_distance = if node.splits_on_latitude {
            node.discriminator - latitude
        } else {
            node.discriminator - longitude
        };

        let (near, far) = if pivot_distance > 0.0 {
            (low_child(index), high_child(index))
        } else {
            (high_child(index), low_child(index))
        };

        let best = self.nearest_recurse(latitude, longitude, near)?;
        let best_distance = best.squared_distance(latitude, longitude);

        // The far side can only hold a closer point if the splitting line is
        // nearer than the current best.
        if best_distance > pivot_distance * pivot_distance {
            if let Some(candidate) = self.nearest_recurse(latitude, longitude, far) {
                if candidate.squared_distance(latitude, longitude) < best_distance {
                    return Some(candidate);
                }
            }
        }

        Some(best)
    }

    /// Every point with `min_lat <= lat <= max_lat` and `min_lon <= lon <= max_lon`.
    ///
    /// The result is unordered and empty when nothing matches.
    pub fn range_query(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    ) -> Result<Vec<Point>> {
        self.ensure_built()?;
        Ok(self.collect_range(min_lat, max_lat, min_lon, max_lon))
    }

    /// [`range_query`](Self::range_query) over a lon/lat bounding box.
    pub fn range_query_bbox(&self, bbox: &BoundingBox) -> Result<Vec<Point>> {
        self.range_query(bbox.min_y, bbox.max_y, bbox.min_x, bbox.max_x)
    }

    pub(crate) fn collect_range(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    ) -> Vec<Point> {
        let bounds = RangeBounds {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        };
        let mut results = Vec::new();
        self.range_recurse(&bounds, 0, &mut results);
        results
    }

    fn range_recurse(&self, bounds: &RangeBounds, index: usize, results: &mut Vec<Point>) {
        match self.slot(index) {
            None => {}
            Some(TreeNode::Leaf(point)) => {
                if bounds.contains(point) {
                    results.push(*point);
                }
            }
            Some(TreeNode::Split(node)) => {
                let (min, max) = if node.splits_on_latitude {
                    (bounds.min_lat, bounds.max_lat)
                } else {
                    (bounds.min_lon, bounds.max_lon)
                };
                if node.discriminator >= min {
                    self.range_recurse(bounds, low_child(index), results);
                }
                if node.discriminator <= max {
                    self.range_recurse(bounds, high_child(index), results);
                }
            }
        }
    }
}

struct RangeBounds {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

impl RangeBounds {
    #[inline]
    fn contains(&self, p: &Point) -> bool {
        p.latitude >= self.min_lat
            && p.latitude <= self.max_lat
            && p.longitude >= self.min_lon
            && p.longitude <= self.max_lon
    }
}

fn sort_by_axis(points: &mut [Point], on_latitude: bool) {
    if on_latitude {
        points.sort_unstable_by(|a, b| a.latitude.total_cmp(&b.latitude));
    } else {
        points.sort_unstable_by(|a, b| a.longitude.total_cmp(&b.longitude));
    }
}

/// Partition `points[first..=last]` into the subtree rooted at `tree_index`.
///
/// `sorted_by_latitude` records the axis the sub-range is currently sorted by,
/// so a re-sort only happens when the split axis changes.
///
/// Median policy: an even count splits into equal halves with the
/// discriminator at the mean of the two middle values; an odd count puts the
/// middle element in the low half and uses its value as the discriminator.
/// Either way every low-side point is `<=` the discriminator and every
/// high-side point is `>=` it.
fn recursive_build(
    points: &mut [Point],
    tree: &mut [Option<TreeNode>],
    first: usize,
    last: usize,
    tree_index: usize,
    sorted_by_latitude: bool,
) {
    if first == last {
        tree[tree_index] = Some(TreeNode::Leaf(points[first]));
        return;
    }

    let range = &points[first..=last];
    let (mut lat_min, mut lat_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut lon_min, mut lon_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in range {
        lat_min = lat_min.min(p.latitude);
        lat_max = lat_max.max(p.latitude);
        lon_min = lon_min.min(p.longitude);
        lon_max = lon_max.max(p.longitude);
    }
    let on_latitude = (lat_max - lat_min).abs() >= (lon_max - lon_min).abs();

    if on_latitude != sorted_by_latitude {
        sort_by_axis(&mut points[first..=last], on_latitude);
    }

    let count = last - first + 1;
    let (end_left, discriminator) = if count % 2 == 0 {
        let end_left = first + count / 2 - 1;
        let low = points[end_left].coordinate(on_latitude);
        let high = points[end_left + 1].coordinate(on_latitude);
        (end_left, (low + high) / 2.0)
    } else {
        let end_left = first + count / 2;
        (end_left, points[end_left].coordinate(on_latitude))
    };

    tree[tree_index] = Some(TreeNode::Split(SplitNode {
        discriminator,
        splits_on_latitude: on_latitude,
    }));

    recursive_build(points, tree, first, end_left, low_child(tree_index), on_latitude);
    recursive_build(points, tree, end_left + 1, last, high_child(tree_index), on_latitude);
}

#[cfg(test)]
mod tests {
    use super::*;
    use wms_common::LatLon;

    fn tree_over(points: Vec<LatLon>) -> KdTree {
        KdTree::build_from(Arc::new(points), &IndexConfig::default()).unwrap()
    }

    fn unit_square() -> KdTree {
        tree_over(vec![
            LatLon::new(0.0, 0.0),
            LatLon::new(0.0, 1.0),
            LatLon::new(1.0, 0.0),
            LatLon::new(1.0, 1.0),
        ])
    }

    #[test]
    fn test_child_indices() {
        assert_eq!(low_child(0), 1);
        assert_eq!(high_child(0), 2);
        assert_eq!(low_child(2), 5);
        assert_eq!(high_child(2), 6);
    }

    #[test]
    fn test_four_point_grid() {
        let tree = unit_square();
        assert_eq!(tree.slot_count(), 7);
        assert_eq!(tree.depth(), 2);

        let nn = tree.nearest_neighbour(0.1, 0.1).unwrap();
        assert_eq!(nn.source_index, 0);

        let mut hits: Vec<usize> = tree
            .range_query(0.0, 1.0, 0.0, 0.5)
            .unwrap()
            .iter()
            .map(|p| p.source_index)
            .collect();
        hits.sort();
        assert_eq!(hits, vec![0, 2]);
    }

    #[test]
    fn test_single_point_answers_every_query() {
        let tree = tree_over(vec![LatLon::new(42.0, -7.0)]);
        assert_eq!(tree.slot_count(), 1);
        assert_eq!(tree.depth(), 0);

        for (lat, lon) in [(0.0, 0.0), (-89.0, 179.0), (42.0, -7.0)] {
            let p = tree.nearest_neighbour(lat, lon).unwrap();
            assert_eq!(p.source_index, 0);
        }
        let hits = tree.range_query(40.0, 45.0, -10.0, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_collinear_points_build() {
        let points: Vec<LatLon> = (0..10).map(|i| LatLon::new(i as f64, 0.0)).collect();
        let tree = tree_over(points);
        assert_eq!(tree.len(), 10);
        assert_eq!(tree.leaf_count(), 16);
        assert_eq!(tree.slot_count(), 31);
        assert_eq!(tree.leaves().count(), 10);

        for slot in tree.tree.iter().flatten() {
            if let TreeNode::Split(node) = slot {
                assert!(node.splits_on_latitude);
            }
        }
        assert_eq!(tree.nearest_neighbour(6.4, 3.0).unwrap().source_index, 6);
    }

    #[test]
    fn test_median_policy() {
        // Three points on a line: odd count, middle value is the discriminator
        let tree = tree_over(vec![
            LatLon::new(0.0, 0.0),
            LatLon::new(2.0, 0.0),
            LatLon::new(10.0, 0.0),
        ]);
        match tree.slot(0) {
            Some(TreeNode::Split(node)) => {
                assert!(node.splits_on_latitude);
                assert_eq!(node.discriminator, 2.0);
            }
            other => panic!("expected split at root, got {:?}", other),
        }

        // Four points: even count, mean of the two middle values
        let tree = tree_over(vec![
            LatLon::new(0.0, 0.0),
            LatLon::new(2.0, 0.0),
            LatLon::new(4.0, 0.0),
            LatLon::new(10.0, 0.0),
        ]);
        match tree.slot(0) {
            Some(TreeNode::Split(node)) => assert_eq!(node.discriminator, 3.0),
            other => panic!("expected split at root, got {:?}", other),
        }
    }

    #[test]
    fn test_split_axis_follows_wider_span() {
        let tree = tree_over(vec![
            LatLon::new(0.0, -50.0),
            LatLon::new(1.0, 0.0),
            LatLon::new(2.0, 50.0),
        ]);
        match tree.slot(0) {
            Some(TreeNode::Split(node)) => assert!(!node.splits_on_latitude),
            other => panic!("expected split at root, got {:?}", other),
        }
    }

    #[test]
    fn test_nan_cells_are_skipped() {
        let tree = tree_over(vec![
            LatLon::new(f64::NAN, 0.0),
            LatLon::new(5.0, 5.0),
            LatLon::new(0.0, f64::NAN),
            LatLon::new(-5.0, -5.0),
        ]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.skipped_cells(), 2);
        assert_eq!(tree.slot_count(), 3);

        let mut indices: Vec<usize> = tree.leaves().map(|p| p.source_index).collect();
        indices.sort();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(tree.nearest_neighbour(4.0, 4.0).unwrap().source_index, 1);
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = KdTree::build_from(Arc::new(Vec::<LatLon>::new()), &IndexConfig::default())
            .unwrap_err();
        assert!(matches!(err, IndexError::EmptyInput { cells: 0 }));

        let err = KdTree::build_from(
            Arc::new(vec![LatLon::new(f64::NAN, f64::NAN)]),
            &IndexConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::EmptyInput { cells: 1 }));
    }

    #[test]
    fn test_query_before_build() {
        let tree = KdTree::new(
            Arc::new(vec![LatLon::new(0.0, 0.0)]),
            &IndexConfig::default(),
        )
        .unwrap();
        assert!(!tree.is_built());
        assert!(matches!(
            tree.nearest_neighbour(0.0, 0.0),
            Err(IndexError::NotBuilt)
        ));
        assert!(matches!(
            tree.range_query(-1.0, 1.0, -1.0, 1.0),
            Err(IndexError::NotBuilt)
        ));
    }

    #[test]
    fn test_rebuild_is_from_scratch() {
        let mut tree = KdTree::new(
            Arc::new(vec![LatLon::new(0.0, 0.0), LatLon::new(1.0, 1.0)]),
            &IndexConfig::default(),
        )
        .unwrap();
        tree.build().unwrap();
        tree.build().unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.leaves().count(), 2);
    }

    #[test]
    fn test_range_query_uses_each_axis_bounds() {
        let tree = tree_over(vec![LatLon::new(10.0, 50.0), LatLon::new(50.0, 10.0)]);
        let hits = tree.range_query(0.0, 20.0, 40.0, 60.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_index, 0);

        let bbox = BoundingBox::new(0.0, 40.0, 20.0, 60.0);
        let hits = tree.range_query_bbox(&bbox).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_index, 1);
    }

    #[test]
    fn test_out_of_domain_range_is_empty() {
        let tree = unit_square();
        assert!(tree.range_query(50.0, 60.0, 50.0, 60.0).unwrap().is_empty());
        // Inverted box matches nothing
        assert!(tree.range_query(1.0, 0.0, 0.0, 1.0).unwrap().is_empty());
    }
}
