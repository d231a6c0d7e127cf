//! Expanding-window approximate nearest-neighbour search.
//!
//! Rather than an exact descent, the search issues range queries over a
//! square window centred on the query point, multiplying the half-width by
//! the expansion factor until some window is non-empty or the half-width
//! exceeds the caller's maximum distance. The first non-empty window is
//! returned as-is, so the result holds *some* nearby points, not necessarily
//! the closest ones.

use std::f64::consts::SQRT_2;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

use crate::config::{validate_query_parameters, IndexConfig};
use crate::error::Result;
use crate::kdtree::{KdTree, Point};

/// Approximate-search parameters held by each tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct QueryParameters {
    pub nominal_minimum_resolution: f64,
    pub expansion_factor: f64,
    pub refine_corners: bool,
}

impl From<&IndexConfig> for QueryParameters {
    fn from(config: &IndexConfig) -> Self {
        Self {
            nominal_minimum_resolution: config.nominal_minimum_resolution,
            expansion_factor: config.expansion_factor,
            refine_corners: config.refine_corners,
        }
    }
}

/// Running counters for approximate queries. Advisory only.
#[derive(Debug, Default)]
pub(crate) struct ApproxCounters {
    queries: AtomicU64,
    results: AtomicU64,
    iterations: AtomicU64,
}

/// Snapshot of the approximate-query counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApproxQueryStats {
    pub queries: u64,
    pub results_returned: u64,
    pub iterations_performed: u64,
}

impl ApproxQueryStats {
    /// Mean number of points returned per query, if any queries were made.
    pub fn results_per_query(&self) -> Option<f64> {
        (self.queries > 0).then(|| self.results_returned as f64 / self.queries as f64)
    }

    /// Mean number of windows tried per query, if any queries were made.
    pub fn iterations_per_query(&self) -> Option<f64> {
        (self.queries > 0).then(|| self.iterations_performed as f64 / self.queries as f64)
    }
}

impl KdTree {
    /// Points inside the first non-empty square window around the query.
    ///
    /// Starts at the nominal minimum resolution and grows by the expansion
    /// factor. Once the next half-width would exceed `max_distance` a final
    /// window of exactly `max_distance` is tried, so any point within
    /// `max_distance` on both axes is found. Returns an empty vector when no
    /// window holds a point, when `max_distance` is below the nominal
    /// resolution, or when the query coordinates are not finite.
    pub fn approx_nearest_neighbour(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance: f64,
    ) -> Result<Vec<Point>> {
        self.ensure_built()?;
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        if !latitude.is_finite() || !longitude.is_finite() {
            return Ok(Vec::new());
        }

        let mut distance = self.params.nominal_minimum_resolution;
        let mut last_window = false;
        while distance <= max_distance {
            self.counters.iterations.fetch_add(1, Ordering::Relaxed);
            let mut results = self.window(latitude, longitude, distance);
            if !results.is_empty() {
                if self.params.refine_corners {
                    // A point in the window corner may be up to sqrt(2) * distance
                    // away; anything closer than that lies in the widened window.
                    results = self.window(latitude, longitude, distance * SQRT_2);
                }
                self.counters
                    .results
                    .fetch_add(results.len() as u64, Ordering::Relaxed);
                return Ok(results);
            }
            if last_window {
                break;
            }
            distance *= self.params.expansion_factor;
            if distance > max_distance {
                last_window = true;
                distance = max_distance;
            }
        }

        Ok(Vec::new())
    }

    /// The closest candidate of [`approx_nearest_neighbour`](Self::approx_nearest_neighbour).
    pub fn limited_nearest_neighbour(
        &self,
        latitude: f64,
        longitude: f64,
        max_distance: f64,
    ) -> Result<Option<Point>> {
        let candidates = self.approx_nearest_neighbour(latitude, longitude, max_distance)?;
        Ok(candidates.into_iter().min_by(|a, b| {
            a.squared_distance(latitude, longitude)
                .total_cmp(&b.squared_distance(latitude, longitude))
        }))
    }

    fn window(&self, latitude: f64, longitude: f64, half_width: f64) -> Vec<Point> {
        self.collect_range(
            latitude - half_width,
            latitude + half_width,
            longitude - half_width,
            longitude + half_width,
        )
    }

    /// Replace the approximate-search parameters for subsequent queries.
    pub fn set_query_parameters(
        &mut self,
        expansion_factor: f64,
        nominal_minimum_resolution: f64,
    ) -> Result<()> {
        validate_query_parameters(expansion_factor, nominal_minimum_resolution)?;
        self.params.expansion_factor = expansion_factor;
        self.params.nominal_minimum_resolution = nominal_minimum_resolution;
        Ok(())
    }

    pub fn nominal_minimum_resolution(&self) -> f64 {
        self.params.nominal_minimum_resolution
    }

    pub fn expansion_factor(&self) -> f64 {
        self.params.expansion_factor
    }

    pub fn approx_query_stats(&self) -> ApproxQueryStats {
        ApproxQueryStats {
            queries: self.counters.queries.load(Ordering::Relaxed),
            results_returned: self.counters.results.load(Ordering::Relaxed),
            iterations_performed: self.counters.iterations.load(Ordering::Relaxed),
        }
    }

    pub fn reset_approx_query_stats(&self) {
        self.counters.queries.store(0, Ordering::Relaxed);
        self.counters.results.store(0, Ordering::Relaxed);
        self.counters.iterations.store(0, Ordering::Relaxed);
    }

    /// Report the counters at `info` level.
    pub fn log_approx_query_stats(&self) {
        let stats = self.approx_query_stats();
        match (stats.results_per_query(), stats.iterations_per_query()) {
            (Some(results), Some(iterations)) => info!(
                nominal_resolution = self.params.nominal_minimum_resolution,
                queries = stats.queries,
                results_per_query = results,
                iterations_per_query = iterations,
                "Approximate query stats"
            ),
            _ => info!(
                nominal_resolution = self.params.nominal_minimum_resolution,
                "No approximate queries made"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use std::sync::Arc;
    use wms_common::LatLon;

    fn line_tree(config: &IndexConfig) -> KdTree {
        // Points every 10 degrees of longitude along the equator
        let points: Vec<LatLon> = (0..10).map(|i| LatLon::new(0.0, i as f64 * 10.0)).collect();
        KdTree::build_from(Arc::new(points), config).unwrap()
    }

    #[test]
    fn test_first_window_hit() {
        let tree = line_tree(&IndexConfig::default());
        let results = tree.approx_nearest_neighbour(0.2, 20.3, 10.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_index, 2);

        let stats = tree.approx_query_stats();
        assert_eq!(stats.queries, 1);
        assert_eq!(stats.iterations_performed, 1);
        assert_eq!(stats.results_returned, 1);
    }

    #[test]
    fn test_window_expands_until_hit() {
        let tree = line_tree(&IndexConfig::default());
        // 3 degrees from the nearest point: 0.5 and 1.75 miss, 6.125 hits
        let results = tree.approx_nearest_neighbour(0.0, 43.0, 100.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_index, 4);
        assert_eq!(tree.approx_query_stats().iterations_performed, 3);
    }

    #[test]
    fn test_returns_empty_beyond_max_distance() {
        let tree = line_tree(&IndexConfig::default());
        let results = tree.approx_nearest_neighbour(60.0, 45.0, 20.0).unwrap();
        assert!(results.is_empty());
        // 0.5, 1.75, 6.125, then 21.4375 is clamped to a last window of 20
        assert_eq!(tree.approx_query_stats().iterations_performed, 4);
    }

    #[test]
    fn test_last_window_is_clamped_to_max_distance() {
        let points = vec![LatLon::new(0.0, 8.0)];
        let tree = KdTree::build_from(Arc::new(points), &IndexConfig::default()).unwrap();

        // 6.125 misses the point 8 degrees away; 21.4375 is cut back to 10
        let results = tree.approx_nearest_neighbour(0.0, 0.0, 10.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(tree.approx_query_stats().iterations_performed, 4);

        // Exactly on the edge of the last window
        let results = tree.approx_nearest_neighbour(0.0, 0.0, 8.0).unwrap();
        assert_eq!(results.len(), 1);

        assert!(tree.approx_nearest_neighbour(0.0, 0.0, 7.9).unwrap().is_empty());
    }

    #[test]
    fn test_max_distance_below_nominal_tries_nothing() {
        let tree = line_tree(&IndexConfig::default());
        assert!(tree.approx_nearest_neighbour(0.0, 0.0, 0.1).unwrap().is_empty());
        assert_eq!(tree.approx_query_stats().iterations_performed, 0);
    }

    #[test]
    fn test_non_finite_query_is_empty() {
        let tree = line_tree(&IndexConfig::default());
        assert!(tree
            .approx_nearest_neighbour(f64::NAN, 0.0, f64::INFINITY)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_refine_corners_widens_window() {
        let config = IndexConfig {
            refine_corners: true,
            ..Default::default()
        };
        let points = vec![LatLon::new(0.45, 0.45), LatLon::new(0.0, 0.6)];
        let tree = KdTree::build_from(Arc::new(points), &config).unwrap();

        // (0.45, 0.45) lies in the 0.5 window; (0.0, 0.6) is closer but only
        // inside the widened one.
        let results = tree.approx_nearest_neighbour(0.0, 0.0, 1.0).unwrap();
        assert_eq!(results.len(), 2);

        let best = tree.limited_nearest_neighbour(0.0, 0.0, 1.0).unwrap().unwrap();
        assert_eq!(best.source_index, 1);
    }

    #[test]
    fn test_limited_nearest_neighbour_none() {
        let tree = line_tree(&IndexConfig::default());
        assert!(tree.limited_nearest_neighbour(80.0, 0.0, 1.0).unwrap().is_none());
    }

    #[test]
    fn test_stats_reset() {
        let tree = line_tree(&IndexConfig::default());
        for _ in 0..5 {
            tree.approx_nearest_neighbour(0.0, 0.0, 1.0).unwrap();
        }
        let stats = tree.approx_query_stats();
        assert_eq!(stats.queries, 5);
        assert_eq!(stats.results_per_query(), Some(1.0));

        tree.reset_approx_query_stats();
        let stats = tree.approx_query_stats();
        assert_eq!(stats, ApproxQueryStats::default());
        assert_eq!(stats.iterations_per_query(), None);
    }

    #[test]
    fn test_set_query_parameters() {
        let mut tree = line_tree(&IndexConfig::default());
        tree.set_query_parameters(2.0, 5.0).unwrap();
        assert_eq!(tree.expansion_factor(), 2.0);
        assert_eq!(tree.nominal_minimum_resolution(), 5.0);

        // The 5 degree window now reaches the point 3 degrees away immediately
        tree.approx_nearest_neighbour(0.0, 43.0, 100.0).unwrap();
        assert_eq!(tree.approx_query_stats().iterations_performed, 1);

        assert!(matches!(
            tree.set_query_parameters(0.5, 1.0),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_approx_before_build() {
        let tree = KdTree::new(
            Arc::new(vec![LatLon::new(0.0, 0.0)]),
            &IndexConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            tree.approx_nearest_neighbour(0.0, 0.0, 1.0),
            Err(IndexError::NotBuilt)
        ));
    }
}
