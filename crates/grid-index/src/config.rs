//! Configuration for grid index queries.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

/// Query parameters for the k-d tree and the grid lookup built on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Half-width in degrees of the first window tried by the approximate search.
    pub nominal_minimum_resolution: f64,

    /// Factor the window half-width is multiplied by after each empty window.
    pub expansion_factor: f64,

    /// Largest window half-width tried by grid lookups, in degrees.
    ///
    /// `None` derives it from the grid's mean cell size.
    pub max_distance: Option<f64>,

    /// Neighbour-walk rounds after the approximate search (0 disables the walk).
    pub minimisation_iterations: usize,

    /// Widen the first non-empty window by sqrt(2) before returning it.
    pub refine_corners: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            nominal_minimum_resolution: 0.5,
            expansion_factor: 3.5,
            max_distance: None,
            minimisation_iterations: 1,
            refine_corners: false,
        }
    }
}

impl IndexConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable variables keep their default value.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GRID_INDEX_NOMINAL_RESOLUTION") {
            if let Ok(res) = val.parse() {
                config.nominal_minimum_resolution = res;
            }
        }

        if let Ok(val) = std::env::var("GRID_INDEX_EXPANSION_FACTOR") {
            if let Ok(factor) = val.parse() {
                config.expansion_factor = factor;
            }
        }

        if let Ok(val) = std::env::var("GRID_INDEX_MAX_DISTANCE") {
            if let Ok(dist) = val.parse() {
                config.max_distance = Some(dist);
            }
        }

        if let Ok(val) = std::env::var("GRID_INDEX_MINIMISATION_ITERATIONS") {
            if let Ok(iterations) = val.parse() {
                config.minimisation_iterations = iterations;
            }
        }

        if let Ok(val) = std::env::var("GRID_INDEX_REFINE_CORNERS") {
            config.refine_corners = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validate_query_parameters(self.expansion_factor, self.nominal_minimum_resolution)?;

        if let Some(dist) = self.max_distance {
            if dist.is_nan() || dist <= 0.0 {
                return Err(IndexError::invalid_config(format!(
                    "max_distance must be > 0, got {}",
                    dist
                )));
            }
        }

        Ok(())
    }
}

/// Check the approximate-search parameters.
///
/// The expansion factor must be finite and > 1 or the search would never
/// reach its maximum distance.
pub(crate) fn validate_query_parameters(
    expansion_factor: f64,
    nominal_minimum_resolution: f64,
) -> Result<()> {
    if !nominal_minimum_resolution.is_finite() || nominal_minimum_resolution <= 0.0 {
        return Err(IndexError::invalid_config(format!(
            "nominal_minimum_resolution must be finite and > 0, got {}",
            nominal_minimum_resolution
        )));
    }

    if !expansion_factor.is_finite() || expansion_factor <= 1.0 {
        return Err(IndexError::invalid_config(format!(
            "expansion_factor must be finite and > 1, got {}",
            expansion_factor
        )));
    }

    Ok(())
}
