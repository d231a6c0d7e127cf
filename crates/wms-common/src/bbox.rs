//! Geographic bounding boxes.

use serde::{Deserialize, Serialize};

/// An axis-aligned box in WGS84 lon/lat degrees.
///
/// `x` is longitude and `y` is latitude, matching the WMS 1.1 `BBOX`
/// parameter order for `CRS:84`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Square box of half-width `half_width` degrees centred on a point.
    pub fn around(lon: f64, lat: f64, half_width: f64) -> Self {
        Self {
            min_x: lon - half_width,
            min_y: lat - half_width,
            max_x: lon + half_width,
            max_y: lat + half_width,
        }
    }

    /// Smallest box enclosing every finite `(lon, lat)` pair.
    ///
    /// Returns `None` if no finite pair was seen.
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bbox: Option<Self> = None;
        for (lon, lat) in points {
            if !lon.is_finite() || !lat.is_finite() {
                continue;
            }
            bbox = Some(match bbox {
                None => Self::new(lon, lat, lon, lat),
                Some(b) => Self {
                    min_x: b.min_x.min(lon),
                    min_y: b.min_y.min(lat),
                    max_x: b.max_x.max(lon),
                    max_y: b.max_y.max(lat),
                },
            });
        }
        bbox
    }

    /// Parse a WMS BBOX parameter string: "minx,miny,maxx,maxy"
    pub fn from_wms_string(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(part.to_string()))?;
        }

        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }

    /// Width in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Closed-interval containment test on both axes.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Centre of the pixel at (`col`, `row`) when this box is split into a
    /// `width` x `height` raster with row 0 at the northern edge.
    pub fn pixel_centre(&self, col: usize, row: usize, width: usize, height: usize) -> (f64, f64) {
        let x_ratio = (col as f64 + 0.5) / width as f64;
        let y_ratio = (row as f64 + 0.5) / height as f64;
        (
            self.min_x + x_ratio * self.width(),
            self.max_y - y_ratio * self.height(),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BboxParseError {
    #[error("Invalid BBOX format: {0}. Expected 'minx,miny,maxx,maxy'")]
    InvalidFormat(String),

    #[error("Invalid number in BBOX: {0}")]
    InvalidNumber(String),
}
