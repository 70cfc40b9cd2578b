//! Latitude/longitude coordinate grids shared by every field in a batch.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{ResampleError, Result};

/// Normalize a longitude to the [-180, 180) convention.
///
/// Source grids report longitudes in [0, 360); anything at or beyond 180 is
/// shifted down by 360.
pub fn normalize_longitude(lon: f64) -> f64 {
    if lon >= 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// Flip a 2-D array vertically (row 0 becomes the last row).
///
/// Both the coordinate grid and every field slice go through this, so indices
/// into one are indices into the other.
pub fn flip_rows<T: Clone>(raw: ArrayView2<'_, T>) -> Array2<T> {
    let mut flipped = raw.to_owned();
    flipped.invert_axis(Axis(0));
    flipped.as_standard_layout().into_owned()
}

/// Latitude and longitude at each grid cell, `(nlat, nlon)` shaped.
///
/// Rows are stored flipped relative to raw message order and longitudes are
/// normalized to [-180, 180).
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateGrid {
    lat: Array2<f64>,
    lon: Array2<f64>,
}

impl CoordinateGrid {
    /// Build a grid from already-oriented arrays.
    pub fn new(lat: Array2<f64>, lon: Array2<f64>) -> Result<Self> {
        if lat.dim() != lon.dim() {
            return Err(ResampleError::ShapeMismatch {
                expected: lat.dim(),
                actual: lon.dim(),
                context: "longitude grid".to_string(),
            });
        }
        if lat.is_empty() {
            return Err(ResampleError::ShapeMismatch {
                expected: (1, 1),
                actual: lat.dim(),
                context: "empty coordinate grid".to_string(),
            });
        }
        Ok(Self { lat, lon })
    }

    /// Build a grid from raw message order: flip rows and normalize longitudes.
    pub fn from_raw(raw_lat: ArrayView2<'_, f64>, raw_lon: ArrayView2<'_, f64>) -> Result<Self> {
        let lat = flip_rows(raw_lat);
        let lon = flip_rows(raw_lon).mapv(normalize_longitude);
        Self::new(lat, lon)
    }

    /// Regular grid helper; rows run north to south.
    pub fn regular(lat_north: f64, lon_west: f64, dlat: f64, dlon: f64, nlat: usize, nlon: usize) -> Result<Self> {
        let lat = Array2::from_shape_fn((nlat, nlon), |(i, _)| lat_north - i as f64 * dlat);
        let lon = Array2::from_shape_fn((nlat, nlon), |(_, j)| {
            normalize_longitude(lon_west + j as f64 * dlon)
        });
        Self::new(lat, lon)
    }

    /// Grid shape as `(nlat, nlon)`.
    pub fn shape(&self) -> (usize, usize) {
        self.lat.dim()
    }

    pub fn lat(&self) -> &Array2<f64> {
        &self.lat
    }

    pub fn lon(&self) -> &Array2<f64> {
        &self.lon
    }

    /// Coordinates of one cell.
    pub fn at(&self, row: usize, col: usize) -> Option<(f64, f64)> {
        Some((*self.lat.get((row, col))?, *self.lon.get((row, col))?))
    }

    /// `(min_lat, min_lon, max_lat, max_lon)` over all cells.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let fold = |a: &Array2<f64>| {
            a.iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
        };
        let (min_lat, max_lat) = fold(&self.lat);
        let (min_lon, max_lon) = fold(&self.lon);
        (min_lat, min_lon, max_lat, max_lon)
    }
}
