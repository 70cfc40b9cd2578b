//! Four-nearest-neighbour inverse-distance interpolation at a point.
//!
//! Distance is the equirectangular pseudo-distance
//! `sqrt((lat_g - lat)^2 + cos(lat_g) * (lon_g - lon)^2)`, good enough at the
//! scale of one grid cell. The four closest cells are weighted by
//! `1 / max(0.001, d)` and the weights normalized to sum to one.

use ndarray::Array2;

use crate::error::{ResampleError, Result};
use crate::grid::CoordinateGrid;
use crate::indexer::FieldTensor;

/// Number of neighbours blended per point.
pub const NEIGHBOUR_COUNT: usize = 4;

/// Floor applied to distances before inversion.
pub const MIN_DISTANCE: f64 = 0.001;

/// Pseudo-distance between a grid cell and a query point, in degrees.
#[inline]
pub fn pseudo_distance(grid_lat: f64, grid_lon: f64, lat: f64, lon: f64) -> f64 {
    let dlat = grid_lat - lat;
    let dlon = grid_lon - lon;
    (dlat * dlat + grid_lat.to_radians().cos() * dlon * dlon).sqrt()
}

/// Normalized inverse-distance weights for the given distances.
pub fn idw_weights(distances: &[f64; NEIGHBOUR_COUNT]) -> [f64; NEIGHBOUR_COUNT] {
    let mut weights = distances.map(|d| 1.0 / d.max(MIN_DISTANCE));
    let total: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    weights
}

/// The four cells closest to a point and their weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbours {
    /// `(row, col)` of each neighbour, closest first
    pub cells: [(usize, usize); NEIGHBOUR_COUNT],
    pub distances: [f64; NEIGHBOUR_COUNT],
    pub weights: [f64; NEIGHBOUR_COUNT],
}

impl Neighbours {
    /// Find the four closest cells to `(lat, lon)`.
    ///
    /// Cells are scanned in row-major order and only a strictly smaller
    /// distance displaces a kept cell, so ties go to the lower flat index.
    pub fn find(grid: &CoordinateGrid, lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(ResampleError::InvalidLocation { lat, lon });
        }
        let (nlat, nlon) = grid.shape();
        if nlat * nlon < NEIGHBOUR_COUNT {
            return Err(ResampleError::ShapeMismatch {
                expected: (2, 2),
                actual: (nlat, nlon),
                context: "grid too small for neighbour search".to_string(),
            });
        }

        let mut best: Vec<(f64, usize)> = Vec::with_capacity(NEIGHBOUR_COUNT + 1);
        for (flat, (&glat, &glon)) in grid.lat().iter().zip(grid.lon().iter()).enumerate() {
            let d = pseudo_distance(glat, glon, lat, lon);
            if best.len() == NEIGHBOUR_COUNT && d >= best[NEIGHBOUR_COUNT - 1].0 {
                continue;
            }
            let pos = best.partition_point(|&(kept, _)| kept <= d);
            best.insert(pos, (d, flat));
            best.truncate(NEIGHBOUR_COUNT);
        }

        let mut cells = [(0usize, 0usize); NEIGHBOUR_COUNT];
        let mut distances = [0.0f64; NEIGHBOUR_COUNT];
        for (i, &(d, flat)) in best.iter().enumerate() {
            cells[i] = (flat / nlon, flat % nlon);
            distances[i] = d;
        }

        Ok(Self {
            cells,
            distances,
            weights: idw_weights(&distances),
        })
    }
}

/// Interpolated values at one point for one snapshot.
///
/// Shaped `(variable, height_level)` in the tensor's variable and level order.
#[derive(Debug, Clone, PartialEq)]
pub struct PointValues {
    pub values: Array2<f64>,
    /// `true` where any neighbour came from an uncovered slice
    pub gaps: Array2<bool>,
}

impl PointValues {
    /// Value of variable `var` at level index `level`.
    pub fn get(&self, var: usize, level: usize) -> Option<f64> {
        self.values.get((var, level)).copied()
    }

    /// Whether any value in level `level` is built on a gap.
    pub fn level_has_gap(&self, level: usize) -> bool {
        self.gaps.column(level).iter().any(|g| *g)
    }

    pub fn has_gap(&self) -> bool {
        self.gaps.iter().any(|g| *g)
    }
}

/// Interpolate every variable and height level of snapshot `(day, hour)` at the neighbours.
pub fn interpolate_at(
    neighbours: &Neighbours,
    tensor: &FieldTensor,
    day: u32,
    hour: u32,
) -> Option<PointValues> {
    let nvar = tensor.variables().len();
    let nlev = tensor.height_levels().len();
    let mut values = Array2::<f64>::zeros((nvar, nlev));
    let mut gaps = Array2::from_elem((nvar, nlev), false);

    for var in 0..nvar {
        let slot = tensor.slot(day, hour, var)?;
        for level in 0..nlev {
            values[[var, level]] = neighbours
                .cells
                .iter()
                .zip(neighbours.weights.iter())
                .map(|(&(row, col), &w)| w * slot.value(level, row, col))
                .sum();
            gaps[[var, level]] = !slot.is_covered(level);
        }
    }

    Some(PointValues { values, gaps })
}

/// Convenience wrapper: neighbour search plus interpolation in one call.
pub fn interpolate(
    grid: &CoordinateGrid,
    lat: f64,
    lon: f64,
    tensor: &FieldTensor,
    day: u32,
    hour: u32,
) -> Result<Option<PointValues>> {
    let neighbours = Neighbours::find(grid, lat, lon)?;
    Ok(interpolate_at(&neighbours, tensor, day, hour))
}
