//! Piecewise-linear interpolation of model quantities onto observation points.
//!
//! Halo-model quantities span many decades, so [`interp_onto`] works in
//! log-log space whenever both axes are strictly positive and falls back to
//! plain linear interpolation otherwise.

/// Linear interpolation with configurable extrapolation
/// Returns None if query_x is outside the range and extrapolation is disabled
pub fn linear_interp_with_config(
    sorted_points: &[(f64, f64)],
    query_x: f64,
    allow_extrapolation: bool,
) -> Option<f64> {
    if sorted_points.is_empty() || !query_x.is_finite() {
        return None;
    }

    if sorted_points.len() == 1 {
        return Some(sorted_points[0].1);
    }

    let n = sorted_points.len();
    let first_x = sorted_points[0].0;
    let last_x = sorted_points[n - 1].0;

    if query_x < first_x || query_x > last_x {
        if !allow_extrapolation {
            return None;
        }
        // Extend the nearest segment
        let (p1, p2) = if query_x < first_x {
            (sorted_points[0], sorted_points[1])
        } else {
            (sorted_points[n - 2], sorted_points[n - 1])
        };
        let slope = (p2.1 - p1.1) / (p2.0 - p1.0);
        return Some(p1.1 + slope * (query_x - p1.0));
    }

    // First point strictly to the right of query_x
    let idx = sorted_points
        .partition_point(|(x, _)| *x <= query_x)
        .clamp(1, n - 1);
    let (x1, y1) = sorted_points[idx - 1];
    let (x2, y2) = sorted_points[idx];
    if x2 == x1 {
        return Some(y1);
    }
    let t = (query_x - x1) / (x2 - x1);
    Some(y1 + t * (y2 - y1))
}

/// Interpolate `(grid_x, grid_y)` onto every `query_x`.
///
/// `grid_x` must be sorted ascending. Returns None if any query cannot be
/// served (empty grid, non-finite query, or out of range without extrapolation).
pub fn interp_onto(
    grid_x: &[f64],
    grid_y: &[f64],
    query_x: &[f64],
    allow_extrapolation: bool,
) -> Option<Vec<f64>> {
    if grid_x.len() != grid_y.len() || grid_x.is_empty() {
        return None;
    }

    let log_space = grid_x.iter().chain(grid_y).chain(query_x).all(|v| *v > 0.0);

    if log_space {
        let points: Vec<(f64, f64)> = grid_x
            .iter()
            .zip(grid_y)
            .map(|(x, y)| (x.ln(), y.ln()))
            .collect();
        query_x
            .iter()
            .map(|q| linear_interp_with_config(&points, q.ln(), allow_extrapolation).map(f64::exp))
            .collect()
    } else {
        let points: Vec<(f64, f64)> = grid_x.iter().copied().zip(grid_y.iter().copied()).collect();
        query_x
            .iter()
            .map(|q| linear_interp_with_config(&points, *q, allow_extrapolation))
            .collect()
    }
}
