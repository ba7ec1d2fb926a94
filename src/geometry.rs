//! Geometric primitives over point sets, and the detector geometry service.
//!
//! Point-set queries operate on plain `Position` slices so they can be used on
//! clusters, projected muon trajectories and loose hit lists alike.

use serde::{Deserialize, Serialize};

use crate::error::{ReconstructionError, Result};
use crate::{Position, View};

// ============================================================================
// Detector geometry
// ============================================================================

/// Detector description consumed by the reconstruction.
///
/// Implementations must be cheap to query; they are called in the inner loops
/// of three-view matching.
pub trait DetectorGeometry: Send + Sync {
    /// Low-x face of the drift volume being reconstructed.
    fn tpc_min_x(&self) -> f64;
    /// High-x face of the drift volume being reconstructed.
    fn tpc_max_x(&self) -> f64;
    /// Low-x face of the whole detector.
    fn detector_min_x(&self) -> f64;
    /// High-x face of the whole detector.
    fn detector_max_x(&self) -> f64;
    /// Wire pitch, used as the layer width of sliding fits.
    fn wire_pitch(&self) -> f64;
    /// Single-hit position resolution in the wire coordinate.
    fn hit_resolution(&self) -> f64;
    /// Wire coordinate in the third view predicted from two views at equal x.
    fn project(&self, view_a: View, z_a: f64, view_b: View, z_b: f64) -> Option<f64>;
    /// Pseudo chi-squared of three wire coordinates measured at equal x.
    fn merge_three_positions(&self, z_u: f64, z_v: f64, z_w: f64) -> f64;

    /// Project a pair of positions from two views into the third view.
    fn project_position(
        &self,
        view_a: View,
        position_a: &Position,
        view_b: View,
        position_b: &Position,
    ) -> Option<Position> {
        let z = self.project(view_a, position_a.z, view_b, position_b.z)?;
        Some(Position::new(0.5 * (position_a.x + position_b.x), z))
    }
}

/// Wire-plane geometry with symmetric induction planes.
///
/// The U and V planes are inclined symmetrically about the W (collection)
/// plane, with wire coordinates scaled so that `w = u + v` at equal drift
/// coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGeometry {
    pub tpc_min_x: f64,
    pub tpc_max_x: f64,
    pub detector_min_x: f64,
    pub detector_max_x: f64,
    /// Default: 0.3
    pub wire_pitch: f64,
    /// Default: 1.0
    pub hit_resolution: f64,
}

impl Default for WireGeometry {
    /// The central drift volume of a three-volume detector, so that both of
    /// its x faces border another volume.
    fn default() -> Self {
        Self {
            tpc_min_x: 0.0,
            tpc_max_x: 250.0,
            detector_min_x: -255.0,
            detector_max_x: 505.0,
            wire_pitch: 0.3,
            hit_resolution: 1.0,
        }
    }
}

impl DetectorGeometry for WireGeometry {
    fn tpc_min_x(&self) -> f64 {
        self.tpc_min_x
    }

    fn tpc_max_x(&self) -> f64 {
        self.tpc_max_x
    }

    fn detector_min_x(&self) -> f64 {
        self.detector_min_x
    }

    fn detector_max_x(&self) -> f64 {
        self.detector_max_x
    }

    fn wire_pitch(&self) -> f64 {
        self.wire_pitch
    }

    fn hit_resolution(&self) -> f64 {
        self.hit_resolution
    }

    fn project(&self, view_a: View, z_a: f64, view_b: View, z_b: f64) -> Option<f64> {
        let third = view_a.third(view_b)?;
        let coordinate = |view: View| if view == view_a { z_a } else { z_b };
        Some(match third {
            View::W => coordinate(View::U) + coordinate(View::V),
            View::U => coordinate(View::W) - coordinate(View::V),
            View::V => coordinate(View::W) - coordinate(View::U),
        })
    }

    fn merge_three_positions(&self, z_u: f64, z_v: f64, z_w: f64) -> f64 {
        // Least-squares correction of w = u + v spreads the residual evenly
        let residual = z_u + z_v - z_w;
        let sigma = self.hit_resolution.max(f64::EPSILON);
        residual * residual / (3.0 * sigma * sigma)
    }
}

// ============================================================================
// Point-set queries
// ============================================================================

/// Closest point of `points` to `position`.
pub fn closest_position(position: &Position, points: &[Position]) -> Option<Position> {
    points
        .iter()
        .map(|p| (p.distance_squared(position), *p))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, p)| p)
}

/// Distance from `position` to the closest of `points`.
pub fn closest_distance(position: &Position, points: &[Position]) -> Option<f64> {
    closest_position(position, points).map(|p| p.distance(position))
}

/// Closest pair of positions between two point sets, `(from a, from b)`.
pub fn closest_positions(a: &[Position], b: &[Position]) -> Option<(Position, Position)> {
    let mut best: Option<(f64, Position, Position)> = None;
    for pa in a {
        for pb in b {
            let d = pa.distance_squared(pb);
            if best.as_ref().map_or(true, |(bd, _, _)| d < *bd) {
                best = Some((d, *pa, *pb));
            }
        }
    }
    best.map(|(_, pa, pb)| (pa, pb))
}

/// Smallest distance between two point sets.
pub fn closest_distance_between(a: &[Position], b: &[Position]) -> Option<f64> {
    closest_positions(a, b).map(|(pa, pb)| pa.distance(&pb))
}

/// Whether `point` projects onto the segment `[lower, upper]`.
///
/// The test is a slab: any distance from the segment axis is accepted.
pub fn is_in_line_segment(lower: &Position, upper: &Position, point: &Position) -> bool {
    let axis = *upper - *lower;
    let length_squared = axis.magnitude_squared();
    if length_squared < f64::EPSILON {
        return point.distance_squared(lower) < f64::EPSILON;
    }
    let projection = (*point - *lower).dot(&axis);
    (0.0..=length_squared).contains(&projection)
}

/// Perpendicular distance from `point` to the infinite line through
/// `line_start` along `direction`.
pub fn distance_to_line(point: &Position, line_start: &Position, direction: &Position) -> f64 {
    match direction.unit() {
        Some(unit) => unit.cross(&(*point - *line_start)).abs(),
        None => point.distance(line_start),
    }
}

/// Whether `point` lies within `distance` of the line through `line_start`
/// and `line_end`.
pub fn is_close_to_line(
    point: &Position,
    line_start: &Position,
    line_end: &Position,
    distance: f64,
) -> bool {
    distance_to_line(point, line_start, &(*line_end - *line_start)) < distance
}

/// Extent of a point set in x.
pub fn span_x(points: &[Position]) -> Option<(f64, f64)> {
    points.iter().fold(None, |acc, p| match acc {
        None => Some((p.x, p.x)),
        Some((lo, hi)) => Some((lo.min(p.x), hi.max(p.x))),
    })
}

/// Extent in z of the points whose x lies in `[x_min, x_max]`.
///
/// Returns `InvalidParameter` for inverted bounds and `Ok(None)` when no point
/// falls inside the x range.
pub fn span_z(points: &[Position], x_min: f64, x_max: f64) -> Result<Option<(f64, f64)>> {
    check_bounds(x_min, x_max)?;
    Ok(points
        .iter()
        .filter(|p| p.x >= x_min && p.x <= x_max)
        .fold(None, |acc, p| match acc {
            None => Some((p.z, p.z)),
            Some((lo, hi)) => Some((lo.min(p.z), hi.max(p.z))),
        }))
}

/// Mean z of the points whose x lies in `[x_min, x_max]`.
pub fn average_z(points: &[Position], x_min: f64, x_max: f64) -> Result<Option<f64>> {
    check_bounds(x_min, x_max)?;
    let (sum, count) = points
        .iter()
        .filter(|p| p.x >= x_min && p.x <= x_max)
        .fold((0.0, 0usize), |(s, n), p| (s + p.z, n + 1));
    Ok((count > 0).then(|| sum / count as f64))
}

fn check_bounds(x_min: f64, x_max: f64) -> Result<()> {
    if x_min > x_max {
        return Err(ReconstructionError::InvalidParameter {
            reason: format!("span lower bound {x_min} exceeds upper bound {x_max}"),
        });
    }
    Ok(())
}

/// Wire coordinate of a point set at drift coordinate `x`.
///
/// Interpolates between the nearest points either side of `x` within
/// `window`; falls back to the mean z of the points within the window when
/// only one side is populated.
pub fn profile_z(points: &[Position], x: f64, window: f64) -> Option<f64> {
    let mut below: Option<&Position> = None;
    let mut above: Option<&Position> = None;
    let (mut sum, mut count) = (0.0, 0usize);

    for p in points {
        let dx = p.x - x;
        if dx.abs() > window {
            continue;
        }
        sum += p.z;
        count += 1;
        if dx <= 0.0 && below.map_or(true, |b| p.x > b.x) {
            below = Some(p);
        }
        if dx >= 0.0 && above.map_or(true, |a| p.x < a.x) {
            above = Some(p);
        }
    }

    match (below, above) {
        (Some(b), Some(a)) if (a.x - b.x).abs() > f64::EPSILON => {
            let t = (x - b.x) / (a.x - b.x);
            Some(b.z + t * (a.z - b.z))
        }
        (Some(b), Some(a)) => Some(0.5 * (a.z + b.z)),
        _ if count > 0 => Some(sum / count as f64),
        _ => None,
    }
}
