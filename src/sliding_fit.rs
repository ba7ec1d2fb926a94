//! Two-dimensional sliding linear fit.
//!
//! Positions are expressed in a local frame: `l` along the principal axis of
//! the point set and `t` transverse to it. Points are binned into layers of
//! fixed pitch along `l`, and each populated layer gets a straight-line fit of
//! `t` against `l` over a window of neighbouring layers. Positions and
//! directions anywhere along the fit interpolate between layer fits.

use std::collections::BTreeMap;

use crate::Position;

/// Accumulated sums of the points in one layer.
#[derive(Debug, Clone, Copy, Default)]
struct LayerSums {
    n: f64,
    sum_l: f64,
    sum_t: f64,
    sum_ll: f64,
    sum_lt: f64,
}

impl LayerSums {
    fn add(&mut self, l: f64, t: f64) {
        self.n += 1.0;
        self.sum_l += l;
        self.sum_t += t;
        self.sum_ll += l * l;
        self.sum_lt += l * t;
    }

    fn merge(&mut self, other: &LayerSums) {
        self.n += other.n;
        self.sum_l += other.sum_l;
        self.sum_t += other.sum_t;
        self.sum_ll += other.sum_ll;
        self.sum_lt += other.sum_lt;
    }
}

/// Local fit result for one populated layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerFit {
    pub layer: i64,
    /// Mean longitudinal coordinate of the layer's points.
    pub l: f64,
    /// Fitted transverse coordinate at `l`.
    pub t: f64,
    /// Fitted dt/dl.
    pub gradient: f64,
}

/// A sliding linear fit over a set of 2D positions.
#[derive(Debug, Clone)]
pub struct SlidingFit {
    origin: Position,
    axis: Position,
    layer_pitch: f64,
    layers: Vec<LayerFit>,
}

impl SlidingFit {
    /// Fit `positions` with a window of `half_window_layers` layers either
    /// side of each layer. Returns `None` for an empty point set or a
    /// non-positive layer pitch.
    pub fn new(
        positions: &[Position],
        half_window_layers: usize,
        layer_pitch: f64,
    ) -> Option<Self> {
        if positions.is_empty() || layer_pitch.is_nan() || layer_pitch <= 0.0 {
            return None;
        }

        let origin = centroid(positions);
        let axis = principal_axis(positions, &origin);

        let mut sums: BTreeMap<i64, LayerSums> = BTreeMap::new();
        for p in positions {
            let (l, t) = local_coordinates(&origin, &axis, p);
            let layer = (l / layer_pitch).floor() as i64;
            sums.entry(layer).or_default().add(l, t);
        }

        let half_window = half_window_layers as i64;
        let layers = sums
            .iter()
            .map(|(&layer, own)| {
                let mut window = LayerSums::default();
                let range = layer.saturating_sub(half_window)..=layer.saturating_add(half_window);
                for (_, s) in sums.range(range) {
                    window.merge(s);
                }
                let l = own.sum_l / own.n;
                let denominator = window.n * window.sum_ll - window.sum_l * window.sum_l;
                let gradient = if denominator.abs() > f64::EPSILON * window.n.max(1.0) {
                    (window.n * window.sum_lt - window.sum_l * window.sum_t) / denominator
                } else {
                    0.0
                };
                let mean_l = window.sum_l / window.n;
                let mean_t = window.sum_t / window.n;
                LayerFit {
                    layer,
                    l,
                    t: mean_t + gradient * (l - mean_l),
                    gradient,
                }
            })
            .collect();

        Some(Self {
            origin,
            axis,
            layer_pitch,
            layers,
        })
    }

    /// Unit vector of the fit axis, oriented towards increasing x (or
    /// increasing z for an axis perpendicular to x).
    pub fn axis(&self) -> Position {
        self.axis
    }

    pub fn layer_pitch(&self) -> f64 {
        self.layer_pitch
    }

    pub fn layer_fits(&self) -> &[LayerFit] {
        &self.layers
    }

    /// Local `(l, t)` coordinates of a global position.
    pub fn local_position(&self, position: &Position) -> (f64, f64) {
        local_coordinates(&self.origin, &self.axis, position)
    }

    /// Global position of local coordinates `(l, t)`.
    pub fn global_position(&self, l: f64, t: f64) -> Position {
        let normal = Position::new(-self.axis.z, self.axis.x);
        self.origin + self.axis * l + normal * t
    }

    /// Global unit direction for a local gradient dt/dl.
    fn global_direction(&self, gradient: f64) -> Position {
        let normal = Position::new(-self.axis.z, self.axis.x);
        (self.axis + normal * gradient).unit().unwrap_or(self.axis)
    }

    pub fn min_l(&self) -> f64 {
        self.layers.first().map_or(0.0, |f| f.l)
    }

    pub fn max_l(&self) -> f64 {
        self.layers.last().map_or(0.0, |f| f.l)
    }

    /// Distance along the axis between the first and last populated layers.
    pub fn length(&self) -> f64 {
        self.max_l() - self.min_l()
    }

    /// Fitted `(t, gradient)` at longitudinal coordinate `l`, clamped to the
    /// fitted range.
    fn fit_at(&self, l: f64) -> (f64, f64) {
        let (Some(first), Some(last)) = (self.layers.first(), self.layers.last()) else {
            return (0.0, 0.0);
        };
        if l <= first.l {
            return (first.t + first.gradient * (l - first.l), first.gradient);
        }
        if l >= last.l {
            return (last.t + last.gradient * (l - last.l), last.gradient);
        }
        let upper = self.layers.partition_point(|f| f.l < l);
        let (a, b) = (&self.layers[upper - 1], &self.layers[upper]);
        let span = b.l - a.l;
        if span <= f64::EPSILON {
            return (a.t, a.gradient);
        }
        let w = (l - a.l) / span;
        (a.t + w * (b.t - a.t), a.gradient + w * (b.gradient - a.gradient))
    }

    /// Fitted global position at longitudinal coordinate `l`.
    pub fn fit_position(&self, l: f64) -> Position {
        let (t, _) = self.fit_at(l);
        self.global_position(l, t)
    }

    /// Fitted global direction at longitudinal coordinate `l`, pointing
    /// towards increasing `l`.
    pub fn fit_direction(&self, l: f64) -> Position {
        let (_, gradient) = self.fit_at(l);
        self.global_direction(gradient)
    }

    /// Fitted position closest to `position` along the axis.
    pub fn projected_position(&self, position: &Position) -> Position {
        let (l, _) = self.local_position(position);
        self.fit_position(l)
    }

    /// Perpendicular distance of `position` from the local fitted line.
    pub fn distance_to_fit(&self, position: &Position) -> f64 {
        let (l, _) = self.local_position(position);
        crate::geometry::distance_to_line(position, &self.fit_position(l), &self.fit_direction(l))
    }

    pub fn global_min_layer_position(&self) -> Position {
        self.fit_position(self.min_l())
    }

    pub fn global_max_layer_position(&self) -> Position {
        self.fit_position(self.max_l())
    }

    pub fn global_min_layer_direction(&self) -> Position {
        self.fit_direction(self.min_l())
    }

    pub fn global_max_layer_direction(&self) -> Position {
        self.fit_direction(self.max_l())
    }
}

fn centroid(positions: &[Position]) -> Position {
    let sum = positions.iter().fold(Position::ZERO, |acc, p| acc + *p);
    sum * (1.0 / positions.len() as f64)
}

fn principal_axis(positions: &[Position], origin: &Position) -> Position {
    let (mut xx, mut xz, mut zz) = (0.0, 0.0, 0.0);
    for p in positions {
        let d = *p - *origin;
        xx += d.x * d.x;
        xz += d.x * d.z;
        zz += d.z * d.z;
    }
    let theta = 0.5 * (2.0 * xz).atan2(xx - zz);
    let axis = Position::new(theta.cos(), theta.sin());
    if axis.x < -f64::EPSILON || (axis.x.abs() <= f64::EPSILON && axis.z < 0.0) {
        -axis
    } else {
        axis
    }
}

fn local_coordinates(origin: &Position, axis: &Position, position: &Position) -> (f64, f64) {
    let d = *position - *origin;
    (d.dot(axis), axis.cross(&d))
}
