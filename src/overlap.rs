//! Three-view overlap results and position matching.

use serde::{Deserialize, Serialize};

use crate::config::DeltaRayMatchingConfig;
use crate::error::{ReconstructionError, Result};
use crate::geometry::{profile_z, span_x, DetectorGeometry};
use crate::{PfoId, Position};

/// Drift-coordinate extent of each view and of their common range.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct XOverlap {
    pub u_min_x: f64,
    pub u_max_x: f64,
    pub v_min_x: f64,
    pub v_max_x: f64,
    pub w_min_x: f64,
    pub w_max_x: f64,
    pub x_overlap_span: f64,
}

impl XOverlap {
    /// Lower edge of the common range.
    pub fn common_min_x(&self) -> f64 {
        self.u_min_x.max(self.v_min_x).max(self.w_min_x)
    }

    /// Upper edge of the common range.
    pub fn common_max_x(&self) -> f64 {
        self.u_max_x.min(self.v_max_x).min(self.w_max_x)
    }
}

/// Raw outcome of sampling three point sets over their common x range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreeViewMatch {
    /// Sum of the pseudo chi-squared of matched sampling points.
    pub chi_squared: f64,
    pub n_sampling_points: usize,
    pub n_matched_sampling_points: usize,
    pub x_overlap: XOverlap,
}

impl ThreeViewMatch {
    pub fn reduced_chi_squared(&self) -> f64 {
        if self.n_sampling_points == 0 {
            return 0.0;
        }
        self.chi_squared / self.n_sampling_points as f64
    }

    pub fn matched_fraction(&self) -> f64 {
        if self.n_sampling_points == 0 {
            return 0.0;
        }
        self.n_matched_sampling_points as f64 / self.n_sampling_points as f64
    }
}

/// Match quality of a cluster triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackOverlapResult {
    pub n_sampling_points: usize,
    pub n_matched_sampling_points: usize,
    pub chi_squared: f64,
    pub reduced_chi_squared: f64,
    pub x_overlap: XOverlap,
}

impl From<ThreeViewMatch> for TrackOverlapResult {
    fn from(m: ThreeViewMatch) -> Self {
        Self {
            n_sampling_points: m.n_sampling_points,
            n_matched_sampling_points: m.n_matched_sampling_points,
            chi_squared: m.chi_squared,
            reduced_chi_squared: m.reduced_chi_squared(),
            x_overlap: m.x_overlap,
        }
    }
}

/// Track overlap result plus the muons close to all three clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRayOverlapResult {
    pub track: TrackOverlapResult,
    /// Sorted, without duplicates.
    pub common_muon_pfos: Vec<PfoId>,
}

impl DeltaRayOverlapResult {
    pub fn new(track: TrackOverlapResult, mut common_muon_pfos: Vec<PfoId>) -> Self {
        common_muon_pfos.sort();
        common_muon_pfos.dedup();
        Self {
            track,
            common_muon_pfos,
        }
    }

    pub fn reduced_chi_squared(&self) -> f64 {
        self.track.reduced_chi_squared
    }

    /// The single common muon, if there is exactly one.
    pub fn unique_common_muon(&self) -> Option<PfoId> {
        match self.common_muon_pfos.as_slice() {
            [muon] => Some(*muon),
            _ => None,
        }
    }
}

/// Sample three point sets over their common drift range and correlate them.
///
/// At each sample the wire coordinate of every view is profiled within
/// `x_overlap_window`; samples where any view is empty are skipped. A
/// sampled point matches when the geometry's pseudo chi-squared is below
/// `pseudo_chi2_cut`. Returns `None` when the spans do not overlap, nothing
/// could be sampled or too few samples match.
pub fn perform_three_view_matching(
    positions_u: &[Position],
    positions_v: &[Position],
    positions_w: &[Position],
    geometry: &dyn DetectorGeometry,
    config: &DeltaRayMatchingConfig,
) -> Result<Option<ThreeViewMatch>> {
    let (Some((u_min_x, u_max_x)), Some((v_min_x, v_max_x)), Some((w_min_x, w_max_x))) =
        (span_x(positions_u), span_x(positions_v), span_x(positions_w))
    else {
        return Ok(None);
    };

    let mut x_overlap = XOverlap {
        u_min_x,
        u_max_x,
        v_min_x,
        v_max_x,
        w_min_x,
        w_max_x,
        x_overlap_span: 0.0,
    };
    let (min_x, max_x) = (x_overlap.common_min_x(), x_overlap.common_max_x());
    if min_x > max_x {
        return Ok(None);
    }
    x_overlap.x_overlap_span = max_x - min_x;

    let pitch = config.x_sampling_pitch;
    if pitch.is_nan() || pitch <= 0.0 {
        return Err(ReconstructionError::InvalidParameter {
            reason: format!("x_sampling_pitch must be positive, got {pitch}"),
        });
    }
    let n_steps = ((max_x - min_x) / pitch + 1.0e-6).floor() as usize;

    let mut chi_squared = 0.0;
    let (mut n_sampling_points, mut n_matched_sampling_points) = (0usize, 0usize);

    for step in 0..=n_steps {
        let x = (min_x + step as f64 * pitch).min(max_x);
        let window = config.x_overlap_window;
        let (Some(z_u), Some(z_v), Some(z_w)) = (
            profile_z(positions_u, x, window),
            profile_z(positions_v, x, window),
            profile_z(positions_w, x, window),
        ) else {
            continue;
        };

        n_sampling_points += 1;
        let pseudo_chi2 = geometry.merge_three_positions(z_u, z_v, z_w);
        if pseudo_chi2 < config.pseudo_chi2_cut {
            n_matched_sampling_points += 1;
            chi_squared += pseudo_chi2;
        }
    }

    let result = ThreeViewMatch {
        chi_squared,
        n_sampling_points,
        n_matched_sampling_points,
        x_overlap,
    };

    if n_sampling_points == 0
        || n_matched_sampling_points < config.min_matched_points
        || result.matched_fraction() < config.min_matched_fraction
    {
        return Ok(None);
    }

    Ok(Some(result))
}
