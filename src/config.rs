//! Configuration for every algorithm.
//!
//! Each algorithm reads its configuration once, at construction. All fields
//! have documented defaults; a JSON file only needs to name the fields it
//! overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReconstructionError, Result};

/// Three-view matching and tensor construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaRayMatchingConfig {
    /// Clusters with fewer hits are not considered for the tensor.
    /// Default: 3
    pub min_cluster_calo_hits: usize,
    /// Half-width of the box, applied to each coordinate, in which muon hits
    /// count as near a cluster hit.
    /// Default: 3.0
    pub search_region_1d: f64,
    /// Per-sample pseudo chi-squared cut for a matched sampling point.
    /// Default: 1.5
    pub pseudo_chi2_cut: f64,
    /// Drift-coordinate step between sampling points.
    /// Default: 0.3
    pub x_sampling_pitch: f64,
    /// Maximum x displacement of a hit used to evaluate a view at a sample.
    /// Default: 1.0
    pub x_overlap_window: f64,
    /// Minimum fraction of sampling points that must match.
    /// Default: 0.5
    pub min_matched_fraction: f64,
    /// Minimum number of matched sampling points.
    /// Default: 3
    pub min_matched_points: usize,
    /// Cap on tool-loop restarts per event.
    /// Default: 1000
    pub max_tensor_tool_repeats: usize,
}

impl Default for DeltaRayMatchingConfig {
    fn default() -> Self {
        Self {
            min_cluster_calo_hits: 3,
            search_region_1d: 3.0,
            pseudo_chi2_cut: 1.5,
            x_sampling_pitch: 0.3,
            x_overlap_window: 1.0,
            min_matched_fraction: 0.5,
            min_matched_points: 3,
            max_tensor_tool_repeats: 1000,
        }
    }
}

/// Removal of muon hits from delta-ray candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalConfig {
    /// A candidate must lie within this distance of its muon cluster.
    /// Default: 2.0
    pub min_separation: f64,
    /// Muons whose fitted direction is within this angle of the drift axis
    /// are treated as transverse.
    /// Default: 10.0
    pub transverse_angle_degrees: f64,
    /// Candidate hits closer than this to the muon direction line may
    /// define the extension point.
    /// Default: 0.5
    pub close_to_line_distance: f64,
    /// Minimum extension of a candidate beyond the muon vertex.
    /// Default: 3.0
    pub min_extension_distance: f64,
    /// Seed hits lie within this distance of the projected delta ray.
    /// Default: 1.0
    pub seed_projection_distance: f64,
    /// Seed hits lie at least this far from the projected muon.
    /// Default: 1.0
    pub seed_muon_distance: f64,
    /// Grown hits lie further than this from the muon.
    /// Default: 0.5
    pub growth_muon_distance: f64,
    /// Remnant hits lie further than this from the muon.
    /// Default: 1.0
    pub remnant_muon_distance: f64,
    /// Below this fraction of projected muon hits, distances to the muon use
    /// its local fitted line instead of the projected positions.
    /// Default: 0.8
    pub projected_hits_fraction: f64,
    /// Sliding-fit half window (layers) for the muon direction in the
    /// contamination test.
    /// Default: 10000
    pub contamination_fit_window: usize,
    /// Sliding-fit half window (layers) for the muon line during seed growth.
    /// Default: 40
    pub growth_fit_window: usize,
    /// Remnant fragments with fewer hits than this may be returned to the muon.
    /// Default: 3
    pub remnant_merge_max_hits: usize,
    /// ... when closer than this to the muon.
    /// Default: 2.0
    pub remnant_merge_max_distance: f64,
    /// Link distance used when reclustering remnant hits.
    /// Default: 1.0
    pub remnant_clustering_distance: f64,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            min_separation: 2.0,
            transverse_angle_degrees: 10.0,
            close_to_line_distance: 0.5,
            min_extension_distance: 3.0,
            seed_projection_distance: 1.0,
            seed_muon_distance: 1.0,
            growth_muon_distance: 0.5,
            remnant_muon_distance: 1.0,
            projected_hits_fraction: 0.8,
            contamination_fit_window: 10000,
            growth_fit_window: 40,
            remnant_merge_max_hits: 3,
            remnant_merge_max_distance: 2.0,
            remnant_clustering_distance: 1.0,
        }
    }
}

/// Delta-ray cluster merging and good-match selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// A muon is connected to a cluster closer than this.
    /// Default: 1.5
    pub max_dr_separation_from_track: f64,
    /// Maximum separation of the muon vertices of two clusters split by a
    /// hidden track.
    /// Default: 10.0
    pub max_vertex_separation: f64,
    /// Maximum separation of two pieces of a cleanly broken cluster.
    /// Default: 3.0
    pub max_cluster_separation: f64,
    /// Reduced chi-squared limit for a one-common-view merge.
    /// Default: 1.0
    pub max_merge_reduced_chi_squared: f64,
    /// Reduced chi-squared limit for a selected match.
    /// Default: 1.0
    pub max_good_match_reduced_chi_squared: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_dr_separation_from_track: 1.5,
            max_vertex_separation: 10.0,
            max_cluster_separation: 3.0,
            max_merge_reduced_chi_squared: 1.0,
            max_good_match_reduced_chi_squared: 1.0,
        }
    }
}

/// Track extension towards the drift-volume boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackExtensionConfig {
    /// Rounds per boundary.
    /// Default: 10
    pub max_loop_iterations: usize,
    /// Sliding-fit half window (layers) for local directions.
    /// Default: 20
    pub micro_sliding_fit_window: usize,
    /// Sliding-fit half window (layers) for global directions.
    /// Default: 1000
    pub macro_sliding_fit_window: usize,
    /// Clusters shorter than this are not extended.
    /// Default: 5.0
    pub min_cluster_length: f64,
    /// Fraction of the cluster length, at each end, searched for the merge
    /// point.
    /// Default: 0.05
    pub stable_region_cluster_fraction: f64,
    /// Minimum cosine between micro and macro directions at a stable merge
    /// point.
    /// Default: 0.995
    pub merge_point_min_cos_angle_deviation: f64,
    /// Minimum cosine between the merge direction and the drift axis
    /// direction towards the boundary.
    /// Default: 0.1
    pub min_boundary_cos_angle: f64,
    /// Length of main-track hits, behind the merge point, seeding the growing
    /// fit.
    /// Default: 20.0
    pub growing_fit_initial_length: f64,
    /// Length of each extrapolated segment.
    /// Default: 5.0
    pub growing_fit_segment_length: f64,
    /// Hits further than this from the extrapolated line are not collected.
    /// Default: 2.0
    pub max_distance_to_line: f64,
    /// Hits not crossed by the line must lie this close to it.
    /// Default: 0.1
    pub closest_distance_to_line: f64,
    /// The extrapolated endpoint must lie this close to the boundary in x.
    /// Default: 2.0
    pub boundary_tolerance: f64,
    /// The merge point must lie this close to the nearest collected hit.
    /// Default: 2.0
    pub max_merge_point_separation: f64,
    /// Step used to test the continuity of the collected hits.
    /// Default: 3.0
    pub line_segment_length: f64,
    /// Maximum number of empty steps in the collected hits.
    /// Default: 3
    pub max_track_gaps: usize,
    /// Main-track hits beyond the merge point further than this from the
    /// extrapolated line are split off.
    /// Default: 0.75
    pub max_distance_from_main_track: f64,
    /// Remnant clusters within this distance of another cluster are merged
    /// into the nearest one.
    /// Default: 4.0
    pub max_hit_distance_from_cluster: f64,
    /// Remnant fragments are reclustered with this link distance.
    /// Default: 4.0
    pub max_hit_separation_for_connected_cluster: f64,
}

impl Default for TrackExtensionConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: 10,
            micro_sliding_fit_window: 20,
            macro_sliding_fit_window: 1000,
            min_cluster_length: 5.0,
            stable_region_cluster_fraction: 0.05,
            merge_point_min_cos_angle_deviation: 0.995,
            min_boundary_cos_angle: 0.1,
            growing_fit_initial_length: 20.0,
            growing_fit_segment_length: 5.0,
            max_distance_to_line: 2.0,
            closest_distance_to_line: 0.1,
            boundary_tolerance: 2.0,
            max_merge_point_separation: 2.0,
            line_segment_length: 3.0,
            max_track_gaps: 3,
            max_distance_from_main_track: 0.75,
            max_hit_distance_from_cluster: 4.0,
            max_hit_separation_for_connected_cluster: 4.0,
        }
    }
}

/// Configuration of a full event reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub matching: DeltaRayMatchingConfig,
    pub removal: RemovalConfig,
    pub merge: MergeConfig,
    pub extension: TrackExtensionConfig,
    /// Run the track extension after delta-ray matching.
    /// Default: true
    pub run_track_extension: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            matching: DeltaRayMatchingConfig::default(),
            removal: RemovalConfig::default(),
            merge: MergeConfig::default(),
            extension: TrackExtensionConfig::default(),
            run_track_extension: true,
        }
    }
}

impl ReconstructionConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would stall or never terminate.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("matching.x_sampling_pitch", self.matching.x_sampling_pitch),
            ("extension.growing_fit_segment_length", self.extension.growing_fit_segment_length),
            ("extension.line_segment_length", self.extension.line_segment_length),
        ];
        for (name, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(ReconstructionError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !(0.0..=90.0).contains(&self.removal.transverse_angle_degrees) {
            return Err(ReconstructionError::Config(format!(
                "removal.transverse_angle_degrees must lie in [0, 90], got {}",
                self.removal.transverse_angle_degrees
            )));
        }
        Ok(())
    }
}
