//! # Tensor tools
//!
//! Decision procedures run against the overlap tensor by
//! [`ThreeViewDeltaRayMatching::run`]. Each tool inspects connected groups of
//! tensor elements, mutates the event through the matching algorithm and
//! reports whether it changed anything.
//!
//! ## Tools
//! - **Cosmic-ray removal** strips muon hits out of delta-ray candidates
//! - **Two-common-view merge** joins the differing clusters of two elements
//!   that share clusters in two views
//! - **One-common-view merge** joins two pairs of clusters when the combined
//!   clusters still match across the views
//! - **Good-match selection** promotes disjoint well-matched elements to
//!   delta-ray pfos

mod merge;
mod removal;
mod selection;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::matching::ThreeViewDeltaRayMatching;
use crate::tensor::TensorElement;
use crate::ClusterId;

pub use merge::are_associated;
pub use removal::{
    create_seed, grow_seed, is_best_element, is_contaminated, pass_element_checks, split_cluster,
    SeedGrowth,
};
pub use selection::pick_out_good_matches;

/// The closed set of tensor tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaRayTensorTool {
    CosmicRayRemoval,
    TwoCommonViewMerge,
    OneCommonViewMerge,
    GoodMatchSelection,
}

impl DeltaRayTensorTool {
    /// Tools in the order the matching algorithm runs them.
    pub fn default_sequence() -> Vec<DeltaRayTensorTool> {
        vec![
            DeltaRayTensorTool::CosmicRayRemoval,
            DeltaRayTensorTool::TwoCommonViewMerge,
            DeltaRayTensorTool::OneCommonViewMerge,
            DeltaRayTensorTool::GoodMatchSelection,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeltaRayTensorTool::CosmicRayRemoval => "CosmicRayRemoval",
            DeltaRayTensorTool::TwoCommonViewMerge => "TwoCommonViewMerge",
            DeltaRayTensorTool::OneCommonViewMerge => "OneCommonViewMerge",
            DeltaRayTensorTool::GoodMatchSelection => "GoodMatchSelection",
        }
    }

    /// Run the tool once. Returns whether the event changed.
    pub fn apply(&self, matching: &mut ThreeViewDeltaRayMatching<'_>) -> Result<bool> {
        match self {
            DeltaRayTensorTool::CosmicRayRemoval => removal::remove_muon_hits(matching),
            DeltaRayTensorTool::TwoCommonViewMerge => {
                merge::run_to_fixed_point(matching, merge::make_two_common_view_merge)
            }
            DeltaRayTensorTool::OneCommonViewMerge => {
                merge::run_to_fixed_point(matching, merge::make_one_common_view_merge)
            }
            DeltaRayTensorTool::GoodMatchSelection => selection::select_good_matches(matching),
        }
    }
}

/// Connected element groups of the current tensor, walked from the sorted key
/// clusters. A key already covered by an earlier group is skipped.
pub(crate) fn element_groups(matching: &ThreeViewDeltaRayMatching<'_>) -> Vec<Vec<TensorElement>> {
    let mut used_keys: BTreeSet<ClusterId> = BTreeSet::new();
    let mut groups = Vec::new();

    for key in matching.sorted_key_clusters() {
        if used_keys.contains(&key) {
            continue;
        }
        let mut checked = BTreeSet::new();
        let mut elements = Vec::new();
        matching.connected_elements(key, true, &mut elements, &mut checked);
        if elements.is_empty() {
            continue;
        }
        used_keys.extend(elements.iter().map(|e| e.cluster_u));
        groups.push(elements);
    }

    groups
}
