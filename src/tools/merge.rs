//! Delta-ray cluster consolidation.
//!
//! Two elements of the same connected group that disagree in one or two
//! views often describe one delta ray whose cluster was broken, either by a
//! gap in its hits or by the muon crossing it. The merges below glue the
//! pieces back together when the association test allows it.

use std::collections::BTreeSet;

use log::debug;

use crate::config::MergeConfig;
use crate::error::Result;
use crate::geometry::{closest_distance, closest_distance_between};
use crate::matching::ThreeViewDeltaRayMatching;
use crate::store::ObjectStore;
use crate::tensor::TensorElement;
use crate::{ClusterId, PfoId, Position, View};

use super::element_groups;

type MergeStep = fn(&mut ThreeViewDeltaRayMatching<'_>, &[TensorElement]) -> Result<bool>;

/// Apply `step` to the connected groups until a full sweep merges nothing.
/// The groups are recomputed after every merge.
pub(crate) fn run_to_fixed_point(
    matching: &mut ThreeViewDeltaRayMatching<'_>,
    step: MergeStep,
) -> Result<bool> {
    let mut changed = false;
    loop {
        let mut merged = false;
        for group in element_groups(matching) {
            if group.len() < 2 {
                continue;
            }
            if step(matching, &group)? {
                merged = true;
                break;
            }
        }
        if !merged {
            return Ok(changed);
        }
        changed = true;
    }
}

/// Merge the differing clusters of two elements sharing clusters in exactly
/// two views.
pub(crate) fn make_two_common_view_merge(
    matching: &mut ThreeViewDeltaRayMatching<'_>,
    elements: &[TensorElement],
) -> Result<bool> {
    for element1 in elements {
        for element2 in elements {
            if element1.same_clusters(element2) {
                continue;
            }
            let differing: Vec<View> = View::ALL
                .into_iter()
                .filter(|v| element1.cluster(*v) != element2.cluster(*v))
                .collect();
            let [merge_view] = differing.as_slice() else {
                continue;
            };

            let merge_config = &matching.config().merge;
            if !are_associated(matching.store(), merge_config, element1, element2, *merge_view) {
                continue;
            }
            let (enlarge, delete) = (element1.cluster(*merge_view), element2.cluster(*merge_view));
            merge_clusters(matching, enlarge, delete)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Merge the two differing pairs of clusters of elements sharing one view,
/// when both pairs are associated and the combined clusters still match.
pub(crate) fn make_one_common_view_merge(
    matching: &mut ThreeViewDeltaRayMatching<'_>,
    elements: &[TensorElement],
) -> Result<bool> {
    let max_chi2 = matching.config().merge.max_merge_reduced_chi_squared;

    for element1 in elements {
        for element2 in elements {
            if element1.same_clusters(element2) {
                continue;
            }
            for view in View::ALL {
                if element1.cluster(view) != element2.cluster(view) {
                    continue;
                }
                let [view1, view2] = view.others();
                let (enlarge1, delete1) = (element1.cluster(view1), element2.cluster(view1));
                let (enlarge2, delete2) = (element1.cluster(view2), element2.cluster(view2));
                if enlarge1 == delete1 || enlarge2 == delete2 {
                    continue;
                }

                let merge_config = &matching.config().merge;
                if !are_associated(matching.store(), merge_config, element1, element2, view1)
                    || !are_associated(matching.store(), merge_config, element1, element2, view2)
                {
                    continue;
                }

                let store = matching.store();
                let mut positions: [Vec<Position>; 3] = Default::default();
                positions[view1.index()] = [enlarge1, delete1]
                    .iter()
                    .flat_map(|c| store.cluster_positions(*c))
                    .collect();
                positions[view2.index()] = [enlarge2, delete2]
                    .iter()
                    .flat_map(|c| store.cluster_positions(*c))
                    .collect();
                positions[view.index()] = store.cluster_positions(element1.cluster(view));

                let [positions_u, positions_v, positions_w] = &positions;
                let Some(matched) =
                    matching.perform_three_view_matching(positions_u, positions_v, positions_w)?
                else {
                    continue;
                };
                if matched.reduced_chi_squared() >= max_chi2 {
                    continue;
                }

                merge_clusters(matching, enlarge1, delete1)?;
                merge_clusters(matching, enlarge2, delete2)?;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn merge_clusters(
    matching: &mut ThreeViewDeltaRayMatching<'_>,
    enlarge: ClusterId,
    delete: ClusterId,
) -> Result<()> {
    matching.update_upon_deletion(enlarge);
    matching.update_upon_deletion(delete);
    matching.store_mut().merge_and_delete_clusters(enlarge, delete)?;
    debug!("[DeltaRayMerge] Merged {delete} into {enlarge}");
    matching.update_for_new_clusters(&[enlarge], &[None])
}

// ============================================================================
// Association test
// ============================================================================

/// Whether the clusters of two elements in `view` belong to the same delta
/// ray.
///
/// The elements must share a common muon. When either cluster touches none
/// of its common muons the clusters are associated if they are closer than
/// `max_cluster_separation` (a clean break). Otherwise they are associated
/// if a muon touching both has contact points on each within
/// `max_vertex_separation` (a break hidden by the muon).
pub fn are_associated(
    store: &dyn ObjectStore,
    config: &MergeConfig,
    element1: &TensorElement,
    element2: &TensorElement,
    view: View,
) -> bool {
    let shared = element1
        .overlap
        .common_muon_pfos
        .iter()
        .any(|m| element2.overlap.common_muon_pfos.contains(m));
    if !shared {
        return false;
    }

    let positions1 = store.cluster_positions(element1.cluster(view));
    let positions2 = store.cluster_positions(element2.cluster(view));

    let muons1 = &element1.overlap.common_muon_pfos;
    let muons2 = &element2.overlap.common_muon_pfos;
    let connected1 = connected_muons(store, config, muons1, &positions1, view);
    let connected2 = connected_muons(store, config, muons2, &positions2, view);

    let clean_break = closest_distance_between(&positions1, &positions2)
        .is_some_and(|d| d < config.max_cluster_separation);
    if (connected1.is_empty() || connected2.is_empty()) && clean_break {
        return true;
    }

    connected1
        .intersection(&connected2)
        .any(|muon| is_hidden_track(store, config, *muon, &positions1, &positions2, view))
}

fn single_muon_cluster(store: &dyn ObjectStore, muon: PfoId, view: View) -> Option<ClusterId> {
    match store.pfo_clusters_in_view(muon, view).as_slice() {
        [cluster] => Some(*cluster),
        _ => None,
    }
}

fn connected_muons(
    store: &dyn ObjectStore,
    config: &MergeConfig,
    muons: &[PfoId],
    positions: &[Position],
    view: View,
) -> BTreeSet<PfoId> {
    muons
        .iter()
        .copied()
        .filter(|&muon| {
            single_muon_cluster(store, muon, view).is_some_and(|c| {
                closest_distance_between(positions, &store.cluster_positions(c))
                    .is_some_and(|d| d < config.max_dr_separation_from_track)
            })
        })
        .collect()
}

fn is_hidden_track(
    store: &dyn ObjectStore,
    config: &MergeConfig,
    muon: PfoId,
    positions1: &[Position],
    positions2: &[Position],
    view: View,
) -> bool {
    let Some(muon_cluster) = single_muon_cluster(store, muon, view) else {
        return false;
    };
    let muon_positions = store.cluster_positions(muon_cluster);
    let vertices = |positions: &[Position]| -> Vec<Position> {
        muon_positions
            .iter()
            .filter(|p| {
                closest_distance(p, positions)
                    .is_some_and(|d| d < config.max_dr_separation_from_track)
            })
            .copied()
            .collect()
    };

    closest_distance_between(&vertices(positions1), &vertices(positions2))
        .is_some_and(|d| d < config.max_vertex_separation)
}
