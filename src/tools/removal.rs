//! Cosmic-ray removal: pull delta-ray hits out of clusters contaminated by
//! the muon they sit on, returning muon hits to the muon.

use std::collections::BTreeSet;

use log::debug;

use crate::error::Result;
use crate::geometry::{
    closest_distance, closest_distance_between, closest_position, closest_positions,
    distance_to_line, is_close_to_line, is_in_line_segment, span_x, span_z,
};
use crate::matching::ThreeViewDeltaRayMatching;
use crate::sliding_fit::SlidingFit;
use crate::tensor::TensorElement;
use crate::{ClusterId, HitId, PfoId, Position, View};

use super::element_groups;

/// Hits of a candidate cluster assigned by seed growth. Hits in neither list
/// go back to the muon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedGrowth {
    pub delta_ray: Vec<HitId>,
    pub remnant: Vec<HitId>,
}

// ============================================================================
// Tool entry point
// ============================================================================

pub(crate) fn remove_muon_hits(matching: &mut ThreeViewDeltaRayMatching<'_>) -> Result<bool> {
    let mut changed = false;
    let mut modified: BTreeSet<ClusterId> = BTreeSet::new();
    let mut checked: BTreeSet<ClusterId> = BTreeSet::new();

    for group in element_groups(matching) {
        for element in &group {
            for view in View::ALL {
                let candidate = element.cluster(view);
                if checked.contains(&candidate) {
                    continue;
                }
                if element.clusters().iter().any(|c| modified.contains(c)) {
                    continue;
                }
                if pass_element_checks(matching, element, view).is_none() {
                    continue;
                }
                if !is_contaminated(matching, element, view)? {
                    continue;
                }
                if !is_best_element(matching, element, view, &group) {
                    continue;
                }
                checked.insert(candidate);

                let seed = create_seed(matching, element, view);
                if seed.is_empty() {
                    continue;
                }
                let Some(growth) = grow_seed(matching, element, view, seed) else {
                    continue;
                };
                if growth.delta_ray.len() == matching.store().n_hits(candidate) {
                    continue;
                }

                modified.insert(candidate);
                if split_cluster(matching, element, view, &growth)? {
                    changed = true;
                }
            }
        }
    }

    Ok(changed)
}

// ============================================================================
// Element checks
// ============================================================================

/// The muon cluster of the element in `view`, provided the candidate lies
/// within `min_separation` of it.
pub fn pass_element_checks(
    matching: &ThreeViewDeltaRayMatching<'_>,
    element: &TensorElement,
    view: View,
) -> Option<ClusterId> {
    let muon_cluster = matching.muon_cluster(element, view)?;
    let store = matching.store();
    let separation = closest_distance_between(
        &store.cluster_positions(element.cluster(view)),
        &store.cluster_positions(muon_cluster),
    )?;
    (separation <= matching.config().removal.min_separation).then_some(muon_cluster)
}

/// Whether the candidate in `view` carries muon hits.
///
/// True when the candidate's span lies inside the muon's span in both other
/// views, or when a transverse muon is overlapped by candidate hits that run
/// along its direction past its end.
pub fn is_contaminated(
    matching: &ThreeViewDeltaRayMatching<'_>,
    element: &TensorElement,
    view: View,
) -> Result<bool> {
    let Some(muon_cluster) = matching.muon_cluster(element, view) else {
        return Ok(false);
    };

    let mut contained = true;
    for other in view.others() {
        let Some(other_muon) = matching.muon_cluster(element, other) else {
            return Ok(false);
        };
        if !is_span_contained(matching, element.cluster(other), other_muon)? {
            contained = false;
            break;
        }
    }
    if contained {
        return Ok(true);
    }

    Ok(extends_along_transverse_muon(matching, element.cluster(view), muon_cluster))
}

fn is_span_contained(
    matching: &ThreeViewDeltaRayMatching<'_>,
    candidate: ClusterId,
    muon_cluster: ClusterId,
) -> Result<bool> {
    let store = matching.store();
    let candidate_positions = store.cluster_positions(candidate);
    let muon_positions = store.cluster_positions(muon_cluster);

    let (Some((dr_min_x, dr_max_x)), Some((mu_min_x, mu_max_x))) =
        (span_x(&candidate_positions), span_x(&muon_positions))
    else {
        return Ok(false);
    };
    if dr_min_x < mu_min_x || dr_max_x > mu_max_x {
        return Ok(false);
    }

    let (Some((dr_min_z, dr_max_z)), Some((mu_min_z, mu_max_z))) = (
        span_z(&candidate_positions, dr_min_x, dr_max_x)?,
        span_z(&muon_positions, mu_min_x, mu_max_x)?,
    ) else {
        return Ok(false);
    };
    Ok(dr_min_z >= mu_min_z && dr_max_z <= mu_max_z)
}

fn extends_along_transverse_muon(
    matching: &ThreeViewDeltaRayMatching<'_>,
    candidate: ClusterId,
    muon_cluster: ClusterId,
) -> bool {
    let config = &matching.config().removal;
    let store = matching.store();
    let candidate_positions = store.cluster_positions(candidate);
    let muon_positions = store.cluster_positions(muon_cluster);

    let Some((dr_vertex, muon_vertex)) = closest_positions(&candidate_positions, &muon_positions)
    else {
        return false;
    };
    let Some(fit) = SlidingFit::new(
        &muon_positions,
        config.contamination_fit_window,
        matching.geometry().wire_pitch(),
    ) else {
        return false;
    };

    let direction = fit.global_min_layer_direction();
    let angle = direction.opening_angle(&Position::new(1.0, 0.0)).to_degrees();
    let threshold = config.transverse_angle_degrees;
    if angle >= threshold && angle <= 180.0 - threshold {
        return false;
    }

    let line_end = muon_vertex + direction;
    let mut furthest = 0.0;
    let mut extended_point = None;
    for p in &candidate_positions {
        let separation = p.distance(&muon_vertex);
        let on_line = is_close_to_line(p, &muon_vertex, &line_end, config.close_to_line_distance);
        if separation > furthest && on_line {
            furthest = separation;
            extended_point = Some(*p);
        }
    }

    let Some(extended_point) = extended_point else {
        return false;
    };
    if furthest < config.min_extension_distance {
        return false;
    }

    // A muon running alongside the candidate is not contamination
    !muon_positions
        .iter()
        .any(|p| is_in_line_segment(&dr_vertex, &extended_point, p))
}

/// Whether `element` is the best-ranked element proposing to modify its
/// cluster in `view`.
///
/// A competitor sharing the cluster wins with more total hits, then a
/// smaller reduced chi-squared, then a smaller cluster triple, provided it
/// passes the element checks itself.
pub fn is_best_element(
    matching: &ThreeViewDeltaRayMatching<'_>,
    element: &TensorElement,
    view: View,
    elements: &[TensorElement],
) -> bool {
    let store = matching.store();
    let hits = element.total_hits(store);
    let chi2 = element.overlap.reduced_chi_squared();

    for test in elements {
        if test.cluster(view) != element.cluster(view) || test.same_clusters(element) {
            continue;
        }
        let test_hits = test.total_hits(store);
        let test_chi2 = test.overlap.reduced_chi_squared();
        let wins_tie = test_chi2 == chi2 && test.clusters() < element.clusters();
        let beats = test_hits > hits || (test_hits == hits && (test_chi2 < chi2 || wins_tie));
        if beats && pass_element_checks(matching, test, view).is_some() {
            return false;
        }
    }
    true
}

// ============================================================================
// Seed creation and growth
// ============================================================================

/// Candidate hits close to the delta ray projected from the other two views
/// and away from the projected muon.
pub fn create_seed(
    matching: &ThreeViewDeltaRayMatching<'_>,
    element: &TensorElement,
    view: View,
) -> Vec<HitId> {
    let config = &matching.config().removal;
    let Some(muon) = element.overlap.unique_common_muon() else {
        return Vec::new();
    };
    let Some(muon_projected) = matching.project_muon_positions(view, muon) else {
        return Vec::new();
    };
    let [a, b] = view.others();
    let Some(delta_ray_projected) =
        matching.project_cluster_positions(view, element.cluster(a), element.cluster(b))
    else {
        return Vec::new();
    };

    let max_projection_distance_squared =
        config.seed_projection_distance * config.seed_projection_distance;
    matching
        .store()
        .cluster_hit_positions(element.cluster(view))
        .into_iter()
        .filter(|(_, p)| {
            delta_ray_projected
                .iter()
                .any(|q| q.distance_squared(p) < max_projection_distance_squared)
        })
        .filter(|(_, p)| {
            closest_distance(p, &muon_projected).map_or(true, |d| d >= config.seed_muon_distance)
        })
        .map(|(hit, _)| hit)
        .collect()
}

/// Grow a seed over the candidate cluster.
///
/// Hits closer to the delta-ray hits than to the muon, and clear of the muon,
/// join the delta ray until nothing changes. The hits left over that are far
/// from the muon form the remnant. Returns `None` when the muon cluster or
/// its projection is unavailable.
pub fn grow_seed(
    matching: &ThreeViewDeltaRayMatching<'_>,
    element: &TensorElement,
    view: View,
    seed: Vec<HitId>,
) -> Option<SeedGrowth> {
    let config = &matching.config().removal;
    let store = matching.store();
    let muon_cluster = matching.muon_cluster(element, view)?;
    let muon: PfoId = element.overlap.unique_common_muon()?;
    let muon_projected = matching.project_muon_positions(view, muon)?;

    let candidate_hits = store.cluster_hit_positions(element.cluster(view));
    let muon_positions = store.cluster_positions(muon_cluster);

    let projected_fraction = muon_projected.len() as f64 / muon_positions.len().max(1) as f64;
    let muon_line = if projected_fraction < config.projected_hits_fraction {
        let pitch = matching.geometry().wire_pitch();
        let fit = SlidingFit::new(&muon_positions, config.growth_fit_window, pitch)?;
        let candidate_positions: Vec<Position> = candidate_hits.iter().map(|(_, p)| *p).collect();
        let (_, muon_vertex) = closest_positions(&candidate_positions, &muon_positions)?;
        let on_muon = closest_position(&muon_vertex, &muon_projected).unwrap_or(muon_vertex);
        let (l, _) = fit.local_position(&on_muon);
        Some((on_muon, fit.fit_direction(l)))
    } else {
        None
    };
    let distance_to_muon = |p: &Position| match muon_line {
        Some((origin, direction)) => distance_to_line(p, &origin, &direction),
        None => closest_distance(p, &muon_projected).unwrap_or(f64::MAX),
    };

    let mut collected: BTreeSet<HitId> = seed.into_iter().collect();
    let mut collected_positions: Vec<Position> = candidate_hits
        .iter()
        .filter(|(h, _)| collected.contains(h))
        .map(|(_, p)| *p)
        .collect();

    loop {
        let mut added = false;
        for (hit, p) in &candidate_hits {
            if collected.contains(hit) {
                continue;
            }
            let to_delta_ray = closest_distance(p, &collected_positions).unwrap_or(f64::MAX);
            let to_muon = distance_to_muon(p);
            if to_muon > config.growth_muon_distance && to_delta_ray < to_muon {
                collected.insert(*hit);
                collected_positions.push(*p);
                added = true;
            }
        }
        if !added {
            break;
        }
    }

    let delta_ray = candidate_hits
        .iter()
        .filter(|(h, _)| collected.contains(h))
        .map(|(h, _)| *h)
        .collect();
    let remnant = candidate_hits
        .iter()
        .filter(|(h, p)| {
            !collected.contains(h) && distance_to_muon(p) > config.remnant_muon_distance
        })
        .map(|(h, _)| *h)
        .collect();

    Some(SeedGrowth { delta_ray, remnant })
}

// ============================================================================
// Cluster splitting
// ============================================================================

/// Fragment the candidate into delta-ray, remnant and muon parts.
///
/// The muon part is merged into the muon cluster and the remnant is
/// reclustered; small remnant fragments close to the muon are merged into
/// it too. Returns `false` without touching the event when the growth is not
/// a genuine partition.
pub fn split_cluster(
    matching: &mut ThreeViewDeltaRayMatching<'_>,
    element: &TensorElement,
    view: View,
    growth: &SeedGrowth,
) -> Result<bool> {
    let candidate = element.cluster(view);
    let (Some(muon_cluster), Some(muon)) = (
        matching.muon_cluster(element, view),
        element.overlap.unique_common_muon(),
    ) else {
        return Ok(false);
    };
    let Some(original_hits) = matching.store().cluster(candidate).map(|c| c.hits().to_vec()) else {
        return Ok(false);
    };
    if growth.delta_ray.is_empty() || growth.delta_ray.len() >= original_hits.len() {
        return Ok(false);
    }

    let delta_ray: BTreeSet<HitId> = growth.delta_ray.iter().copied().collect();
    let remnant: BTreeSet<HitId> = growth
        .remnant
        .iter()
        .copied()
        .filter(|h| !delta_ray.contains(h))
        .collect();

    let mut delta_ray_hits = Vec::new();
    let mut remnant_hits = Vec::new();
    let mut muon_hits = Vec::new();
    for hit in original_hits {
        if delta_ray.contains(&hit) {
            delta_ray_hits.push(hit);
        } else if remnant.contains(&hit) {
            remnant_hits.push(hit);
        } else {
            muon_hits.push(hit);
        }
    }

    matching.update_upon_deletion(muon_cluster);
    matching.update_upon_deletion(candidate);

    let has_remnant = !remnant_hits.is_empty();
    let has_muon_part = !muon_hits.is_empty();
    let mut parts = vec![delta_ray_hits];
    if has_remnant {
        parts.push(remnant_hits);
    }
    if has_muon_part {
        parts.push(muon_hits);
    }

    let mut created = matching.store_mut().fragment_cluster(candidate, &parts)?.into_iter();
    let delta_ray_cluster = created.next();
    let remnant_cluster = if has_remnant { created.next() } else { None };
    let muon_part = if has_muon_part { created.next() } else { None };

    if let Some(part) = muon_part {
        matching.store_mut().merge_and_delete_clusters(muon_cluster, part)?;
    }

    let mut clusters = Vec::new();
    let mut pfos = Vec::new();
    if let Some(remnant_cluster) = remnant_cluster {
        fragment_remnant(matching, view, muon_cluster, remnant_cluster, &mut clusters, &mut pfos)?;
    }
    clusters.push(muon_cluster);
    pfos.push(Some(muon));
    if let Some(delta_ray_cluster) = delta_ray_cluster {
        clusters.push(delta_ray_cluster);
        pfos.push(None);
    }

    debug!(
        "[CosmicRayRemoval] Split {candidate} in view {view}: {} delta-ray hits, {} remnant hits",
        growth.delta_ray.len(),
        remnant.len()
    );
    matching.update_for_new_clusters(&clusters, &pfos)?;
    Ok(true)
}

/// Recluster a remnant. Fragments small and close to the muon go back to it;
/// the others are appended to `clusters` as standalone candidates.
fn fragment_remnant(
    matching: &mut ThreeViewDeltaRayMatching<'_>,
    view: View,
    muon_cluster: ClusterId,
    remnant: ClusterId,
    clusters: &mut Vec<ClusterId>,
    pfos: &mut Vec<Option<PfoId>>,
) -> Result<()> {
    let config = matching.config().removal.clone();
    let Some(hits) = matching.store().cluster(remnant).map(|c| c.hits().to_vec()) else {
        return Ok(());
    };

    let store = matching.store_mut();
    store.delete_cluster(remnant)?;
    let fragments = store.run_clustering(view, &hits, config.remnant_clustering_distance)?;

    for fragment in fragments {
        if store.n_hits(fragment) < config.remnant_merge_max_hits {
            let separation = closest_distance_between(
                &store.cluster_positions(fragment),
                &store.cluster_positions(muon_cluster),
            );
            if separation.is_some_and(|d| d < config.remnant_merge_max_distance) {
                store.merge_and_delete_clusters(muon_cluster, fragment)?;
                continue;
            }
        }
        clusters.push(fragment);
        pfos.push(None);
    }
    Ok(())
}
