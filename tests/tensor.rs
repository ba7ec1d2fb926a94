//! Tests for overlap, tensor and matching modules

mod common;

use std::collections::BTreeSet;

use common::*;
use deltaray::overlap::perform_three_view_matching;
use deltaray::store::ParticleKind;
use deltaray::{
    ClusterId, DeltaRayMatchingConfig, DeltaRayOverlapResult, EventStore, ObjectStore,
    OverlapTensor, PfoId, Position, ReconstructionConfig, ReconstructionError,
    ThreeViewDeltaRayMatching, TrackOverlapResult, View, WireGeometry, XOverlap,
};

fn overlap(chi2: f64, muons: Vec<PfoId>) -> DeltaRayOverlapResult {
    DeltaRayOverlapResult::new(
        TrackOverlapResult {
            n_sampling_points: 10,
            n_matched_sampling_points: 10,
            chi_squared: chi2 * 10.0,
            reduced_chi_squared: chi2,
            x_overlap: XOverlap::default(),
        },
        muons,
    )
}

/// A flat muon at z = 0 in every view and a consistent delta-ray triple of
/// ten hits 0.3 apart in x, W perturbed by 0.05.
fn boundary_sample_event() -> (EventStore, [ClusterId; 3]) {
    let mut store = EventStore::new();
    add_muon(&mut store, &steps(0.0, 30.0, 0.5), |_| 0.0, |_| 0.0);

    let xs: Vec<f64> = (0..10).map(|i| 10.0 + i as f64 * 0.3).collect();
    let u = |x: f64| 1.5 + 0.2 * (x - 10.0);
    let v = |x: f64| 0.5 + 0.1 * (x - 10.0);
    let cu = add_cluster(&mut store, View::U, &xs, u);
    let cv = add_cluster(&mut store, View::V, &xs, v);
    let w_hits: Vec<_> = xs
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let error = if i % 2 == 0 { 0.05 } else { -0.05 };
            store.add_hit(View::W, Position::new(x, u(x) + v(x) + error), 1.0, 0.5)
        })
        .collect();
    let cw = store.create_cluster(View::W, &w_hits).unwrap();
    (store, [cu, cv, cw])
}

#[test]
fn test_boundary_sample_scenario() {
    let (mut store, [cu, cv, cw]) = boundary_sample_event();
    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();

    let mut matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    matching.prepare();
    let result = matching.calculate_overlap_result(cu, cv, cw).unwrap().unwrap();

    assert_eq!(result.track.n_sampling_points, 10);
    assert_eq!(result.track.n_matched_sampling_points, result.track.n_sampling_points);
    assert!(result.reduced_chi_squared() < 0.01);
    assert_eq!(result.common_muon_pfos.len(), 1);
    assert!((result.track.x_overlap.x_overlap_span - 2.7).abs() < 1e-9);
}

#[test]
fn test_build_tensor_from_input_clusters() {
    let (mut store, [cu, cv, cw]) = boundary_sample_event();
    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();

    let mut matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    matching.prepare();
    matching.build_tensor().unwrap();

    // Muon clusters are not inputs
    for view in View::ALL {
        assert_eq!(matching.input_clusters(view).len(), 1);
    }
    assert_eq!(matching.tensor().len(), 1);
    assert!(matching.tensor().get(cu, cv, cw).is_some());
}

#[test]
fn test_inconsistent_triple_does_not_match() {
    let mut store = EventStore::new();
    add_muon(&mut store, &steps(0.0, 30.0, 0.5), |_| 0.0, |_| 0.0);
    let xs = steps(10.0, 13.0, 0.3);
    let cu = add_cluster(&mut store, View::U, &xs, |_| 2.0);
    let cv = add_cluster(&mut store, View::V, &xs, |_| 1.0);
    let cw = add_cluster(&mut store, View::W, &xs, |_| 0.0);

    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();
    let mut matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    matching.prepare();
    assert!(matching.calculate_overlap_result(cu, cv, cw).unwrap().is_none());
}

#[test]
fn test_triple_without_common_muon_is_rejected() {
    let mut store = EventStore::new();
    add_muon(&mut store, &steps(0.0, 30.0, 0.5), |_| 0.0, |_| 0.0);
    // Consistent, but far from the muon
    let triple = add_matched_triple(&mut store, &steps(10.0, 13.0, 0.3), |_| 40.0, |_| 30.0);

    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();
    let mut matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    matching.prepare();
    assert!(matching.nearby_muon_pfos(triple[0]).is_empty());
    assert!(matching
        .calculate_overlap_result(triple[0], triple[1], triple[2])
        .unwrap()
        .is_none());
}

#[test]
fn test_three_view_matching_requires_overlap() {
    let geometry = WireGeometry::default();
    let config = DeltaRayMatchingConfig::default();
    let line = |x0: f64| -> Vec<Position> {
        (0..10).map(|i| Position::new(x0 + i as f64 * 0.3, 0.0)).collect()
    };

    assert!(perform_three_view_matching(&line(0.0), &line(0.0), &line(50.0), &geometry, &config)
        .unwrap()
        .is_none());
    assert!(perform_three_view_matching(&line(0.0), &line(0.0), &[], &geometry, &config)
        .unwrap()
        .is_none());

    let matched =
        perform_three_view_matching(&line(0.0), &line(0.0), &line(0.0), &geometry, &config)
            .unwrap()
            .unwrap();
    assert_eq!(matched.matched_fraction(), 1.0);
    assert_eq!(matched.reduced_chi_squared(), 0.0);
}

// ============================================================================
// Tensor structure
// ============================================================================

#[test]
fn test_connected_elements_walks_shared_clusters() {
    let mut store = EventStore::new();
    let xs = steps(0.0, 2.0, 1.0);
    let u1 = add_cluster(&mut store, View::U, &xs, |_| 0.0);
    let u2 = add_cluster(&mut store, View::U, &xs, |_| 10.0);
    let u3 = add_cluster(&mut store, View::U, &xs, |_| 20.0);
    let v1 = add_cluster(&mut store, View::V, &xs, |_| 0.0);
    let v2 = add_cluster(&mut store, View::V, &xs, |_| 20.0);
    let w1 = add_cluster(&mut store, View::W, &xs, |_| 0.0);
    let w2 = add_cluster(&mut store, View::W, &xs, |_| 10.0);
    let w3 = add_cluster(&mut store, View::W, &xs, |_| 40.0);

    let mut tensor = OverlapTensor::new();
    // u1 and u2 connect through v1; u3 is on its own
    tensor.insert(u1, v1, w1, overlap(0.1, vec![]));
    tensor.insert(u2, v1, w2, overlap(0.1, vec![]));
    tensor.insert(u3, v2, w3, overlap(0.1, vec![]));
    assert_eq!(tensor.len(), 3);

    let mut elements = Vec::new();
    let mut checked = BTreeSet::new();
    tensor.connected_elements(w2, false, &store, &mut elements, &mut checked);
    let keys: BTreeSet<ClusterId> = elements.iter().map(|e| e.cluster_u).collect();
    assert_eq!(keys, BTreeSet::from([u1, u2]));

    // Already checked: nothing more from the same group
    let mut again = Vec::new();
    tensor.connected_elements(u1, false, &store, &mut again, &mut checked);
    assert!(again.is_empty());

    let mut isolated = Vec::new();
    tensor.connected_elements(u3, false, &store, &mut isolated, &mut BTreeSet::new());
    assert_eq!(isolated.len(), 1);
}

#[test]
fn test_connected_elements_skips_unavailable() {
    let mut store = EventStore::new();
    let xs = steps(0.0, 2.0, 1.0);
    let u1 = add_cluster(&mut store, View::U, &xs, |_| 0.0);
    let u2 = add_cluster(&mut store, View::U, &xs, |_| 10.0);
    let v1 = add_cluster(&mut store, View::V, &xs, |_| 0.0);
    let w1 = add_cluster(&mut store, View::W, &xs, |_| 0.0);
    let w2 = add_cluster(&mut store, View::W, &xs, |_| 10.0);
    store.create_pfo(ParticleKind::DeltaRay, &[w2]).unwrap();

    let mut tensor = OverlapTensor::new();
    tensor.insert(u1, v1, w1, overlap(0.1, vec![]));
    tensor.insert(u2, v1, w2, overlap(0.1, vec![]));

    let mut elements = Vec::new();
    tensor.connected_elements(u1, true, &store, &mut elements, &mut BTreeSet::new());
    assert_eq!(elements.len(), 1);
    assert_eq!(elements[0].cluster_w, w1);

    let mut all = Vec::new();
    tensor.connected_elements(u1, false, &store, &mut all, &mut BTreeSet::new());
    assert_eq!(all.len(), 2);
}

#[test]
fn test_sorted_key_clusters_total_order() {
    let mut store = EventStore::new();
    let small = add_cluster(&mut store, View::U, &steps(0.0, 2.0, 1.0), |_| 0.0);
    let large = add_cluster(&mut store, View::U, &steps(0.0, 9.0, 1.0), |_| 0.0);
    let wide = add_cluster(&mut store, View::U, &steps(0.0, 4.0, 2.0), |_| 0.0);
    let tie = add_cluster(&mut store, View::U, &steps(0.0, 2.0, 1.0), |_| 0.0);
    let v = add_cluster(&mut store, View::V, &steps(0.0, 2.0, 1.0), |_| 0.0);
    let w = add_cluster(&mut store, View::W, &steps(0.0, 2.0, 1.0), |_| 0.0);

    let mut tensor = OverlapTensor::new();
    for u in [tie, small, wide, large] {
        tensor.insert(u, v, w, overlap(0.1, vec![]));
    }

    // 10 hits, then 3 hits over 4.0, then the two 3-hit clusters over 2.0 by handle
    assert_eq!(tensor.sorted_key_clusters(&store), vec![large, wide, small, tie]);
}

#[test]
fn test_remove_cluster_updates_navigation() {
    let mut store = EventStore::new();
    let xs = steps(0.0, 2.0, 1.0);
    let u = add_cluster(&mut store, View::U, &xs, |_| 0.0);
    let v1 = add_cluster(&mut store, View::V, &xs, |_| 0.0);
    let v2 = add_cluster(&mut store, View::V, &xs, |_| 5.0);
    let w = add_cluster(&mut store, View::W, &xs, |_| 0.0);

    let mut tensor = OverlapTensor::new();
    tensor.insert(u, v1, w, overlap(0.1, vec![]));
    tensor.insert(u, v2, w, overlap(0.1, vec![]));

    assert_eq!(tensor.remove_cluster(v1), 1);
    assert!(!tensor.contains_cluster(v1));
    assert!(tensor.contains_cluster(v2));
    assert_eq!(tensor.navigation(View::U).get(&u), Some(&BTreeSet::from([v2])));

    assert_eq!(tensor.remove_cluster(w), 1);
    assert!(tensor.is_empty());
    assert!(tensor.clusters().is_empty());
}

// ============================================================================
// Index maintenance
// ============================================================================

fn assert_tensor_consistent(matching: &ThreeViewDeltaRayMatching<'_>) {
    for element in matching.tensor().elements() {
        for cluster in element.clusters() {
            assert!(
                matching.store().cluster(cluster).is_some(),
                "tensor references deleted cluster {cluster}"
            );
        }
    }
}

#[test]
fn test_tensor_consistency_after_updates() {
    let (mut store, [cu, cv, cw]) = boundary_sample_event();
    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();

    let mut matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    matching.prepare();
    matching.build_tensor().unwrap();
    assert_eq!(matching.tensor().len(), 1);

    // Split the W cluster in two and re-index the halves
    let hits = matching.store().cluster(cw).unwrap().hits().to_vec();
    matching.update_upon_deletion(cw);
    assert!(matching.tensor().is_empty());
    let parts = vec![hits[..5].to_vec(), hits[5..].to_vec()];
    let created = matching.store_mut().fragment_cluster(cw, &parts).unwrap();
    matching.update_for_new_clusters(&created, &[None, None]).unwrap();
    assert_tensor_consistent(&matching);

    // Both halves still match the U and V clusters
    for &w in &created {
        assert!(matching.tensor().get(cu, cv, w).is_some());
    }

    // Merge them back
    matching.update_upon_deletion(created[0]);
    matching.update_upon_deletion(created[1]);
    matching.store_mut().merge_and_delete_clusters(created[0], created[1]).unwrap();
    matching.update_for_new_clusters(&created[..1], &[None]).unwrap();
    assert_tensor_consistent(&matching);
    assert_eq!(matching.tensor().len(), 1);
}

#[test]
fn test_update_for_new_clusters_checks_lengths() {
    let (mut store, [cu, ..]) = boundary_sample_event();
    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();

    let mut matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    matching.prepare();
    assert!(matches!(
        matching.update_for_new_clusters(&[cu], &[]),
        Err(ReconstructionError::InvalidParameter { .. })
    ));
}

/// A flat muon under a delta-ray triple and a second muon far above it.
fn two_muon_event() -> (EventStore, Muon, Muon, [ClusterId; 3]) {
    let mut store = EventStore::new();
    let xs = steps(0.0, 40.0, 0.5);
    let near = add_muon(&mut store, &xs, |_| 0.0, |_| 0.0);
    let far = add_muon(&mut store, &xs, |_| 25.0, |_| 25.0);
    let triple = add_matched_triple(&mut store, &steps(10.0, 20.0, 0.5), |_| 1.0, |_| 1.0);
    (store, near, far, triple)
}

#[test]
fn test_common_muons_follow_growing_muon() {
    let (mut store, near, far, [cu, cv, cw]) = two_muon_event();
    let extra = [
        store.add_hit(View::U, Position::new(15.0, 3.5), 1.0, 0.5),
        store.add_hit(View::V, Position::new(15.0, 3.5), 1.0, 0.5),
        store.add_hit(View::W, Position::new(15.0, 4.5), 1.0, 0.5),
    ];
    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();

    let mut matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    matching.prepare();
    matching.build_tensor().unwrap();
    let element = matching.tensor().get_element(cu, cv, cw).unwrap();
    assert_eq!(element.overlap.common_muon_pfos, vec![near.pfo]);

    // The far muon picks up a hit next to the triple in every view
    for (cluster, hit) in far.clusters.into_iter().zip(extra) {
        matching.update_upon_deletion(cluster);
        matching.store_mut().add_to_cluster(cluster, hit).unwrap();
    }
    matching
        .update_for_new_clusters(&far.clusters, &[Some(far.pfo); 3])
        .unwrap();

    let element = matching.tensor().get_element(cu, cv, cw).unwrap();
    assert_eq!(element.overlap.common_muon_pfos, vec![near.pfo, far.pfo]);
    assert_eq!(element.overlap.unique_common_muon(), None);
    assert_tensor_consistent(&matching);
}

#[test]
fn test_element_dropped_when_common_muon_moves_away() {
    let (mut store, near, _, [cu, cv, cw]) = two_muon_event();
    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();

    let mut matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    matching.prepare();
    matching.build_tensor().unwrap();
    assert_eq!(matching.tensor().len(), 1);

    // Strip the muon U hits within the search region of the triple
    let muon_u = near.clusters[0];
    let under_triple: Vec<_> = matching
        .store()
        .cluster_hit_positions(muon_u)
        .into_iter()
        .filter(|(_, p)| p.x > 6.5 && p.x < 23.5)
        .map(|(hit, _)| hit)
        .collect();
    matching.update_upon_deletion(muon_u);
    for hit in under_triple {
        matching.store_mut().remove_from_cluster(muon_u, hit).unwrap();
    }
    matching.update_for_new_clusters(&[muon_u], &[Some(near.pfo)]).unwrap();

    assert!(matching.tensor().get_element(cu, cv, cw).is_none());
    assert!(matching.tensor().is_empty());
    assert!(matching.nearby_muon_pfos(cu).is_empty());
}

#[test]
fn test_remove_single_element_updates_navigation() {
    let mut store = EventStore::new();
    let xs = steps(0.0, 2.0, 1.0);
    let u = add_cluster(&mut store, View::U, &xs, |_| 0.0);
    let v1 = add_cluster(&mut store, View::V, &xs, |_| 0.0);
    let v2 = add_cluster(&mut store, View::V, &xs, |_| 5.0);
    let w = add_cluster(&mut store, View::W, &xs, |_| 0.0);

    let mut tensor = OverlapTensor::new();
    tensor.insert(u, v1, w, overlap(0.1, vec![]));
    tensor.insert(u, v2, w, overlap(0.2, vec![]));

    let removed = tensor.remove(u, v1, w).unwrap();
    assert_eq!(removed.reduced_chi_squared(), 0.1);
    assert!(tensor.remove(u, v1, w).is_none());
    assert_eq!(tensor.len(), 1);
    assert!(!tensor.contains_cluster(v1));
    assert!(tensor.contains_cluster(u));
    assert_eq!(tensor.navigation(View::W).get(&w), Some(&BTreeSet::from([u])));
}

#[test]
fn test_project_muon_positions() {
    let mut store = EventStore::new();
    let muon = add_muon(&mut store, &steps(0.0, 10.0, 0.5), |x| 0.2 * x, |x| 0.1 * x);
    let geometry = WireGeometry::default();
    let config = ReconstructionConfig::default();

    let matching = ThreeViewDeltaRayMatching::new(&mut store, &geometry, &config);
    let projected = matching.project_muon_positions(View::W, muon.pfo).unwrap();
    assert_eq!(projected.len(), 21);
    for p in projected {
        assert!((p.z - 0.3 * p.x).abs() < 1e-9);
    }
}
