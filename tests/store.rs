//! Tests for store and clustering modules

mod common;

use common::*;
use deltaray::clustering::cluster_hits;
use deltaray::store::ParticleKind;
use deltaray::{EventStore, HitId, ObjectStore, Position, ReconstructionError, View};

fn five_hits(store: &mut EventStore, view: View) -> Vec<HitId> {
    add_line(store, view, &steps(0.0, 4.0, 1.0), |_| 0.0)
}

#[test]
fn test_create_cluster_takes_ownership() {
    let mut store = EventStore::new();
    let hits = five_hits(&mut store, View::W);
    let cluster = store.create_cluster(View::W, &hits).unwrap();

    assert_eq!(store.n_hits(cluster), 5);
    assert!(store.cluster(cluster).unwrap().is_available());
    assert!(hits.iter().all(|h| store.cluster_of_hit(*h) == Some(cluster)));
    assert!(store.loose_hits(View::W).is_empty());

    // The same hits cannot be clustered twice
    assert!(matches!(
        store.create_cluster(View::W, &hits[..1]),
        Err(ReconstructionError::Transaction { .. })
    ));
}

#[test]
fn test_create_cluster_rejects_wrong_view() {
    let mut store = EventStore::new();
    let hits = five_hits(&mut store, View::U);
    assert!(store.create_cluster(View::V, &hits).is_err());
    assert_eq!(store.n_clusters(), 0);
}

#[test]
fn test_add_and_remove_hits() {
    let mut store = EventStore::new();
    let hits = five_hits(&mut store, View::W);
    let cluster = store.create_cluster(View::W, &hits[..4]).unwrap();

    store.add_to_cluster(cluster, hits[4]).unwrap();
    assert_eq!(store.n_hits(cluster), 5);

    store.remove_from_cluster(cluster, hits[0]).unwrap();
    assert_eq!(store.n_hits(cluster), 4);
    assert_eq!(store.cluster_of_hit(hits[0]), None);

    // Removing a hit that is not a member fails
    assert!(store.remove_from_cluster(cluster, hits[0]).is_err());
}

#[test]
fn test_cannot_remove_last_hit() {
    let mut store = EventStore::new();
    let hits = five_hits(&mut store, View::W);
    let cluster = store.create_cluster(View::W, &hits[..1]).unwrap();
    assert!(store.remove_from_cluster(cluster, hits[0]).is_err());
    assert_eq!(store.n_hits(cluster), 1);
}

#[test]
fn test_merge_and_delete() {
    let mut store = EventStore::new();
    let a = add_cluster(&mut store, View::W, &steps(0.0, 2.0, 1.0), |_| 0.0);
    let b = add_cluster(&mut store, View::W, &steps(3.0, 5.0, 1.0), |_| 0.0);

    store.merge_and_delete_clusters(a, b).unwrap();
    assert!(store.cluster(b).is_none());
    assert_eq!(store.n_hits(a), 6);
    assert_hit_ownership_consistent(&store);

    assert!(store.merge_and_delete_clusters(a, a).is_err());
    assert!(store.merge_and_delete_clusters(a, b).is_err());
}

#[test]
fn test_merge_rejects_views_and_owned_clusters() {
    let mut store = EventStore::new();
    let w = add_cluster(&mut store, View::W, &steps(0.0, 2.0, 1.0), |_| 0.0);
    let u = add_cluster(&mut store, View::U, &steps(0.0, 2.0, 1.0), |_| 0.0);
    assert!(store.merge_and_delete_clusters(w, u).is_err());

    let owned = add_cluster(&mut store, View::W, &steps(3.0, 5.0, 1.0), |_| 0.0);
    store.create_pfo(ParticleKind::CosmicRay, &[owned]).unwrap();
    assert!(!store.cluster(owned).unwrap().is_available());

    // An owned cluster may grow but may not be deleted
    assert!(store.merge_and_delete_clusters(w, owned).is_err());
    store.merge_and_delete_clusters(owned, w).unwrap();
    assert_eq!(store.n_hits(owned), 6);
    assert!(store.delete_cluster(owned).is_err());
}

#[test]
fn test_delete_cluster_frees_hits() {
    let mut store = EventStore::new();
    let hits = five_hits(&mut store, View::V);
    let cluster = store.create_cluster(View::V, &hits).unwrap();

    store.delete_cluster(cluster).unwrap();
    assert!(store.cluster(cluster).is_none());
    assert_eq!(store.loose_hits(View::V), hits);
    assert!(store.cluster_ids(View::V).is_empty());
}

#[test]
fn test_fragment_cluster_is_atomic() {
    let mut store = EventStore::new();
    let hits = five_hits(&mut store, View::W);
    let cluster = store.create_cluster(View::W, &hits).unwrap();

    // Incomplete cover is refused and leaves the cluster untouched
    let incomplete = vec![hits[..2].to_vec(), hits[2..4].to_vec()];
    assert!(store.fragment_cluster(cluster, &incomplete).is_err());
    assert_eq!(store.n_hits(cluster), 5);

    // Overlapping fragments are refused
    let overlapping = vec![hits[..3].to_vec(), hits[2..].to_vec()];
    assert!(store.fragment_cluster(cluster, &overlapping).is_err());

    let empty_part = vec![hits.clone(), Vec::new()];
    assert!(store.fragment_cluster(cluster, &empty_part).is_err());

    let parts = vec![hits[..2].to_vec(), hits[2..].to_vec()];
    let created = store.fragment_cluster(cluster, &parts).unwrap();
    assert_eq!(created.len(), 2);
    assert!(store.cluster(cluster).is_none());
    assert_eq!(store.n_hits(created[0]), 2);
    assert_eq!(store.n_hits(created[1]), 3);
    assert_hit_ownership_consistent(&store);
}

#[test]
fn test_handles_are_never_reused() {
    let mut store = EventStore::new();
    let a = add_cluster(&mut store, View::W, &steps(0.0, 2.0, 1.0), |_| 0.0);
    store.delete_cluster(a).unwrap();
    let b = add_cluster(&mut store, View::W, &steps(0.0, 2.0, 1.0), |_| 0.0);
    assert_ne!(a, b);
    assert!(b > a);
}

#[test]
fn test_pfo_hierarchy() {
    let mut store = EventStore::new();
    let muon = add_muon(&mut store, &steps(0.0, 10.0, 1.0), |x| x, |x| 0.5 * x);
    let delta = add_cluster(&mut store, View::W, &steps(3.0, 5.0, 1.0), |_| 20.0);

    let daughter = store.create_pfo(ParticleKind::DeltaRay, &[delta]).unwrap();
    store.set_parent(daughter, muon.pfo).unwrap();

    let parent = store.pfo(muon.pfo).unwrap();
    assert_eq!(parent.daughters, vec![daughter]);
    assert_eq!(store.pfo(daughter).unwrap().parent, Some(muon.pfo));
    assert_eq!(store.muon_pfo_ids(), vec![muon.pfo]);
    assert_eq!(store.pfo_clusters_in_view(muon.pfo, View::V), vec![muon.clusters[1]]);

    // A cluster owned by a pfo cannot join another one
    assert!(store.create_pfo(ParticleKind::DeltaRay, &[delta]).is_err());
    assert!(store.set_parent(daughter, daughter).is_err());
}

#[test]
fn test_hit_offset_applies_to_position() {
    let mut store = EventStore::new();
    let hit = store.add_hit_with_offset(View::U, Position::new(1.0, 2.0), 0.5, 3.0, 0.4);
    let h = store.hit(hit).unwrap();
    assert_eq!(h.position(), Position::new(1.5, 2.0));
    assert_eq!(h.energy, 3.0);
    assert_eq!(h.cell_size, 0.4);
}

// ============================================================================
// Clustering
// ============================================================================

#[test]
fn test_cluster_hits_components() {
    let hits: Vec<(HitId, Position)> = [0.0, 0.5, 1.0, 5.0, 5.5, 20.0]
        .iter()
        .enumerate()
        .map(|(i, x)| (HitId(i as u32), Position::new(*x, 0.0)))
        .collect();

    let groups = cluster_hits(&hits, 1.0);
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0], vec![HitId(0), HitId(1), HitId(2)]);
    assert_eq!(groups[1], vec![HitId(3), HitId(4)]);
    assert_eq!(groups[2], vec![HitId(5)]);
    assert!(cluster_hits(&[], 1.0).is_empty());
}

#[test]
fn test_cluster_hits_unsorted_duplicated_input() {
    let at = |id: u32, x: f64| (HitId(id), Position::new(x, 0.0));
    // Ids out of order, hit 4 listed twice, hits 2 and 7 coincident
    let hits = vec![at(7, 10.0), at(4, 0.5), at(2, 10.0), at(9, 0.0), at(4, 0.5), at(3, 10.8)];

    let groups = cluster_hits(&hits, 1.0);
    assert_eq!(groups, vec![vec![HitId(2), HitId(3), HitId(7)], vec![HitId(4), HitId(9)]]);
}

#[test]
fn test_run_clustering_creates_clusters() {
    let mut store = EventStore::new();
    let mut hits = add_line(&mut store, View::W, &steps(0.0, 2.0, 0.5), |_| 0.0);
    hits.extend(add_line(&mut store, View::W, &steps(10.0, 11.0, 0.5), |_| 0.0));

    let created = store.run_clustering(View::W, &hits, 1.0).unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(store.n_hits(created[0]), 5);
    assert_eq!(store.n_hits(created[1]), 3);
    assert_hit_ownership_consistent(&store);
}
