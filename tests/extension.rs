//! Tests for track extension refinement

mod common;

use common::*;
use deltaray::{
    ClusterEndpointAssociation, ClusterId, EventStore, ObjectStore, Position, TrackExtensionConfig,
    TrackExtensionRefinement, View, WireGeometry,
};

/// Only the low-x face borders another drift volume.
fn single_face_geometry() -> WireGeometry {
    WireGeometry {
        detector_max_x: 250.0,
        ..WireGeometry::default()
    }
}

fn cluster_snapshot(store: &EventStore) -> Vec<(ClusterId, Vec<deltaray::HitId>)> {
    View::ALL
        .iter()
        .flat_map(|v| store.cluster_ids(*v))
        .map(|c| (c, store.cluster(c).unwrap().hits().to_vec()))
        .collect()
}

#[test]
fn test_endpoint_association_orders_by_wire_coordinate() {
    let merge = Position::new(10.0, 5.0);
    let outward = Position::new(-1.0, 0.0);

    let below = Position::new(0.0, 2.0);
    let lower = ClusterEndpointAssociation::from_endpoint(ClusterId(1), merge, outward, below);
    assert!(lower.is_end_upstream());
    assert_eq!(lower.upstream_merge_point(), Position::new(0.0, 2.0));
    assert_eq!(lower.cluster_merge_point(), merge);
    assert_eq!(lower.cluster_merge_direction(), outward);
    assert_eq!(lower.boundary_merge_point(), Position::new(0.0, 2.0));

    let above = Position::new(0.0, 8.0);
    let higher = ClusterEndpointAssociation::from_endpoint(ClusterId(1), merge, outward, above);
    assert!(!higher.is_end_upstream());
    assert_eq!(higher.upstream_merge_point(), merge);
    assert_eq!(higher.cluster_merge_direction(), outward);
    assert_eq!(higher.boundary_merge_point(), Position::new(0.0, 8.0));

    let mut moved = higher.clone();
    moved.set_downstream_merge_point(Position::new(5.0, 5.0));
    assert_eq!(moved.connecting_line_direction(), Position::new(-1.0, 0.0));
}

#[test]
fn test_short_clusters_are_not_candidates() {
    let mut store = EventStore::new();
    add_cluster(&mut store, View::W, &steps(1.0, 3.0, 0.5), |x| x);
    let long = add_cluster(&mut store, View::W, &steps(1.0, 30.0, 0.5), |x| 0.5 * x + 10.0);

    let geometry = single_face_geometry();
    let config = TrackExtensionConfig::default();
    let mut refinement = TrackExtensionRefinement::new(&mut store, &geometry, &config);
    refinement.initialise_containers(View::W);
    assert_eq!(refinement.candidates(), &[long]);
    assert_eq!(refinement.cached_clusters(), vec![long]);
}

#[test]
fn test_association_heads_towards_face() {
    let mut store = EventStore::new();
    let track = add_cluster(&mut store, View::W, &steps(1.0, 30.0, 0.5), |x| 0.5 * x + 10.0);

    let geometry = single_face_geometry();
    let config = TrackExtensionConfig::default();
    let mut refinement = TrackExtensionRefinement::new(&mut store, &geometry, &config);
    refinement.initialise_containers(View::W);

    let mut association = refinement.find_best_cluster_association(0.0).unwrap();
    assert_eq!(association.main_track_cluster(), track);
    assert!(association.is_end_upstream());
    assert!(association.cluster_merge_point().x < 2.0);
    assert!(association.cluster_merge_direction().x < 0.0);
    let boundary = association.boundary_merge_point();
    assert!(boundary.x.abs() < 1e-6);
    assert!((boundary.z - 10.0).abs() < 1e-6);

    // Nothing to collect beyond the track end, but the end is near the face
    let extracted = refinement.get_extrapolated_hits(&association);
    assert!(extracted.keys().all(|c| *c == track));
    assert!(refinement.are_extrapolated_hits_good(&mut association, &extracted, 0.0));
    assert_eq!(refinement.create_main_track(&association, &extracted).unwrap(), 0);
}

#[test]
fn test_track_far_from_face_is_not_good() {
    let mut store = EventStore::new();
    add_cluster(&mut store, View::W, &steps(20.0, 50.0, 0.5), |x| 0.5 * x);

    let geometry = single_face_geometry();
    let config = TrackExtensionConfig::default();
    let mut refinement = TrackExtensionRefinement::new(&mut store, &geometry, &config);
    refinement.initialise_containers(View::W);

    let mut association = refinement.find_best_cluster_association(0.0).unwrap();
    let extracted = refinement.get_extrapolated_hits(&association);
    assert!(!refinement.are_extrapolated_hits_good(&mut association, &extracted, 0.0));
}

#[test]
fn test_lone_track_terminates_unchanged() {
    let mut store = EventStore::new();
    add_cluster(&mut store, View::W, &steps(1.0, 30.0, 0.5), |x| 0.5 * x + 10.0);
    let before = cluster_snapshot(&store);

    let geometry = single_face_geometry();
    let config = TrackExtensionConfig::default();
    let mut refinement = TrackExtensionRefinement::new(&mut store, &geometry, &config);
    let report = refinement.run().unwrap();

    assert_eq!(report.boundaries_processed, 3);
    assert_eq!(report.associations_considered, 1);
    assert_eq!(report.tracks_extended, 0);
    assert_eq!(report.hits_added, 0);
    assert!(refinement.candidates().is_empty());
    drop(refinement);

    assert_eq!(cluster_snapshot(&store), before);
}

#[test]
fn test_detector_edges_are_skipped() {
    let mut store = EventStore::new();
    add_cluster(&mut store, View::W, &steps(1.0, 30.0, 0.5), |x| 0.5 * x + 10.0);

    let geometry = WireGeometry {
        detector_min_x: 0.0,
        detector_max_x: 250.0,
        ..WireGeometry::default()
    };
    let config = TrackExtensionConfig::default();
    let report = TrackExtensionRefinement::new(&mut store, &geometry, &config).run().unwrap();
    assert_eq!(report.boundaries_processed, 0);
    assert_eq!(report.associations_considered, 0);
}

#[test]
fn test_track_absorbs_shower_hits_towards_face() {
    let mut store = EventStore::new();
    let track = add_cluster(&mut store, View::W, &steps(10.0, 60.0, 0.5), |x| 0.2 * x);
    // A shower whose hits continue the track, plus two hits well off it
    let mut shower_hits = add_line(&mut store, View::W, &steps(0.5, 9.5, 0.5), |x| 0.2 * x);
    shower_hits.extend(add_line(&mut store, View::W, &[5.0, 5.5], |_| 10.0));
    let shower = store.create_cluster(View::W, &shower_hits).unwrap();

    let geometry = single_face_geometry();
    let config = TrackExtensionConfig::default();
    let mut refinement = TrackExtensionRefinement::new(&mut store, &geometry, &config);
    let report = refinement.run().unwrap();

    assert_eq!(report.tracks_extended, 1);
    assert_eq!(report.hits_added, 19);
    let cached = refinement.cached_clusters();
    drop(refinement);

    assert_eq!(store.n_hits(track), 120);
    assert!(store.cluster(shower).is_none());
    // The off-track hits are reclustered on their own
    let others: Vec<ClusterId> =
        store.cluster_ids(View::W).into_iter().filter(|c| *c != track).collect();
    assert_eq!(others.len(), 1);
    assert_eq!(store.n_hits(others[0]), 2);
    assert!(store.loose_hits(View::W).is_empty());
    assert!(cached.iter().all(|c| store.cluster(*c).is_some()));
    assert_hit_ownership_consistent(&store);
}

#[test]
fn test_commit_strips_off_axis_hits_without_showers() {
    let mut store = EventStore::new();
    let mut hits = add_line(&mut store, View::W, &steps(1.0, 30.0, 0.5), |x| 0.5 * x + 10.0);
    // Beyond the merge point but well off the extrapolated line
    let stray = add_line(&mut store, View::W, &[0.0], |_| 8.0);
    hits.extend(stray.iter().copied());
    let track = store.create_cluster(View::W, &hits).unwrap();

    let merge_point = Position::new(1.0, 10.5);
    let outward = Position::new(-2.0, -1.0).unit().unwrap();
    let boundary_point = Position::new(0.0, 10.0);
    let association =
        ClusterEndpointAssociation::from_endpoint(track, merge_point, outward, boundary_point);
    let mut extracted = deltaray::refinement::ExtractedHits::new();
    extracted.insert(track, vec![hits[0]]);

    let geometry = single_face_geometry();
    let config = TrackExtensionConfig::default();
    let mut refinement = TrackExtensionRefinement::new(&mut store, &geometry, &config);
    refinement.initialise_containers(View::W);
    assert_eq!(refinement.create_main_track(&association, &extracted).unwrap(), 0);
    drop(refinement);

    assert_eq!(store.n_hits(track), 59);
    let owner = store.cluster_of_hit(stray[0]).unwrap();
    assert_ne!(owner, track);
    assert_eq!(store.n_hits(owner), 1);
    assert!(store.loose_hits(View::W).is_empty());
    assert_hit_ownership_consistent(&store);
}

#[test]
fn test_commit_without_extracted_hits_is_a_no_op() {
    let mut store = EventStore::new();
    let track = add_cluster(&mut store, View::W, &steps(1.0, 30.0, 0.5), |x| 0.5 * x + 10.0);
    let before = cluster_snapshot(&store);

    let association = ClusterEndpointAssociation::from_endpoint(
        track,
        Position::new(1.0, 10.5),
        Position::new(-2.0, -1.0).unit().unwrap(),
        Position::new(0.0, 10.0),
    );
    let geometry = single_face_geometry();
    let config = TrackExtensionConfig::default();
    let mut refinement = TrackExtensionRefinement::new(&mut store, &geometry, &config);
    let extracted = deltaray::refinement::ExtractedHits::new();
    assert_eq!(refinement.create_main_track(&association, &extracted).unwrap(), 0);
    drop(refinement);

    assert_eq!(cluster_snapshot(&store), before);
}
