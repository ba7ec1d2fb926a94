//! Shared event builders for the integration tests.

#![allow(dead_code)]

use deltaray::store::ParticleKind;
use deltaray::{ClusterId, EventStore, HitId, ObjectStore, PfoId, Position, View};

/// Add hits at `xs` with wire coordinate `z(x)`.
pub fn add_line(
    store: &mut EventStore,
    view: View,
    xs: &[f64],
    z: impl Fn(f64) -> f64,
) -> Vec<HitId> {
    xs.iter()
        .map(|&x| store.add_hit(view, Position::new(x, z(x)), 1.0, 0.5))
        .collect()
}

/// Add hits along `z(x)` and cluster them.
pub fn add_cluster(
    store: &mut EventStore,
    view: View,
    xs: &[f64],
    z: impl Fn(f64) -> f64,
) -> ClusterId {
    let hits = add_line(store, view, xs, z);
    store.create_cluster(view, &hits).unwrap()
}

/// `start, start + step, ...` up to and including `end`.
pub fn steps(start: f64, end: f64, step: f64) -> Vec<f64> {
    let n = ((end - start) / step + 1e-9).floor() as usize;
    (0..=n).map(|i| start + i as f64 * step).collect()
}

/// A muon pfo made of one cluster per view, with `w = u + v`.
pub struct Muon {
    pub pfo: PfoId,
    pub clusters: [ClusterId; 3],
}

pub fn add_muon(
    store: &mut EventStore,
    xs: &[f64],
    u: impl Fn(f64) -> f64,
    v: impl Fn(f64) -> f64,
) -> Muon {
    let cu = add_cluster(store, View::U, xs, &u);
    let cv = add_cluster(store, View::V, xs, &v);
    let cw = add_cluster(store, View::W, xs, |x| u(x) + v(x));
    let pfo = store.create_pfo(ParticleKind::CosmicRay, &[cu, cv, cw]).unwrap();
    Muon {
        pfo,
        clusters: [cu, cv, cw],
    }
}

/// Three mutually consistent clusters (`w = u + v`).
pub fn add_matched_triple(
    store: &mut EventStore,
    xs: &[f64],
    u: impl Fn(f64) -> f64,
    v: impl Fn(f64) -> f64,
) -> [ClusterId; 3] {
    let cu = add_cluster(store, View::U, xs, &u);
    let cv = add_cluster(store, View::V, xs, &v);
    let cw = add_cluster(store, View::W, xs, |x| u(x) + v(x));
    [cu, cv, cw]
}

/// Every hit owned by at most one cluster, and every clustered hit listed by
/// its owner.
pub fn assert_hit_ownership_consistent(store: &EventStore) {
    let mut seen = std::collections::BTreeSet::new();
    for view in View::ALL {
        for id in store.cluster_ids(view) {
            let cluster = store.cluster(id).unwrap();
            for &hit in cluster.hits() {
                assert!(seen.insert(hit), "hit {hit} listed by two clusters");
                assert_eq!(store.cluster_of_hit(hit), Some(id));
            }
        }
    }
}
