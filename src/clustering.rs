//! Proximity clustering of loose hits.
//!
//! Used to re-derive clusters from remnant hits after a split. Two hits are
//! linked when they are closer than the link distance; clusters are the
//! connected components of that graph, found with an R-tree.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::{HitId, Position};

/// A hit position with its handle and its slot in the input for R-tree
/// queries.
#[derive(Debug, Clone, Copy)]
pub struct IndexedHit {
    pub hit: HitId,
    pub slot: usize,
    pub x: f64,
    pub z: f64,
}

impl IndexedHit {
    pub fn new(hit: HitId, slot: usize, position: &Position) -> Self {
        Self {
            hit,
            slot,
            x: position.x,
            z: position.z,
        }
    }
}

impl RTreeObject for IndexedHit {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.z])
    }
}

impl PointDistance for IndexedHit {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.x - point[0];
        let dz = self.z - point[1];
        dx * dx + dz * dz
    }
}

/// Group hits into proximity clusters.
///
/// The output is deterministic: hits within a group are sorted by handle and
/// groups are ordered by their smallest handle.
pub fn cluster_hits(hits: &[(HitId, Position)], link_distance: f64) -> Vec<Vec<HitId>> {
    if hits.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<(HitId, Position)> = hits.to_vec();
    sorted.sort_by_key(|(id, _)| *id);
    sorted.dedup_by_key(|(id, _)| *id);

    let tree = RTree::bulk_load(
        sorted
            .iter()
            .enumerate()
            .map(|(slot, (id, p))| IndexedHit::new(*id, slot, p))
            .collect::<Vec<_>>(),
    );
    let link_2 = link_distance * link_distance;

    let mut assigned = vec![false; sorted.len()];
    let mut groups = Vec::new();

    for start in 0..sorted.len() {
        if assigned[start] {
            continue;
        }
        assigned[start] = true;
        let mut group = vec![sorted[start].0];
        let mut queue = vec![start];

        while let Some(slot) = queue.pop() {
            let p = sorted[slot].1;
            for neighbour in tree.locate_within_distance([p.x, p.z], link_2) {
                if !assigned[neighbour.slot] {
                    assigned[neighbour.slot] = true;
                    group.push(neighbour.hit);
                    queue.push(neighbour.slot);
                }
            }
        }

        group.sort();
        groups.push(group);
    }

    groups
}
