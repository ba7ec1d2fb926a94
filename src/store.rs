//! Hit / cluster / pfo ownership model.
//!
//! `EventStore` is an arena addressed by stable handles. Deleted clusters are
//! tombstoned and their handles are never reused, so a stale handle can only
//! miss, never alias a newer object. Every structural mutation validates all
//! of its inputs before touching the arena: a refused mutation leaves the
//! store exactly as it was and reports `ReconstructionError::Transaction`.

use std::collections::BTreeSet;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::clustering::cluster_hits;
use crate::error::{ReconstructionError, Result};
use crate::{ClusterId, HitId, PfoId, Position, Span, View};

// ============================================================================
// Core Types
// ============================================================================

/// An immutable 2D measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: HitId,
    pub view: View,
    /// Drift coordinate.
    pub x: f64,
    /// Wire coordinate.
    pub z: f64,
    /// Drift-time correction added to `x`.
    pub x_offset: f64,
    pub energy: f64,
    /// Hit width along the drift coordinate.
    pub cell_size: f64,
}

impl Hit {
    /// Effective position, including the drift correction.
    pub fn position(&self) -> Position {
        Position::new(self.x + self.x_offset, self.z)
    }
}

/// A mutable collection of hits in a single view.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    id: ClusterId,
    view: View,
    hits: Vec<HitId>,
    available: bool,
}

impl Cluster {
    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Member hits in insertion order.
    pub fn hits(&self) -> &[HitId] {
        &self.hits
    }

    pub fn n_hits(&self) -> usize {
        self.hits.len()
    }

    /// False once the cluster is owned by a pfo.
    pub fn is_available(&self) -> bool {
        self.available
    }
}

/// Particle hypothesis tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleKind {
    CosmicRay,
    DeltaRay,
}

/// A reconstructed particle: clusters in any view plus hierarchy links.
#[derive(Debug, Clone, PartialEq)]
pub struct Pfo {
    pub id: PfoId,
    pub kind: ParticleKind,
    pub clusters: Vec<ClusterId>,
    pub parent: Option<PfoId>,
    pub daughters: Vec<PfoId>,
}

// ============================================================================
// Object store interface
// ============================================================================

/// Host object store consumed by the reconstruction.
///
/// Mutations are transactions: they either apply completely or return
/// `ReconstructionError::Transaction` with the store unchanged.
pub trait ObjectStore: Send + Sync {
    fn hit(&self, id: HitId) -> Option<&Hit>;
    fn cluster(&self, id: ClusterId) -> Option<&Cluster>;
    fn pfo(&self, id: PfoId) -> Option<&Pfo>;

    /// Live clusters of a view, in handle order.
    fn cluster_ids(&self, view: View) -> Vec<ClusterId>;
    /// Live clusters of a view not owned by any pfo, in handle order.
    fn available_cluster_ids(&self, view: View) -> Vec<ClusterId>;
    fn pfo_ids(&self) -> Vec<PfoId>;
    /// Cluster currently owning a hit.
    fn cluster_of_hit(&self, hit: HitId) -> Option<ClusterId>;

    /// Create a cluster from loose hits of one view.
    fn create_cluster(&mut self, view: View, hits: &[HitId]) -> Result<ClusterId>;
    /// Add a loose hit to a cluster of the same view.
    fn add_to_cluster(&mut self, cluster: ClusterId, hit: HitId) -> Result<()>;
    /// Remove a hit from a cluster, leaving it loose. The cluster must keep at
    /// least one hit.
    fn remove_from_cluster(&mut self, cluster: ClusterId, hit: HitId) -> Result<()>;
    /// Move every hit of `delete` into `enlarge`, then delete `delete`.
    fn merge_and_delete_clusters(&mut self, enlarge: ClusterId, delete: ClusterId) -> Result<()>;
    /// Delete a cluster, leaving its hits loose.
    fn delete_cluster(&mut self, cluster: ClusterId) -> Result<()>;
    /// Replace a cluster by one new cluster per part. The parts must be
    /// non-empty, disjoint and cover the original's hits exactly. New handles
    /// are returned in part order.
    fn fragment_cluster(
        &mut self,
        original: ClusterId,
        parts: &[Vec<HitId>],
    ) -> Result<Vec<ClusterId>>;
    /// Recluster loose hits of one view by proximity.
    fn run_clustering(
        &mut self,
        view: View,
        hits: &[HitId],
        link_distance: f64,
    ) -> Result<Vec<ClusterId>>;
    /// Create a pfo owning available clusters; they become unavailable.
    fn create_pfo(&mut self, kind: ParticleKind, clusters: &[ClusterId]) -> Result<PfoId>;
    fn set_parent(&mut self, daughter: PfoId, parent: PfoId) -> Result<()>;

    /// Effective positions of a cluster's hits; empty for an unknown cluster.
    fn cluster_positions(&self, id: ClusterId) -> Vec<Position> {
        self.cluster_hit_positions(id)
            .into_iter()
            .map(|(_, p)| p)
            .collect()
    }

    fn cluster_hit_positions(&self, id: ClusterId) -> Vec<(HitId, Position)> {
        self.cluster(id)
            .map(|c| {
                c.hits()
                    .iter()
                    .filter_map(|h| self.hit(*h).map(|hit| (*h, hit.position())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn cluster_span(&self, id: ClusterId) -> Option<Span> {
        Span::from_positions(&self.cluster_positions(id))
    }

    fn n_hits(&self, id: ClusterId) -> usize {
        self.cluster(id).map_or(0, |c| c.n_hits())
    }

    /// Clusters of a pfo in one view, in handle order.
    fn pfo_clusters_in_view(&self, pfo: PfoId, view: View) -> Vec<ClusterId> {
        let mut clusters: Vec<ClusterId> = self
            .pfo(pfo)
            .map(|p| {
                p.clusters
                    .iter()
                    .copied()
                    .filter(|c| self.cluster(*c).is_some_and(|c| c.view() == view))
                    .collect()
            })
            .unwrap_or_default();
        clusters.sort();
        clusters
    }

    /// Cosmic-ray pfos, in handle order.
    fn muon_pfo_ids(&self) -> Vec<PfoId> {
        self.pfo_ids()
            .into_iter()
            .filter(|id| self.pfo(*id).is_some_and(|p| p.kind == ParticleKind::CosmicRay))
            .collect()
    }
}

// ============================================================================
// Arena implementation
// ============================================================================

/// In-process arena implementing [`ObjectStore`].
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    hits: Vec<Hit>,
    hit_owner: Vec<Option<ClusterId>>,
    clusters: Vec<Option<Cluster>>,
    pfos: Vec<Pfo>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loose hit without drift correction.
    pub fn add_hit(
        &mut self,
        view: View,
        position: Position,
        energy: f64,
        cell_size: f64,
    ) -> HitId {
        self.add_hit_with_offset(view, position, 0.0, energy, cell_size)
    }

    pub fn add_hit_with_offset(
        &mut self,
        view: View,
        position: Position,
        x_offset: f64,
        energy: f64,
        cell_size: f64,
    ) -> HitId {
        let id = HitId(self.hits.len() as u32);
        self.hits.push(Hit {
            id,
            view,
            x: position.x,
            z: position.z,
            x_offset,
            energy,
            cell_size,
        });
        self.hit_owner.push(None);
        id
    }

    pub fn n_hits_total(&self) -> usize {
        self.hits.len()
    }

    /// Number of live clusters across all views.
    pub fn n_clusters(&self) -> usize {
        self.clusters.iter().flatten().count()
    }

    pub fn n_pfos(&self) -> usize {
        self.pfos.len()
    }

    /// Hits not owned by any cluster, in handle order.
    pub fn loose_hits(&self, view: View) -> Vec<HitId> {
        self.hits
            .iter()
            .filter(|h| h.view == view && self.hit_owner[h.id.index()].is_none())
            .map(|h| h.id)
            .collect()
    }

    fn live_cluster(&self, operation: &'static str, id: ClusterId) -> Result<&Cluster> {
        self.clusters
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| ReconstructionError::unknown_cluster(operation, id))
    }

    fn deletable_cluster(&self, operation: &'static str, id: ClusterId) -> Result<&Cluster> {
        let cluster = self.live_cluster(operation, id)?;
        if !cluster.available {
            return Err(ReconstructionError::transaction(
                operation,
                format!("cluster {id} is owned by a pfo"),
            ));
        }
        Ok(cluster)
    }

    fn check_loose_hits(&self, operation: &'static str, view: View, hits: &[HitId]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for &hit in hits {
            let h = self
                .hits
                .get(hit.index())
                .ok_or_else(|| ReconstructionError::unknown_hit(operation, hit))?;
            if h.view != view {
                return Err(ReconstructionError::wrong_view(operation, view, h.view));
            }
            if let Some(owner) = self.hit_owner[hit.index()] {
                return Err(ReconstructionError::transaction(
                    operation,
                    format!("hit {hit} already belongs to cluster {owner}"),
                ));
            }
            if !seen.insert(hit) {
                return Err(ReconstructionError::transaction(
                    operation,
                    format!("hit {hit} listed twice"),
                ));
            }
        }
        Ok(())
    }

    fn push_cluster(&mut self, view: View, hits: Vec<HitId>) -> ClusterId {
        let id = ClusterId(self.clusters.len() as u32);
        for hit in &hits {
            self.hit_owner[hit.index()] = Some(id);
        }
        self.clusters.push(Some(Cluster {
            id,
            view,
            hits,
            available: true,
        }));
        id
    }
}

impl ObjectStore for EventStore {
    fn hit(&self, id: HitId) -> Option<&Hit> {
        self.hits.get(id.index())
    }

    fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(id.index()).and_then(Option::as_ref)
    }

    fn pfo(&self, id: PfoId) -> Option<&Pfo> {
        self.pfos.get(id.index())
    }

    fn cluster_ids(&self, view: View) -> Vec<ClusterId> {
        self.clusters
            .iter()
            .flatten()
            .filter(|c| c.view == view)
            .map(|c| c.id)
            .collect()
    }

    fn available_cluster_ids(&self, view: View) -> Vec<ClusterId> {
        self.clusters
            .iter()
            .flatten()
            .filter(|c| c.view == view && c.available)
            .map(|c| c.id)
            .collect()
    }

    fn pfo_ids(&self) -> Vec<PfoId> {
        self.pfos.iter().map(|p| p.id).collect()
    }

    fn cluster_of_hit(&self, hit: HitId) -> Option<ClusterId> {
        self.hit_owner.get(hit.index()).copied().flatten()
    }

    fn create_cluster(&mut self, view: View, hits: &[HitId]) -> Result<ClusterId> {
        if hits.is_empty() {
            return Err(ReconstructionError::transaction(
                "create_cluster",
                "a cluster needs at least one hit",
            ));
        }
        self.check_loose_hits("create_cluster", view, hits)?;
        let id = self.push_cluster(view, hits.to_vec());
        trace!("[EventStore] created {id} in view {view} with {} hits", hits.len());
        Ok(id)
    }

    fn add_to_cluster(&mut self, cluster: ClusterId, hit: HitId) -> Result<()> {
        let view = self.live_cluster("add_to_cluster", cluster)?.view;
        self.check_loose_hits("add_to_cluster", view, &[hit])?;
        self.hit_owner[hit.index()] = Some(cluster);
        if let Some(c) = self.clusters[cluster.index()].as_mut() {
            c.hits.push(hit);
        }
        Ok(())
    }

    fn remove_from_cluster(&mut self, cluster: ClusterId, hit: HitId) -> Result<()> {
        let c = self.live_cluster("remove_from_cluster", cluster)?;
        if self.hit_owner.get(hit.index()).copied().flatten() != Some(cluster) {
            return Err(ReconstructionError::transaction(
                "remove_from_cluster",
                format!("hit {hit} is not in cluster {cluster}"),
            ));
        }
        if c.hits.len() == 1 {
            return Err(ReconstructionError::transaction(
                "remove_from_cluster",
                format!("hit {hit} is the last hit of cluster {cluster}"),
            ));
        }
        self.hit_owner[hit.index()] = None;
        if let Some(c) = self.clusters[cluster.index()].as_mut() {
            c.hits.retain(|h| *h != hit);
        }
        Ok(())
    }

    fn merge_and_delete_clusters(&mut self, enlarge: ClusterId, delete: ClusterId) -> Result<()> {
        const OP: &str = "merge_and_delete_clusters";
        if enlarge == delete {
            return Err(ReconstructionError::transaction(
                OP,
                format!("cannot merge {enlarge} into itself"),
            ));
        }
        let enlarge_view = self.live_cluster(OP, enlarge)?.view;
        let delete_view = self.deletable_cluster(OP, delete)?.view;
        if enlarge_view != delete_view {
            return Err(ReconstructionError::wrong_view(OP, enlarge_view, delete_view));
        }

        let moved = self.clusters[delete.index()]
            .take()
            .map(|c| c.hits)
            .unwrap_or_default();
        for hit in &moved {
            self.hit_owner[hit.index()] = Some(enlarge);
        }
        if let Some(c) = self.clusters[enlarge.index()].as_mut() {
            c.hits.extend(moved);
        }
        trace!("[EventStore] merged {delete} into {enlarge}");
        Ok(())
    }

    fn delete_cluster(&mut self, cluster: ClusterId) -> Result<()> {
        self.deletable_cluster("delete_cluster", cluster)?;
        if let Some(c) = self.clusters[cluster.index()].take() {
            for hit in c.hits {
                self.hit_owner[hit.index()] = None;
            }
        }
        Ok(())
    }

    fn fragment_cluster(
        &mut self,
        original: ClusterId,
        parts: &[Vec<HitId>],
    ) -> Result<Vec<ClusterId>> {
        const OP: &str = "fragment_cluster";
        let cluster = self.deletable_cluster(OP, original)?;
        let view = cluster.view;
        let expected: BTreeSet<HitId> = cluster.hits.iter().copied().collect();

        let mut covered = BTreeSet::new();
        for part in parts {
            if part.is_empty() {
                return Err(ReconstructionError::transaction(OP, "empty fragment"));
            }
            for hit in part {
                if !expected.contains(hit) {
                    return Err(ReconstructionError::transaction(
                        OP,
                        format!("hit {hit} is not in cluster {original}"),
                    ));
                }
                if !covered.insert(*hit) {
                    return Err(ReconstructionError::transaction(
                        OP,
                        format!("hit {hit} appears in two fragments"),
                    ));
                }
            }
        }
        if covered.len() != expected.len() {
            return Err(ReconstructionError::transaction(
                OP,
                format!(
                    "fragments cover {} of the {} hits of {original}",
                    covered.len(),
                    expected.len()
                ),
            ));
        }

        self.clusters[original.index()] = None;
        let created: Vec<ClusterId> = parts
            .iter()
            .map(|part| self.push_cluster(view, part.clone()))
            .collect();
        trace!("[EventStore] fragmented {original} into {created:?}");
        Ok(created)
    }

    fn run_clustering(
        &mut self,
        view: View,
        hits: &[HitId],
        link_distance: f64,
    ) -> Result<Vec<ClusterId>> {
        self.check_loose_hits("run_clustering", view, hits)?;
        let positioned: Vec<(HitId, Position)> = hits
            .iter()
            .map(|h| (*h, self.hits[h.index()].position()))
            .collect();
        Ok(cluster_hits(&positioned, link_distance)
            .into_iter()
            .map(|group| self.push_cluster(view, group))
            .collect())
    }

    fn create_pfo(&mut self, kind: ParticleKind, clusters: &[ClusterId]) -> Result<PfoId> {
        let mut seen = BTreeSet::new();
        for &c in clusters {
            self.deletable_cluster("create_pfo", c)?;
            if !seen.insert(c) {
                return Err(ReconstructionError::transaction(
                    "create_pfo",
                    format!("cluster {c} listed twice"),
                ));
            }
        }
        for &c in clusters {
            if let Some(cluster) = self.clusters[c.index()].as_mut() {
                cluster.available = false;
            }
        }
        let id = PfoId(self.pfos.len() as u32);
        self.pfos.push(Pfo {
            id,
            kind,
            clusters: clusters.to_vec(),
            parent: None,
            daughters: Vec::new(),
        });
        Ok(id)
    }

    fn set_parent(&mut self, daughter: PfoId, parent: PfoId) -> Result<()> {
        const OP: &str = "set_parent";
        if daughter.index() >= self.pfos.len() {
            return Err(ReconstructionError::unknown_pfo(OP, daughter));
        }
        if parent.index() >= self.pfos.len() {
            return Err(ReconstructionError::unknown_pfo(OP, parent));
        }
        if daughter == parent {
            return Err(ReconstructionError::transaction(
                OP,
                format!("{daughter} cannot parent itself"),
            ));
        }
        if let Some(previous) = self.pfos[daughter.index()].parent {
            if previous != parent {
                return Err(ReconstructionError::transaction(
                    OP,
                    format!("{daughter} already has parent {previous}"),
                ));
            }
            return Ok(());
        }
        self.pfos[daughter.index()].parent = Some(parent);
        self.pfos[parent.index()].daughters.push(daughter);
        Ok(())
    }
}
