//! Three-view delta-ray matching.
//!
//! Owns the overlap tensor for one event and the indices it depends on:
//! the input clusters of each view, the muon clusters and a per-view R-tree
//! of muon hits used to find the muons near a cluster. Tensor tools mutate
//! the object store through this type so that every structural change is
//! announced (`update_upon_deletion`) before it happens and re-indexed
//! (`update_for_new_clusters`) after it.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::Serialize;

use crate::config::ReconstructionConfig;
use crate::error::{ReconstructionError, Result};
use crate::geometry::{profile_z, DetectorGeometry};
use crate::overlap::{self, DeltaRayOverlapResult, ThreeViewMatch};
use crate::store::{ObjectStore, ParticleKind};
use crate::tensor::{OverlapTensor, TensorElement};
use crate::tools::DeltaRayTensorTool;
use crate::{ClusterId, PfoId, Position, View};

// ============================================================================
// Core Types
// ============================================================================

/// A set of clusters to be promoted to a delta-ray pfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoParticle {
    pub clusters: Vec<ClusterId>,
    /// Muon the delta ray is attached to.
    pub parent: Option<PfoId>,
}

/// Summary of a matching pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchingReport {
    /// Elements in the tensor after the initial build.
    pub initial_elements: usize,
    /// Tool invocations, successful or not.
    pub tool_runs: usize,
    /// Tool invocations that changed the event.
    pub changes: usize,
    /// Whether the repeat cap stopped the tool loop.
    pub repeats_exhausted: bool,
    pub delta_ray_pfos: Vec<PfoId>,
}

/// A muon hit in the proximity index.
#[derive(Debug, Clone, Copy)]
struct MuonHit {
    pfo: PfoId,
    x: f64,
    z: f64,
}

impl RTreeObject for MuonHit {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.z])
    }
}

impl PointDistance for MuonHit {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.x - point[0];
        let dz = self.z - point[1];
        dx * dx + dz * dz
    }
}

// ============================================================================
// Matching algorithm
// ============================================================================

/// Three-view delta-ray matching over one event.
pub struct ThreeViewDeltaRayMatching<'a> {
    store: &'a mut dyn ObjectStore,
    geometry: &'a dyn DetectorGeometry,
    config: &'a ReconstructionConfig,
    tensor: OverlapTensor,
    input_clusters: [BTreeSet<ClusterId>; 3],
    nearby_muons: BTreeMap<ClusterId, BTreeSet<PfoId>>,
    muon_clusters: BTreeMap<ClusterId, PfoId>,
    muon_index: [RTree<MuonHit>; 3],
    muon_index_dirty: [bool; 3],
    created_pfos: Vec<PfoId>,
}

impl<'a> ThreeViewDeltaRayMatching<'a> {
    pub fn new(
        store: &'a mut dyn ObjectStore,
        geometry: &'a dyn DetectorGeometry,
        config: &'a ReconstructionConfig,
    ) -> Self {
        Self {
            store,
            geometry,
            config,
            tensor: OverlapTensor::new(),
            input_clusters: Default::default(),
            nearby_muons: BTreeMap::new(),
            muon_clusters: BTreeMap::new(),
            muon_index: [RTree::new(), RTree::new(), RTree::new()],
            muon_index_dirty: [false; 3],
            created_pfos: Vec::new(),
        }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut dyn ObjectStore {
        &mut *self.store
    }

    pub fn geometry(&self) -> &dyn DetectorGeometry {
        self.geometry
    }

    pub fn config(&self) -> &ReconstructionConfig {
        self.config
    }

    pub fn tensor(&self) -> &OverlapTensor {
        &self.tensor
    }

    /// Clusters of a view currently eligible for the tensor.
    pub fn input_clusters(&self, view: View) -> &BTreeSet<ClusterId> {
        &self.input_clusters[view.index()]
    }

    /// Pfos created by this pass, in creation order.
    pub fn created_pfos(&self) -> &[PfoId] {
        &self.created_pfos
    }

    /// Run the tools to a fixed point.
    ///
    /// Whenever a tool changes the event the sequence restarts from the first
    /// tool; the number of restarts is capped by `max_tensor_tool_repeats`.
    pub fn run(&mut self, tools: &[DeltaRayTensorTool]) -> Result<MatchingReport> {
        self.prepare();
        self.build_tensor()?;

        let mut report = MatchingReport {
            initial_elements: self.tensor.len(),
            ..Default::default()
        };
        info!(
            "[DeltaRayMatching] Tensor built: {} elements from {}/{}/{} U/V/W clusters",
            report.initial_elements,
            self.input_clusters[0].len(),
            self.input_clusters[1].len(),
            self.input_clusters[2].len()
        );

        let mut index = 0;
        let mut repeats = 0;
        while index < tools.len() {
            report.tool_runs += 1;
            if tools[index].apply(self)? {
                debug!("[DeltaRayMatching] {} changed the event", tools[index].name());
                report.changes += 1;
                repeats += 1;
                if repeats > self.config.matching.max_tensor_tool_repeats {
                    warn!("[DeltaRayMatching] Tool repeat cap reached, stopping");
                    report.repeats_exhausted = true;
                    break;
                }
                index = 0;
            } else {
                index += 1;
            }
        }

        report.delta_ray_pfos = self.created_pfos.clone();
        info!(
            "[DeltaRayMatching] {} tool runs, {} changes, {} delta-ray pfos",
            report.tool_runs,
            report.changes,
            report.delta_ray_pfos.len()
        );
        Ok(report)
    }

    /// Select the input clusters and index the muons.
    pub fn prepare(&mut self) {
        self.tensor.clear();
        self.nearby_muons.clear();
        self.muon_clusters.clear();

        for pfo in self.store.muon_pfo_ids() {
            if let Some(p) = self.store.pfo(pfo) {
                for &cluster in &p.clusters {
                    if self.store.cluster(cluster).is_some() {
                        self.muon_clusters.insert(cluster, pfo);
                    }
                }
            }
        }

        for view in View::ALL {
            self.rebuild_muon_index(view);
            let selected: BTreeSet<ClusterId> = self
                .store
                .available_cluster_ids(view)
                .into_iter()
                .filter(|c| self.passes_tensor_threshold(*c))
                .collect();
            self.input_clusters[view.index()] = selected;
        }

        let inputs: Vec<ClusterId> = self.input_clusters.iter().flatten().copied().collect();
        for cluster in inputs {
            let nearby = self.nearby_muon_pfos(cluster);
            self.nearby_muons.insert(cluster, nearby);
        }
    }

    fn passes_tensor_threshold(&self, cluster: ClusterId) -> bool {
        !self.muon_clusters.contains_key(&cluster)
            && self
                .store
                .cluster(cluster)
                .is_some_and(|c| {
                    c.is_available() && c.n_hits() >= self.config.matching.min_cluster_calo_hits
                })
    }

    /// Compute every triple of the current input clusters.
    pub fn build_tensor(&mut self) -> Result<()> {
        self.tensor.clear();
        let mut triples = Vec::new();
        for &u in &self.input_clusters[0] {
            for &v in &self.input_clusters[1] {
                for &w in &self.input_clusters[2] {
                    triples.push((u, v, w));
                }
            }
        }
        self.insert_triples(&triples)
    }

    fn insert_triples(&mut self, triples: &[(ClusterId, ClusterId, ClusterId)]) -> Result<()> {
        let results = self.evaluate_triples(triples)?;
        for (&(u, v, w), result) in triples.iter().zip(results) {
            if let Some(overlap) = result {
                self.tensor.insert(u, v, w, overlap);
            }
        }
        Ok(())
    }

    fn evaluate_triples(
        &self,
        triples: &[(ClusterId, ClusterId, ClusterId)],
    ) -> Result<Vec<Option<DeltaRayOverlapResult>>> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            triples
                .par_iter()
                .map(|&(u, v, w)| self.calculate_overlap_result(u, v, w))
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            triples
                .iter()
                .map(|&(u, v, w)| self.calculate_overlap_result(u, v, w))
                .collect()
        }
    }

    /// Overlap result of a cluster triple, `None` when the clusters share no
    /// nearby muon or do not match in position.
    pub fn calculate_overlap_result(
        &self,
        u: ClusterId,
        v: ClusterId,
        w: ClusterId,
    ) -> Result<Option<DeltaRayOverlapResult>> {
        let common = self.common_muon_pfos(u, v, w);
        if common.is_empty() {
            return Ok(None);
        }

        let matched = self.perform_three_view_matching(
            &self.store.cluster_positions(u),
            &self.store.cluster_positions(v),
            &self.store.cluster_positions(w),
        )?;
        Ok(matched.map(|m| DeltaRayOverlapResult::new(m.into(), common)))
    }

    /// Muon pfos near all three clusters, in handle order.
    fn common_muon_pfos(&self, u: ClusterId, v: ClusterId, w: ClusterId) -> Vec<PfoId> {
        let nearby = |c: ClusterId| {
            self.nearby_muons
                .get(&c)
                .cloned()
                .unwrap_or_else(|| self.nearby_muon_pfos(c))
        };
        let (near_u, near_v, near_w) = (nearby(u), nearby(v), nearby(w));
        near_u
            .iter()
            .filter(|p| near_v.contains(p) && near_w.contains(p))
            .copied()
            .collect()
    }

    /// Correlate U, V and W point sets over their common drift range.
    pub fn perform_three_view_matching(
        &self,
        positions_u: &[Position],
        positions_v: &[Position],
        positions_w: &[Position],
    ) -> Result<Option<ThreeViewMatch>> {
        overlap::perform_three_view_matching(
            positions_u,
            positions_v,
            positions_w,
            self.geometry,
            &self.config.matching,
        )
    }

    /// Muon pfos with a hit inside the search box around any hit of `cluster`.
    pub fn nearby_muon_pfos(&self, cluster: ClusterId) -> BTreeSet<PfoId> {
        let Some(view) = self.store.cluster(cluster).map(|c| c.view()) else {
            return BTreeSet::new();
        };
        let r = self.config.matching.search_region_1d;
        let tree = &self.muon_index[view.index()];
        let mut nearby = BTreeSet::new();
        for p in self.store.cluster_positions(cluster) {
            let envelope = AABB::from_corners([p.x - r, p.z - r], [p.x + r, p.z + r]);
            for hit in tree.locate_in_envelope(&envelope) {
                nearby.insert(hit.pfo);
            }
        }
        nearby
    }

    fn rebuild_muon_index(&mut self, view: View) {
        let hits: Vec<MuonHit> = self
            .muon_clusters
            .iter()
            .filter(|(c, _)| self.store.cluster(**c).is_some_and(|c| c.view() == view))
            .flat_map(|(&c, &pfo)| {
                self.store
                    .cluster_positions(c)
                    .into_iter()
                    .map(move |p| MuonHit { pfo, x: p.x, z: p.z })
            })
            .collect();
        self.muon_index[view.index()] = RTree::bulk_load(hits);
        self.muon_index_dirty[view.index()] = false;
    }

    // ========================================================================
    // Index maintenance
    // ========================================================================

    /// Forget a cluster that is about to be deleted or modified.
    pub fn update_upon_deletion(&mut self, cluster: ClusterId) {
        let removed = self.tensor.remove_cluster(cluster);
        for inputs in &mut self.input_clusters {
            inputs.remove(&cluster);
        }
        self.nearby_muons.remove(&cluster);

        if self.muon_clusters.remove(&cluster).is_some() {
            if let Some(view) = self.store.cluster(cluster).map(|c| c.view()) {
                self.muon_index_dirty[view.index()] = true;
            }
        }
        if removed > 0 {
            debug!("[DeltaRayMatching] {cluster} removed with {removed} tensor elements");
        }
    }

    /// Index clusters created or modified by a mutation.
    ///
    /// `pfos[i]` is the muon owning `clusters[i]`, or `None` for a delta-ray
    /// candidate. Handles that no longer exist are skipped.
    pub fn update_for_new_clusters(
        &mut self,
        clusters: &[ClusterId],
        pfos: &[Option<PfoId>],
    ) -> Result<()> {
        if clusters.len() != pfos.len() {
            return Err(ReconstructionError::InvalidParameter {
                reason: format!("{} clusters but {} pfo entries", clusters.len(), pfos.len()),
            });
        }

        let mut new_inputs = Vec::new();
        for (&cluster, &pfo) in clusters.iter().zip(pfos) {
            let Some(view) = self.store.cluster(cluster).map(|c| c.view()) else {
                continue;
            };
            match pfo {
                Some(muon) => {
                    self.muon_clusters.insert(cluster, muon);
                    self.muon_index_dirty[view.index()] = true;
                }
                None => {
                    if self.passes_tensor_threshold(cluster) {
                        self.input_clusters[view.index()].insert(cluster);
                        new_inputs.push(cluster);
                    }
                }
            }
        }

        let mut muons_changed = false;
        for view in View::ALL {
            if self.muon_index_dirty[view.index()] {
                muons_changed = true;
                self.rebuild_muon_index(view);
                let inputs: Vec<ClusterId> = self.input_clusters[view.index()]
                    .iter()
                    .copied()
                    .collect();
                for cluster in inputs {
                    let nearby = self.nearby_muon_pfos(cluster);
                    self.nearby_muons.insert(cluster, nearby);
                }
            }
        }
        if muons_changed {
            self.refresh_common_muons();
        }

        let mut triples = BTreeSet::new();
        for &cluster in &new_inputs {
            let nearby = self.nearby_muon_pfos(cluster);
            self.nearby_muons.insert(cluster, nearby);
        }
        for &cluster in &new_inputs {
            let Some(view) = self.store.cluster(cluster).map(|c| c.view()) else {
                continue;
            };
            let [a, b] = view.others();
            for &ca in &self.input_clusters[a.index()] {
                for &cb in &self.input_clusters[b.index()] {
                    let mut slots = [cluster; 3];
                    slots[a.index()] = ca;
                    slots[b.index()] = cb;
                    triples.insert((slots[0], slots[1], slots[2]));
                }
            }
        }

        let triples: Vec<_> = triples.into_iter().collect();
        self.insert_triples(&triples)
    }

    /// Recompute the common muons of existing elements after a muon changed.
    /// Elements left without a common muon are dropped.
    fn refresh_common_muons(&mut self) {
        let mut dropped = 0;
        for element in self.tensor.elements() {
            let [u, v, w] = element.clusters();
            let common = self.common_muon_pfos(u, v, w);
            if common == element.overlap.common_muon_pfos {
                continue;
            }
            if common.is_empty() {
                self.tensor.remove(u, v, w);
                dropped += 1;
            } else {
                let overlap = DeltaRayOverlapResult::new(element.overlap.track, common);
                self.tensor.insert(u, v, w, overlap);
            }
        }
        if dropped > 0 {
            debug!("[DeltaRayMatching] {dropped} elements lost their common muon");
        }
    }

    // ========================================================================
    // Queries used by the tools
    // ========================================================================

    /// See [`OverlapTensor::connected_elements`].
    pub fn connected_elements(
        &self,
        key: ClusterId,
        ignore_unavailable: bool,
        elements: &mut Vec<TensorElement>,
        checked: &mut BTreeSet<ClusterId>,
    ) {
        self.tensor
            .connected_elements(key, ignore_unavailable, &*self.store, elements, checked);
    }

    pub fn sorted_key_clusters(&self) -> Vec<ClusterId> {
        self.tensor.sorted_key_clusters(&*self.store)
    }

    /// The muon cluster in `view` of an element's single common muon.
    pub fn muon_cluster(&self, element: &TensorElement, view: View) -> Option<ClusterId> {
        let muon = element.overlap.unique_common_muon()?;
        match self.store.pfo_clusters_in_view(muon, view).as_slice() {
            [cluster] => Some(*cluster),
            _ => None,
        }
    }

    /// Positions in `target` predicted from two clusters of the other views.
    ///
    /// The cluster with more hits is walked hit by hit and the other one is
    /// profiled at each hit's drift coordinate.
    pub fn project_cluster_positions(
        &self,
        target: View,
        cluster_a: ClusterId,
        cluster_b: ClusterId,
    ) -> Option<Vec<Position>> {
        let a = self.store.cluster(cluster_a)?;
        let b = self.store.cluster(cluster_b)?;
        if a.view() == b.view() || a.view() == target || b.view() == target {
            return None;
        }

        let (walked, profiled) = if (b.n_hits(), cluster_a) > (a.n_hits(), cluster_b) {
            (b, a)
        } else {
            (a, b)
        };
        let profile = self.store.cluster_positions(profiled.id());
        let window = self.config.matching.x_overlap_window;

        Some(
            self.store
                .cluster_positions(walked.id())
                .into_iter()
                .filter_map(|p| {
                    let z_other = profile_z(&profile, p.x, window)?;
                    let z = self.geometry.project(walked.view(), p.z, profiled.view(), z_other)?;
                    Some(Position::new(p.x, z))
                })
                .collect(),
        )
    }

    /// Positions of a muon in `view` predicted from its clusters in the other
    /// two views. `None` unless the muon has exactly one cluster in each.
    pub fn project_muon_positions(&self, view: View, muon: PfoId) -> Option<Vec<Position>> {
        let [a, b] = view.others();
        let (ca, cb) = match (
            self.store.pfo_clusters_in_view(muon, a).as_slice(),
            self.store.pfo_clusters_in_view(muon, b).as_slice(),
        ) {
            ([ca], [cb]) => (*ca, *cb),
            _ => return None,
        };
        self.project_cluster_positions(view, ca, cb)
    }

    /// Promote proto particles to delta-ray pfos attached to their muons.
    pub fn create_pfos(&mut self, protos: &[ProtoParticle]) -> Result<bool> {
        for proto in protos {
            for &cluster in &proto.clusters {
                self.update_upon_deletion(cluster);
            }
            let pfo = self.store.create_pfo(ParticleKind::DeltaRay, &proto.clusters)?;
            if let Some(parent) = proto.parent {
                self.store.set_parent(pfo, parent)?;
            }
            debug!(
                "[DeltaRayMatching] Created {pfo} from {:?} (parent {:?})",
                proto.clusters, proto.parent
            );
            self.created_pfos.push(pfo);
        }
        Ok(!protos.is_empty())
    }
}
