//! Sparse U x V x W overlap tensor.
//!
//! Elements are keyed by their U, V and W clusters. Navigation maps link
//! clusters cyclically (U to V, V to W, W to U) so that connected groups can
//! be walked from any cluster. Every container is ordered, which makes
//! iteration, and therefore every decision taken from it, reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::overlap::DeltaRayOverlapResult;
use crate::store::ObjectStore;
use crate::{ClusterId, View};

/// One cluster per view plus their overlap result.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorElement {
    pub cluster_u: ClusterId,
    pub cluster_v: ClusterId,
    pub cluster_w: ClusterId,
    pub overlap: DeltaRayOverlapResult,
}

impl TensorElement {
    pub fn cluster(&self, view: View) -> ClusterId {
        match view {
            View::U => self.cluster_u,
            View::V => self.cluster_v,
            View::W => self.cluster_w,
        }
    }

    pub fn clusters(&self) -> [ClusterId; 3] {
        [self.cluster_u, self.cluster_v, self.cluster_w]
    }

    pub fn contains(&self, cluster: ClusterId) -> bool {
        self.clusters().contains(&cluster)
    }

    /// Whether both elements reference the same triple.
    pub fn same_clusters(&self, other: &TensorElement) -> bool {
        self.clusters() == other.clusters()
    }

    /// Combined hit count of the three clusters.
    pub fn total_hits(&self, store: &dyn ObjectStore) -> usize {
        self.clusters().iter().map(|c| store.n_hits(*c)).sum()
    }
}

type Triple = (ClusterId, ClusterId, ClusterId);

/// The overlap tensor of one matching pass.
#[derive(Debug, Clone, Default)]
pub struct OverlapTensor {
    elements: BTreeMap<ClusterId, BTreeMap<ClusterId, BTreeMap<ClusterId, DeltaRayOverlapResult>>>,
    navigation_uv: BTreeMap<ClusterId, BTreeSet<ClusterId>>,
    navigation_vw: BTreeMap<ClusterId, BTreeSet<ClusterId>>,
    navigation_wu: BTreeMap<ClusterId, BTreeSet<ClusterId>>,
}

impl OverlapTensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.navigation_uv.clear();
        self.navigation_vw.clear();
        self.navigation_wu.clear();
    }

    pub fn len(&self) -> usize {
        self.elements
            .values()
            .flat_map(|v| v.values())
            .map(|w| w.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Insert or replace the result for a triple.
    pub fn insert(
        &mut self,
        u: ClusterId,
        v: ClusterId,
        w: ClusterId,
        overlap: DeltaRayOverlapResult,
    ) {
        self.elements
            .entry(u)
            .or_default()
            .entry(v)
            .or_default()
            .insert(w, overlap);
        self.navigation_uv.entry(u).or_default().insert(v);
        self.navigation_vw.entry(v).or_default().insert(w);
        self.navigation_wu.entry(w).or_default().insert(u);
    }

    pub fn get(&self, u: ClusterId, v: ClusterId, w: ClusterId) -> Option<&DeltaRayOverlapResult> {
        self.elements.get(&u)?.get(&v)?.get(&w)
    }

    /// The element of a triple, if present.
    pub fn get_element(&self, u: ClusterId, v: ClusterId, w: ClusterId) -> Option<TensorElement> {
        self.get(u, v, w).map(|overlap| TensorElement {
            cluster_u: u,
            cluster_v: v,
            cluster_w: w,
            overlap: overlap.clone(),
        })
    }

    /// All elements in key order.
    pub fn elements(&self) -> Vec<TensorElement> {
        self.elements
            .iter()
            .flat_map(|(&u, vs)| {
                vs.iter().flat_map(move |(&v, ws)| {
                    ws.iter().map(move |(&w, overlap)| TensorElement {
                        cluster_u: u,
                        cluster_v: v,
                        cluster_w: w,
                        overlap: overlap.clone(),
                    })
                })
            })
            .collect()
    }

    /// Every cluster referenced by at least one element.
    pub fn clusters(&self) -> BTreeSet<ClusterId> {
        self.navigation_uv
            .keys()
            .chain(self.navigation_vw.keys())
            .chain(self.navigation_wu.keys())
            .copied()
            .collect()
    }

    pub fn contains_cluster(&self, cluster: ClusterId) -> bool {
        self.view_of(cluster).is_some()
    }

    /// Navigation map from a view to the next in cyclic order.
    pub fn navigation(&self, from: View) -> &BTreeMap<ClusterId, BTreeSet<ClusterId>> {
        match from {
            View::U => &self.navigation_uv,
            View::V => &self.navigation_vw,
            View::W => &self.navigation_wu,
        }
    }

    fn view_of(&self, cluster: ClusterId) -> Option<View> {
        if self.navigation_uv.contains_key(&cluster) {
            Some(View::U)
        } else if self.navigation_vw.contains_key(&cluster) {
            Some(View::V)
        } else if self.navigation_wu.contains_key(&cluster) {
            Some(View::W)
        } else {
            None
        }
    }

    /// Remove every element referencing `cluster`. Returns how many were
    /// removed.
    pub fn remove_cluster(&mut self, cluster: ClusterId) -> usize {
        let doomed: Vec<Triple> = self
            .elements()
            .into_iter()
            .filter(|e| e.contains(cluster))
            .map(|e| (e.cluster_u, e.cluster_v, e.cluster_w))
            .collect();

        for &(u, v, w) in &doomed {
            self.take(u, v, w);
        }

        if !doomed.is_empty() {
            self.rebuild_navigation();
        }
        doomed.len()
    }

    /// Remove one element, returning its result if it was present.
    pub fn remove(
        &mut self,
        u: ClusterId,
        v: ClusterId,
        w: ClusterId,
    ) -> Option<DeltaRayOverlapResult> {
        let removed = self.take(u, v, w);
        if removed.is_some() {
            self.rebuild_navigation();
        }
        removed
    }

    fn take(&mut self, u: ClusterId, v: ClusterId, w: ClusterId) -> Option<DeltaRayOverlapResult> {
        let vs = self.elements.get_mut(&u)?;
        let ws = vs.get_mut(&v)?;
        let removed = ws.remove(&w);
        if ws.is_empty() {
            vs.remove(&v);
        }
        if vs.is_empty() {
            self.elements.remove(&u);
        }
        removed
    }

    fn rebuild_navigation(&mut self) {
        self.navigation_uv.clear();
        self.navigation_vw.clear();
        self.navigation_wu.clear();
        let triples: Vec<Triple> = self
            .elements
            .iter()
            .flat_map(|(&u, vs)| {
                vs.iter()
                    .flat_map(move |(&v, ws)| ws.keys().map(move |&w| (u, v, w)))
            })
            .collect();
        for (u, v, w) in triples {
            self.navigation_uv.entry(u).or_default().insert(v);
            self.navigation_vw.entry(v).or_default().insert(w);
            self.navigation_wu.entry(w).or_default().insert(u);
        }
    }

    /// Collect the elements connected to `key` through shared clusters.
    ///
    /// Clusters already in `checked` are not explored again, so a caller
    /// scanning several keys threads the same set through every call. With
    /// `ignore_unavailable`, elements with a cluster owned by a pfo are
    /// left out (they still connect the walk).
    pub fn connected_elements(
        &self,
        key: ClusterId,
        ignore_unavailable: bool,
        store: &dyn ObjectStore,
        elements: &mut Vec<TensorElement>,
        checked: &mut BTreeSet<ClusterId>,
    ) {
        let Some(key_view) = self.view_of(key) else {
            return;
        };
        if checked.contains(&key) {
            return;
        }

        let mut found_u = BTreeSet::new();
        let mut queue = VecDeque::from([(key, key_view)]);
        checked.insert(key);

        while let Some((cluster, view)) = queue.pop_front() {
            if view == View::U {
                found_u.insert(cluster);
            }
            let next_view = view.others()[0];
            if let Some(next) = self.navigation(view).get(&cluster) {
                for &n in next {
                    if checked.insert(n) {
                        queue.push_back((n, next_view));
                    }
                }
            }
        }

        let is_available = |c: ClusterId| store.cluster(c).is_some_and(|c| c.is_available());

        for u in found_u {
            let Some(vs) = self.elements.get(&u) else {
                continue;
            };
            for (&v, ws) in vs {
                for (&w, overlap) in ws {
                    let available = is_available(u) && is_available(v) && is_available(w);
                    if ignore_unavailable && !available {
                        continue;
                    }
                    elements.push(TensorElement {
                        cluster_u: u,
                        cluster_v: v,
                        cluster_w: w,
                        overlap: overlap.clone(),
                    });
                }
            }
        }
    }

    /// Distinct U clusters keying at least one element, ordered by hit count
    /// (descending), x span (descending), z span (descending), then handle.
    pub fn sorted_key_clusters(&self, store: &dyn ObjectStore) -> Vec<ClusterId> {
        let mut keyed: Vec<(ClusterId, usize, f64, f64)> = self
            .elements
            .keys()
            .map(|&u| {
                let (x_span, z_span) = store
                    .cluster_span(u)
                    .map_or((0.0, 0.0), |s| (s.width_x(), s.width_z()));
                (u, store.n_hits(u), x_span, z_span)
            })
            .collect();

        keyed.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.2.total_cmp(&a.2))
                .then_with(|| b.3.total_cmp(&a.3))
                .then_with(|| a.0.cmp(&b.0))
        });
        keyed.into_iter().map(|(u, ..)| u).collect()
    }
}
