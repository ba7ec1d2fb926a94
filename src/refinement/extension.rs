//! Track extension towards the drift-volume x faces.
//!
//! For each face that borders another drift volume, the longest track
//! heading towards it is extrapolated segment by segment with a growing
//! sliding fit. Shower hits crossed by the extrapolation are moved onto the
//! track when they reach the face without gaps.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, trace};
use serde::Serialize;

use super::ClusterEndpointAssociation;
use crate::config::TrackExtensionConfig;
use crate::error::Result;
use crate::geometry::{
    closest_distance_between, distance_to_line, is_in_line_segment, DetectorGeometry,
};
use crate::sliding_fit::SlidingFit;
use crate::store::ObjectStore;
use crate::{ClusterId, HitId, Position, View};

/// Hits collected along an extrapolation, by the cluster they came from.
pub type ExtractedHits = BTreeMap<ClusterId, Vec<HitId>>;

/// Summary of a track-extension pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtensionReport {
    /// Boundaries processed, over all views.
    pub boundaries_processed: usize,
    /// Associations found and examined.
    pub associations_considered: usize,
    pub tracks_extended: usize,
    /// Hits moved onto main tracks.
    pub hits_added: usize,
}

/// Local and global sliding fits of one cluster.
#[derive(Debug, Clone)]
struct ClusterFits {
    micro: SlidingFit,
    macro_fit: SlidingFit,
}

/// Grows main tracks towards the drift-volume x faces.
pub struct TrackExtensionRefinement<'a> {
    store: &'a mut dyn ObjectStore,
    geometry: &'a dyn DetectorGeometry,
    config: &'a TrackExtensionConfig,
    view: View,
    candidates: Vec<ClusterId>,
    fits: BTreeMap<ClusterId, ClusterFits>,
}

impl<'a> TrackExtensionRefinement<'a> {
    pub fn new(
        store: &'a mut dyn ObjectStore,
        geometry: &'a dyn DetectorGeometry,
        config: &'a TrackExtensionConfig,
    ) -> Self {
        Self {
            store,
            geometry,
            config,
            view: View::W,
            candidates: Vec::new(),
            fits: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        &*self.store
    }

    /// Clusters still to be considered, in current processing order.
    pub fn candidates(&self) -> &[ClusterId] {
        &self.candidates
    }

    /// Clusters with a cached sliding fit.
    pub fn cached_clusters(&self) -> Vec<ClusterId> {
        self.fits.keys().copied().collect()
    }

    /// Run over every view, low-x face first.
    pub fn run(&mut self) -> Result<ExtensionReport> {
        let mut report = ExtensionReport::default();
        for view in View::ALL {
            self.run_view(view, &mut report)?;
        }
        info!(
            "[TrackExtension] {} associations considered, {} tracks extended, {} hits added",
            report.associations_considered, report.tracks_extended, report.hits_added
        );
        Ok(report)
    }

    /// Run both faces of one view.
    pub fn run_view(&mut self, view: View, report: &mut ExtensionReport) -> Result<()> {
        for is_higher_x in [false, true] {
            let boundary_x = self.boundary_x(is_higher_x);
            if self.is_detector_edge(boundary_x) {
                debug!("[TrackExtension] x = {boundary_x} is a detector edge, skipping");
                continue;
            }
            report.boundaries_processed += 1;
            self.initialise_containers(view);

            for _ in 0..self.config.max_loop_iterations {
                self.sort_by_distance_to_boundary(boundary_x);
                let Some(mut association) = self.find_best_cluster_association(boundary_x) else {
                    break;
                };
                report.associations_considered += 1;
                self.consider_cluster(association.main_track_cluster());

                let extracted = self.get_extrapolated_hits(&association);
                if !self.are_extrapolated_hits_good(&mut association, &extracted, boundary_x) {
                    trace!(
                        "[TrackExtension] Rejected extrapolation of {}",
                        association.main_track_cluster()
                    );
                    continue;
                }

                let moved = self.create_main_track(&association, &extracted)?;
                if moved > 0 {
                    report.tracks_extended += 1;
                    report.hits_added += moved;
                }
            }
        }
        Ok(())
    }

    fn boundary_x(&self, is_higher_x: bool) -> f64 {
        if is_higher_x {
            self.geometry.tpc_max_x()
        } else {
            self.geometry.tpc_min_x()
        }
    }

    fn is_detector_edge(&self, boundary_x: f64) -> bool {
        (boundary_x - self.geometry.detector_min_x()).abs() < f64::EPSILON
            || (boundary_x - self.geometry.detector_max_x()).abs() < f64::EPSILON
    }

    // ========================================================================
    // Containers
    // ========================================================================

    /// Fit every cluster of `view` long enough to be extended.
    pub fn initialise_containers(&mut self, view: View) {
        self.view = view;
        self.candidates.clear();
        self.fits.clear();
        for cluster in self.store.cluster_ids(view) {
            self.add_to_containers(cluster);
        }
    }

    fn add_to_containers(&mut self, cluster: ClusterId) {
        if self.store.cluster(cluster).map_or(true, |c| c.view() != self.view) {
            return;
        }
        let positions = self.store.cluster_positions(cluster);
        let pitch = self.geometry.wire_pitch();
        let (Some(micro), Some(macro_fit)) = (
            SlidingFit::new(&positions, self.config.micro_sliding_fit_window, pitch),
            SlidingFit::new(&positions, self.config.macro_sliding_fit_window, pitch),
        ) else {
            return;
        };
        if macro_fit.length() < self.config.min_cluster_length {
            return;
        }
        self.fits.insert(cluster, ClusterFits { micro, macro_fit });
        if !self.candidates.contains(&cluster) {
            self.candidates.push(cluster);
        }
    }

    /// Drop fits of modified or deleted clusters, then fit the new ones.
    fn update_containers(&mut self, stale: &BTreeSet<ClusterId>, added: &[ClusterId]) {
        for cluster in stale {
            self.fits.remove(cluster);
            self.candidates.retain(|c| c != cluster);
        }
        let store = &*self.store;
        self.fits.retain(|c, _| store.cluster(*c).is_some());
        self.candidates.retain(|c| store.cluster(*c).is_some());

        for &cluster in added {
            self.add_to_containers(cluster);
        }
    }

    fn consider_cluster(&mut self, cluster: ClusterId) {
        self.candidates.retain(|c| *c != cluster);
    }

    /// Order candidates by the distance of their furthest end from the face,
    /// furthest first.
    fn sort_by_distance_to_boundary(&mut self, boundary_x: f64) {
        let furthest = |fits: Option<&ClusterFits>| {
            fits.map_or(0.0, |f| {
                let inner = f.macro_fit.global_min_layer_position().x;
                let outer = f.macro_fit.global_max_layer_position().x;
                (inner - boundary_x).abs().max((outer - boundary_x).abs())
            })
        };
        let mut keyed: Vec<(f64, ClusterId)> = self
            .candidates
            .iter()
            .map(|c| (furthest(self.fits.get(c)), *c))
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        self.candidates = keyed.into_iter().map(|(_, c)| c).collect();
    }

    // ========================================================================
    // Association
    // ========================================================================

    /// The longest candidate whose stable end heads towards the face.
    pub fn find_best_cluster_association(
        &self,
        boundary_x: f64,
    ) -> Option<ClusterEndpointAssociation> {
        let towards_higher_x = (boundary_x - self.geometry.tpc_min_x()).abs()
            > (boundary_x - self.geometry.tpc_max_x()).abs();
        let sign = if towards_higher_x { 1.0 } else { -1.0 };

        let mut best: Option<(f64, ClusterEndpointAssociation)> = None;
        for &cluster in &self.candidates {
            let Some(fits) = self.fits.get(&cluster) else {
                continue;
            };
            let length = fits.macro_fit.length();
            if length < self.config.min_cluster_length {
                continue;
            }

            let min_end = fits.macro_fit.global_min_layer_position();
            let max_end = fits.macro_fit.global_max_layer_position();
            let at_min_end = (min_end.x - boundary_x).abs() < (max_end.x - boundary_x).abs();

            let Some((merge_point, direction)) = self.cluster_merging_coordinates(fits, at_min_end)
            else {
                continue;
            };
            if direction.x * sign < self.config.min_boundary_cos_angle {
                continue;
            }

            let t = ((boundary_x - merge_point.x) / direction.x).max(0.0);
            let boundary_point = merge_point + direction * t;

            if best.as_ref().map_or(true, |(l, _)| length > *l) {
                let association = ClusterEndpointAssociation::from_endpoint(
                    cluster,
                    merge_point,
                    direction,
                    boundary_point,
                );
                best = Some((length, association));
            }
        }

        best.map(|(_, association)| association)
    }

    /// Outermost stable point of one end of a cluster and the outward
    /// direction there. Stable means the local direction agrees with the
    /// global one.
    fn cluster_merging_coordinates(
        &self,
        fits: &ClusterFits,
        at_min_end: bool,
    ) -> Option<(Position, Position)> {
        let region = fits.macro_fit.length() * self.config.stable_region_cluster_fraction;
        let layers = fits.micro.layer_fits();
        let end_l = if at_min_end { fits.micro.min_l() } else { fits.micro.max_l() };

        let mut ordered: Vec<_> = layers.iter().collect();
        if !at_min_end {
            ordered.reverse();
        }

        for layer in ordered {
            if (layer.l - end_l).abs() > region {
                break;
            }
            let position = fits.micro.fit_position(layer.l);
            let micro_direction = fits.micro.fit_direction(layer.l);
            let (macro_l, _) = fits.macro_fit.local_position(&position);
            let macro_direction = fits.macro_fit.fit_direction(macro_l);
            let cos_angle = micro_direction.dot(&macro_direction).abs();
            if cos_angle >= self.config.merge_point_min_cos_angle_deviation {
                let outward = if at_min_end { -micro_direction } else { micro_direction };
                return Some((position, outward));
            }
        }
        None
    }

    // ========================================================================
    // Extrapolation
    // ========================================================================

    /// Collect hits along the extrapolation from the track merge point
    /// towards the face.
    ///
    /// Only hits between the two merge points are eligible. The fit is seeded
    /// with the main-track hits within `growing_fit_initial_length` behind
    /// the merge point, then advanced one segment at a time from the end of
    /// the refitted hits until a segment collects nothing.
    pub fn get_extrapolated_hits(&self, association: &ClusterEndpointAssociation) -> ExtractedHits {
        let main_track = association.main_track_cluster();
        let upstream = association.upstream_merge_point();
        let downstream = association.downstream_merge_point();

        let mut region_clusters: Vec<ClusterId> = self.store.available_cluster_ids(self.view);
        if !region_clusters.contains(&main_track) {
            region_clusters.push(main_track);
        }
        region_clusters.sort_by(|a, b| {
            self.store
                .n_hits(*b)
                .cmp(&self.store.n_hits(*a))
                .then_with(|| a.cmp(b))
        });

        let mut hits_in_region: Vec<(ClusterId, HitId, Position, f64)> = Vec::new();
        for &cluster in &region_clusters {
            for (hit, position) in self.store.cluster_hit_positions(cluster) {
                if !is_in_line_segment(&upstream, &downstream, &position) {
                    continue;
                }
                let cell_size = self.store.hit(hit).map_or(0.0, |h| h.cell_size);
                hits_in_region.push((cluster, hit, position, cell_size));
            }
        }

        let mut start = association.cluster_merge_point();
        let mut direction = association.cluster_merge_direction();
        let seed_end = start - direction * self.config.growing_fit_initial_length;
        let (min_x, max_x) = (start.x.min(seed_end.x), start.x.max(seed_end.x));
        let (min_z, max_z) = (start.z.min(seed_end.z), start.z.max(seed_end.z));
        let mut fit_positions: Vec<Position> = self
            .store
            .cluster_positions(main_track)
            .into_iter()
            .filter(|p| p.x >= min_x && p.x <= max_x && p.z >= min_z && p.z <= max_z)
            .collect();

        let mut extracted = ExtractedHits::new();
        let mut collected: BTreeSet<HitId> = BTreeSet::new();
        let mut first_segment = true;

        loop {
            if !first_segment {
                let Some(fit) = SlidingFit::new(
                    &fit_positions,
                    self.config.micro_sliding_fit_window,
                    self.geometry.wire_pitch(),
                ) else {
                    break;
                };
                let min_end = fit.global_min_layer_position();
                let max_end = fit.global_max_layer_position();
                let max_is_ahead =
                    (max_end - start).dot(&direction) >= (min_end - start).dot(&direction);
                let (end, end_direction) = if max_is_ahead {
                    (max_end, fit.global_max_layer_direction())
                } else {
                    (min_end, fit.global_min_layer_direction())
                };
                start = end;
                direction = if end_direction.dot(&direction) < 0.0 {
                    -end_direction
                } else {
                    end_direction
                };
            }
            first_segment = false;

            let end = start + direction * self.config.growing_fit_segment_length;
            let mut n_collected = 0;
            for &(cluster, hit, position, cell_size) in &hits_in_region {
                if collected.contains(&hit) || !is_in_line_segment(&start, &end, &position) {
                    continue;
                }
                if !self.is_hit_on_line(&position, cell_size, &start, &direction) {
                    continue;
                }
                collected.insert(hit);
                fit_positions.push(position);
                extracted.entry(cluster).or_default().push(hit);
                n_collected += 1;
            }
            if n_collected == 0 {
                break;
            }
        }

        extracted
    }

    /// Whether a hit, widened by its cell size along x, lies on the line:
    /// both edges within `max_distance_to_line`, and either straddling the
    /// line or within `closest_distance_to_line` of it.
    fn is_hit_on_line(
        &self,
        position: &Position,
        cell_size: f64,
        start: &Position,
        direction: &Position,
    ) -> bool {
        let high_edge = Position::new(position.x + 0.5 * cell_size, position.z);
        let low_edge = Position::new(position.x - 0.5 * cell_size, position.z);
        let high_distance = distance_to_line(&high_edge, start, direction);
        let low_distance = distance_to_line(&low_edge, start, direction);

        let max_distance = self.config.max_distance_to_line;
        if high_distance > max_distance || low_distance > max_distance {
            return false;
        }

        let high_side = direction.cross(&(high_edge - *start));
        let low_side = direction.cross(&(low_edge - *start));
        high_side * low_side <= 0.0
            || high_distance.min(low_distance) < self.config.closest_distance_to_line
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Whether the extrapolation reaches the face without gaps. On success the
    /// boundary merge point moves to the collected hit furthest along it.
    pub fn are_extrapolated_hits_good(
        &self,
        association: &mut ClusterEndpointAssociation,
        extracted: &ExtractedHits,
        boundary_x: f64,
    ) -> bool {
        let upstream = association.upstream_merge_point();
        let line = association.connecting_line_direction();
        let mut hits: Vec<Position> = extracted
            .values()
            .flatten()
            .filter_map(|h| self.store.hit(*h).map(|hit| hit.position()))
            .collect();
        hits.sort_by(|a, b| (*a - upstream).dot(&line).total_cmp(&(*b - upstream).dot(&line)));

        if !self.is_extrapolated_endpoint_near_boundary(&hits, boundary_x, association) {
            return false;
        }
        if hits.is_empty() {
            return true;
        }
        self.is_track_continuous(association, &hits)
    }

    fn is_extrapolated_endpoint_near_boundary(
        &self,
        hits: &[Position],
        boundary_x: f64,
        association: &mut ClusterEndpointAssociation,
    ) -> bool {
        let merge_point = association.cluster_merge_point();
        let (Some(first), Some(last)) = (hits.first(), hits.last()) else {
            return (merge_point.x - boundary_x).abs() <= self.config.boundary_tolerance;
        };

        let (closest, furthest) = if association.is_end_upstream() {
            (*last, *first)
        } else {
            (*first, *last)
        };
        if (furthest.x - boundary_x).abs() > self.config.boundary_tolerance
            || merge_point.distance(&closest) > self.config.max_merge_point_separation
        {
            return false;
        }

        if association.is_end_upstream() {
            association.set_upstream_merge_point(furthest);
        } else {
            association.set_downstream_merge_point(furthest);
        }
        true
    }

    /// Walk from the track merge point to the boundary merge point in steps
    /// of `line_segment_length`; more than `max_track_gaps` consecutive empty
    /// steps break the track.
    fn is_track_continuous(
        &self,
        association: &ClusterEndpointAssociation,
        hits: &[Position],
    ) -> bool {
        let start = association.cluster_merge_point();
        let axis = association.boundary_merge_point() - start;
        let length = axis.magnitude();
        let Some(unit) = axis.unit() else {
            return true;
        };

        let step = self.config.line_segment_length;
        if step.is_nan() || step <= 0.0 {
            return false;
        }
        let n_segments = (length / step).ceil() as usize;
        let mut consecutive_gaps = 0;
        for i in 0..n_segments {
            let lower = start + unit * (i as f64 * step);
            let upper = start + unit * ((i + 1) as f64 * step).min(length);
            if hits.iter().any(|p| is_in_line_segment(&lower, &upper, p)) {
                consecutive_gaps = 0;
            } else {
                consecutive_gaps += 1;
                if consecutive_gaps > self.config.max_track_gaps {
                    return false;
                }
            }
        }
        true
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Strip off-axis main-track hits, then move the extracted shower hits
    /// onto the main track. Returns the number of hits moved.
    pub fn create_main_track(
        &mut self,
        association: &ClusterEndpointAssociation,
        extracted: &ExtractedHits,
    ) -> Result<usize> {
        if extracted.is_empty() {
            return Ok(0);
        }
        let main_track = association.main_track_cluster();
        let mut showers: Vec<ClusterId> = extracted
            .keys()
            .copied()
            .filter(|c| *c != main_track)
            .collect();
        showers.sort_by(|a, b| {
            self.store
                .n_hits(*b)
                .cmp(&self.store.n_hits(*a))
                .then_with(|| a.cmp(b))
        });

        let mut remnants = Vec::new();
        self.remove_off_axis_hits(association, extracted, &mut remnants)?;
        if showers.is_empty() && remnants.is_empty() {
            return Ok(0);
        }

        let mut stale: BTreeSet<ClusterId> = showers.iter().copied().collect();
        stale.insert(main_track);

        let mut moved = 0;
        for &shower in &showers {
            let hits = extracted.get(&shower).map(Vec::as_slice).unwrap_or_default();
            moved += self.add_hits_to_main_track(main_track, shower, hits, &mut remnants)?;
        }

        let (created, enlarged) = self.process_remnant_clusters(&remnants, main_track)?;
        stale.extend(enlarged.iter().copied());

        debug!(
            "[TrackExtension] Extended {main_track} with {moved} hits from {} clusters, \
             {} remnant clusters",
            showers.len(),
            created.len()
        );

        let added: Vec<ClusterId> = created
            .into_iter()
            .chain(enlarged)
            .filter(|c| *c != main_track)
            .collect();
        self.update_containers(&stale, &added);
        Ok(moved)
    }

    /// Split off main-track hits beyond the merge point that stray from the
    /// extrapolated line.
    fn remove_off_axis_hits(
        &mut self,
        association: &ClusterEndpointAssociation,
        extracted: &ExtractedHits,
        remnants: &mut Vec<ClusterId>,
    ) -> Result<()> {
        let main_track = association.main_track_cluster();
        let merge_point = association.cluster_merge_point();
        let direction = association.cluster_merge_direction();
        let on_track: BTreeSet<HitId> =
            extracted.get(&main_track).into_iter().flatten().copied().collect();
        let max_distance = self.config.max_distance_from_main_track;

        let main_hits = self.store.cluster_hit_positions(main_track);
        let off_axis: Vec<HitId> = main_hits
            .iter()
            .filter(|(h, p)| {
                !on_track.contains(h)
                    && (*p - merge_point).dot(&direction) > 0.0
                    && distance_to_line(p, &merge_point, &direction) > max_distance
            })
            .map(|(h, _)| *h)
            .collect();
        if off_axis.is_empty() || off_axis.len() >= main_hits.len() {
            return Ok(());
        }

        for &hit in &off_axis {
            self.store.remove_from_cluster(main_track, hit)?;
        }
        let remnant = self.store.create_cluster(self.view, &off_axis)?;
        remnants.push(remnant);
        Ok(())
    }

    /// Move `hits` of a shower onto the main track. A shower giving up all
    /// of its hits is merged whole; otherwise its remainder becomes a remnant.
    fn add_hits_to_main_track(
        &mut self,
        main_track: ClusterId,
        shower: ClusterId,
        hits: &[HitId],
        remnants: &mut Vec<ClusterId>,
    ) -> Result<usize> {
        let Some(n_shower_hits) = self.store.cluster(shower).map(|c| c.n_hits()) else {
            return Ok(0);
        };
        if hits.len() >= n_shower_hits {
            self.store.merge_and_delete_clusters(main_track, shower)?;
            return Ok(n_shower_hits);
        }

        for &hit in hits {
            self.store.remove_from_cluster(shower, hit)?;
            self.store.add_to_cluster(main_track, hit)?;
        }
        remnants.push(shower);
        Ok(hits.len())
    }

    /// Merge each remnant into the nearest other cluster when close enough,
    /// otherwise recluster it. Returns the created and the enlarged clusters.
    fn process_remnant_clusters(
        &mut self,
        remnants: &[ClusterId],
        main_track: ClusterId,
    ) -> Result<(Vec<ClusterId>, Vec<ClusterId>)> {
        let remnant_set: BTreeSet<ClusterId> = remnants.iter().copied().collect();
        let mut created = Vec::new();
        let mut enlarged = Vec::new();

        for &remnant in &remnant_set {
            let Some(hits) = self.store.cluster(remnant).map(|c| c.hits().to_vec()) else {
                continue;
            };
            let positions = self.store.cluster_positions(remnant);

            let nearest = self
                .store
                .available_cluster_ids(self.view)
                .into_iter()
                .filter(|c| *c != main_track && !remnant_set.contains(c))
                .filter_map(|c| {
                    closest_distance_between(&positions, &self.store.cluster_positions(c))
                        .map(|d| (d, c))
                })
                .filter(|(d, _)| *d < self.config.max_hit_distance_from_cluster)
                .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

            if let Some((_, target)) = nearest {
                self.store.merge_and_delete_clusters(target, remnant)?;
                enlarged.push(target);
                continue;
            }

            self.store.delete_cluster(remnant)?;
            created.extend(self.store.run_clustering(
                self.view,
                &hits,
                self.config.max_hit_separation_for_connected_cluster,
            )?);
        }

        Ok((created, enlarged))
    }
}
