//! # Track refinement
//!
//! Refinements operating on whole cluster lists after matching. The track
//! extension grows main tracks towards the drift-volume x faces through the
//! showers that overlap them.

mod extension;

use crate::{ClusterId, Position};

pub use extension::{ExtensionReport, ExtractedHits, TrackExtensionRefinement};

/// A main-track endpoint paired with the point where its extrapolation meets
/// a drift-volume boundary.
///
/// Upstream is the end with the lower wire coordinate. Each merge direction
/// points towards the other end.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEndpointAssociation {
    upstream_merge_point: Position,
    upstream_merge_direction: Position,
    downstream_merge_point: Position,
    downstream_merge_direction: Position,
    connecting_line_direction: Position,
    main_track_cluster: ClusterId,
    is_end_upstream: bool,
}

impl ClusterEndpointAssociation {
    pub fn new(
        upstream_merge_point: Position,
        upstream_merge_direction: Position,
        downstream_merge_point: Position,
        downstream_merge_direction: Position,
        main_track_cluster: ClusterId,
        is_end_upstream: bool,
    ) -> Self {
        let connecting_line_direction = (downstream_merge_point - upstream_merge_point)
            .unit()
            .unwrap_or(upstream_merge_direction);
        Self {
            upstream_merge_point,
            upstream_merge_direction,
            downstream_merge_point,
            downstream_merge_direction,
            connecting_line_direction,
            main_track_cluster,
            is_end_upstream,
        }
    }

    /// Build the association from the track endpoint, its outward direction
    /// and the boundary point it extrapolates to.
    pub fn from_endpoint(
        main_track_cluster: ClusterId,
        merge_point: Position,
        outward_direction: Position,
        boundary_point: Position,
    ) -> Self {
        if boundary_point.z < merge_point.z {
            Self::new(
                boundary_point,
                -outward_direction,
                merge_point,
                outward_direction,
                main_track_cluster,
                true,
            )
        } else {
            Self::new(
                merge_point,
                outward_direction,
                boundary_point,
                -outward_direction,
                main_track_cluster,
                false,
            )
        }
    }

    pub fn upstream_merge_point(&self) -> Position {
        self.upstream_merge_point
    }

    pub fn upstream_merge_direction(&self) -> Position {
        self.upstream_merge_direction
    }

    pub fn downstream_merge_point(&self) -> Position {
        self.downstream_merge_point
    }

    pub fn downstream_merge_direction(&self) -> Position {
        self.downstream_merge_direction
    }

    /// Unit vector from the upstream to the downstream merge point.
    pub fn connecting_line_direction(&self) -> Position {
        self.connecting_line_direction
    }

    pub fn main_track_cluster(&self) -> ClusterId {
        self.main_track_cluster
    }

    /// Whether the boundary end is the upstream one.
    pub fn is_end_upstream(&self) -> bool {
        self.is_end_upstream
    }

    /// The merge point on the main track.
    pub fn cluster_merge_point(&self) -> Position {
        if self.is_end_upstream {
            self.downstream_merge_point
        } else {
            self.upstream_merge_point
        }
    }

    /// Direction at the main-track merge point, towards the boundary.
    pub fn cluster_merge_direction(&self) -> Position {
        if self.is_end_upstream {
            self.downstream_merge_direction
        } else {
            self.upstream_merge_direction
        }
    }

    /// The merge point at the boundary end.
    pub fn boundary_merge_point(&self) -> Position {
        if self.is_end_upstream {
            self.upstream_merge_point
        } else {
            self.downstream_merge_point
        }
    }

    pub fn set_upstream_merge_point(&mut self, point: Position) {
        self.upstream_merge_point = point;
        self.update_connecting_line();
    }

    pub fn set_downstream_merge_point(&mut self, point: Position) {
        self.downstream_merge_point = point;
        self.update_connecting_line();
    }

    fn update_connecting_line(&mut self) {
        if let Some(unit) = (self.downstream_merge_point - self.upstream_merge_point).unit() {
            self.connecting_line_direction = unit;
        }
    }
}
