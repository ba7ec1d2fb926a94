//! # deltaray
//!
//! Multi-view track/shower disambiguation for liquid-argon TPC pattern
//! recognition.
//!
//! The detector reads out three 2D projections (views U, V and W) of the same
//! event. Cosmic-ray muons leave long tracks in every view, and the short
//! delta rays they knock out are often clustered together with them. This
//! library provides:
//! - a three-view overlap tensor correlating clusters across the views
//! - tensor tools that strip muon hits out of delta-ray clusters, merge
//!   fragmented delta rays and promote good matches to particles
//! - a track-extension refinement that grows main tracks towards the TPC
//!   boundaries through overlapping showers
//!
//! ## Features
//!
//! - **`parallel`** - Evaluate tensor candidates in parallel with rayon
//! - **`synthetic`** - Synthetic cosmic-ray event generator
//! - **`cli`** - The `deltaray-cli` binary
//!
//! ## Quick Start
//!
//! ```rust
//! use deltaray::{EventStore, ObjectStore, Position, ReconstructionConfig, View, WireGeometry};
//! use deltaray::pipeline::reconstruct_event;
//!
//! let mut store = EventStore::new();
//! let hits: Vec<_> = (0..10)
//!     .map(|i| store.add_hit(View::W, Position::new(i as f64, 0.0), 1.0, 0.5))
//!     .collect();
//! store.create_cluster(View::W, &hits).unwrap();
//!
//! let geometry = WireGeometry::default();
//! let config = ReconstructionConfig::default();
//! let report = reconstruct_event(&mut store, &geometry, &config).unwrap();
//! assert_eq!(report.delta_ray_pfos, 0);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

// Unified error handling
pub mod error;
pub use error::{OptionExt, ReconstructionError, Result};

// Point-set geometry and the detector geometry service
pub mod geometry;
pub use geometry::{DetectorGeometry, WireGeometry};

// Local linear fits along clusters
pub mod sliding_fit;
pub use sliding_fit::SlidingFit;

// Proximity clustering of loose hits
pub mod clustering;

// Hit / cluster / pfo arena
pub mod store;
pub use store::{Cluster, EventStore, Hit, ObjectStore, Pfo};

// Configuration for every algorithm
pub mod config;
pub use config::{
    DeltaRayMatchingConfig, MergeConfig, ReconstructionConfig, RemovalConfig,
    TrackExtensionConfig,
};

// Three-view overlap results and the overlap tensor
pub mod overlap;
pub use overlap::{DeltaRayOverlapResult, ThreeViewMatch, TrackOverlapResult, XOverlap};
pub mod tensor;
pub use tensor::{OverlapTensor, TensorElement};

// Three-view delta-ray matching and its tensor tools
pub mod matching;
pub use matching::{ProtoParticle, ThreeViewDeltaRayMatching};
pub mod tools;
pub use tools::DeltaRayTensorTool;

// Track extension towards TPC boundaries
pub mod refinement;
pub use refinement::{ClusterEndpointAssociation, TrackExtensionRefinement};

// Event files and the per-event driver
pub mod event;
pub mod pipeline;

// Synthetic cosmic-ray events for tests and benchmarks
#[cfg(feature = "synthetic")]
pub mod synthetic;

// ============================================================================
// Core Types
// ============================================================================

/// One of the three wire-plane projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum View {
    U,
    V,
    W,
}

impl View {
    /// All views in processing order.
    pub const ALL: [View; 3] = [View::U, View::V, View::W];

    pub fn index(self) -> usize {
        match self {
            View::U => 0,
            View::V => 1,
            View::W => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            View::U => "U",
            View::V => "V",
            View::W => "W",
        }
    }

    /// The two other views, in cyclic order (U -> V, W; V -> W, U; W -> U, V).
    pub fn others(self) -> [View; 2] {
        match self {
            View::U => [View::V, View::W],
            View::V => [View::W, View::U],
            View::W => [View::U, View::V],
        }
    }

    /// The view that is neither `self` nor `other`.
    pub fn third(self, other: View) -> Option<View> {
        if self == other {
            return None;
        }
        View::ALL.into_iter().find(|v| *v != self && *v != other)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Stable handle of a hit in the event arena.
    HitId,
    "h"
);
handle_type!(
    /// Stable handle of a cluster. Handles are never reused within an event.
    ClusterId,
    "c"
);
handle_type!(
    /// Stable handle of a particle flow object.
    PfoId,
    "p"
);

/// A position in a 2D view: drift coordinate `x`, wire coordinate `z`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub z: f64,
}

impl Position {
    pub const ZERO: Position = Position { x: 0.0, z: 0.0 };

    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    pub fn dot(&self, other: &Position) -> f64 {
        self.x * other.x + self.z * other.z
    }

    /// Signed magnitude of the 2D cross product.
    pub fn cross(&self, other: &Position) -> f64 {
        self.x * other.z - self.z * other.x
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.dot(self)
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude_squared().sqrt()
    }

    pub fn distance_squared(&self, other: &Position) -> f64 {
        (*self - *other).magnitude_squared()
    }

    pub fn distance(&self, other: &Position) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Unit vector, `None` for a null vector.
    pub fn unit(&self) -> Option<Position> {
        let magnitude = self.magnitude();
        if magnitude < f64::EPSILON {
            return None;
        }
        Some(*self * (1.0 / magnitude))
    }

    /// Opening angle to `other` in radians, within `[0, pi]`.
    pub fn opening_angle(&self, other: &Position) -> f64 {
        let denominator = self.magnitude() * other.magnitude();
        if denominator < f64::EPSILON {
            return 0.0;
        }
        (self.dot(other) / denominator).clamp(-1.0, 1.0).acos()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.z.is_finite()
    }
}

impl Add for Position {
    type Output = Position;
    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.z + rhs.z)
    }
}

impl AddAssign for Position {
    fn add_assign(&mut self, rhs: Position) {
        self.x += rhs.x;
        self.z += rhs.z;
    }
}

impl Sub for Position {
    type Output = Position;
    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.z - rhs.z)
    }
}

impl Mul<f64> for Position {
    type Output = Position;
    fn mul(self, rhs: f64) -> Position {
        Position::new(self.x * rhs, self.z * rhs)
    }
}

impl Neg for Position {
    type Output = Position;
    fn neg(self) -> Position {
        Position::new(-self.x, -self.z)
    }
}

/// Bounding box of a set of positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub min_x: f64,
    pub max_x: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl Span {
    /// Create a span from positions; `None` when empty.
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Option<Self> {
        let mut span: Option<Span> = None;
        for p in positions {
            let s = span.get_or_insert(Span {
                min_x: p.x,
                max_x: p.x,
                min_z: p.z,
                max_z: p.z,
            });
            s.min_x = s.min_x.min(p.x);
            s.max_x = s.max_x.max(p.x);
            s.min_z = s.min_z.min(p.z);
            s.max_z = s.max_z.max(p.z);
        }
        span
    }

    pub fn width_x(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn width_z(&self) -> f64 {
        self.max_z - self.min_z
    }
}
