//! Synthetic cosmic-ray events for testing and benchmarking.
//!
//! Generates muon tracks crossing the drift volume with short delta rays
//! branching off them, projected into the three views. The input clustering
//! is deliberately imperfect: muon hits near a delta-ray vertex are
//! sometimes clustered with the delta ray, as a real clustering would do.
//! Ground truth records which hits each delta ray produced.
//!
//! Feature-gated behind `synthetic`, not included in production builds.
//!
//! # Example
//!
//! ```rust
//! use deltaray::synthetic::SyntheticScenario;
//!
//! let scenario = SyntheticScenario {
//!     muon_count: 2,
//!     delta_rays_per_muon: 3,
//!     seed: 7,
//!     ..SyntheticScenario::default()
//! };
//!
//! let event = scenario.generate(0);
//! assert_eq!(event.record.muons.len(), 2);
//! assert_eq!(event.truth.len(), 6);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::event::{ClusterRecord, EventRecord, HitRecord, MuonRecord};
use crate::geometry::WireGeometry;
use crate::View;

// ============================================================================
// Types
// ============================================================================

/// Scenario configuration for generating synthetic events.
#[derive(Debug, Clone)]
pub struct SyntheticScenario {
    pub geometry: WireGeometry,
    /// Muons per event.
    pub muon_count: usize,
    /// Delta rays attached to each muon.
    pub delta_rays_per_muon: usize,
    /// Delta-ray length range (min, max).
    pub delta_ray_length: (f64, f64),
    /// Spacing of consecutive hits along a particle, in 3D.
    pub hit_spacing: f64,
    /// Half-width of the uniform noise added to each hit coordinate.
    pub noise: f64,
    /// Probability that a delta-ray cluster captures muon hits in one view.
    pub contamination_probability: f64,
    /// Muon hits within this distance of the delta-ray vertex are captured.
    pub contamination_radius: f64,
    /// RNG seed for deterministic reproduction.
    pub seed: u64,
}

impl Default for SyntheticScenario {
    fn default() -> Self {
        Self {
            geometry: WireGeometry::default(),
            muon_count: 3,
            delta_rays_per_muon: 2,
            delta_ray_length: (4.0, 12.0),
            hit_spacing: 0.5,
            noise: 0.05,
            contamination_probability: 0.5,
            contamination_radius: 1.5,
            seed: 42,
        }
    }
}

/// Hits one delta ray left in the event.
#[derive(Debug, Clone, PartialEq)]
pub struct TruthDeltaRay {
    /// Index of the parent muon in `EventRecord::muons`.
    pub muon: usize,
    /// Hit labels, all views.
    pub hits: Vec<u32>,
}

/// A generated event and its ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticEvent {
    pub record: EventRecord,
    pub truth: Vec<TruthDeltaRay>,
}

/// A 3D point: drift `x`, vertical `y`, beam `z`.
#[derive(Debug, Clone, Copy)]
struct Point3 {
    x: f64,
    y: f64,
    z: f64,
}

impl Point3 {
    fn lerp(&self, other: &Point3, t: f64) -> Point3 {
        Point3 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    fn distance(&self, other: &Point3) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Wire coordinate in a view; `w = u + v` holds exactly.
    fn wire(&self, view: View) -> f64 {
        match view {
            View::U => 0.5 * (self.z + self.y),
            View::V => 0.5 * (self.z - self.y),
            View::W => self.z,
        }
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Builds one event, handing out hit and cluster labels.
struct EventBuilder {
    hits: Vec<HitRecord>,
    clusters: Vec<ClusterRecord>,
    noise: f64,
}

impl EventBuilder {
    fn hit(&mut self, rng: &mut StdRng, view: View, point: &Point3) -> u32 {
        let id = self.hits.len() as u32;
        let mut jitter = || {
            if self.noise > 0.0 {
                rng.gen_range(-self.noise..self.noise)
            } else {
                0.0
            }
        };
        let (dx, dz) = (jitter(), jitter());
        self.hits.push(HitRecord {
            id,
            view,
            x: point.x + dx,
            z: point.wire(view) + dz,
            x_offset: 0.0,
            energy: 1.0,
            cell_size: 0.5,
        });
        id
    }

    fn cluster(&mut self, view: View, hits: Vec<u32>) -> u32 {
        let id = self.clusters.len() as u32;
        self.clusters.push(ClusterRecord { id, view, hits });
        id
    }
}

fn sample_line(start: &Point3, end: &Point3, spacing: f64) -> Vec<Point3> {
    let n = (start.distance(end) / spacing).ceil().max(1.0) as usize;
    (0..=n).map(|i| start.lerp(end, i as f64 / n as f64)).collect()
}

impl SyntheticScenario {
    /// Generate event `index`; the same scenario and index always give the
    /// same event.
    pub fn generate(&self, index: u64) -> SyntheticEvent {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index));
        let mut builder = EventBuilder {
            hits: Vec::new(),
            clusters: Vec::new(),
            noise: self.noise,
        };
        let mut muons = Vec::with_capacity(self.muon_count);
        let mut truth = Vec::new();

        let (min_x, max_x) = (self.geometry.tpc_min_x, self.geometry.tpc_max_x);
        let margin = 0.1 * (max_x - min_x);

        for muon_index in 0..self.muon_count {
            // Spread muons along the beam axis so they do not overlap
            let z_offset = 150.0 * muon_index as f64;
            let start = Point3 {
                x: rng.gen_range(min_x + margin..max_x - margin),
                y: rng.gen_range(-50.0..50.0),
                z: z_offset + rng.gen_range(0.0..20.0),
            };
            let end = Point3 {
                x: rng.gen_range(min_x + margin..max_x - margin),
                y: rng.gen_range(-50.0..50.0),
                z: z_offset + rng.gen_range(80.0..120.0),
            };
            let muon_points = sample_line(&start, &end, self.hit_spacing);

            // Muon hits per view, with the 3D point they came from
            let mut muon_hits: [Vec<(u32, Point3)>; 3] = Default::default();
            for view in View::ALL {
                for point in &muon_points {
                    let id = builder.hit(&mut rng, view, point);
                    muon_hits[view.index()].push((id, *point));
                }
            }

            let mut delta_clusters: Vec<[Vec<u32>; 3]> = Vec::new();
            for _ in 0..self.delta_rays_per_muon {
                let vertex = start.lerp(&end, rng.gen_range(0.15..0.85));
                let length = rng.gen_range(self.delta_ray_length.0..self.delta_ray_length.1);
                let theta = rng.gen_range(0.3..2.8_f64);
                let phi = rng.gen_range(0.0..std::f64::consts::TAU);
                let tip = Point3 {
                    x: (vertex.x + length * theta.sin() * phi.cos()).clamp(min_x, max_x),
                    y: vertex.y + length * theta.sin() * phi.sin(),
                    z: vertex.z + length * theta.cos(),
                };
                // Skip the vertex itself, which sits on the muon
                let points: Vec<Point3> = sample_line(&vertex, &tip, self.hit_spacing)
                    .into_iter()
                    .skip(2)
                    .collect();

                let mut hits: [Vec<u32>; 3] = Default::default();
                let mut all_hits = Vec::new();
                for view in View::ALL {
                    for point in &points {
                        let id = builder.hit(&mut rng, view, point);
                        hits[view.index()].push(id);
                        all_hits.push(id);
                    }
                }

                if rng.gen_bool(self.contamination_probability.clamp(0.0, 1.0)) {
                    let view = View::ALL[rng.gen_range(0..3)];
                    let muon_view = &mut muon_hits[view.index()];
                    let captured: Vec<u32> = muon_view
                        .iter()
                        .filter(|(_, p)| p.distance(&vertex) < self.contamination_radius)
                        .map(|(id, _)| *id)
                        .collect();
                    // The muon keeps at least its outer hits
                    if captured.len() + 2 < muon_view.len() {
                        muon_view.retain(|(id, _)| !captured.contains(id));
                        hits[view.index()].extend(captured);
                    }
                }

                truth.push(TruthDeltaRay {
                    muon: muon_index,
                    hits: all_hits,
                });
                delta_clusters.push(hits);
            }

            let muon_clusters = View::ALL
                .map(|view| {
                    let ids = muon_hits[view.index()].iter().map(|(id, _)| *id).collect();
                    builder.cluster(view, ids)
                })
                .to_vec();
            muons.push(MuonRecord { clusters: muon_clusters });

            for hits in delta_clusters {
                for view in View::ALL {
                    let view_hits = hits[view.index()].clone();
                    if !view_hits.is_empty() {
                        builder.cluster(view, view_hits);
                    }
                }
            }
        }

        SyntheticEvent {
            record: EventRecord {
                event_id: index,
                geometry: self.geometry.clone(),
                hits: builder.hits,
                clusters: builder.clusters,
                muons,
            },
            truth,
        }
    }

    /// Generate `count` consecutive events.
    pub fn generate_events(&self, count: usize) -> Vec<SyntheticEvent> {
        (0..count as u64).map(|i| self.generate(i)).collect()
    }
}
