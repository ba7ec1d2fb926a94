//! Event files.
//!
//! An event file is a JSON array of [`EventRecord`]s. Each record carries
//! the geometry, the hits, the input clusters and the muon particles built
//! from them. After reconstruction the store is exported as an
//! [`EventPartition`]: the live clusters and every particle, with hits named
//! by the labels they had in the input.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReconstructionError, Result};
use crate::geometry::WireGeometry;
use crate::store::{EventStore, ObjectStore, ParticleKind};
use crate::{ClusterId, HitId, PfoId, Position, View};

// ============================================================================
// Input records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub id: u32,
    pub view: View,
    pub x: f64,
    pub z: f64,
    #[serde(default)]
    pub x_offset: f64,
    #[serde(default)]
    pub energy: f64,
    /// Hit width along x.
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
}

fn default_cell_size() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: u32,
    pub view: View,
    /// Labels of the member hits.
    pub hits: Vec<u32>,
}

/// A cosmic-ray muon, by the labels of its clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuonRecord {
    pub clusters: Vec<u32>,
}

/// One event as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: u64,
    #[serde(default)]
    pub geometry: WireGeometry,
    pub hits: Vec<HitRecord>,
    pub clusters: Vec<ClusterRecord>,
    #[serde(default)]
    pub muons: Vec<MuonRecord>,
}

/// An event loaded into an [`EventStore`].
#[derive(Debug, Clone)]
pub struct LoadedEvent {
    pub event_id: u64,
    pub geometry: WireGeometry,
    pub store: EventStore,
    /// Input label of each hit, indexed by handle.
    hit_labels: Vec<u32>,
}

impl EventRecord {
    /// Build the store: hits in record order, then clusters, then muon pfos.
    /// Unknown or repeated labels are rejected.
    pub fn load(&self) -> Result<LoadedEvent> {
        let mut store = EventStore::new();
        let mut hits: BTreeMap<u32, HitId> = BTreeMap::new();
        let mut hit_labels = Vec::with_capacity(self.hits.len());

        for record in &self.hits {
            if hits.contains_key(&record.id) {
                return Err(duplicate_label("hit", record.id));
            }
            let id = store.add_hit_with_offset(
                record.view,
                Position::new(record.x, record.z),
                record.x_offset,
                record.energy,
                record.cell_size,
            );
            hits.insert(record.id, id);
            hit_labels.push(record.id);
        }

        let mut clusters: BTreeMap<u32, ClusterId> = BTreeMap::new();
        for record in &self.clusters {
            if clusters.contains_key(&record.id) {
                return Err(duplicate_label("cluster", record.id));
            }
            let members = record
                .hits
                .iter()
                .map(|label| hits.get(label).copied().ok_or_else(|| unknown_label("hit", *label)))
                .collect::<Result<Vec<_>>>()?;
            clusters.insert(record.id, store.create_cluster(record.view, &members)?);
        }

        for muon in &self.muons {
            let members = muon
                .clusters
                .iter()
                .map(|label| {
                    clusters
                        .get(label)
                        .copied()
                        .ok_or_else(|| unknown_label("cluster", *label))
                })
                .collect::<Result<Vec<_>>>()?;
            store.create_pfo(ParticleKind::CosmicRay, &members)?;
        }

        Ok(LoadedEvent {
            event_id: self.event_id,
            geometry: self.geometry.clone(),
            store,
            hit_labels,
        })
    }
}

fn duplicate_label(what: &str, label: u32) -> ReconstructionError {
    ReconstructionError::InvalidParameter {
        reason: format!("{what} label {label} appears twice"),
    }
}

fn unknown_label(what: &str, label: u32) -> ReconstructionError {
    ReconstructionError::InvalidParameter {
        reason: format!("unknown {what} label {label}"),
    }
}

// ============================================================================
// Output partition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionCluster {
    pub id: ClusterId,
    pub view: View,
    /// Input labels of the member hits, ascending.
    pub hits: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionPfo {
    pub id: PfoId,
    pub kind: ParticleKind,
    pub clusters: Vec<ClusterId>,
    pub parent: Option<PfoId>,
}

/// The cluster and particle decomposition of a reconstructed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPartition {
    pub event_id: u64,
    pub clusters: Vec<PartitionCluster>,
    pub pfos: Vec<PartitionPfo>,
}

impl LoadedEvent {
    /// Export the current decomposition in handle order.
    pub fn partition(&self) -> EventPartition {
        let store = &self.store;
        let clusters = View::ALL
            .into_iter()
            .flat_map(|view| store.cluster_ids(view))
            .filter_map(|id| store.cluster(id))
            .map(|cluster| {
                let mut hits: Vec<u32> = cluster
                    .hits()
                    .iter()
                    .filter_map(|h| self.hit_labels.get(h.index()).copied())
                    .collect();
                hits.sort_unstable();
                PartitionCluster {
                    id: cluster.id(),
                    view: cluster.view(),
                    hits,
                }
            })
            .collect();

        let pfos = store
            .pfo_ids()
            .into_iter()
            .filter_map(|id| store.pfo(id))
            .map(|pfo| PartitionPfo {
                id: pfo.id,
                kind: pfo.kind,
                clusters: pfo.clusters.clone(),
                parent: pfo.parent,
            })
            .collect();

        EventPartition {
            event_id: self.event_id,
            clusters,
            pfos,
        }
    }
}

// ============================================================================
// File I/O
// ============================================================================

/// Read every event of a JSON event file.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<EventRecord>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    Ok(serde_json::from_reader(reader)?)
}

/// Write any serializable value as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
