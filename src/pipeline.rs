//! Per-event driver: delta-ray matching, then track extension.

use log::info;
use serde::Serialize;

use crate::config::ReconstructionConfig;
use crate::error::Result;
use crate::geometry::DetectorGeometry;
use crate::matching::{MatchingReport, ThreeViewDeltaRayMatching};
use crate::refinement::{ExtensionReport, TrackExtensionRefinement};
use crate::store::ObjectStore;
use crate::tools::DeltaRayTensorTool;

/// What one event's reconstruction did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventReport {
    /// Delta-ray pfos created.
    pub delta_ray_pfos: usize,
    pub matching: MatchingReport,
    /// `None` when the track extension is switched off.
    pub extension: Option<ExtensionReport>,
}

/// Reconstruct one event in place with the default tool sequence.
pub fn reconstruct_event(
    store: &mut dyn ObjectStore,
    geometry: &dyn DetectorGeometry,
    config: &ReconstructionConfig,
) -> Result<EventReport> {
    reconstruct_event_with_tools(store, geometry, config, &DeltaRayTensorTool::default_sequence())
}

/// Reconstruct one event in place, running `tools` over the tensor. The
/// configuration is validated first.
pub fn reconstruct_event_with_tools(
    store: &mut dyn ObjectStore,
    geometry: &dyn DetectorGeometry,
    config: &ReconstructionConfig,
    tools: &[DeltaRayTensorTool],
) -> Result<EventReport> {
    config.validate()?;
    let matching = {
        let mut algorithm = ThreeViewDeltaRayMatching::new(&mut *store, geometry, config);
        algorithm.run(tools)?
    };

    let extension = if config.run_track_extension {
        let mut refinement =
            TrackExtensionRefinement::new(&mut *store, geometry, &config.extension);
        Some(refinement.run()?)
    } else {
        None
    };

    let report = EventReport {
        delta_ray_pfos: matching.delta_ray_pfos.len(),
        matching,
        extension,
    };
    info!(
        "[Pipeline] {} delta rays, {} tool changes",
        report.delta_ray_pfos, report.matching.changes
    );
    Ok(report)
}
