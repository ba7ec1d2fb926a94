//! Good-match selection: promote well-matched, disjoint elements to
//! delta-ray pfos.

use std::collections::BTreeSet;

use crate::config::MergeConfig;
use crate::error::Result;
use crate::matching::{ProtoParticle, ThreeViewDeltaRayMatching};
use crate::store::ObjectStore;
use crate::tensor::TensorElement;
use crate::ClusterId;

use super::element_groups;

pub(crate) fn select_good_matches(matching: &mut ThreeViewDeltaRayMatching<'_>) -> Result<bool> {
    let mut changed = false;
    loop {
        let mut protos = Vec::new();
        for group in element_groups(matching) {
            protos = pick_out_good_matches(matching.store(), &matching.config().merge, &group);
            if !protos.is_empty() {
                break;
            }
        }
        if protos.is_empty() {
            return Ok(changed);
        }
        matching.create_pfos(&protos)?;
        changed = true;
    }
}

/// Greedily pick elements with an acceptable reduced chi-squared and no
/// cluster in common, by total hits (descending) then reduced chi-squared
/// (ascending). Earlier elements win exact ties.
pub fn pick_out_good_matches(
    store: &dyn ObjectStore,
    config: &MergeConfig,
    elements: &[TensorElement],
) -> Vec<ProtoParticle> {
    let mut used: BTreeSet<ClusterId> = BTreeSet::new();
    let mut protos = Vec::new();

    loop {
        let mut best: Option<(&TensorElement, usize, f64)> = None;
        for element in elements {
            let chi2 = element.overlap.reduced_chi_squared();
            if chi2 > config.max_good_match_reduced_chi_squared {
                continue;
            }
            if element.clusters().iter().any(|c| used.contains(c)) {
                continue;
            }
            let hits = element.total_hits(store);
            let better = match best {
                None => true,
                Some((_, best_hits, best_chi2)) => {
                    hits > best_hits || (hits == best_hits && chi2 < best_chi2)
                }
            };
            if better {
                best = Some((element, hits, chi2));
            }
        }

        let Some((element, ..)) = best else {
            return protos;
        };
        used.extend(element.clusters());
        protos.push(ProtoParticle {
            clusters: element.clusters().to_vec(),
            parent: element.overlap.common_muon_pfos.first().copied(),
        });
    }
}
