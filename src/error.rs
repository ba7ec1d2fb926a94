//! Unified error handling.
//!
//! Three kinds of failure exist in the reconstruction:
//! - expected rejections (no muon nearby, no overlap) are plain `Option::None`
//!   and never reach this type, except where a helper has to report them
//!   (`NotFound`);
//! - contract violations such as inverted span bounds (`InvalidParameter`);
//! - refused structural mutations of the object store (`Transaction`). These
//!   abort the current event.

use thiserror::Error;

use crate::{ClusterId, HitId, PfoId, View};

/// Errors raised by the reconstruction.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    /// A requested object or geometric answer does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A query was called with arguments that break its contract.
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// The object store refused a structural mutation.
    #[error("object store refused {operation}: {reason}")]
    Transaction {
        operation: &'static str,
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ReconstructionError>;

impl ReconstructionError {
    pub(crate) fn transaction(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Transaction {
            operation,
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_cluster(operation: &'static str, cluster: ClusterId) -> Self {
        Self::transaction(operation, format!("cluster {cluster} is not in the store"))
    }

    pub(crate) fn unknown_hit(operation: &'static str, hit: HitId) -> Self {
        Self::transaction(operation, format!("hit {hit} is not in the store"))
    }

    pub(crate) fn unknown_pfo(operation: &'static str, pfo: PfoId) -> Self {
        Self::transaction(operation, format!("pfo {pfo} is not in the store"))
    }

    pub(crate) fn wrong_view(operation: &'static str, expected: View, found: View) -> Self {
        Self::transaction(operation, format!("expected a {expected} object, found {found}"))
    }

    /// Whether the error is fatal to the event being processed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}

/// Extension trait turning `Option` lookups into `NotFound` errors.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, what: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, what: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ReconstructionError::NotFound { what: what.into() })
    }
}
