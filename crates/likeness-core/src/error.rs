use thiserror::Error;

use crate::descriptor::DescriptorError;
use crate::store::StoreError;
use crate::types::{FaceId, PersonId};

/// Errors returned by gallery operations.
#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),

    #[error("person not found: {0}")]
    PersonNotFound(PersonId),

    #[error("face not found: {0}")]
    FaceNotFound(FaceId),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("reconciliation pass aborted after {committed} assignments: {source}")]
    ReconciliationPassFailure {
        /// Assignments made before the failure. They stay committed.
        committed: usize,
        #[source]
        source: Box<GalleryError>,
    },

    #[error("a reconciliation pass is already running")]
    PassInProgress,

    #[error("operation cancelled")]
    Cancelled,
}
