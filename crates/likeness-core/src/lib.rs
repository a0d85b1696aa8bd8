//! likeness-core — Face descriptor matching and identity clustering.
//!
//! Takes descriptors from an external face detector, matches them against
//! known persons, and keeps person clusters consistent as faces are
//! added, deleted and reconciled in batch. Storage sits behind the
//! [`Store`] trait.

pub mod aggregator;
pub mod cluster;
pub mod descriptor;
pub mod error;
pub mod gallery;
pub mod matcher;
pub mod store;
#[cfg(test)]
mod testing;
pub mod types;

pub use cluster::GroupReport;
pub use descriptor::{Descriptor, DescriptorError};
pub use error::GalleryError;
pub use gallery::{DeleteReport, FaceAssignment, Gallery, GalleryConfig};
pub use matcher::{LinearIndex, PersonIndex, PersonMatch, TieBreak};
pub use store::{FaceFilter, MemoryStore, Store, StoreError};
pub use types::{
    BoundingBox, Detection, Face, FaceId, MediaRef, Person, PersonId, PersonSummary,
};

pub use tokio_util::sync::CancellationToken;
