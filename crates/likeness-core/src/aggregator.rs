//! Recomputes a person's representative descriptor from its faces.
//!
//! Every call reloads all of the person's faces and takes the mean from
//! scratch, so building an N-face cluster one face at a time costs O(N²).
//! An incremental running mean (`m += (x - m) / n`) is the upgrade path
//! if clusters grow large.

use crate::descriptor::{self, Descriptor};
use crate::store::{FaceFilter, Store, StoreError};
use crate::types::PersonId;

/// Set `person_id`'s representative to the mean of its faces' descriptors.
///
/// Returns the written representative, or `None` when the person owns no
/// faces or has disappeared from the store. Both cases are no-ops.
pub fn update_representative<S: Store + ?Sized>(
    store: &S,
    person_id: PersonId,
) -> Result<Option<Descriptor>, StoreError> {
    let faces = store.faces(&FaceFilter::Person(person_id))?;

    if let Some(first) = faces.first() {
        let dimension = first.descriptor.len();
        if let Some(odd) = faces.iter().find(|f| f.descriptor.len() != dimension) {
            return Err(StoreError::Corrupt {
                id: odd.id.to_string(),
                reason: format!(
                    "descriptor has {} components, other faces of person {person_id} have {dimension}",
                    odd.descriptor.len()
                ),
            });
        }
    }

    let Some(mean) = descriptor::mean(faces.iter().map(|f| &f.descriptor)) else {
        tracing::debug!(person = %person_id, "no faces; representative left unchanged");
        return Ok(None);
    };

    if !store.update_representative(person_id, &mean)? {
        tracing::debug!(person = %person_id, "person vanished before representative update");
        return Ok(None);
    }

    tracing::debug!(person = %person_id, faces = faces.len(), "representative updated");
    Ok(Some(mean))
}
