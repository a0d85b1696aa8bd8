//! Reconciliation pass: assign every unassigned face to a person.
//!
//! Unassigned faces are compared face-to-face against the pool of already
//! assigned faces (not against person representatives). Each face that
//! gets assigned joins the pool, so later faces in the same pass can
//! chain off it.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::aggregator;
use crate::descriptor::Descriptor;
use crate::error::GalleryError;
use crate::store::{FaceFilter, Store, StoreError};
use crate::types::{Face, Person, PersonId};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    /// Faces attached to a person that already existed in the pool.
    pub assigned_existing: usize,
    /// Persons created for faces with no match in the pool.
    pub created_persons: usize,
    /// Unassigned faces that vanished from the store mid-pass.
    pub skipped: usize,
}

impl GroupReport {
    pub fn committed(&self) -> usize {
        self.assigned_existing + self.created_persons
    }
}

/// Run one pass over the store.
///
/// Every loaded descriptor must have `dimension` components; one that does
/// not is reported as [`StoreError::Corrupt`]. Failures abort the rest of
/// the pass. Assignments already made stay committed and are reported
/// through [`GalleryError::ReconciliationPassFailure`].
pub fn group_faces<S: Store + ?Sized>(
    store: &S,
    max_distance: f32,
    dimension: usize,
    cancel: &CancellationToken,
) -> Result<GroupReport, GalleryError> {
    let mut report = GroupReport::default();
    run_pass(store, max_distance, dimension, cancel, &mut report).map_err(|e| {
        tracing::warn!(
            error = %e,
            committed = report.committed(),
            "reconciliation pass aborted"
        );
        GalleryError::ReconciliationPassFailure {
            committed: report.committed(),
            source: Box::new(e),
        }
    })?;

    tracing::info!(
        assigned_existing = report.assigned_existing,
        created_persons = report.created_persons,
        skipped = report.skipped,
        "reconciliation pass finished"
    );
    Ok(report)
}

fn check_dimension(face: &Face, dimension: usize) -> Result<(), StoreError> {
    face.descriptor.validate(dimension).map_err(|e| StoreError::Corrupt {
        id: face.id.to_string(),
        reason: format!("descriptor: {e}"),
    })
}

fn run_pass<S: Store + ?Sized>(
    store: &S,
    max_distance: f32,
    dimension: usize,
    cancel: &CancellationToken,
    report: &mut GroupReport,
) -> Result<(), GalleryError> {
    let mut pool: Vec<(Descriptor, PersonId)> = Vec::new();
    for face in store.faces(&FaceFilter::Assigned)? {
        check_dimension(&face, dimension)?;
        if let Some(p) = face.person_id {
            pool.push((face.descriptor, p));
        }
    }
    let work = store.faces(&FaceFilter::Unassigned)?;
    for face in &work {
        check_dimension(face, dimension)?;
    }

    tracing::debug!(pool = pool.len(), unassigned = work.len(), "reconciliation pass starting");

    for face in work {
        if cancel.is_cancelled() {
            return Err(GalleryError::Cancelled);
        }

        let hit = pool
            .iter()
            .find(|(d, _)| face.descriptor.distance(d) < max_distance)
            .map(|(_, p)| *p);

        let person_id = match hit {
            Some(person_id) => {
                if !store.assign_face(face.id, person_id)? {
                    report.skipped += 1;
                    continue;
                }
                report.assigned_existing += 1;
                person_id
            }
            None => {
                let person = Person::seeded(face.descriptor.clone());
                store.insert_person(&person)?;
                if !store.assign_face(face.id, person.id)? {
                    store.delete_person(person.id)?;
                    report.skipped += 1;
                    continue;
                }
                report.created_persons += 1;
                person.id
            }
        };

        aggregator::update_representative(store, person_id)?;
        tracing::debug!(face = %face.id, person = %person_id, new = hit.is_none(), "face grouped");
        pool.push((face.descriptor, person_id));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{FlakyStore, Op};
    use crate::types::{BoundingBox, MediaRef};

    fn face(values: &[f32]) -> Face {
        Face::new(MediaRef::new("m"), Descriptor::new(values.to_vec()), BoundingBox::default())
    }

    #[test]
    fn test_groups_near_face_and_creates_person_for_far_face() {
        let store = MemoryStore::new();
        let p1 = Person::seeded(Descriptor::new(vec![1.0, 0.0]));
        store.insert_person(&p1).unwrap();
        let f1 = face(&[1.0, 0.0]).assigned_to(p1.id);
        let f2 = face(&[1.0, 0.01]);
        let f3 = face(&[9.0, 9.0]);
        for f in [&f1, &f2, &f3] {
            store.insert_face(f).unwrap();
        }

        let report = group_faces(&store, 0.1, 2, &CancellationToken::new()).unwrap();
        assert_eq!(report.assigned_existing, 1);
        assert_eq!(report.created_persons, 1);

        assert_eq!(store.face(f2.id).unwrap().unwrap().person_id, Some(p1.id));
        let p3 = store.face(f3.id).unwrap().unwrap().person_id.unwrap();
        assert_ne!(p3, p1.id);
        let new_person = store.person(p3).unwrap().unwrap();
        assert_eq!(new_person.representative.values, vec![9.0, 9.0]);
    }

    #[test]
    fn test_representative_refreshed_after_assignment() {
        let store = MemoryStore::new();
        let p1 = Person::seeded(Descriptor::new(vec![1.0, 0.0]));
        store.insert_person(&p1).unwrap();
        store.insert_face(&face(&[1.0, 0.0]).assigned_to(p1.id)).unwrap();
        store.insert_face(&face(&[1.0, 0.02])).unwrap();

        group_faces(&store, 0.1, 2, &CancellationToken::new()).unwrap();
        let rep = store.person(p1.id).unwrap().unwrap().representative;
        assert!((rep.values[1] - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_later_faces_chain_off_newly_assigned() {
        let store = MemoryStore::new();
        // Each step is 0.08 apart; the first and third are 0.16 apart.
        let a = face(&[0.0, 0.0]);
        let b = face(&[0.08, 0.0]);
        let c = face(&[0.16, 0.0]);
        for f in [&a, &b, &c] {
            store.insert_face(f).unwrap();
        }

        let report = group_faces(&store, 0.1, 2, &CancellationToken::new()).unwrap();
        assert_eq!(report.created_persons, 1);
        assert_eq!(report.assigned_existing, 2);
        assert_eq!(store.persons().unwrap().len(), 1);
    }

    #[test]
    fn test_second_pass_is_noop() {
        let store = MemoryStore::new();
        store.insert_face(&face(&[0.0, 0.0])).unwrap();
        store.insert_face(&face(&[5.0, 5.0])).unwrap();
        group_faces(&store, 0.1, 2, &CancellationToken::new()).unwrap();

        let persons_before = store.persons().unwrap();
        let faces_before = store.faces(&FaceFilter::All).unwrap();
        let report = group_faces(&store, 0.1, 2, &CancellationToken::new()).unwrap();

        assert_eq!(report, GroupReport::default());
        assert_eq!(store.persons().unwrap(), persons_before);
        assert_eq!(store.faces(&FaceFilter::All).unwrap(), faces_before);
    }

    #[test]
    fn test_cancelled_pass_reports_committed() {
        let store = MemoryStore::new();
        store.insert_face(&face(&[0.0, 0.0])).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        match group_faces(&store, 0.1, 2, &cancel) {
            Err(GalleryError::ReconciliationPassFailure { committed, source }) => {
                assert_eq!(committed, 0);
                assert!(matches!(*source, GalleryError::Cancelled));
            }
            other => panic!("expected pass failure, got {other:?}"),
        }
        assert_eq!(store.count_faces(&FaceFilter::Unassigned).unwrap(), 1);
    }

    #[test]
    fn test_store_failure_keeps_earlier_assignments() {
        let store = FlakyStore::new().failing(Op::AssignFace, 1..usize::MAX);
        let first = face(&[0.0, 0.0]);
        let second = face(&[0.05, 0.0]);
        store.insert_face(&first).unwrap();
        store.insert_face(&second).unwrap();

        match group_faces(&store, 0.1, 2, &CancellationToken::new()) {
            Err(GalleryError::ReconciliationPassFailure { committed, source }) => {
                assert_eq!(committed, 1);
                assert!(matches!(*source, GalleryError::StoreUnavailable(_)));
            }
            other => panic!("expected pass failure, got {other:?}"),
        }
        assert!(store.face(first.id).unwrap().unwrap().person_id.is_some());
        assert!(store.face(second.id).unwrap().unwrap().person_id.is_none());
    }

    #[test]
    fn test_descriptor_of_other_dimension_aborts_pass() {
        let store = MemoryStore::new();
        let stale = face(&[1.0, 0.0, 0.0]);
        store.insert_face(&face(&[0.0, 1.0])).unwrap();
        store.insert_face(&stale).unwrap();

        match group_faces(&store, 0.1, 2, &CancellationToken::new()) {
            Err(GalleryError::ReconciliationPassFailure { committed, source }) => {
                assert_eq!(committed, 0);
                match *source {
                    GalleryError::StoreUnavailable(StoreError::Corrupt { id, .. }) => {
                        assert_eq!(id, stale.id.to_string());
                    }
                    other => panic!("expected corrupt record, got {other:?}"),
                }
            }
            other => panic!("expected pass failure, got {other:?}"),
        }
        assert!(store.persons().unwrap().is_empty());
    }
}
