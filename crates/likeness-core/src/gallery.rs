//! Gallery: the operations callers use, tied to one store and one config.

use std::collections::HashSet;
use std::sync::{Mutex, TryLockError};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::aggregator;
use crate::cluster::{self, GroupReport};
use crate::descriptor::Descriptor;
use crate::error::GalleryError;
use crate::matcher::{self, PersonMatch, TieBreak};
use crate::store::{FaceFilter, Store};
use crate::types::{Detection, Face, FaceId, MediaRef, Person, PersonId, PersonSummary};

/// Match threshold used when none is configured (suits 128-d descriptors).
pub const DEFAULT_MAX_DISTANCE: f32 = 0.6;
/// Descriptor length produced by the default detector.
pub const DEFAULT_DIMENSION: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GalleryConfig {
    /// Two descriptors closer than this (strictly) are the same person.
    pub max_distance: f32,
    /// Required descriptor length.
    pub dimension: usize,
    pub tie_break: TieBreak,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
            dimension: DEFAULT_DIMENSION,
            tie_break: TieBreak::First,
        }
    }
}

/// Where one detection ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceAssignment {
    pub face_id: FaceId,
    pub person_id: PersonId,
    /// True when no existing person matched and one was created.
    pub created_person: bool,
    /// Distance to the matched representative, if an existing person matched.
    pub distance: Option<f32>,
}

/// What a deletion removed or touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteReport {
    pub faces_deleted: usize,
    /// Persons removed because they lost their last face.
    pub persons_deleted: Vec<PersonId>,
    /// Persons that kept faces and had their representative recomputed.
    pub persons_updated: Vec<PersonId>,
}

/// Face/person gallery over a [`Store`].
///
/// Methods take `&self`; callers that share a gallery between threads must
/// serialize match-then-create operations themselves (the daemon does so
/// with a single engine thread). Only [`Gallery::group_faces`] guards
/// itself against concurrent invocation.
pub struct Gallery<S> {
    store: S,
    config: GalleryConfig,
    pass_lock: Mutex<()>,
}

impl<S: Store> Gallery<S> {
    pub fn new(store: S, config: GalleryConfig) -> Self {
        Self {
            store,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &GalleryConfig {
        &self.config
    }

    /// Find a person for an already normalized descriptor.
    pub fn match_person(&self, descriptor: &Descriptor) -> Result<Option<PersonMatch>, GalleryError> {
        descriptor.validate(self.config.dimension)?;
        Ok(matcher::match_person(
            &self.store,
            descriptor,
            self.config.max_distance,
            self.config.tie_break,
        )?)
    }

    pub fn update_representative(&self, person_id: PersonId) -> Result<Option<Descriptor>, GalleryError> {
        Ok(aggregator::update_representative(&self.store, person_id)?)
    }

    /// Record every face detected in one media item.
    ///
    /// Each detection gets its own result: a bad descriptor or a store
    /// failure on one face does not stop its siblings. Once `cancel` fires,
    /// the remaining detections are reported as [`GalleryError::Cancelled`].
    pub fn ingest(
        &self,
        media: &MediaRef,
        detections: &[Detection],
        cancel: &CancellationToken,
    ) -> Vec<Result<FaceAssignment, GalleryError>> {
        let results: Vec<_> = detections
            .iter()
            .enumerate()
            .map(|(i, det)| {
                if cancel.is_cancelled() {
                    return Err(GalleryError::Cancelled);
                }
                let result = self.ingest_one(media, det);
                if let Err(e) = &result {
                    tracing::warn!(media = %media, index = i, error = %e, "face skipped");
                }
                result
            })
            .collect();

        tracing::info!(
            media = %media,
            detections = detections.len(),
            assigned = results.iter().filter(|r| r.is_ok()).count(),
            "media ingested"
        );
        results
    }

    /// Normalize, match or create a person, store the face, refresh the mean.
    pub fn ingest_one(&self, media: &MediaRef, detection: &Detection) -> Result<FaceAssignment, GalleryError> {
        let descriptor = detection.descriptor.normalize(self.config.dimension)?;

        let (person_id, created_person, distance) = match self.match_person(&descriptor)? {
            Some(m) => (m.person.id, false, Some(m.distance)),
            None => {
                let person = Person::seeded(descriptor.clone());
                self.store.insert_person(&person)?;
                (person.id, true, None)
            }
        };

        let face = Face::new(media.clone(), descriptor, detection.bbox)
            .with_thumbnail(detection.thumbnail.clone())
            .assigned_to(person_id);

        if let Err(e) = self.store.insert_face(&face) {
            if created_person {
                // Do not leave a person without faces behind.
                if let Err(cleanup) = self.store.delete_person(person_id) {
                    tracing::warn!(
                        person = %person_id,
                        error = %cleanup,
                        "could not remove person left without faces"
                    );
                }
            }
            return Err(e.into());
        }

        // The face is committed from here on; a stale mean is repaired by
        // the next update of this person.
        if let Err(e) = aggregator::update_representative(&self.store, person_id) {
            tracing::warn!(person = %person_id, face = %face.id, error = %e, "representative not updated");
        }

        tracing::debug!(
            face = %face.id,
            person = %person_id,
            created_person,
            distance = ?distance,
            "face assigned"
        );

        Ok(FaceAssignment {
            face_id: face.id,
            person_id,
            created_person,
            distance,
        })
    }

    /// Run a reconciliation pass. Fails with [`GalleryError::PassInProgress`]
    /// if another pass is running on this gallery.
    pub fn group_faces(&self, cancel: &CancellationToken) -> Result<GroupReport, GalleryError> {
        let _guard = match self.pass_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(GalleryError::PassInProgress),
            // A panicked pass left no in-memory state behind worth protecting.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        cluster::group_faces(&self.store, self.config.max_distance, self.config.dimension, cancel)
    }

    /// Delete every face of a media item and cascade to its persons.
    pub fn delete_media(&self, media: &MediaRef) -> Result<DeleteReport, GalleryError> {
        let faces = self.store.faces(&FaceFilter::Media(media.clone()))?;
        let mut report = DeleteReport::default();
        let mut affected = Vec::new();

        for face in &faces {
            if self.store.delete_face(face.id)? {
                report.faces_deleted += 1;
            }
            if let Some(p) = face.person_id {
                if !affected.contains(&p) {
                    affected.push(p);
                }
            }
        }

        self.settle_persons(&affected, &mut report)?;
        tracing::info!(
            media = %media,
            faces = report.faces_deleted,
            persons_deleted = report.persons_deleted.len(),
            "media deleted"
        );
        Ok(report)
    }

    /// Delete a single face and cascade to its person.
    pub fn delete_face(&self, face_id: FaceId) -> Result<DeleteReport, GalleryError> {
        let face = self
            .store
            .face(face_id)?
            .ok_or(GalleryError::FaceNotFound(face_id))?;
        let mut report = DeleteReport::default();
        if self.store.delete_face(face_id)? {
            report.faces_deleted = 1;
        }
        if let Some(p) = face.person_id {
            self.settle_persons(&[p], &mut report)?;
        }
        Ok(report)
    }

    /// Delete persons left without faces; recompute the rest.
    fn settle_persons(&self, persons: &[PersonId], report: &mut DeleteReport) -> Result<(), GalleryError> {
        for &person_id in persons {
            if self.store.count_faces(&FaceFilter::Person(person_id))? == 0 {
                if self.store.delete_person(person_id)? {
                    tracing::info!(person = %person_id, "deleted person with no remaining faces");
                    report.persons_deleted.push(person_id);
                }
            } else if aggregator::update_representative(&self.store, person_id)?.is_some() {
                report.persons_updated.push(person_id);
            }
        }
        Ok(())
    }

    /// Gallery listing, one entry per person in creation order.
    pub fn people(&self) -> Result<Vec<PersonSummary>, GalleryError> {
        let persons = self.store.persons()?;
        let mut out = Vec::with_capacity(persons.len());

        for person in persons {
            let faces = self.store.faces(&FaceFilter::Person(person.id))?;
            let mut seen = HashSet::new();
            let media = faces
                .iter()
                .filter(|f| seen.insert(f.media.clone()))
                .map(|f| f.media.clone())
                .collect();
            out.push(PersonSummary {
                person_id: person.id,
                name: person.name,
                face_count: faces.len(),
                sample_thumbnail: faces.first().and_then(|f| f.thumbnail.clone()),
                media,
            });
        }
        Ok(out)
    }

    /// Set or clear a person's display name.
    pub fn rename_person(&self, person_id: PersonId, name: Option<&str>) -> Result<(), GalleryError> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        if !self.store.set_person_name(person_id, name)? {
            return Err(GalleryError::PersonNotFound(person_id));
        }
        tracing::info!(person = %person_id, name = ?name, "person renamed");
        Ok(())
    }

    /// Move every face of `absorb` to `keep` and delete `absorb`.
    ///
    /// Returns the number of faces moved.
    pub fn merge_persons(
        &self,
        keep: PersonId,
        absorb: PersonId,
        cancel: &CancellationToken,
    ) -> Result<usize, GalleryError> {
        for id in [keep, absorb] {
            if self.store.person(id)?.is_none() {
                return Err(GalleryError::PersonNotFound(id));
            }
        }
        if keep == absorb {
            return Ok(0);
        }

        let mut moved = 0;
        for face in self.store.faces(&FaceFilter::Person(absorb))? {
            if cancel.is_cancelled() {
                // Partial merge: both persons still own faces, both stay valid.
                aggregator::update_representative(&self.store, keep)?;
                aggregator::update_representative(&self.store, absorb)?;
                return Err(GalleryError::Cancelled);
            }
            if self.store.assign_face(face.id, keep)? {
                moved += 1;
            }
        }

        self.store.delete_person(absorb)?;
        aggregator::update_representative(&self.store, keep)?;
        tracing::info!(keep = %keep, absorb = %absorb, moved, "persons merged");
        Ok(moved)
    }
}
