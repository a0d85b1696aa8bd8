//! Document-store interface over the Face and Person collections.

use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::descriptor::Descriptor;
use crate::types::{Face, FaceId, MediaRef, Person, PersonId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Selects a subset of the Face collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceFilter {
    All,
    /// Faces with a person.
    Assigned,
    /// Faces without a person.
    Unassigned,
    Person(PersonId),
    Media(MediaRef),
}

impl FaceFilter {
    pub fn matches(&self, face: &Face) -> bool {
        match self {
            FaceFilter::All => true,
            FaceFilter::Assigned => face.person_id.is_some(),
            FaceFilter::Unassigned => face.person_id.is_none(),
            FaceFilter::Person(id) => face.person_id.as_ref() == Some(id),
            FaceFilter::Media(media) => &face.media == media,
        }
    }
}

/// Persists faces and persons.
///
/// Enumeration (`persons`, `faces`) must be in creation order; person
/// matching depends on it. Update and delete operations return `false`
/// when the target record does not exist.
pub trait Store: Send {
    fn persons(&self) -> Result<Vec<Person>, StoreError>;
    fn person(&self, id: PersonId) -> Result<Option<Person>, StoreError>;
    fn insert_person(&self, person: &Person) -> Result<(), StoreError>;
    fn update_representative(
        &self,
        id: PersonId,
        representative: &Descriptor,
    ) -> Result<bool, StoreError>;
    fn set_person_name(&self, id: PersonId, name: Option<&str>) -> Result<bool, StoreError>;
    fn delete_person(&self, id: PersonId) -> Result<bool, StoreError>;

    fn faces(&self, filter: &FaceFilter) -> Result<Vec<Face>, StoreError>;
    fn face(&self, id: FaceId) -> Result<Option<Face>, StoreError>;
    fn insert_face(&self, face: &Face) -> Result<(), StoreError>;
    fn assign_face(&self, face_id: FaceId, person_id: PersonId) -> Result<bool, StoreError>;
    fn delete_face(&self, id: FaceId) -> Result<bool, StoreError>;
    fn count_faces(&self, filter: &FaceFilter) -> Result<usize, StoreError>;
}

/// In-memory [`Store`]. Data is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    persons: Vec<Person>,
    faces: Vec<Face>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for MemoryStore {
    fn persons(&self) -> Result<Vec<Person>, StoreError> {
        Ok(self.lock()?.persons.clone())
    }

    fn person(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        Ok(self.lock()?.persons.iter().find(|p| p.id == id).cloned())
    }

    fn insert_person(&self, person: &Person) -> Result<(), StoreError> {
        self.lock()?.persons.push(person.clone());
        Ok(())
    }

    fn update_representative(
        &self,
        id: PersonId,
        representative: &Descriptor,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.persons.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.representative = representative.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_person_name(&self, id: PersonId, name: Option<&str>) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.persons.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.name = name.map(str::to_owned);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_person(&self, id: PersonId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.persons.len();
        inner.persons.retain(|p| p.id != id);
        Ok(inner.persons.len() != before)
    }

    fn faces(&self, filter: &FaceFilter) -> Result<Vec<Face>, StoreError> {
        Ok(self
            .lock()?
            .faces
            .iter()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect())
    }

    fn face(&self, id: FaceId) -> Result<Option<Face>, StoreError> {
        Ok(self.lock()?.faces.iter().find(|f| f.id == id).cloned())
    }

    fn insert_face(&self, face: &Face) -> Result<(), StoreError> {
        self.lock()?.faces.push(face.clone());
        Ok(())
    }

    fn assign_face(&self, face_id: FaceId, person_id: PersonId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.faces.iter_mut().find(|f| f.id == face_id) {
            Some(f) => {
                f.person_id = Some(person_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_face(&self, id: FaceId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.faces.len();
        inner.faces.retain(|f| f.id != id);
        Ok(inner.faces.len() != before)
    }

    fn count_faces(&self, filter: &FaceFilter) -> Result<usize, StoreError> {
        Ok(self.lock()?.faces.iter().filter(|f| filter.matches(f)).count())
    }
}
