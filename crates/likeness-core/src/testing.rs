//! Store wrapper that fails chosen calls, for error-path tests.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;

use crate::descriptor::Descriptor;
use crate::store::{FaceFilter, MemoryStore, Store, StoreError};
use crate::types::{Face, FaceId, Person, PersonId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    InsertFace,
    AssignFace,
    UpdateRepresentative,
    DeletePerson,
}

/// [`MemoryStore`] whose `Op` calls fail when their zero-based call index
/// falls in a configured range.
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    faults: Vec<(Op, Range<usize>)>,
    calls: Mutex<HashMap<Op, usize>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            faults: Vec::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing(mut self, op: Op, calls: Range<usize>) -> Self {
        self.faults.push((op, calls));
        self
    }

    fn check(&self, op: Op) -> Result<(), StoreError> {
        let mut calls = self.calls.lock().map_err(|_| StoreError::Poisoned)?;
        let n = calls.entry(op).or_insert(0);
        let index = *n;
        *n += 1;
        if self.faults.iter().any(|(o, r)| *o == op && r.contains(&index)) {
            return Err(StoreError::backend(std::io::Error::other(format!(
                "{op:?} call {index} failed"
            ))));
        }
        Ok(())
    }
}

impl Store for FlakyStore {
    fn persons(&self) -> Result<Vec<Person>, StoreError> {
        self.inner.persons()
    }
    fn person(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        self.inner.person(id)
    }
    fn insert_person(&self, person: &Person) -> Result<(), StoreError> {
        self.inner.insert_person(person)
    }
    fn update_representative(&self, id: PersonId, r: &Descriptor) -> Result<bool, StoreError> {
        self.check(Op::UpdateRepresentative)?;
        self.inner.update_representative(id, r)
    }
    fn set_person_name(&self, id: PersonId, name: Option<&str>) -> Result<bool, StoreError> {
        self.inner.set_person_name(id, name)
    }
    fn delete_person(&self, id: PersonId) -> Result<bool, StoreError> {
        self.check(Op::DeletePerson)?;
        self.inner.delete_person(id)
    }
    fn faces(&self, filter: &FaceFilter) -> Result<Vec<Face>, StoreError> {
        self.inner.faces(filter)
    }
    fn face(&self, id: FaceId) -> Result<Option<Face>, StoreError> {
        self.inner.face(id)
    }
    fn insert_face(&self, face: &Face) -> Result<(), StoreError> {
        self.check(Op::InsertFace)?;
        self.inner.insert_face(face)
    }
    fn assign_face(&self, face_id: FaceId, person_id: PersonId) -> Result<bool, StoreError> {
        self.check(Op::AssignFace)?;
        self.inner.assign_face(face_id, person_id)
    }
    fn delete_face(&self, id: FaceId) -> Result<bool, StoreError> {
        self.inner.delete_face(id)
    }
    fn count_faces(&self, filter: &FaceFilter) -> Result<usize, StoreError> {
        self.inner.count_faces(filter)
    }
}
