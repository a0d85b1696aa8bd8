//! Person matching: find an existing person for a normalized descriptor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::store::{Store, StoreError};
use crate::types::Person;

/// Which qualifying person wins when several are within threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// First person in enumeration order strictly below the threshold,
    /// even if a later one is closer.
    #[default]
    First,
    /// Closest person strictly below the threshold. Exact ties go to the
    /// earlier person.
    Nearest,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(TieBreak::First),
            "nearest" => Ok(TieBreak::Nearest),
            other => Err(format!("unknown tie-break policy {other:?} (expected first|nearest)")),
        }
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TieBreak::First => "first",
            TieBreak::Nearest => "nearest",
        })
    }
}

/// A person that qualified for a query descriptor.
#[derive(Debug, Clone)]
pub struct PersonMatch {
    pub person: Person,
    pub distance: f32,
}

/// Search structure over person representatives.
///
/// A representative whose length differs from the query's is reported as
/// [`StoreError::Corrupt`]: it was stored under another dimensionality.
pub trait PersonIndex {
    fn search(&self, query: &Descriptor, max_distance: f32) -> Result<Option<PersonMatch>, StoreError>;
}

/// Linear scan over every representative in enumeration order.
pub struct LinearIndex {
    persons: Vec<Person>,
    tie_break: TieBreak,
}

impl LinearIndex {
    pub fn new(persons: Vec<Person>, tie_break: TieBreak) -> Self {
        Self { persons, tie_break }
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }
}

impl PersonIndex for LinearIndex {
    fn search(&self, query: &Descriptor, max_distance: f32) -> Result<Option<PersonMatch>, StoreError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, person) in self.persons.iter().enumerate() {
            let dist = query
                .checked_distance(&person.representative)
                .map_err(|e| StoreError::Corrupt {
                    id: person.id.to_string(),
                    reason: format!("representative: {e}"),
                })?;
            if dist >= max_distance {
                continue;
            }
            match self.tie_break {
                TieBreak::First => {
                    best = Some((i, dist));
                    break;
                }
                TieBreak::Nearest => {
                    if best.map_or(true, |(_, d)| dist < d) {
                        best = Some((i, dist));
                    }
                }
            }
        }

        Ok(best.map(|(i, distance)| PersonMatch {
            person: self.persons[i].clone(),
            distance,
        }))
    }
}

/// Match `query` against every person currently in the store.
///
/// The query must already be normalized, like the faces that produced
/// the representatives.
pub fn match_person<S: Store + ?Sized>(
    store: &S,
    query: &Descriptor,
    max_distance: f32,
    tie_break: TieBreak,
) -> Result<Option<PersonMatch>, StoreError> {
    let index = LinearIndex::new(store.persons()?, tie_break);
    let found = index.search(query, max_distance)?;

    tracing::debug!(
        persons = index.len(),
        matched = ?found.as_ref().map(|m| m.person.id),
        distance = ?found.as_ref().map(|m| m.distance),
        "match_person"
    );

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn person(values: &[f32]) -> Person {
        Person::seeded(Descriptor::new(values.to_vec()))
    }

    #[test]
    fn test_empty_store_has_no_match() {
        let store = MemoryStore::new();
        let q = Descriptor::new(vec![1.0, 0.0]);
        assert!(match_person(&store, &q, 0.6, TieBreak::First).unwrap().is_none());
    }

    #[test]
    fn test_first_policy_returns_first_in_order_not_closest() {
        // Both within threshold; the second is an exact match.
        let far = person(&[0.0, 0.5]);
        let exact = person(&[0.0, 0.0]);
        let index = LinearIndex::new(vec![far.clone(), exact], TieBreak::First);

        let m = index.search(&Descriptor::new(vec![0.0, 0.0]), 0.6).unwrap().unwrap();
        assert_eq!(m.person.id, far.id);
        assert!((m.distance - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_policy_returns_closest() {
        let far = person(&[0.0, 0.5]);
        let exact = person(&[0.0, 0.0]);
        let index = LinearIndex::new(vec![far, exact.clone()], TieBreak::Nearest);

        let m = index.search(&Descriptor::new(vec![0.0, 0.0]), 0.6).unwrap().unwrap();
        assert_eq!(m.person.id, exact.id);
        assert_eq!(m.distance, 0.0);
    }

    #[test]
    fn test_nearest_policy_exact_tie_keeps_earlier() {
        let a = person(&[0.3, 0.0]);
        let b = person(&[-0.3, 0.0]);
        let index = LinearIndex::new(vec![a.clone(), b], TieBreak::Nearest);

        let m = index.search(&Descriptor::new(vec![0.0, 0.0]), 0.6).unwrap().unwrap();
        assert_eq!(m.person.id, a.id);
    }

    #[test]
    fn test_threshold_is_strict() {
        let p = person(&[0.0, 0.5]);
        let index = LinearIndex::new(vec![p], TieBreak::First);
        assert!(index.search(&Descriptor::new(vec![0.0, 0.0]), 0.5).unwrap().is_none());
    }

    #[test]
    fn test_skips_persons_above_threshold() {
        let out = person(&[5.0, 5.0]);
        let inside = person(&[0.1, 0.0]);
        let store = MemoryStore::new();
        store.insert_person(&out).unwrap();
        store.insert_person(&inside).unwrap();

        let m = match_person(&store, &Descriptor::new(vec![0.0, 0.0]), 0.6, TieBreak::First)
            .unwrap()
            .unwrap();
        assert_eq!(m.person.id, inside.id);
    }

    #[test]
    fn test_representative_of_other_dimension_is_corrupt() {
        let stale = person(&[1.0, 0.0]);
        let store = MemoryStore::new();
        store.insert_person(&stale).unwrap();

        let err = match_person(&store, &Descriptor::new(vec![1.0, 0.0, 0.0]), 0.6, TieBreak::First)
            .unwrap_err();
        match err {
            StoreError::Corrupt { id, reason } => {
                assert_eq!(id, stale.id.to_string());
                assert!(reason.contains("expected 3, got 2"), "{reason}");
            }
            other => panic!("expected corrupt record, got {other:?}"),
        }
    }

    #[test]
    fn test_tie_break_parses() {
        assert_eq!("first".parse::<TieBreak>().unwrap(), TieBreak::First);
        assert_eq!("Nearest".parse::<TieBreak>().unwrap(), TieBreak::Nearest);
        assert!("closest".parse::<TieBreak>().is_err());
    }
}
