//! Face descriptor math: normalization, Euclidean distance and averaging.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("descriptor has zero norm")]
    ZeroNorm,
    #[error("descriptor contains a non-finite component at index {0}")]
    NonFinite(usize),
}

/// Face embedding vector (128-dimensional for the default detector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Check length against the detector dimensionality and reject NaN/Inf.
    pub fn validate(&self, dimension: usize) -> Result<(), DescriptorError> {
        if self.values.len() != dimension {
            return Err(DescriptorError::DimensionMismatch {
                expected: dimension,
                got: self.values.len(),
            });
        }
        if let Some(i) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite(i));
        }
        Ok(())
    }

    /// Scale to unit length.
    pub fn normalize(&self, dimension: usize) -> Result<Descriptor, DescriptorError> {
        self.validate(dimension)?;

        let norm = self.norm();
        if norm == 0.0 || !norm.is_finite() {
            return Err(DescriptorError::ZeroNorm);
        }

        Ok(Descriptor {
            values: self.values.iter().map(|x| x / norm).collect(),
        })
    }

    /// Euclidean distance to `other`.
    ///
    /// # Panics
    ///
    /// Panics if the two descriptors differ in length. Dimensionality is
    /// fixed by the detector, so a mismatch is a caller bug.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        distance(&self.values, &other.values)
    }

    /// Like [`Descriptor::distance`], but reports a length mismatch
    /// instead of panicking. `self` is the expected length.
    pub fn checked_distance(&self, other: &Descriptor) -> Result<f32, DescriptorError> {
        if self.len() != other.len() {
            return Err(DescriptorError::DimensionMismatch {
                expected: self.len(),
                got: other.len(),
            });
        }
        Ok(distance(&self.values, &other.values))
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Euclidean distance between two equal-length vectors.
///
/// # Panics
///
/// Panics if `a.len() != b.len()`.
pub fn distance(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "descriptor length mismatch: {} vs {}",
        a.len(),
        b.len()
    );
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Element-wise arithmetic mean. Returns `None` for an empty input.
///
/// # Panics
///
/// Panics if the descriptors differ in length.
pub fn mean<'a, I>(descriptors: I) -> Option<Descriptor>
where
    I: IntoIterator<Item = &'a Descriptor>,
{
    let mut iter = descriptors.into_iter();
    let first = iter.next()?;
    let mut sum: Vec<f64> = first.values.iter().map(|&v| v as f64).collect();
    let mut count = 1usize;

    for d in iter {
        assert_eq!(d.len(), sum.len(), "descriptor length mismatch in mean");
        for (acc, &v) in sum.iter_mut().zip(d.values.iter()) {
            *acc += v as f64;
        }
        count += 1;
    }

    let n = count as f64;
    Some(Descriptor {
        values: sum.into_iter().map(|s| (s / n) as f32).collect(),
    })
}
