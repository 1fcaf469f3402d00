
use serde::{Deserialize, Serialize};

use crate::{RagError, Result};

/// Exact inner-product index over fixed-dimension vectors.
///
/// Vectors are addressed by insertion position. The dimension is fixed by
/// the first vector added; there is no in-place deletion, so callers
/// rebuild a fresh index to drop entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: Option<usize>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Check that every vector in `vectors` could be appended.
    #[inline]
    pub fn check(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let expected = self
            .dimension
            .or_else(|| vectors.first().map(|vector| vector.len()));

        let Some(expected) = expected else {
            return Ok(());
        };
        if expected == 0 {
            return Err(RagError::Database(
                "Cannot index zero-dimension vectors".to_string(),
            ));
        }

        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != expected {
                return Err(RagError::Database(format!(
                    "Vector {} has dimension {}, index expects {}",
                    position,
                    vector.len(),
                    expected
                )));
            }
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(RagError::Database(format!(
                    "Vector {} contains non-finite values",
                    position
                )));
            }
        }

        Ok(())
    }

    /// Append vectors. Either all of them are added or none are.
    #[inline]
    pub fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<()> {
        self.check(&vectors)?;

        if let Some(first) = vectors.first() {
            self.dimension.get_or_insert(first.len());
        }
        self.vectors.extend(vectors);
        Ok(())
    }

    /// Return up to `k` `(position, score)` pairs, best first.
    ///
    /// Scores are inner products; ties keep insertion order. A query whose
    /// dimension does not match the index finds nothing.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.dimension != Some(query.len()) {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, dot(vector, query)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    /// The stored vector at `position`
    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.vectors.get(position).map(Vec::as_slice)
    }

    /// Consistency check for an index read back from disk
    #[inline]
    pub fn validate(&self) -> Result<()> {
        match self.dimension {
            None if !self.vectors.is_empty() => Err(RagError::Database(
                "Index has vectors but no dimension".to_string(),
            )),
            None => Ok(()),
            Some(dimension) => {
                if let Some(position) = self
                    .vectors
                    .iter()
                    .position(|vector| vector.len() != dimension)
                {
                    Err(RagError::Database(format!(
                        "Stored vector {} does not have dimension {}",
                        position, dimension
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
