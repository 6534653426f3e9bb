//! Batch and registry containers.
//!
//! `Features` stores a mini-batch of embeddings contiguously (row-major). `LabelRegistry`
//! holds the per-sample labels of the *whole* training set, which is what the
//! inter-camera retrieval searches over.

use crate::{Error, Result};

/// A batch of embedding vectors.
///
/// Stored as a contiguous buffer with row-major layout:
/// - `features.len() == len * dim`
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    features: Vec<f32>,
    len: usize,
    dim: usize,
}

impl Features {
    /// Build a batch from a flat buffer with shape `(len, dim)`.
    pub fn from_flat(features: Vec<f32>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidData("feature dim must be > 0".to_owned()));
        }
        if !features.len().is_multiple_of(dim) {
            return Err(Error::InvalidData(format!(
                "features length {} is not divisible by dim {}",
                features.len(),
                dim
            )));
        }

        let len = features.len() / dim;

        Ok(Self { features, len, dim })
    }

    /// Build a batch from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::EmptyBatch("feature rows must not be empty".to_owned()));
        }

        let dim = rows[0].len();
        if dim == 0 {
            return Err(Error::InvalidData("feature dim must be > 0".to_owned()));
        }

        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::dim_mismatch(dim, row.len(), format!("feature row {i}")));
            }
        }

        let len = rows.len();
        let mut flat = Vec::with_capacity(len * dim);
        for row in rows {
            flat.extend_from_slice(row);
        }

        Ok(Self {
            features: flat,
            len,
            dim,
        })
    }

    #[inline]
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    /// Returns the embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    /// Returns the flat row-major buffer.
    pub fn as_flat(&self) -> &[f32] {
        &self.features
    }

    #[inline]
    /// Mutable access to the flat buffer (shape is fixed).
    pub fn as_flat_mut(&mut self) -> &mut [f32] {
        &mut self.features
    }

    #[inline]
    /// Returns the `idx`-th embedding (shape: `(dim,)`).
    ///
    /// Panics if `idx >= len`.
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.dim;
        &self.features[start..start + self.dim]
    }

    /// Copy the rows at `indices` (in order) into a new flat buffer.
    pub(crate) fn gather_rows(&self, indices: &[usize]) -> Vec<f32> {
        let mut out = Vec::with_capacity(indices.len() * self.dim);
        for &i in indices {
            out.extend_from_slice(self.row(i));
        }
        out
    }
}

/// Labels for every sample in the training set.
///
/// Three parallel arrays indexed by absolute sample position. This is the ground
/// truth for cross-sample retrieval and is distinct from the current mini-batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRegistry {
    cluster: Vec<i64>,
    camid: Vec<i64>,
    abs_proxy: Vec<usize>,
}

impl LabelRegistry {
    /// Build a registry from parallel arrays; all three must have equal length.
    pub fn new(cluster: Vec<i64>, camid: Vec<i64>, abs_proxy: Vec<usize>) -> Result<Self> {
        if cluster.len() != camid.len() || cluster.len() != abs_proxy.len() {
            return Err(Error::InvalidData(format!(
                "registry arrays must have equal length: cluster={} camid={} abs_proxy={}",
                cluster.len(),
                camid.len(),
                abs_proxy.len()
            )));
        }
        Ok(Self {
            cluster,
            camid,
            abs_proxy,
        })
    }

    /// Build a registry from `(cluster, camid, abs_proxy)` records.
    pub fn from_records(records: &[(i64, i64, usize)]) -> Self {
        let mut cluster = Vec::with_capacity(records.len());
        let mut camid = Vec::with_capacity(records.len());
        let mut abs_proxy = Vec::with_capacity(records.len());
        for &(c, cam, p) in records {
            cluster.push(c);
            camid.push(cam);
            abs_proxy.push(p);
        }
        Self {
            cluster,
            camid,
            abs_proxy,
        }
    }

    #[inline]
    /// Total number of samples in the training set.
    pub fn len(&self) -> usize {
        self.cluster.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cluster.is_empty()
    }

    #[inline]
    pub fn cluster(&self) -> &[i64] {
        &self.cluster
    }

    #[inline]
    pub fn camid(&self) -> &[i64] {
        &self.camid
    }

    #[inline]
    pub fn abs_proxy(&self) -> &[usize] {
        &self.abs_proxy
    }

    /// Largest absolute proxy label referenced, if any.
    pub fn max_proxy(&self) -> Option<usize> {
        self.abs_proxy.iter().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_from_flat_validates_shapes() {
        let ok = Features::from_flat(vec![0.0, 1.0, 2.0, 3.0], 2);
        assert!(ok.is_ok());
        assert_eq!(ok.unwrap().len(), 2);

        let err = Features::from_flat(vec![0.0, 1.0, 2.0], 2);
        assert!(err.is_err());
    }

    #[test]
    fn features_from_rows_rejects_ragged_rows() {
        let err = Features::from_rows(&[vec![0.0, 1.0], vec![2.0]]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn registry_requires_parallel_arrays() {
        assert!(LabelRegistry::new(vec![0, 1], vec![0, 0], vec![3, 4]).is_ok());
        assert!(LabelRegistry::new(vec![0, 1], vec![0], vec![3, 4]).is_err());
    }
}
