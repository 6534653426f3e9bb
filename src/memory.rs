//! Proxy memory bank.
//!
//! The losses only *read* proxy centroids. `ProxyMemory` is the read interface; any
//! store that can hand out a row-major slice per absolute proxy label can back it.
//! `MemoryBank` is the dense in-process implementation.

use crate::{Error, Result};

/// Read access to proxy centroid vectors, addressed by absolute proxy label.
pub trait ProxyMemory {
    /// Dimensionality of every stored proxy.
    fn dim(&self) -> usize;

    /// Number of proxies.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Centroid for `label`.
    fn get(&self, label: usize) -> Result<&[f32]>;

    /// Centroids for `labels`, in the given order, as a row-major `(labels.len(), dim)` buffer.
    fn get_many(&self, labels: &[usize]) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(labels.len() * self.dim());
        for &label in labels {
            out.extend_from_slice(self.get(label)?);
        }
        Ok(out)
    }
}

/// Dense memory bank with row-major storage of shape `(len, dim)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBank {
    storage: Vec<f32>,
    len: usize,
    dim: usize,
}

impl MemoryBank {
    /// Build a bank from a flat row-major buffer.
    pub fn from_flat(storage: Vec<f32>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidData("proxy dim must be > 0".to_owned()));
        }
        if !storage.len().is_multiple_of(dim) {
            return Err(Error::InvalidData(format!(
                "storage length {} is not divisible by dim {}",
                storage.len(),
                dim
            )));
        }
        let len = storage.len() / dim;
        Ok(Self { storage, len, dim })
    }

    /// Build a bank from per-proxy rows (row `i` is proxy label `i`).
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        if dim == 0 {
            return Err(Error::InvalidData(
                "memory bank needs at least one non-empty proxy".to_owned(),
            ));
        }
        let mut storage = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::dim_mismatch(dim, row.len(), format!("proxy {i}")));
            }
            storage.extend_from_slice(row);
        }
        Ok(Self {
            storage,
            len: rows.len(),
            dim,
        })
    }

    /// All proxies as a flat row-major buffer.
    #[inline]
    pub fn storage(&self) -> &[f32] {
        &self.storage
    }

    /// Mutable view of one proxy, for callers that refresh centroids between steps.
    pub fn proxy_mut(&mut self, label: usize) -> Result<&mut [f32]> {
        if label >= self.len {
            return Err(Error::UnknownProxy {
                label,
                len: self.len,
            });
        }
        let start = label * self.dim;
        Ok(&mut self.storage[start..start + self.dim])
    }
}

impl ProxyMemory for MemoryBank {
    #[inline]
    fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn get(&self, label: usize) -> Result<&[f32]> {
        if label >= self.len {
            return Err(Error::UnknownProxy {
                label,
                len: self.len,
            });
        }
        let start = label * self.dim;
        Ok(&self.storage[start..start + self.dim])
    }
}

/// Fail with `DimensionMismatch` unless `memory` stores vectors of length `dim`.
pub(crate) fn check_dim<M: ProxyMemory + ?Sized>(memory: &M, dim: usize) -> Result<()> {
    if memory.dim() != dim {
        return Err(Error::dim_mismatch(
            dim,
            memory.dim(),
            "memory bank proxy dim vs feature dim",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_many_preserves_order() {
        let bank = MemoryBank::from_rows(&[vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]]).unwrap();
        let rows = bank.get_many(&[2, 0, 2]).unwrap();
        assert_eq!(rows, vec![2.0, 2.0, 0.0, 0.0, 2.0, 2.0]);
    }

    #[test]
    fn unknown_label_is_an_error() {
        let bank = MemoryBank::from_flat(vec![0.0; 6], 3).unwrap();
        assert_eq!(
            bank.get(2).unwrap_err(),
            Error::UnknownProxy { label: 2, len: 2 }
        );
    }

    #[test]
    fn dim_check_reports_both_sides() {
        let bank = MemoryBank::from_flat(vec![0.0; 6], 3).unwrap();
        assert!(check_dim(&bank, 3).is_ok());
        assert!(matches!(
            check_dim(&bank, 4),
            Err(Error::DimensionMismatch {
                expected: 4,
                found: 3,
                ..
            })
        ));
    }
}
