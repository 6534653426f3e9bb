//! Absolute proxy label <-> dense local index.
//!
//! A per-group classifier needs targets in `0..n`. `ProxyIndexMap` takes the sorted,
//! deduplicated set of absolute labels present in a group and maps each to its
//! position in that set.

use std::collections::BTreeSet;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyIndexMap {
    labels: Vec<usize>,
}

impl ProxyIndexMap {
    /// Build from any label sequence; duplicates collapse and order becomes ascending.
    pub fn from_labels<I: IntoIterator<Item = usize>>(labels: I) -> Self {
        let set: BTreeSet<usize> = labels.into_iter().collect();
        Self {
            labels: set.into_iter().collect(),
        }
    }

    /// Sorted absolute labels; position `i` holds the label with local index `i`.
    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Local index of `label`, if it is in the set.
    #[inline]
    pub fn local_index(&self, label: usize) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    /// Absolute label at local index `idx`.
    #[inline]
    pub fn absolute(&self, idx: usize) -> Option<usize> {
        self.labels.get(idx).copied()
    }

    /// Map every label to its local index, failing on labels outside the set.
    pub fn targets(&self, labels: &[usize]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|&l| {
                self.local_index(l).ok_or_else(|| {
                    Error::InvalidData(format!("proxy label {l} is not in the local proxy set"))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_a_bijection_over_the_group() {
        let labels = [9_usize, 3, 9, 7, 3];
        let map = ProxyIndexMap::from_labels(labels);
        assert_eq!(map.labels(), &[3, 7, 9]);

        for &l in &labels {
            let idx = map.local_index(l).unwrap();
            assert_eq!(map.absolute(idx), Some(l));
        }
        assert_eq!(map.targets(&labels).unwrap(), vec![2, 0, 2, 1, 0]);
    }

    #[test]
    fn unknown_label_has_no_local_index() {
        let map = ProxyIndexMap::from_labels([1_usize, 2]);
        assert_eq!(map.local_index(5), None);
        assert!(map.targets(&[1, 5]).is_err());
    }
}
