//! Positive and hard-negative proxy retrieval against the label registry.
//!
//! Positives for a query are the proxies of registry samples in the *same* cluster
//! but a *different* camera. Negatives are the proxies of samples in any other
//! cluster; the `k` closest of those (euclidean) are the hard negatives.
//!
//! Candidate label sets are always sorted and deduplicated before proxies are
//! fetched, so retrieval output is deterministic.

use rand::Rng;
use rand::seq::index;
use tracing::{debug, trace};

use crate::knn::KNearest;
use crate::mapping::ProxyIndexMap;
use crate::memory::check_dim;
use crate::{Error, Features, LabelRegistry, NegativeSampling, ProxyMemory, Result};

/// Proxy vectors paired with their absolute labels, aligned by position.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySet {
    labels: Vec<usize>,
    /// Row-major `(labels.len(), dim)`.
    vectors: Vec<f32>,
    dim: usize,
}

impl ProxySet {
    fn empty(dim: usize) -> Self {
        Self {
            labels: Vec::new(),
            vectors: Vec::new(),
            dim,
        }
    }

    fn fetch<M: ProxyMemory + ?Sized>(labels: Vec<usize>, memory: &M) -> Result<Self> {
        let vectors = memory.get_many(&labels)?;
        Ok(Self {
            labels,
            vectors,
            dim: memory.dim(),
        })
    }

    fn extend(&mut self, other: ProxySet) {
        debug_assert_eq!(self.dim, other.dim);
        self.labels.extend(other.labels);
        self.vectors.extend(other.vectors);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    #[inline]
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    #[inline]
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.dim;
        &self.vectors[start..start + self.dim]
    }
}

fn check_query<M: ProxyMemory + ?Sized>(feature: &[f32], memory: &M) -> Result<()> {
    check_dim(memory, feature.len())
}

/// All positive proxies for one query, or `None` when the query's cluster has no
/// sample observed by another camera.
pub fn retrieve_positive_proxies<M: ProxyMemory + ?Sized>(
    feature: &[f32],
    cluster_label: i64,
    camera_id: i64,
    registry: &LabelRegistry,
    memory: &M,
) -> Result<Option<ProxySet>> {
    check_query(feature, memory)?;

    let candidates = registry
        .cluster()
        .iter()
        .zip(registry.camid())
        .zip(registry.abs_proxy())
        .filter(|&((&c, &cam), _)| c == cluster_label && cam != camera_id)
        .map(|(_, &p)| p);
    let set = ProxyIndexMap::from_labels(candidates);

    if set.is_empty() {
        trace!(cluster_label, camera_id, "no cross-camera positives");
        return Ok(None);
    }
    ProxySet::fetch(set.labels().to_vec(), memory).map(Some)
}

/// Sorted, deduplicated proxy labels of registry samples outside `cluster_label`.
pub fn negative_candidates(cluster_label: i64, registry: &LabelRegistry) -> Vec<usize> {
    let candidates = registry
        .cluster()
        .iter()
        .zip(registry.abs_proxy())
        .filter(|&(&c, _)| c != cluster_label)
        .map(|(_, &p)| p);
    ProxyIndexMap::from_labels(candidates).labels().to_vec()
}

/// Uniformly sample at most `cap` candidates without replacement; result stays sorted.
///
/// Sets already within the cap are returned unchanged and draw nothing from `rng`.
pub fn reduce_candidates<R: Rng + ?Sized>(
    candidates: Vec<usize>,
    cap: usize,
    rng: &mut R,
) -> Vec<usize> {
    if candidates.len() <= cap {
        return candidates;
    }
    let mut picked: Vec<usize> = index::sample(rng, candidates.len(), cap)
        .into_iter()
        .map(|i| candidates[i])
        .collect();
    picked.sort_unstable();
    picked
}

/// The `k` nearest negative proxies for one query, nearest first.
///
/// Returns fewer than `k` proxies when fewer candidates exist.
#[allow(clippy::too_many_arguments)]
pub fn retrieve_k_negative_proxies<M, K, R>(
    k: usize,
    feature: &[f32],
    cluster_label: i64,
    registry: &LabelRegistry,
    memory: &M,
    sampling: NegativeSampling,
    knn: &K,
    rng: &mut R,
) -> Result<ProxySet>
where
    M: ProxyMemory + ?Sized,
    K: KNearest + ?Sized,
    R: Rng + ?Sized,
{
    check_query(feature, memory)?;

    let mut candidates = negative_candidates(cluster_label, registry);
    if sampling.reduce {
        let before = candidates.len();
        candidates = reduce_candidates(candidates, sampling.cap, rng);
        trace!(before, after = candidates.len(), "reduced negative candidates");
    }
    if candidates.len() < k {
        debug!(
            requested = k,
            available = candidates.len(),
            cluster_label,
            "fewer negative candidates than k"
        );
    }

    let centroids = memory.get_many(&candidates)?;
    let neighbors = knn.nearest(k, feature, &centroids);
    let labels = neighbors.iter().map(|n| candidates[n.position]).collect();
    ProxySet::fetch(labels, memory)
}

/// Positive proxies for a batch of queries, concatenated in query order.
///
/// Queries without positives contribute nothing; `None` if no query has any.
pub fn retrieve_positive_proxies_batch<M: ProxyMemory + ?Sized>(
    features: &Features,
    cluster_labels: &[i64],
    camera_ids: &[i64],
    registry: &LabelRegistry,
    memory: &M,
) -> Result<Option<ProxySet>> {
    check_batch_labels(features, cluster_labels, "cluster_labels")?;
    check_batch_labels(features, camera_ids, "camera_ids")?;

    let mut out: Option<ProxySet> = None;
    for i in 0..features.len() {
        let found = retrieve_positive_proxies(
            features.row(i),
            cluster_labels[i],
            camera_ids[i],
            registry,
            memory,
        )?;
        if let Some(set) = found {
            match out.as_mut() {
                Some(acc) => acc.extend(set),
                None => out = Some(set),
            }
        }
    }
    Ok(out)
}

/// Hard negatives for a batch of queries, concatenated in query order.
#[allow(clippy::too_many_arguments)]
pub fn retrieve_k_negative_proxies_batch<M, K, R>(
    k: usize,
    features: &Features,
    cluster_labels: &[i64],
    registry: &LabelRegistry,
    memory: &M,
    sampling: NegativeSampling,
    knn: &K,
    rng: &mut R,
) -> Result<ProxySet>
where
    M: ProxyMemory + ?Sized,
    K: KNearest + ?Sized,
    R: Rng + ?Sized,
{
    check_batch_labels(features, cluster_labels, "cluster_labels")?;

    let mut out = ProxySet::empty(memory.dim());
    for i in 0..features.len() {
        let set = retrieve_k_negative_proxies(
            k,
            features.row(i),
            cluster_labels[i],
            registry,
            memory,
            sampling,
            knn,
            rng,
        )?;
        out.extend(set);
    }
    Ok(out)
}

pub(crate) fn check_batch_labels<T>(features: &Features, labels: &[T], what: &str) -> Result<()> {
    if labels.len() != features.len() {
        return Err(Error::InvalidShape(format!(
            "{what} length {} does not match batch size {}",
            labels.len(),
            features.len()
        )));
    }
    Ok(())
}
