//! k-nearest-neighbor search over a candidate set.
//!
//! One capability, two implementations:
//!
//! - [`SortKnn`]: compute every distance, stable-sort, take the first `k`.
//! - [`KdTree`]: build a k-d tree over the candidates and search it with a bounded
//!   max-heap.
//!
//! Neighbors are ranked by `(distance, candidate position)`, so a tie at equal distance
//! goes to the candidate that appears first. With that rule both implementations
//! return the same neighbors in the same order for finite inputs. When fewer than
//! `k` candidates exist, all of them are returned.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::KnnBackend;
use crate::linalg::euclidean_distance;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row index into the candidate matrix.
    pub position: usize,
    pub distance: f32,
}

impl Neighbor {
    #[inline]
    fn rank(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.position.cmp(&other.position))
    }
}

/// "Give me the `k` closest candidates to `query`."
///
/// `candidates` is row-major `(n, dim)` with `dim == query.len()`. Results are sorted
/// nearest first.
pub trait KNearest {
    fn nearest(&self, k: usize, query: &[f32], candidates: &[f32]) -> Vec<Neighbor>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SortKnn;

impl KNearest for SortKnn {
    fn nearest(&self, k: usize, query: &[f32], candidates: &[f32]) -> Vec<Neighbor> {
        let dim = query.len();
        debug_assert!(dim > 0);
        debug_assert!(candidates.len().is_multiple_of(dim));

        let mut all: Vec<Neighbor> = candidates
            .chunks_exact(dim)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: euclidean_distance(query, row),
            })
            .collect();
        // Stable: equal distances keep candidate order.
        all.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        all.truncate(k);
        all
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KdTreeKnn;

impl KNearest for KdTreeKnn {
    fn nearest(&self, k: usize, query: &[f32], candidates: &[f32]) -> Vec<Neighbor> {
        KdTree::build(candidates, query.len()).nearest(k, query)
    }
}

impl KNearest for KnnBackend {
    fn nearest(&self, k: usize, query: &[f32], candidates: &[f32]) -> Vec<Neighbor> {
        match self {
            KnnBackend::Sort => SortKnn.nearest(k, query, candidates),
            KnnBackend::KdTree => KdTreeKnn.nearest(k, query, candidates),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    point: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// k-d tree over a borrowed row-major point set.
///
/// Building is `O(n log n)`; the tree can be queried any number of times.
#[derive(Debug, Clone)]
pub struct KdTree<'a> {
    points: &'a [f32],
    dim: usize,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl<'a> KdTree<'a> {
    pub fn build(points: &'a [f32], dim: usize) -> Self {
        assert!(dim > 0, "k-d tree dim must be > 0");
        assert!(
            points.len().is_multiple_of(dim),
            "points length {} is not divisible by dim {}",
            points.len(),
            dim
        );

        let n = points.len() / dim;
        let mut order: Vec<usize> = (0..n).collect();
        let mut tree = Self {
            points,
            dim,
            nodes: Vec::with_capacity(n),
            root: None,
        };
        tree.root = tree.build_subtree(&mut order, 0);
        tree
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    fn coord(&self, point: usize, axis: usize) -> f32 {
        self.points[point * self.dim + axis]
    }

    #[inline]
    fn row(&self, point: usize) -> &[f32] {
        let start = point * self.dim;
        &self.points[start..start + self.dim]
    }

    fn build_subtree(&mut self, order: &mut [usize], depth: usize) -> Option<usize> {
        if order.is_empty() {
            return None;
        }
        let axis = depth % self.dim;
        let mid = order.len() / 2;
        // Left of `mid` is <= the split coordinate, right of it is >=.
        let (points, dim) = (self.points, self.dim);
        order.select_nth_unstable_by(mid, |&a, &b| {
            points[a * dim + axis].total_cmp(&points[b * dim + axis])
        });
        let point = order[mid];

        let idx = self.nodes.len();
        self.nodes.push(Node {
            point,
            axis,
            left: None,
            right: None,
        });

        let (lo, rest) = order.split_at_mut(mid);
        let left = self.build_subtree(lo, depth + 1);
        let right = self.build_subtree(&mut rest[1..], depth + 1);
        self.nodes[idx].left = left;
        self.nodes[idx].right = right;
        Some(idx)
    }

    /// The `k` nearest points to `query`, nearest first.
    pub fn nearest(&self, k: usize, query: &[f32]) -> Vec<Neighbor> {
        assert_eq!(
            query.len(),
            self.dim,
            "query len {} does not match tree dim {}",
            query.len(),
            self.dim
        );
        if k == 0 {
            return Vec::new();
        }

        let mut heap = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = self.root {
            self.search(root, k, query, &mut heap);
        }
        heap.into_sorted_vec().into_iter().map(|e| e.0).collect()
    }

    fn search(&self, node_idx: usize, k: usize, query: &[f32], heap: &mut BinaryHeap<Ranked>) {
        let node = self.nodes[node_idx];
        let candidate = Neighbor {
            position: node.point,
            distance: euclidean_distance(query, self.row(node.point)),
        };
        if heap.len() < k {
            heap.push(Ranked(candidate));
        } else if heap
            .peek()
            .is_some_and(|worst| candidate.rank(&worst.0) == Ordering::Less)
        {
            heap.pop();
            heap.push(Ranked(candidate));
        }

        let q = query[node.axis];
        let split = self.coord(node.point, node.axis);
        let (near, far) = if q < split {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(near) = near {
            self.search(near, k, query, heap);
        }
        if let Some(far) = far {
            // Lower bound on any distance across the splitting plane. It goes through
            // the same distance routine, so it never exceeds a real distance over there.
            // Equal bounds are still visited: a tie can win on position.
            let bound = euclidean_distance(&[q], &[split]);
            let prune = heap.len() >= k
                && heap
                    .peek()
                    .is_some_and(|worst| bound.total_cmp(&worst.0.distance) == Ordering::Greater);
            if !prune {
                self.search(far, k, query, heap);
            }
        }
    }
}

/// Max-heap entry ordered by neighbor rank.
#[derive(Debug, Clone, Copy)]
struct Ranked(Neighbor);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn positions(ns: &[Neighbor]) -> Vec<usize> {
        ns.iter().map(|n| n.position).collect()
    }

    #[test]
    fn sort_knn_breaks_ties_by_first_occurrence() {
        // Candidates 0, 2 and 3 are all at distance 1 from the origin.
        let candidates = [1.0_f32, 0.0, 5.0, 5.0, 0.0, 1.0, -1.0, 0.0];
        let query = [0.0_f32, 0.0];
        let out = SortKnn.nearest(2, &query, &candidates);
        assert_eq!(positions(&out), vec![0, 2]);
    }

    #[test]
    fn kd_tree_matches_sort_on_ties() {
        let candidates = [1.0_f32, 0.0, 5.0, 5.0, 0.0, 1.0, -1.0, 0.0, 0.0, -1.0];
        let query = [0.0_f32, 0.0];
        for k in 1..=6 {
            assert_eq!(
                SortKnn.nearest(k, &query, &candidates),
                KdTreeKnn.nearest(k, &query, &candidates),
                "k={k}"
            );
        }
    }

    #[test]
    fn returns_everything_when_k_exceeds_candidates() {
        let candidates = [0.0_f32, 1.0, 2.0];
        let query = [1.4_f32];
        let sorted = SortKnn.nearest(10, &query, &candidates);
        let tree = KdTreeKnn.nearest(10, &query, &candidates);
        assert_eq!(positions(&sorted), vec![1, 2, 0]);
        assert_eq!(sorted, tree);
    }

    #[test]
    fn empty_candidate_set_yields_no_neighbors() {
        let query = [0.0_f32, 0.0];
        assert!(SortKnn.nearest(3, &query, &[]).is_empty());
        assert!(KdTreeKnn.nearest(3, &query, &[]).is_empty());
    }

    #[test]
    fn kd_tree_agrees_with_sort_on_random_clouds() {
        let mut rng = StdRng::seed_from_u64(7);
        for trial in 0..50 {
            let dim = 1 + trial % 5;
            let n = 1 + rng.gen_range(0..60);
            // Coarse grid so that exact ties are common.
            let candidates: Vec<f32> = (0..n * dim)
                .map(|_| rng.gen_range(-3..=3) as f32 * 0.5)
                .collect();
            let query: Vec<f32> = (0..dim).map(|_| rng.gen_range(-3..=3) as f32 * 0.5).collect();
            let tree = KdTree::build(&candidates, dim);
            for k in [1, 2, 5, n, n + 3] {
                assert_eq!(
                    SortKnn.nearest(k, &query, &candidates),
                    tree.nearest(k, &query),
                    "trial={trial} k={k}"
                );
            }
        }
    }
}
