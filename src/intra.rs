//! Intra-camera loss.
//!
//! The batch is split by camera. Within each camera the objective is a plain
//! classification over the proxies that camera actually observed in this batch:
//!
//! 1. proxies = sorted unique absolute proxy labels of the group
//! 2. logits  = group features * proxies^T / temperature
//! 3. target  = local index of each sample's own proxy
//! 4. loss    = mean cross-entropy over the group
//!
//! Group losses are summed, not averaged.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::camera::parse_camera_ids;
use crate::config::validate_temperature;
use crate::linalg::{scaled_similarity, scaled_similarity_backward};
use crate::loss::{LossGradients, cross_entropy_rows};
use crate::mapping::ProxyIndexMap;
use crate::memory::check_dim;
use crate::retrieval::check_batch_labels;
use crate::{Error, Features, ProxyMemory, Result};

/// Sample indices per camera, ascending by camera id.
pub fn group_by_camera(camera_ids: &[i64]) -> BTreeMap<i64, Vec<usize>> {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (idx, &cam) in camera_ids.iter().enumerate() {
        groups.entry(cam).or_default().push(idx);
    }
    groups
}

fn intra_impl<M: ProxyMemory + ?Sized>(
    features: &Features,
    camera_ids: &[i64],
    abs_proxy_labels: &[usize],
    memory: &M,
    temperature: f32,
    mut grads: Option<&mut LossGradients>,
) -> Result<f32> {
    if features.is_empty() {
        return Err(Error::EmptyBatch(
            "intra-camera loss needs at least one sample".to_owned(),
        ));
    }
    validate_temperature(temperature)?;
    check_batch_labels(features, camera_ids, "camera_ids")?;
    check_batch_labels(features, abs_proxy_labels, "abs_proxy_labels")?;
    check_dim(memory, features.dim())?;

    if let Some(g) = grads.as_deref_mut() {
        g.zero();
    }

    let dim = features.dim();
    let groups = group_by_camera(camera_ids);
    let mut total = 0.0_f32;

    for (&cam, indices) in &groups {
        let group_labels: Vec<usize> = indices.iter().map(|&i| abs_proxy_labels[i]).collect();
        let proxy_set = ProxyIndexMap::from_labels(group_labels.iter().copied());
        let proxies = memory.get_many(proxy_set.labels())?;
        let targets = proxy_set.targets(&group_labels)?;

        let rows = indices.len();
        let cols = proxy_set.len();
        let group_features = features.gather_rows(indices);
        let sim = scaled_similarity(&group_features, rows, &proxies, cols, dim, temperature);

        let group_loss = match grads.as_deref_mut() {
            None => cross_entropy_rows(&sim, cols, &targets, None),
            Some(g) => {
                let mut d_sim = vec![0.0_f32; sim.len()];
                let loss = cross_entropy_rows(&sim, cols, &targets, Some(&mut d_sim));

                let mut d_x = vec![0.0_f32; rows * dim];
                let mut d_p = vec![0.0_f32; cols * dim];
                scaled_similarity_backward(
                    &d_sim,
                    &group_features,
                    rows,
                    &proxies,
                    cols,
                    dim,
                    temperature,
                    &mut d_x,
                    &mut d_p,
                );
                for (r, &sample) in indices.iter().enumerate() {
                    g.add_to_feature(sample, &d_x[r * dim..(r + 1) * dim]);
                }
                for (c, &label) in proxy_set.labels().iter().enumerate() {
                    g.add_to_proxy(label, &d_p[c * dim..(c + 1) * dim]);
                }
                loss
            }
        };

        trace!(camera = cam, samples = rows, proxies = cols, loss = group_loss, "camera group");
        total += group_loss;
    }

    debug!(
        batch = features.len(),
        cameras = groups.len(),
        loss = total,
        "intra-camera loss"
    );
    Ok(total)
}

/// Intra-camera loss from raw sample identifiers (`<anything>_<camera>`).
pub fn intra_camera_loss<M, S>(
    features: &Features,
    camera_ids_raw: &[S],
    abs_proxy_labels: &[usize],
    memory: &M,
    temperature: f32,
) -> Result<f32>
where
    M: ProxyMemory + ?Sized,
    S: AsRef<str>,
{
    let camera_ids = parse_camera_ids(camera_ids_raw)?;
    intra_impl(features, &camera_ids, abs_proxy_labels, memory, temperature, None)
}

/// Intra-camera loss from already parsed camera ids.
pub fn intra_camera_loss_with_ids<M: ProxyMemory + ?Sized>(
    features: &Features,
    camera_ids: &[i64],
    abs_proxy_labels: &[usize],
    memory: &M,
    temperature: f32,
) -> Result<f32> {
    intra_impl(features, camera_ids, abs_proxy_labels, memory, temperature, None)
}

/// [`intra_camera_loss`] plus gradients w.r.t. features and memory.
pub fn intra_camera_loss_backward<M, S>(
    features: &Features,
    camera_ids_raw: &[S],
    abs_proxy_labels: &[usize],
    memory: &M,
    temperature: f32,
    grads: &mut LossGradients,
) -> Result<f32>
where
    M: ProxyMemory + ?Sized,
    S: AsRef<str>,
{
    grads.check_shape(features, memory)?;
    let camera_ids = parse_camera_ids(camera_ids_raw)?;
    intra_impl(
        features,
        &camera_ids,
        abs_proxy_labels,
        memory,
        temperature,
        Some(grads),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::proxy_loss;
    use crate::loss::test_util::assert_close;
    use crate::MemoryBank;

    fn bank() -> MemoryBank {
        MemoryBank::from_rows(&[
            vec![0.5, 0.1, -0.2],
            vec![-0.3, 0.8, 0.0],
            vec![0.2, -0.4, 0.6],
            vec![0.9, 0.0, 0.3],
        ])
        .unwrap()
    }

    #[test]
    fn groups_are_sorted_by_camera() {
        let groups = group_by_camera(&[3, 1, 3, 2]);
        let keys: Vec<i64> = groups.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(groups[&3], vec![0, 2]);
    }

    #[test]
    fn empty_batch_is_an_error() {
        let features = Features::from_flat(vec![], 3).unwrap();
        let raw: [&str; 0] = [];
        let err = intra_camera_loss(&features, &raw, &[], &bank(), 0.07).unwrap_err();
        assert!(matches!(err, Error::EmptyBatch(_)));
    }

    #[test]
    fn malformed_camera_id_is_an_error() {
        let features = Features::from_rows(&[vec![0.0, 0.0, 1.0]]).unwrap();
        let err = intra_camera_loss(&features, &["img_cam"], &[0], &bank(), 0.07).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn single_camera_equals_cross_entropy_over_present_proxies() {
        let memory = bank();
        let features =
            Features::from_rows(&[vec![0.1, 0.2, 0.3], vec![-0.5, 0.4, 0.0], vec![0.3, 0.3, 0.3]])
                .unwrap();
        // Proxies {1, 3} present; restricted bank holds exactly those, in sorted order.
        let labels = [3_usize, 1, 3];
        let loss = intra_camera_loss(&features, &["a_0", "b_0", "c_0"], &labels, &memory, 0.5).unwrap();

        let restricted =
            MemoryBank::from_rows(&[memory.get(1).unwrap().to_vec(), memory.get(3).unwrap().to_vec()])
                .unwrap();
        let expected = proxy_loss(&features, &[1, 0, 1], &restricted, 0.5).unwrap();
        assert_eq!(loss, expected);
    }

    #[test]
    fn group_iteration_order_does_not_change_the_sum() {
        let memory = bank();
        let features = Features::from_rows(&[
            vec![0.1, 0.2, 0.3],
            vec![-0.5, 0.4, 0.0],
            vec![0.3, 0.3, 0.3],
            vec![0.7, -0.1, 0.2],
        ])
        .unwrap();
        let labels = [0_usize, 1, 2, 3];
        let a = intra_camera_loss_with_ids(&features, &[0, 0, 1, 1], &labels, &memory, 0.2).unwrap();

        // Same samples with camera keys swapped reverses group order.
        let b = intra_camera_loss_with_ids(&features, &[1, 1, 0, 0], &labels, &memory, 0.2).unwrap();
        assert_close(a, b, 1e-6, 1e-6);
    }

    #[test]
    fn backward_matches_numeric_gradients() {
        let mut memory = bank();
        let mut features = Features::from_rows(&[
            vec![0.1, 0.2, 0.3],
            vec![-0.5, 0.4, 0.0],
            vec![0.3, 0.3, 0.3],
            vec![0.7, -0.1, 0.2],
            vec![0.0, 0.6, -0.4],
        ])
        .unwrap();
        let raw = ["x_0", "x_1", "x_0", "x_1", "x_0"];
        let labels = [0_usize, 1, 2, 3, 0];
        let t = 0.5;

        let mut grads = LossGradients::for_inputs(&features, &memory);
        intra_camera_loss_backward(&features, &raw, &labels, &memory, t, &mut grads).unwrap();

        let eps = 1e-3_f32;
        for p in 0..features.as_flat().len() {
            let orig = features.as_flat()[p];
            features.as_flat_mut()[p] = orig + eps;
            let plus = intra_camera_loss(&features, &raw, &labels, &memory, t).unwrap();
            features.as_flat_mut()[p] = orig - eps;
            let minus = intra_camera_loss(&features, &raw, &labels, &memory, t).unwrap();
            features.as_flat_mut()[p] = orig;
            assert_close(grads.d_features()[p], (plus - minus) / (2.0 * eps), 1e-3, 1e-2);
        }
        for label in 0..memory.len() {
            for j in 0..memory.dim() {
                let orig = memory.get(label).unwrap()[j];
                memory.proxy_mut(label).unwrap()[j] = orig + eps;
                let plus = intra_camera_loss(&features, &raw, &labels, &memory, t).unwrap();
                memory.proxy_mut(label).unwrap()[j] = orig - eps;
                let minus = intra_camera_loss(&features, &raw, &labels, &memory, t).unwrap();
                memory.proxy_mut(label).unwrap()[j] = orig;
                assert_close(grads.d_proxy(label)[j], (plus - minus) / (2.0 * eps), 1e-3, 1e-2);
            }
        }
    }
}
