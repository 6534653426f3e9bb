//! Inter-camera loss.
//!
//! For every sample: gather all positive proxies (same cluster, other camera) and the
//! `k` nearest negative proxies (other clusters), then score
//!
//! ```text
//! e_c  = exp(f . q_c / T)        for every positive and negative proxy q_c
//! Z    = sum(e_pos) + sum(e_neg)
//! loss = -sum_over_pos(log(e_pos / Z)) / |pos|
//! ```
//!
//! Samples with no positive proxy are skipped and add nothing. Per-sample losses are
//! summed over the batch.

use rand::Rng;
use tracing::{debug, trace};

use crate::knn::KNearest;
use crate::linalg::dot;
use crate::loss::{LossGradients, log_sum_exp_and_max};
use crate::memory::check_dim;
use crate::retrieval::{ProxySet, check_batch_labels, retrieve_k_negative_proxies, retrieve_positive_proxies};
use crate::{Error, Features, LabelRegistry, LossConfig, Normalization, ProxyMemory, Result};

/// Log-probabilities of the positives and the softmax weights of every proxy
/// (positives first, then negatives).
struct Scored {
    log_probs: Vec<f32>,
    weights: Vec<f32>,
}

fn score(pos_logits: &[f32], neg_logits: &[f32], normalization: Normalization) -> Scored {
    match normalization {
        Normalization::ExpLog => {
            let pos_sim: Vec<f32> = pos_logits.iter().map(|s| s.exp()).collect();
            let neg_sim: Vec<f32> = neg_logits.iter().map(|s| s.exp()).collect();
            let norm = pos_sim.iter().sum::<f32>() + neg_sim.iter().sum::<f32>();

            let log_probs = pos_sim.iter().map(|&e| (e / norm).ln()).collect();
            let weights = pos_sim.iter().chain(&neg_sim).map(|&e| e / norm).collect();
            Scored { log_probs, weights }
        }
        Normalization::LogSumExp => {
            let all: Vec<f32> = pos_logits.iter().chain(neg_logits).copied().collect();
            let (log_norm, _) = log_sum_exp_and_max(&all);

            let log_probs = pos_logits.iter().map(|&s| s - log_norm).collect();
            let weights = all.iter().map(|&s| (s - log_norm).exp()).collect();
            Scored { log_probs, weights }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn inter_impl<M, K, R>(
    features: &Features,
    camera_ids: &[i64],
    cluster_labels: &[i64],
    registry: &LabelRegistry,
    memory: &M,
    cfg: &LossConfig,
    knn: &K,
    rng: &mut R,
    mut grads: Option<&mut LossGradients>,
) -> Result<f32>
where
    M: ProxyMemory + ?Sized,
    K: KNearest + ?Sized,
    R: Rng + ?Sized,
{
    if features.is_empty() {
        return Err(Error::EmptyBatch(
            "inter-camera loss needs at least one sample".to_owned(),
        ));
    }
    cfg.validate()?;
    check_batch_labels(features, camera_ids, "camera_ids")?;
    check_batch_labels(features, cluster_labels, "cluster_labels")?;
    check_dim(memory, features.dim())?;

    if let Some(g) = grads.as_deref_mut() {
        g.zero();
    }

    let t = cfg.temperature;
    let dim = features.dim();
    let mut total = 0.0_f32;
    let mut skipped = 0_usize;

    for i in 0..features.len() {
        let feat = features.row(i);

        let positives =
            retrieve_positive_proxies(feat, cluster_labels[i], camera_ids[i], registry, memory)?;
        let negatives = retrieve_k_negative_proxies(
            cfg.k,
            feat,
            cluster_labels[i],
            registry,
            memory,
            cfg.negatives,
            knn,
            rng,
        )?;
        if cfg.strict_k && negatives.len() < cfg.k {
            return Err(Error::InsufficientCandidates {
                requested: cfg.k,
                available: negatives.len(),
            });
        }

        let Some(positives) = positives else {
            skipped += 1;
            continue;
        };

        let logits = |set: &ProxySet| -> Vec<f32> {
            (0..set.len()).map(|c| dot(feat, set.row(c)) / t).collect()
        };
        let pos_logits = logits(&positives);
        let neg_logits = logits(&negatives);

        let scored = score(&pos_logits, &neg_logits, cfg.normalization);
        let pos_card = positives.len() as f32;
        let sample_loss = -(scored.log_probs.iter().sum::<f32>()) / pos_card;

        trace!(
            sample = i,
            positives = positives.len(),
            negatives = negatives.len(),
            loss = sample_loss,
            "inter-camera sample"
        );
        total += sample_loss;

        if let Some(g) = grads.as_deref_mut() {
            // dL/ds_c = w_c - [c is positive] / |pos|, chained through s_c = f . q_c / T.
            let proxies = positives
                .labels()
                .iter()
                .enumerate()
                .map(|(c, &label)| (label, positives.row(c), true))
                .chain(
                    negatives
                        .labels()
                        .iter()
                        .enumerate()
                        .map(|(c, &label)| (label, negatives.row(c), false)),
                );

            let mut d_feat = vec![0.0_f32; dim];
            let mut d_proxy = vec![0.0_f32; dim];
            for ((label, q, is_pos), &w) in proxies.zip(&scored.weights) {
                let d_s = (if is_pos { w - 1.0 / pos_card } else { w }) / t;
                for j in 0..dim {
                    d_feat[j] = d_s.mul_add(q[j], d_feat[j]);
                    d_proxy[j] = d_s * feat[j];
                }
                g.add_to_proxy(label, &d_proxy);
            }
            g.add_to_feature(i, &d_feat);
        }
    }

    debug!(
        batch = features.len(),
        skipped,
        loss = total,
        "inter-camera loss"
    );
    Ok(total)
}

/// Inter-camera loss with the k-NN backend selected by `cfg.knn`.
///
/// `rng` is only drawn from when `cfg.negatives.reduce` is on.
pub fn inter_camera_loss<M, R>(
    features: &Features,
    camera_ids: &[i64],
    cluster_labels: &[i64],
    registry: &LabelRegistry,
    memory: &M,
    cfg: &LossConfig,
    rng: &mut R,
) -> Result<f32>
where
    M: ProxyMemory + ?Sized,
    R: Rng + ?Sized,
{
    inter_impl(
        features,
        camera_ids,
        cluster_labels,
        registry,
        memory,
        cfg,
        &cfg.knn,
        rng,
        None,
    )
}

/// Inter-camera loss with a caller-supplied nearest-neighbor strategy.
#[allow(clippy::too_many_arguments)]
pub fn inter_camera_loss_with<M, K, R>(
    features: &Features,
    camera_ids: &[i64],
    cluster_labels: &[i64],
    registry: &LabelRegistry,
    memory: &M,
    cfg: &LossConfig,
    knn: &K,
    rng: &mut R,
) -> Result<f32>
where
    M: ProxyMemory + ?Sized,
    K: KNearest + ?Sized,
    R: Rng + ?Sized,
{
    inter_impl(
        features,
        camera_ids,
        cluster_labels,
        registry,
        memory,
        cfg,
        knn,
        rng,
        None,
    )
}

/// [`inter_camera_loss`] plus gradients. Neighbor selection is treated as constant.
#[allow(clippy::too_many_arguments)]
pub fn inter_camera_loss_backward<M, R>(
    features: &Features,
    camera_ids: &[i64],
    cluster_labels: &[i64],
    registry: &LabelRegistry,
    memory: &M,
    cfg: &LossConfig,
    rng: &mut R,
    grads: &mut LossGradients,
) -> Result<f32>
where
    M: ProxyMemory + ?Sized,
    R: Rng + ?Sized,
{
    grads.check_shape(features, memory)?;
    inter_impl(
        features,
        camera_ids,
        cluster_labels,
        registry,
        memory,
        cfg,
        &cfg.knn,
        rng,
        Some(grads),
    )
}
