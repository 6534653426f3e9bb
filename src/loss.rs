//! Shared loss machinery.
//!
//! - [`LossGradients`]: `dL/d(features)` and `dL/d(memory)` buffers filled by the
//!   `*_backward` variants of every loss.
//! - Row-wise softmax cross-entropy over class indices (the per-group objective of
//!   the intra-camera loss).
//! - [`proxy_loss`]: cross-entropy against the whole memory bank, a debugging baseline.

use crate::config::validate_temperature;
use crate::linalg::{scaled_similarity, scaled_similarity_backward};
use crate::memory::check_dim;
use crate::retrieval::check_batch_labels;
use crate::{Error, Features, ProxyMemory, Result};

/// Gradients of a scalar loss w.r.t. the feature batch and the memory bank.
///
/// Overwrite semantics: every `*_backward` call zeroes both buffers first.
/// Allocate once per (batch size, bank size) and reuse across steps.
#[derive(Debug, Clone, PartialEq)]
pub struct LossGradients {
    /// Row-major `(batch, dim)`.
    d_features: Vec<f32>,
    /// Row-major `(proxies, dim)`; rows of proxies the loss never touched stay zero.
    d_memory: Vec<f32>,
    batch: usize,
    proxies: usize,
    dim: usize,
}

impl LossGradients {
    pub fn new(batch: usize, proxies: usize, dim: usize) -> Self {
        Self {
            d_features: vec![0.0; batch * dim],
            d_memory: vec![0.0; proxies * dim],
            batch,
            proxies,
            dim,
        }
    }

    /// Buffers shaped for `features` and `memory`.
    pub fn for_inputs<M: ProxyMemory + ?Sized>(features: &Features, memory: &M) -> Self {
        Self::new(features.len(), memory.len(), features.dim())
    }

    #[inline]
    pub fn d_features(&self) -> &[f32] {
        &self.d_features
    }

    #[inline]
    pub fn d_memory(&self) -> &[f32] {
        &self.d_memory
    }

    #[inline]
    pub fn d_feature(&self, idx: usize) -> &[f32] {
        let start = idx * self.dim;
        &self.d_features[start..start + self.dim]
    }

    #[inline]
    pub fn d_proxy(&self, label: usize) -> &[f32] {
        let start = label * self.dim;
        &self.d_memory[start..start + self.dim]
    }

    pub(crate) fn check_shape<M: ProxyMemory + ?Sized>(
        &self,
        features: &Features,
        memory: &M,
    ) -> Result<()> {
        if self.batch != features.len() || self.proxies != memory.len() || self.dim != features.dim()
        {
            return Err(Error::InvalidShape(format!(
                "gradient buffers are (batch={}, proxies={}, dim={}), inputs are (batch={}, proxies={}, dim={})",
                self.batch,
                self.proxies,
                self.dim,
                features.len(),
                memory.len(),
                features.dim()
            )));
        }
        Ok(())
    }

    pub(crate) fn zero(&mut self) {
        self.d_features.fill(0.0);
        self.d_memory.fill(0.0);
    }

    #[inline]
    pub(crate) fn add_to_feature(&mut self, idx: usize, delta: &[f32]) {
        let start = idx * self.dim;
        for (g, d) in self.d_features[start..start + self.dim].iter_mut().zip(delta) {
            *g += d;
        }
    }

    #[inline]
    pub(crate) fn add_to_proxy(&mut self, label: usize, delta: &[f32]) {
        let start = label * self.dim;
        for (g, d) in self.d_memory[start..start + self.dim].iter_mut().zip(delta) {
            *g += d;
        }
    }
}

/// Mean softmax cross-entropy over `rows` rows of `cols` logits with class-index targets.
///
/// If `d_logits` is given, it receives `dL/d(logits) = (softmax - onehot) / rows`.
pub(crate) fn cross_entropy_rows(
    logits: &[f32],
    cols: usize,
    targets: &[usize],
    mut d_logits: Option<&mut [f32]>,
) -> f32 {
    let rows = targets.len();
    debug_assert!(rows > 0 && cols > 0);
    debug_assert_eq!(logits.len(), rows * cols);

    let inv_rows = 1.0 / rows as f32;
    let mut total = 0.0_f32;

    for (r, &t) in targets.iter().enumerate() {
        debug_assert!(t < cols);
        let row = &logits[r * cols..(r + 1) * cols];
        let (log_sum_exp, max_logit) = log_sum_exp_and_max(row);
        total += log_sum_exp - row[t];

        if let Some(d) = d_logits.as_deref_mut() {
            let d_row = &mut d[r * cols..(r + 1) * cols];
            let mut sum_exp = 0.0_f32;
            for (dv, &x) in d_row.iter_mut().zip(row) {
                *dv = (x - max_logit).exp();
                sum_exp += *dv;
            }
            let inv_sum = 1.0 / sum_exp;
            for (j, dv) in d_row.iter_mut().enumerate() {
                let onehot = if j == t { 1.0 } else { 0.0 };
                *dv = (*dv * inv_sum - onehot) * inv_rows;
            }
        }
    }

    total * inv_rows
}

#[inline]
pub(crate) fn log_sum_exp_and_max(xs: &[f32]) -> (f32, f32) {
    let mut max_x = xs[0];
    for &x in xs.iter().skip(1) {
        if x > max_x {
            max_x = x;
        }
    }
    let mut sum_exp = 0.0_f32;
    for &x in xs {
        sum_exp += (x - max_x).exp();
    }
    (max_x + sum_exp.ln(), max_x)
}

fn check_proxy_inputs<M: ProxyMemory + ?Sized>(
    features: &Features,
    abs_proxy_labels: &[usize],
    memory: &M,
    temperature: f32,
) -> Result<()> {
    if features.is_empty() {
        return Err(Error::EmptyBatch("proxy loss needs at least one sample".to_owned()));
    }
    validate_temperature(temperature)?;
    check_batch_labels(features, abs_proxy_labels, "abs_proxy_labels")?;
    check_dim(memory, features.dim())?;
    for &label in abs_proxy_labels {
        if label >= memory.len() {
            return Err(Error::UnknownProxy {
                label,
                len: memory.len(),
            });
        }
    }
    Ok(())
}

fn proxy_loss_impl<M: ProxyMemory + ?Sized>(
    features: &Features,
    abs_proxy_labels: &[usize],
    memory: &M,
    temperature: f32,
    grads: Option<&mut LossGradients>,
) -> Result<f32> {
    check_proxy_inputs(features, abs_proxy_labels, memory, temperature)?;

    let all: Vec<usize> = (0..memory.len()).collect();
    let proxies = memory.get_many(&all)?;
    let (rows, cols, dim) = (features.len(), memory.len(), features.dim());
    let sim = scaled_similarity(features.as_flat(), rows, &proxies, cols, dim, temperature);

    let Some(grads) = grads else {
        return Ok(cross_entropy_rows(&sim, cols, abs_proxy_labels, None));
    };

    let mut d_sim = vec![0.0_f32; sim.len()];
    let loss = cross_entropy_rows(&sim, cols, abs_proxy_labels, Some(&mut d_sim));
    grads.zero();
    scaled_similarity_backward(
        &d_sim,
        features.as_flat(),
        rows,
        &proxies,
        cols,
        dim,
        temperature,
        &mut grads.d_features,
        &mut grads.d_memory,
    );
    Ok(loss)
}

/// Cross-entropy of `features * storage^T / temperature` against absolute proxy labels,
/// averaged over the batch.
pub fn proxy_loss<M: ProxyMemory + ?Sized>(
    features: &Features,
    abs_proxy_labels: &[usize],
    memory: &M,
    temperature: f32,
) -> Result<f32> {
    proxy_loss_impl(features, abs_proxy_labels, memory, temperature, None)
}

/// [`proxy_loss`] plus gradients.
pub fn proxy_loss_backward<M: ProxyMemory + ?Sized>(
    features: &Features,
    abs_proxy_labels: &[usize],
    memory: &M,
    temperature: f32,
    grads: &mut LossGradients,
) -> Result<f32> {
    grads.check_shape(features, memory)?;
    proxy_loss_impl(features, abs_proxy_labels, memory, temperature, Some(grads))
}

#[cfg(test)]
pub(crate) mod test_util {
    pub(crate) fn assert_close(analytic: f32, numeric: f32, abs_tol: f32, rel_tol: f32) {
        let diff = (analytic - numeric).abs();
        let scale = analytic.abs().max(numeric.abs()).max(1.0);
        assert!(
            diff <= abs_tol || diff / scale <= rel_tol,
            "analytic={analytic} numeric={numeric} diff={diff}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::assert_close;
    use super::*;
    use crate::MemoryBank;

    #[test]
    fn cross_entropy_single_class_is_zero() {
        let logits = [3.5_f32, -2.0];
        assert_eq!(cross_entropy_rows(&logits, 1, &[0, 0], None), 0.0);
    }

    #[test]
    fn cross_entropy_prefers_correct_class() {
        let good = [5.0_f32, 0.0, -1.0];
        let bad = [-1.0_f32, 0.0, 5.0];
        assert!(cross_entropy_rows(&good, 3, &[0], None) < cross_entropy_rows(&bad, 3, &[0], None));
    }

    #[test]
    fn cross_entropy_gradient_rows_sum_to_zero() {
        let logits = [0.2_f32, -1.0, 0.7, 1.5, 0.0, -0.3];
        let mut d = [0.0_f32; 6];
        cross_entropy_rows(&logits, 3, &[2, 0], Some(&mut d));
        for row in d.chunks(3) {
            assert!(row.iter().sum::<f32>().abs() < 1e-6);
        }
    }

    #[test]
    fn proxy_loss_matches_manual_cross_entropy() {
        let memory = MemoryBank::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let features = Features::from_rows(&[vec![1.0, 0.0]]).unwrap();
        let loss = proxy_loss(&features, &[0], &memory, 1.0).unwrap();
        // logits [1, 0]; CE = ln(e + 1) - 1
        let expected = (1.0_f32.exp() + 1.0).ln() - 1.0;
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn proxy_loss_backward_matches_numeric_gradients() {
        let mut memory =
            MemoryBank::from_rows(&[vec![0.3, -0.2], vec![-0.5, 0.4], vec![0.1, 0.9]]).unwrap();
        let mut features = Features::from_rows(&[vec![0.2, 0.7], vec![-0.4, 0.1]]).unwrap();
        let labels = [2_usize, 0];
        let t = 0.5;

        let mut grads = LossGradients::for_inputs(&features, &memory);
        proxy_loss_backward(&features, &labels, &memory, t, &mut grads).unwrap();

        let eps = 1e-3_f32;
        for p in 0..features.as_flat().len() {
            let orig = features.as_flat()[p];
            features.as_flat_mut()[p] = orig + eps;
            let plus = proxy_loss(&features, &labels, &memory, t).unwrap();
            features.as_flat_mut()[p] = orig - eps;
            let minus = proxy_loss(&features, &labels, &memory, t).unwrap();
            features.as_flat_mut()[p] = orig;
            assert_close(grads.d_features()[p], (plus - minus) / (2.0 * eps), 1e-3, 1e-2);
        }
        for label in 0..3 {
            for j in 0..2 {
                let orig = memory.get(label).unwrap()[j];
                memory.proxy_mut(label).unwrap()[j] = orig + eps;
                let plus = proxy_loss(&features, &labels, &memory, t).unwrap();
                memory.proxy_mut(label).unwrap()[j] = orig - eps;
                let minus = proxy_loss(&features, &labels, &memory, t).unwrap();
                memory.proxy_mut(label).unwrap()[j] = orig;
                assert_close(grads.d_proxy(label)[j], (plus - minus) / (2.0 * eps), 1e-3, 1e-2);
            }
        }
    }

    #[test]
    fn proxy_loss_rejects_out_of_range_labels() {
        let memory = MemoryBank::from_rows(&[vec![1.0, 0.0]]).unwrap();
        let features = Features::from_rows(&[vec![1.0, 0.0]]).unwrap();
        assert!(matches!(
            proxy_loss(&features, &[3], &memory, 1.0),
            Err(Error::UnknownProxy { label: 3, len: 1 })
        ));
    }
}
