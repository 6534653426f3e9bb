//! `CameraAwareLoss`: config + seeded RNG bundled behind one handle.
//!
//! The free functions in [`crate::intra`] and [`crate::inter`] take every input
//! explicitly. A training loop usually wants one object that remembers the
//! hyperparameters and owns the random source used for negative down-sampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::inter::{inter_camera_loss, inter_camera_loss_backward};
use crate::intra::{intra_camera_loss, intra_camera_loss_backward};
use crate::{Features, LabelRegistry, LossConfig, LossGradients, ProxyMemory, Result};

#[derive(Debug, Clone)]
pub struct CameraAwareLoss {
    config: LossConfig,
    rng: StdRng,
}

impl CameraAwareLoss {
    /// Build with a deterministic seed.
    pub fn new_with_seed(config: LossConfig, seed: u64) -> Result<Self> {
        Self::new_with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Build with a seed drawn from `rng`.
    pub fn new_from_rng<R: Rng + ?Sized>(config: LossConfig, rng: &mut R) -> Result<Self> {
        Self::new_with_rng(config, StdRng::seed_from_u64(rng.r#gen()))
    }

    fn new_with_rng(config: LossConfig, rng: StdRng) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, rng })
    }

    #[inline]
    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Intra-camera loss at the configured temperature.
    pub fn intra<M, S>(
        &self,
        features: &Features,
        camera_ids_raw: &[S],
        abs_proxy_labels: &[usize],
        memory: &M,
    ) -> Result<f32>
    where
        M: ProxyMemory + ?Sized,
        S: AsRef<str>,
    {
        intra_camera_loss(
            features,
            camera_ids_raw,
            abs_proxy_labels,
            memory,
            self.config.temperature,
        )
    }

    pub fn intra_backward<M, S>(
        &self,
        features: &Features,
        camera_ids_raw: &[S],
        abs_proxy_labels: &[usize],
        memory: &M,
        grads: &mut LossGradients,
    ) -> Result<f32>
    where
        M: ProxyMemory + ?Sized,
        S: AsRef<str>,
    {
        intra_camera_loss_backward(
            features,
            camera_ids_raw,
            abs_proxy_labels,
            memory,
            self.config.temperature,
            grads,
        )
    }

    /// Inter-camera loss; advances the internal RNG when negative reduction is on.
    pub fn inter<M: ProxyMemory + ?Sized>(
        &mut self,
        features: &Features,
        camera_ids: &[i64],
        cluster_labels: &[i64],
        registry: &LabelRegistry,
        memory: &M,
    ) -> Result<f32> {
        inter_camera_loss(
            features,
            camera_ids,
            cluster_labels,
            registry,
            memory,
            &self.config,
            &mut self.rng,
        )
    }

    pub fn inter_backward<M: ProxyMemory + ?Sized>(
        &mut self,
        features: &Features,
        camera_ids: &[i64],
        cluster_labels: &[i64],
        registry: &LabelRegistry,
        memory: &M,
        grads: &mut LossGradients,
    ) -> Result<f32> {
        inter_camera_loss_backward(
            features,
            camera_ids,
            cluster_labels,
            registry,
            memory,
            &self.config,
            &mut self.rng,
            grads,
        )
    }
}
