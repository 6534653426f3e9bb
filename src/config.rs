//! Loss hyperparameters.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_TEMPERATURE: f32 = 0.07;
pub const DEFAULT_K: usize = 10;
pub const DEFAULT_NEGATIVE_CAP: usize = 100;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Nearest-neighbor strategy for hard negative mining.
///
/// Both backends return identical neighbors (same distances, same tie-break).
pub enum KnnBackend {
    /// Stable sort of all candidate distances.
    #[default]
    Sort,
    /// k-d tree index built over the candidates.
    KdTree,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// How the inter-camera loss turns similarities into log-probabilities.
pub enum Normalization {
    /// `log(exp(s) / sum(exp(s)))`, evaluated literally.
    ///
    /// Overflows once `s` gets large (small temperatures, unnormalized features).
    #[default]
    ExpLog,
    /// `s - logsumexp(s)`. Equal to `ExpLog` in exact arithmetic.
    LogSumExp,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Optional random down-sampling of the negative candidate set.
pub struct NegativeSampling {
    pub reduce: bool,
    /// Upper bound on candidates kept when `reduce` is on.
    pub cap: usize,
}

impl Default for NegativeSampling {
    fn default() -> Self {
        Self {
            reduce: false,
            cap: DEFAULT_NEGATIVE_CAP,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossConfig {
    pub temperature: f32,
    /// Number of hard negatives mined per sample.
    pub k: usize,
    pub negatives: NegativeSampling,
    pub knn: KnnBackend,
    pub normalization: Normalization,
    /// Fail instead of returning fewer than `k` negatives.
    pub strict_k: bool,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            k: DEFAULT_K,
            negatives: NegativeSampling::default(),
            knn: KnnBackend::default(),
            normalization: Normalization::default(),
            strict_k: false,
        }
    }
}

impl LossConfig {
    pub fn validate(&self) -> Result<()> {
        validate_temperature(self.temperature)?;
        if self.k == 0 {
            return Err(Error::InvalidConfig("k must be > 0".to_owned()));
        }
        if self.negatives.reduce && self.negatives.cap == 0 {
            return Err(Error::InvalidConfig(
                "negative sampling cap must be > 0".to_owned(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_temperature(temperature: f32) -> Result<()> {
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "temperature must be finite and > 0, got {temperature}"
        )));
    }
    Ok(())
}
