//! Camera-aware proxy contrastive losses.
//!
//! `cam-aware-loss` computes the two loss terms used to train a re-identification
//! embedding model with camera-aware proxies:
//!
//! - **intra-camera**: per camera, classify each sample against the proxies seen by
//!   that camera in the batch ([`intra_camera_loss`]).
//! - **inter-camera**: pull each sample toward proxies of its cluster seen by *other*
//!   cameras and away from its `k` nearest proxies of other clusters
//!   ([`inter_camera_loss`]).
//!
//! Every loss has a `*_backward` variant that fills [`LossGradients`] with
//! `dL/d(features)` and `dL/d(memory)`.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`.
//! - [`Features`] and [`MemoryBank`] store vectors contiguously in row-major layout.
//! - Absolute proxy labels are `usize` row indices into the memory bank.
//! - Cluster labels and camera ids are `i64`.
//!
//! # Panics vs `Result`
//!
//! Public loss and retrieval functions validate shapes, labels and hyperparameters and
//! return [`Result`]. Lower-level helpers ([`knn::KdTree`], [`linalg`]) assert their
//! contracts and panic on misuse.
//!
//! # Quick start
//!
//! ```rust
//! use cam_aware_loss::{Features, LabelRegistry, LossConfig, MemoryBank};
//! use rand::SeedableRng;
//!
//! # fn main() -> cam_aware_loss::Result<()> {
//! let memory = MemoryBank::from_rows(&[
//!     vec![1.0, 0.0],
//!     vec![0.8, 0.2],
//!     vec![0.0, 1.0],
//!     vec![-1.0, 0.0],
//! ])?;
//! // (cluster, camera, proxy) for every training sample.
//! let registry = LabelRegistry::from_records(&[(0, 0, 0), (0, 1, 1), (1, 0, 2), (2, 1, 3)]);
//!
//! let features = Features::from_rows(&[vec![0.9, 0.1], vec![0.7, 0.3]])?;
//! let intra = cam_aware_loss::intra_camera_loss(&features, &["a_0", "b_1"], &[0, 1], &memory, 0.07)?;
//!
//! let cfg = LossConfig { k: 2, ..LossConfig::default() };
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let inter = cam_aware_loss::inter_camera_loss(
//!     &features, &[0, 1], &[0, 0], &registry, &memory, &cfg, &mut rng,
//! )?;
//! assert!(intra >= 0.0 && inter >= 0.0);
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod config;
pub mod data;
pub mod error;
pub mod inter;
pub mod intra;
pub mod knn;
pub mod linalg;
pub mod loss;
pub mod mapping;
pub mod memory;
pub mod objective;
pub mod retrieval;

#[cfg(feature = "serde")]
pub mod serde_memory;

pub use camera::{parse_camera_id, parse_camera_ids};
pub use config::{KnnBackend, LossConfig, NegativeSampling, Normalization};
pub use data::{Features, LabelRegistry};
pub use error::{Error, Result};
pub use inter::{inter_camera_loss, inter_camera_loss_backward, inter_camera_loss_with};
pub use intra::{intra_camera_loss, intra_camera_loss_backward, intra_camera_loss_with_ids};
pub use knn::{KNearest, KdTree, KdTreeKnn, Neighbor, SortKnn};
pub use loss::{LossGradients, proxy_loss, proxy_loss_backward};
pub use mapping::ProxyIndexMap;
pub use memory::{MemoryBank, ProxyMemory};
pub use objective::CameraAwareLoss;
pub use retrieval::{
    ProxySet, retrieve_k_negative_proxies, retrieve_k_negative_proxies_batch,
    retrieve_positive_proxies, retrieve_positive_proxies_batch,
};
