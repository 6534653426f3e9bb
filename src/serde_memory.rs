//! Proxy state snapshots (feature: `serde`).
//!
//! A snapshot pairs a memory bank with the label registry it was built against, so a
//! loss call can be replayed offline. The on-disk format is versioned and does not
//! mirror internal structs; loading validates shapes, label ranges and finiteness.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, LabelRegistry, MemoryBank, ProxyMemory, Result};

pub const PROXY_STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedProxyState {
    pub format_version: u32,
    pub dim: usize,
    /// Row-major `(proxies, dim)`.
    pub storage: Vec<f32>,
    pub cluster: Vec<i64>,
    pub camid: Vec<i64>,
    pub abs_proxy: Vec<usize>,
}

impl SerializedProxyState {
    pub fn new(memory: &MemoryBank, registry: &LabelRegistry) -> Self {
        Self {
            format_version: PROXY_STATE_FORMAT_VERSION,
            dim: memory.dim(),
            storage: memory.storage().to_vec(),
            cluster: registry.cluster().to_vec(),
            camid: registry.camid().to_vec(),
            abs_proxy: registry.abs_proxy().to_vec(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.format_version != PROXY_STATE_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported proxy state format_version {}; expected {}",
                self.format_version, PROXY_STATE_FORMAT_VERSION
            )));
        }
        if self.dim == 0 {
            return Err(Error::InvalidData("dim must be > 0".to_owned()));
        }
        if !self.storage.len().is_multiple_of(self.dim) {
            return Err(Error::InvalidData(format!(
                "storage length {} is not divisible by dim {}",
                self.storage.len(),
                self.dim
            )));
        }
        if self.storage.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "storage must contain only finite values".to_owned(),
            ));
        }
        if self.cluster.len() != self.camid.len() || self.cluster.len() != self.abs_proxy.len() {
            return Err(Error::InvalidData(format!(
                "registry arrays must have equal length: cluster={} camid={} abs_proxy={}",
                self.cluster.len(),
                self.camid.len(),
                self.abs_proxy.len()
            )));
        }
        let proxies = self.storage.len() / self.dim;
        if let Some(&label) = self.abs_proxy.iter().find(|&&p| p >= proxies) {
            return Err(Error::UnknownProxy {
                label,
                len: proxies,
            });
        }
        Ok(())
    }

    /// Validate and split into a memory bank and a registry.
    pub fn into_parts(self) -> Result<(MemoryBank, LabelRegistry)> {
        self.validate()?;
        let memory = MemoryBank::from_flat(self.storage, self.dim)?;
        let registry = LabelRegistry::new(self.cluster, self.camid, self.abs_proxy)?;
        Ok((memory, registry))
    }

    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidData(format!("failed to serialize proxy state: {e}")))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let state: Self = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse proxy state json: {e}")))?;
        state.validate()?;
        Ok(state)
    }

    /// Save as pretty-printed JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", p.display())))?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::InvalidData(format!("failed to read {}: {e}", p.display())))?;
        Self::from_json_str(&s)
    }
}
