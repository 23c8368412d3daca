//! Persistent Memory Lifecycle
//!
//! Drives a region through
//! `NoNamespace -> NamespaceExists -> DeviceResolved -> {InUse | Available} -> MemoryTiered`.
//! Namespace creation happens only from `NoNamespace`; a region with several
//! namespaces or one in the wrong mode stays where it is and the caller skips
//! it for this sweep.

use crate::domain::ports::PmemManagerRef;
use crate::error::Result;
use crate::model::{NamespaceMode, PmemRegions};
use tracing::{debug, info, warn};

/// Where a region stands in the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    NoNamespace,
    NamespaceExists,
    DeviceResolved,
    InUse,
    Available,
    MemoryTiered,
}

/// A region resolved to its single namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNamespace {
    pub region: String,
    pub namespace: String,
    pub device_path: String,
    /// The namespace was created during this call
    pub created: bool,
    /// States passed through, in order
    pub states: Vec<RegionState>,
}

/// Region and namespace operations shared by the reconcilers
#[derive(Clone)]
pub struct PmemLifecycle {
    pmem: PmemManagerRef,
}

impl PmemLifecycle {
    pub fn new(pmem: PmemManagerRef) -> Self {
        Self { pmem }
    }

    pub async fn list_regions(&self) -> Result<PmemRegions> {
        self.pmem.list_regions().await
    }

    /// Resolve `region` to its device in `mode`, creating the namespace when
    /// the region has none.
    pub async fn ensure_namespace(
        &self,
        region: &str,
        mode: NamespaceMode,
    ) -> Result<ResolvedNamespace> {
        let mut states = Vec::new();
        let mut created = false;
        let (device_path, namespace) =
            match self.pmem.resolve_namespace_device_path(region, mode).await {
                Ok(resolved) => resolved,
                Err(e) if e.is_missing_namespace() => {
                    states.push(RegionState::NoNamespace);
                    debug!("Region {} is in state {:?}", region, RegionState::NoNamespace);
                    self.pmem
                        .create_namespace(region, mode.creation_kind())
                        .await?;
                    created = true;
                    self.pmem.resolve_namespace_device_path(region, mode).await?
                }
                Err(e) => {
                    warn!("Region {} cannot be resolved in {} mode: {}", region, mode, e);
                    return Err(e);
                }
            };

        states.push(RegionState::NamespaceExists);
        debug!(
            "Region {} is in state {:?}: {}",
            region,
            RegionState::NamespaceExists,
            namespace
        );
        states.push(RegionState::DeviceResolved);
        debug!(
            "Region {} is in state {:?}: {}",
            region,
            RegionState::DeviceResolved,
            device_path
        );
        Ok(ResolvedNamespace {
            region: region.to_string(),
            namespace,
            device_path,
            created,
            states,
        })
    }

    /// `InUse` when the device backs a physical volume or carries a
    /// filesystem. A device whose usage cannot be read is never `Available`.
    pub async fn check_in_use(&self, device_path: &str) -> Result<RegionState> {
        let state = if self.pmem.check_namespace_used(device_path).await? {
            RegionState::InUse
        } else {
            RegionState::Available
        };
        debug!("Device {} is in state {:?}", device_path, state);
        Ok(state)
    }

    /// Online the dax device as system memory unless it already is.
    /// Returns whether the device was reconfigured.
    pub async fn convert_to_memory_tier(&self, char_dev: &str) -> Result<bool> {
        if self.pmem.is_memory_tiered(char_dev).await? {
            debug!("Device {} is in state {:?}", char_dev, RegionState::MemoryTiered);
            return Ok(false);
        }
        self.pmem.tier_to_memory(char_dev).await?;
        info!("Device {} tiered to system memory", char_dev);
        Ok(true)
    }
}
