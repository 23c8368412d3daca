//! Persistent Memory Tools Adapter
//!
//! Region and namespace management through `ndctl`, memory tiering through
//! `daxctl`, and the in-use check run before a namespace is handed to LVM.

use crate::domain::ports::{CommandRunnerRef, PmemManager};
use crate::error::{Error, Result};
use crate::model::pmem::{DaxDevice, NamespaceKind, NamespaceMode, PmemRegions};
use async_trait::async_trait;
use tracing::{error, info};

/// Persistent memory manager backed by ndctl and daxctl
pub struct NodePmem {
    runner: CommandRunnerRef,
}

impl NodePmem {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self { runner }
    }

    async fn region_listing(&self, region: &str) -> Result<PmemRegions> {
        let out = self
            .runner
            .run(&format!("ndctl list -RN -r {}", region))
            .await?;
        PmemRegions::parse(&out)
    }

    /// Whether `pvs` reports the device as a physical volume
    async fn backs_physical_volume(&self, device_path: &str) -> Result<bool> {
        let cmd = format!(
            "pvs {} 2>&1 | grep -v \"Failed to \" | grep /dev | awk '{{print $2}}' | wc -l",
            device_path
        );
        let out = self.runner.run(&cmd).await?;
        Ok(out.trim() != "0")
    }

    /// Filesystem type on the device, `None` when no signature is found
    async fn filesystem_type(&self, device_path: &str) -> Result<Option<String>> {
        let sniff = self
            .runner
            .run(&format!("file -bsL {}", device_path))
            .await?;
        if sniff.trim() == "data" {
            return Ok(None);
        }

        let out = self
            .runner
            .run(&format!("blkid -c /dev/null -o export {}", device_path))
            .await?;
        parse_blkid_type(&out).map(Some)
    }
}

/// Extract `TYPE` from `blkid -o export` output
pub fn parse_blkid_type(output: &str) -> Result<String> {
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::MalformedRecord(format!("cannot parse blkid output line '{}'", line))
        })?;
        if key == "TYPE" {
            return Ok(value.to_string());
        }
    }
    Err(Error::MalformedRecord(
        "blkid output carries no TYPE".to_string(),
    ))
}

#[async_trait]
impl PmemManager for NodePmem {
    async fn list_regions(&self) -> Result<PmemRegions> {
        let out = self.runner.run("ndctl list -RN").await?;
        PmemRegions::parse(&out)
    }

    async fn create_namespace(&self, region: &str, kind: NamespaceKind) -> Result<()> {
        let cmd = match kind {
            NamespaceKind::General => format!("ndctl create-namespace -r {}", region),
            NamespaceKind::Dax => format!("ndctl create-namespace -r {} --mode=devdax", region),
        };

        if let Err(e) = self.runner.run(&cmd).await {
            error!("Create namespace for region {} failed: {}", region, e);
            return Err(e);
        }
        info!("Created {} namespace for region {}", kind, region);
        Ok(())
    }

    async fn check_namespace_used(&self, device_path: &str) -> Result<bool> {
        let unknown = |e: Error| Error::UsageUnknown {
            device: device_path.to_string(),
            reason: e.to_string(),
        };

        if self.backs_physical_volume(device_path).await.map_err(unknown)? {
            info!("Namespace device {} is used as a physical volume", device_path);
            return Ok(true);
        }

        match self.filesystem_type(device_path).await.map_err(unknown)? {
            Some(fstype) if !fstype.is_empty() => {
                info!("Namespace device {} is formatted as {}", device_path, fstype);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve_namespace_device_path(
        &self,
        region: &str,
        mode: NamespaceMode,
    ) -> Result<(String, String)> {
        let listing = self.region_listing(region).await?;
        let found = listing.regions.first().ok_or_else(|| Error::RegionNotFound {
            region: region.to_string(),
        })?;

        if found.namespaces.len() != 1 {
            return Err(Error::NamespaceCount {
                region: region.to_string(),
                count: found.namespaces.len(),
            });
        }

        let namespace = &found.namespaces[0];
        if namespace.mode != mode.as_str() {
            return Err(Error::NamespaceMode {
                region: region.to_string(),
                namespace: namespace.dev.clone(),
                actual: namespace.mode.clone(),
                expected: mode.to_string(),
            });
        }

        Ok((namespace.device_path(mode), namespace.dev.clone()))
    }

    async fn tier_to_memory(&self, char_dev: &str) -> Result<()> {
        self.runner
            .run(&format!("daxctl reconfigure-device -m system-ram {}", char_dev))
            .await?;
        info!("Reconfigured {} as system memory", char_dev);
        Ok(())
    }

    async fn is_memory_tiered(&self, char_dev: &str) -> Result<bool> {
        let out = self.runner.run("daxctl list").await?;
        let devices = DaxDevice::parse_list(&out)?;
        Ok(devices
            .iter()
            .any(|d| d.chardev == char_dev && d.is_system_ram()))
    }
}
