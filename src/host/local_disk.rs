//! Local Disk Inventory
//!
//! Enumerates whole local block devices from sysfs for the `local-disk`
//! volume group topology.

use crate::domain::ports::LocalDiskInventory;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the local disk inventory
#[derive(Debug, Clone)]
pub struct LocalDiskConfig {
    /// Only devices whose name starts with this prefix are considered
    pub name_prefix: String,
    /// Device names never offered, e.g. the system disk
    pub exclude: Vec<String>,
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
}

impl Default for LocalDiskConfig {
    fn default() -> Self {
        Self {
            name_prefix: "vd".to_string(),
            exclude: vec!["vda".to_string()],
            sysfs_path: PathBuf::from("/sys"),
        }
    }
}

// =============================================================================
// Sysfs Inventory
// =============================================================================

/// Lists local data disks from `/sys/class/block`
pub struct SysfsDiskInventory {
    config: LocalDiskConfig,
}

impl SysfsDiskInventory {
    pub fn new(config: LocalDiskConfig) -> Self {
        Self { config }
    }

    /// Partitions have a "partition" file
    fn is_partition(&self, sysfs_path: &Path) -> bool {
        sysfs_path.join("partition").exists()
    }

    fn should_include_device(&self, name: &str) -> bool {
        const VIRTUAL_PREFIXES: [&str; 5] = ["loop", "ram", "dm-", "md", "zram"];
        if VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return false;
        }
        if !name.starts_with(&self.config.name_prefix) {
            return false;
        }
        !self.config.exclude.iter().any(|e| e == name)
    }
}

impl LocalDiskInventory for SysfsDiskInventory {
    fn local_disks(&self) -> Result<Vec<String>> {
        let block_path = self.config.sysfs_path.join("class/block");
        if !block_path.exists() {
            return Err(Error::Internal(format!(
                "Block device sysfs not found at {}",
                block_path.display()
            )));
        }

        let mut disks = Vec::new();
        for entry in fs::read_dir(&block_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            if !self.should_include_device(&name) || self.is_partition(&entry.path()) {
                continue;
            }
            disks.push(format!("/dev/{}", name));
        }

        disks.sort();
        debug!("Local disks found: {:?}", disks);
        Ok(disks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(devices: &[(&str, bool)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, partition) in devices {
            let dev = dir.path().join("class/block").join(name);
            fs::create_dir_all(&dev).unwrap();
            if *partition {
                fs::write(dev.join("partition"), "1\n").unwrap();
            }
        }
        dir
    }

    #[test]
    fn test_should_include_device() {
        let inventory = SysfsDiskInventory::new(LocalDiskConfig::default());

        assert!(inventory.should_include_device("vdb"));
        assert!(!inventory.should_include_device("vda"));
        assert!(!inventory.should_include_device("sda"));
        assert!(!inventory.should_include_device("loop0"));
        assert!(!inventory.should_include_device("dm-0"));
    }

    #[test]
    fn test_local_disks_from_sysfs() {
        let sysfs = fake_sysfs(&[
            ("vda", false),
            ("vda1", true),
            ("vdc", false),
            ("vdb", false),
            ("vdb1", true),
            ("loop0", false),
        ]);
        let inventory = SysfsDiskInventory::new(LocalDiskConfig {
            sysfs_path: sysfs.path().to_path_buf(),
            ..Default::default()
        });

        assert_eq!(inventory.local_disks().unwrap(), vec!["/dev/vdb", "/dev/vdc"]);
    }

    #[test]
    fn test_missing_sysfs_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = SysfsDiskInventory::new(LocalDiskConfig {
            sysfs_path: dir.path().join("nope"),
            ..Default::default()
        });
        assert!(inventory.local_disks().is_err());
    }
}
