//! Persistent Memory Records
//!
//! Region and namespace listings produced by `ndctl list -RN`, device
//! listings produced by `daxctl list`, and the pure name transforms between
//! regions, namespaces and device paths.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Length of the `region` prefix stripped when deriving a namespace name
const REGION_PREFIX_LEN: usize = "region".len();

/// daxctl mode of a device onlined as system memory
pub const SYSTEM_RAM_MODE: &str = "system-ram";

// =============================================================================
// Namespace Modes
// =============================================================================

/// Mode a namespace is resolved in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceMode {
    /// Block device (`/dev/pmemN`) for filesystems and LVM
    Fsdax,
    /// Character device (`/dev/daxN.M`) for memory tiering
    Devdax,
}

impl NamespaceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceMode::Fsdax => "fsdax",
            NamespaceMode::Devdax => "devdax",
        }
    }

    /// Creation strategy that yields a namespace in this mode
    pub fn creation_kind(&self) -> NamespaceKind {
        match self {
            NamespaceMode::Fsdax => NamespaceKind::General,
            NamespaceMode::Devdax => NamespaceKind::Dax,
        }
    }
}

impl std::fmt::Display for NamespaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a new namespace is carved out of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// ndctl default mode, used for volume groups and quota paths
    General,
    /// `--mode=devdax`, used for memory tiering
    Dax,
}

impl std::fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceKind::General => write!(f, "lvm"),
            NamespaceKind::Dax => write!(f, "dax"),
        }
    }
}

// =============================================================================
// ndctl Records
// =============================================================================

/// `ndctl list -RN` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmemRegions {
    #[serde(default)]
    pub regions: Vec<PmemRegion>,
}

/// One persistent memory region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmemRegion {
    pub dev: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub available_size: i64,
    #[serde(default)]
    pub max_available_extent: i64,
    #[serde(default, rename = "type")]
    pub region_type: String,
    #[serde(default)]
    pub iset_id: i64,
    #[serde(default)]
    pub persistence_domain: String,
    #[serde(default)]
    pub namespaces: Vec<PmemNamespace>,
}

/// One namespace carved from a region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmemNamespace {
    #[serde(default)]
    pub dev: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default, rename = "map")]
    pub map_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub uuid: String,
    #[serde(default, rename = "sectorsize")]
    pub sector_size: i64,
    #[serde(default)]
    pub align: i64,
    #[serde(default, rename = "blockdev")]
    pub block_dev: String,
    #[serde(default, rename = "chardev")]
    pub char_dev: String,
    #[serde(default)]
    pub name: String,
}

impl PmemNamespace {
    /// Host device path for this namespace in the given mode
    pub fn device_path(&self, mode: NamespaceMode) -> String {
        match mode {
            NamespaceMode::Fsdax => format!("/dev/{}", self.block_dev),
            NamespaceMode::Devdax => format!("/dev/{}", self.char_dev),
        }
    }
}

impl PmemRegions {
    /// Parse a region listing. ndctl prints an object with a `regions` key
    /// when several regions exist and a bare array otherwise.
    pub fn parse(output: &str) -> Result<Self> {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        if trimmed.starts_with('[') {
            let regions: Vec<PmemRegion> = serde_json::from_str(trimmed)?;
            return Ok(Self { regions });
        }
        if trimmed.contains("\"regions\"") {
            return Ok(serde_json::from_str(trimmed)?);
        }
        let region: PmemRegion = serde_json::from_str(trimmed)?;
        Ok(Self {
            regions: vec![region],
        })
    }

    pub fn find(&self, region: &str) -> Option<&PmemRegion> {
        self.regions.iter().find(|r| r.dev == region)
    }
}

// =============================================================================
// daxctl Records
// =============================================================================

/// One entry of `daxctl list`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaxDevice {
    pub chardev: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub target_node: i32,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub movable: bool,
}

impl DaxDevice {
    /// Parse `daxctl list` output; a single device is printed as an object
    pub fn parse_list(output: &str) -> Result<Vec<Self>> {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if trimmed.starts_with('[') {
            return Ok(serde_json::from_str(trimmed)?);
        }
        Ok(vec![serde_json::from_str(trimmed)?])
    }

    pub fn is_system_ram(&self) -> bool {
        self.mode == SYSTEM_RAM_MODE
    }
}

// =============================================================================
// Name Transforms
// =============================================================================

/// `region0` -> `namespace0.0`
pub fn region_to_namespace(region: &str) -> String {
    let index = region.get(REGION_PREFIX_LEN..).unwrap_or_default();
    format!("namespace{}.0", index)
}

/// `/dev/dax0.0` -> `dax0.0`
pub fn char_dev_name(device_path: &str) -> &str {
    device_path.strip_prefix("/dev/").unwrap_or(device_path)
}
