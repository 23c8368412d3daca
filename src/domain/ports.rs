//! Domain Ports - Collaborator trait definitions for the agent
//!
//! These traits define the boundaries between the reconciliation engine and
//! the host. Adapters in [`crate::host`] implement them against the real
//! storage stack; tests substitute in-memory fakes.

use crate::error::{Error, Result};
use crate::model::{
    LogicalVolume, NamespaceKind, NamespaceMode, PhysicalVolume, PmemRegions, ResourceKind,
    ResourceRule, VolumeGroup,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Node Context
// =============================================================================

/// Identity of the node the agent runs on, resolved once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeContext {
    /// Kubernetes node name
    pub node_name: String,
    /// Node labels used by rule selectors
    pub labels: BTreeMap<String, String>,
}

impl NodeContext {
    pub fn new(node_name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            node_name: node_name.into(),
            labels,
        }
    }
}

// =============================================================================
// Command Runner Port
// =============================================================================

/// Captured result of a host command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub status: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Port for running host commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a shell command and capture its combined output regardless of
    /// exit status. Fails only when the command cannot be started.
    async fn execute(&self, command: &str) -> Result<CommandOutput>;

    /// Run a shell command, failing on a non-zero exit status
    async fn run(&self, command: &str) -> Result<String> {
        let out = self.execute(command).await?;
        if out.success() {
            Ok(out.output)
        } else {
            Err(Error::Command {
                command: command.to_string(),
                output: out.output,
            })
        }
    }
}

// =============================================================================
// Mount Port
// =============================================================================

/// Port for directory, formatting and mount operations
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Create the directory and its parents if missing
    async fn ensure_folder(&self, path: &str) -> Result<()>;

    /// Whether a path exists on the host
    fn file_exists(&self, path: &str) -> bool;

    /// Mount `source` on `target`, formatting it first when it carries no
    /// filesystem. Fails with [`Error::ExistsFormat`] when the device holds a
    /// filesystem other than `fstype`.
    async fn format_and_mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        format_options: &[String],
        mount_options: &str,
    ) -> Result<()>;

    /// Whether `target` is currently a mount point
    async fn is_mounted(&self, target: &str) -> Result<bool>;
}

// =============================================================================
// LVM Port
// =============================================================================

/// Port for logical volume manager operations
#[async_trait]
pub trait LvmManager: Send + Sync {
    /// List logical volumes matching `list_spec` (e.g. `vg/lv`, or empty for all)
    async fn list_logical_volumes(&self, list_spec: &str) -> Result<Vec<LogicalVolume>>;

    /// List volume groups
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>>;

    /// List physical volumes that belong to a volume group
    async fn list_physical_volumes(&self) -> Result<Vec<PhysicalVolume>>;

    /// Create a volume group from the given physical volumes
    async fn create_volume_group(
        &self,
        name: &str,
        physical_volumes: &[String],
        tags: &[String],
    ) -> Result<String>;

    /// Add physical volumes to an existing volume group
    async fn extend_volume_group(&self, name: &str, physical_volumes: &[String])
        -> Result<String>;
}

// =============================================================================
// Persistent Memory Port
// =============================================================================

/// Port for persistent memory namespace and tiering operations
#[async_trait]
pub trait PmemManager: Send + Sync {
    /// List all regions with their namespaces
    async fn list_regions(&self) -> Result<PmemRegions>;

    /// Carve a new namespace out of `region`
    async fn create_namespace(&self, region: &str, kind: NamespaceKind) -> Result<()>;

    /// Whether the device backs a physical volume or carries a filesystem.
    ///
    /// Fails with [`Error::UsageUnknown`] when either cannot be determined.
    async fn check_namespace_used(&self, device_path: &str) -> Result<bool>;

    /// Resolve the single namespace of `region` in `mode` to
    /// `(device_path, namespace_name)`.
    ///
    /// Fails with [`Error::NamespaceCount`] unless the region holds exactly
    /// one namespace, and with [`Error::NamespaceMode`] when that namespace
    /// is in another mode.
    async fn resolve_namespace_device_path(
        &self,
        region: &str,
        mode: NamespaceMode,
    ) -> Result<(String, String)>;

    /// Online a dax character device as system memory
    async fn tier_to_memory(&self, char_dev: &str) -> Result<()>;

    /// Whether the dax character device is already system memory
    async fn is_memory_tiered(&self, char_dev: &str) -> Result<bool>;
}

// =============================================================================
// Event Port
// =============================================================================

/// Severity of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Normal => write!(f, "Normal"),
            EventKind::Warning => write!(f, "Warning"),
        }
    }
}

/// Port for publishing audit events; delivery is best effort
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, kind: EventKind, reason: &str, message: &str);
}

// =============================================================================
// Inventory and Config Ports
// =============================================================================

/// Port for enumerating the node's local data disks
pub trait LocalDiskInventory: Send + Sync {
    fn local_disks(&self) -> Result<Vec<String>>;
}

/// Port for resolving the node's labels
#[async_trait]
pub trait NodeInfoSource: Send + Sync {
    async fn node_labels(&self, node_name: &str) -> Result<BTreeMap<String, String>>;
}

/// Port for loading declarative rules
#[async_trait]
pub trait RuleLoader: Send + Sync {
    /// Load the rules of one kind; a missing document yields no rules
    async fn load_rules(&self, kind: ResourceKind) -> Result<Vec<ResourceRule>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CommandRunnerRef = Arc<dyn CommandRunner>;
pub type MounterRef = Arc<dyn Mounter>;
pub type LvmManagerRef = Arc<dyn LvmManager>;
pub type PmemManagerRef = Arc<dyn PmemManager>;
pub type EventRecorderRef = Arc<dyn EventRecorder>;
pub type LocalDiskInventoryRef = Arc<dyn LocalDiskInventory>;
pub type RuleLoaderRef = Arc<dyn RuleLoader>;

/// The set of host collaborators handed to each reconciler
#[derive(Clone)]
pub struct HostTools {
    pub mounter: MounterRef,
    pub lvm: LvmManagerRef,
    pub pmem: PmemManagerRef,
    pub events: EventRecorderRef,
    pub local_disks: LocalDiskInventoryRef,
}
