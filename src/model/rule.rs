//! Declarative Resource Rules
//!
//! The config document schema: one rule per volume group, quota path or
//! memory tier, each guarded by a node label selector.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Resource Kinds
// =============================================================================

/// The resource kinds reconciled by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    VolumeGroup,
    QuotaPath,
    Memory,
}

impl ResourceKind {
    /// Top-level key of the config document, also its file name
    pub fn config_key(&self) -> &'static str {
        match self {
            ResourceKind::VolumeGroup => "volumegroup",
            ResourceKind::QuotaPath => "quotapath",
            ResourceKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config_key())
    }
}

// =============================================================================
// Selector
// =============================================================================

/// Label selector operator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    /// Anything else; never matches
    Unknown(String),
}

impl Default for SelectorOperator {
    fn default() -> Self {
        SelectorOperator::Unknown(String::new())
    }
}

impl From<String> for SelectorOperator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "In" => SelectorOperator::In,
            "NotIn" => SelectorOperator::NotIn,
            "Exists" => SelectorOperator::Exists,
            "DoesNotExist" => SelectorOperator::DoesNotExist,
            _ => SelectorOperator::Unknown(s),
        }
    }
}

impl From<SelectorOperator> for String {
    fn from(op: SelectorOperator) -> Self {
        match op {
            SelectorOperator::In => "In".to_string(),
            SelectorOperator::NotIn => "NotIn".to_string(),
            SelectorOperator::Exists => "Exists".to_string(),
            SelectorOperator::DoesNotExist => "DoesNotExist".to_string(),
            SelectorOperator::Unknown(s) => s,
        }
    }
}

impl std::fmt::Display for SelectorOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from(self.clone()))
    }
}

/// Node label predicate of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Selector {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(default)]
    #[schemars(with = "String")]
    pub operator: SelectorOperator,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

// =============================================================================
// Topology
// =============================================================================

/// Backing of a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopologyType {
    /// Explicit block devices
    Device,
    /// Local disks enumerated on the node
    LocalDisk,
    /// Persistent volume claims (recognised, not supported)
    Pvc,
    /// Persistent memory regions
    Pmem,
    Unknown(String),
}

impl TopologyType {
    pub fn parse(s: &str) -> Self {
        match s {
            "device" => TopologyType::Device,
            "alibabacloud-local-disk" | "local-disk" => TopologyType::LocalDisk,
            "pvc" => TopologyType::Pvc,
            "pmem" => TopologyType::Pmem,
            other => TopologyType::Unknown(other.to_string()),
        }
    }
}

/// Where the resource comes from and how it is formatted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Topology {
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub topology_type: String,

    /// Mount options
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub options: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fstype: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<std::collections::BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
}

impl Topology {
    pub fn kind(&self) -> TopologyType {
        TopologyType::parse(&self.topology_type)
    }
}

// =============================================================================
// Rules
// =============================================================================

/// One declarative entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceRule {
    /// Volume group name, mount path or memory entry name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(flatten)]
    pub selector: Selector,

    #[serde(default)]
    pub topology: Topology,
}

/// A config file; each file carries the list for one kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuleDocument {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumegroup: Vec<ResourceRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quotapath: Vec<ResourceRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory: Vec<ResourceRule>,
}

impl RuleDocument {
    pub fn into_rules(self, kind: ResourceKind) -> Vec<ResourceRule> {
        match kind {
            ResourceKind::VolumeGroup => self.volumegroup,
            ResourceKind::QuotaPath => self.quotapath,
            ResourceKind::Memory => self.memory,
        }
    }
}
