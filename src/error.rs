//! Error types for the Node Resource Manager
//!
//! Provides structured error types for the reconcilers, the LVM row parser,
//! the persistent-memory lifecycle and the host tool adapters.

use serde::Serialize;
use thiserror::Error;

/// Unified error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported topology type '{topology}' for {kind} rule {name}")]
    UnsupportedTopology {
        kind: String,
        name: String,
        topology: String,
    },

    #[error("Duplicate configuration for {name}, first occurrence wins")]
    DuplicateConfig { name: String },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to resolve node {node}: {reason}")]
    NodeIdentity { node: String, reason: String },

    // =========================================================================
    // Host Command Errors
    // =========================================================================
    #[error("Failed to run cmd: {command}, with out: {output}")]
    Command { command: String, output: String },

    #[error("Failed to mount {source_path} on {target}: {reason}")]
    Mount {
        source_path: String,
        target: String,
        reason: String,
    },

    #[error(
        "Failed to mount the volume as {fstype}, volume already contains {existing}, mount error: {mount_error}"
    )]
    ExistsFormat {
        fstype: String,
        existing: String,
        mount_error: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("incorrect attrs block size, expected 10, got {len} in {attrs}")]
    AttributeLength { len: usize, attrs: String },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Resolution Errors
    // =========================================================================
    #[error("Device [{device}] not exists in current node")]
    DeviceNotFound { device: String },

    #[error("Region {region} not exists in current node")]
    RegionNotFound { region: String },

    #[error("Region {region} has {count} namespaces, expected exactly one")]
    NamespaceCount { region: String, count: usize },

    #[error("Namespace {namespace} in region {region} has mode {actual}, expected {expected}")]
    NamespaceMode {
        region: String,
        namespace: String,
        actual: String,
        expected: String,
    },

    #[error("Region {region} device {device} is already in use")]
    RegionInUse { region: String, device: String },

    #[error("Cannot tell whether device {device} is in use: {reason}")]
    UsageUnknown { device: String, reason: String },

    // =========================================================================
    // Refusals
    // =========================================================================
    #[error(
        "VolumeGroup {name}: removing physical volumes {removed:?} is not supported"
    )]
    ShrinkRefused { name: String, removed: Vec<String> },

    #[error("VolumeGroup {name}: devices {devices:?} are used by another consumer")]
    DeviceConflict { name: String, devices: Vec<String> },

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a failure, used to decide how a sweep reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    /// Bad or conflicting declarative config
    Configuration,
    /// A device, region or namespace could not be resolved
    Resolution,
    /// Host tool output could not be interpreted
    Parse,
    /// Device carries a filesystem other than the requested one
    ForeignFilesystem,
    /// A destructive or conflicting change was refused
    Refusal,
    /// A host command or API call failed
    Execution,
    /// Unrecoverable for the whole process
    Fatal,
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionKind::Configuration => write!(f, "configuration"),
            ConditionKind::Resolution => write!(f, "resolution"),
            ConditionKind::Parse => write!(f, "parse"),
            ConditionKind::ForeignFilesystem => write!(f, "foreign-filesystem"),
            ConditionKind::Refusal => write!(f, "refusal"),
            ConditionKind::Execution => write!(f, "execution"),
            ConditionKind::Fatal => write!(f, "fatal"),
        }
    }
}

impl Error {
    /// Map this error onto the condition taxonomy
    pub fn condition(&self) -> ConditionKind {
        match self {
            Error::Configuration(_)
            | Error::UnsupportedTopology { .. }
            | Error::DuplicateConfig { .. }
            | Error::YamlParse(_) => ConditionKind::Configuration,

            Error::DeviceNotFound { .. }
            | Error::RegionNotFound { .. }
            | Error::NamespaceCount { .. }
            | Error::NamespaceMode { .. }
            | Error::RegionInUse { .. }
            | Error::UsageUnknown { .. } => ConditionKind::Resolution,

            Error::MalformedRecord(_) | Error::AttributeLength { .. } | Error::JsonParse(_) => {
                ConditionKind::Parse
            }

            Error::ExistsFormat { .. } => ConditionKind::ForeignFilesystem,

            Error::ShrinkRefused { .. } | Error::DeviceConflict { .. } => ConditionKind::Refusal,

            Error::NodeIdentity { .. } => ConditionKind::Fatal,

            Error::Internal(_)
            | Error::Kube(_)
            | Error::Command { .. }
            | Error::Mount { .. }
            | Error::Io(_) => ConditionKind::Execution,
        }
    }

    /// Recoverable conditions are reported but do not mark the item failed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.condition(),
            ConditionKind::Configuration | ConditionKind::Resolution
        )
    }

    /// Whether the region resolution failed only because no namespace exists yet
    pub fn is_missing_namespace(&self) -> bool {
        matches!(self, Error::NamespaceCount { count: 0, .. })
    }
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, Error>;
