//! Node Resource Manager - Node-local storage agent
//!
//! A per-node agent that reads declarative rules and converges the node's
//! storage resources toward them: LVM volume groups, project-quota mount
//! paths, and persistent memory regions onlined as system memory.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                           │
//! │            (periodic sweep, one kind at a time)               │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────────┐  │
//! │  │ VolumeGroup   │  │  QuotaPath    │  │  Memory           │  │
//! │  │ Reconciler    │  │  Reconciler   │  │  Reconciler       │  │
//! │  └───────┬───────┘  └───────┬───────┘  └─────────┬─────────┘  │
//! │          └──────────────────┼────────────────────┘            │
//! │                   ┌─────────┴─────────┐                       │
//! │                   │  PMEM Lifecycle   │                       │
//! │                   └───────────────────┘                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │                       Host Adapters                           │
//! │   lvm / ndctl / daxctl / mount / mkfs  (via nsenter)          │
//! │   sysfs disks / Kubernetes nodes and events                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Agent settings and the rule file loader
//! - [`domain`]: Ports implemented by the host adapters
//! - [`error`]: Error types and condition classification
//! - [`host`]: Production adapters for the node's tools
//! - [`model`]: Rules, LVM records and persistent memory records
//! - [`reconcile`]: Per-kind reconcilers and the sweep orchestrator

pub mod config;
pub mod domain;
pub mod error;
pub mod host;
pub mod model;
pub mod reconcile;

// Re-export commonly used types
pub use config::{AgentConfig, FileRuleLoader};

pub use domain::ports::{
    CommandRunner, EventKind, EventRecorder, HostTools, LocalDiskInventory, LvmManager,
    Mounter, NodeContext, NodeInfoSource, PmemManager, RuleLoader,
};

pub use error::{ConditionKind, Error, Result};

pub use model::{ResourceKind, ResourceRule, RuleDocument, Selector, SelectorOperator, Topology};

pub use reconcile::{
    Action, ItemOutcome, MemoryReconciler, Orchestrator, QuotaPathReconciler, Reconciler,
    SweepMetrics, SweepReport, VolumeGroupReconciler,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
