//! Reconciliation Engine
//!
//! Each resource kind is reconciled in two phases: the desired state is
//! computed from the rules that select this node, then it is diffed against
//! the host and the missing pieces are applied. Every item yields an
//! [`ItemOutcome`] so a sweep reports what it did and what it skipped.

pub mod lifecycle;
pub mod memory;
pub mod orchestrator;
pub mod quota_path;
pub mod selector;
pub mod volume_group;

#[cfg(test)]
pub mod testing;

pub use lifecycle::{PmemLifecycle, RegionState, ResolvedNamespace};
pub use memory::MemoryReconciler;
pub use orchestrator::{Orchestrator, SweepMetrics};
pub use quota_path::QuotaPathReconciler;
pub use selector::{matches, rule_matches};
pub use volume_group::VolumeGroupReconciler;

use crate::error::{ConditionKind, Error, Result};
use crate::model::{ResourceKind, ResourceRule};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Actions and Outcomes
// =============================================================================

/// A corrective step taken (or found unnecessary) for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    /// The item already matches the desired state
    NoOp,
    CreateVolumeGroup {
        name: String,
        physical_volumes: Vec<String>,
    },
    ExtendVolumeGroup {
        name: String,
        physical_volumes: Vec<String>,
    },
    FormatAndMount {
        device: String,
        mount_path: String,
        fstype: String,
    },
    TierToMemory {
        region: String,
        char_dev: String,
    },
}

impl Action {
    pub fn is_noop(&self) -> bool {
        matches!(self, Action::NoOp)
    }
}

/// Result of reconciling one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ItemOutcome {
    Applied(Action),
    /// Reported and skipped; the next sweep retries
    Recoverable {
        condition: ConditionKind,
        message: String,
    },
    /// The item is left untouched until the host or config changes
    Fatal {
        condition: ConditionKind,
        message: String,
    },
}

impl ItemOutcome {
    pub fn from_error(err: &Error) -> Self {
        let condition = err.condition();
        let message = err.to_string();
        if err.is_recoverable() {
            ItemOutcome::Recoverable { condition, message }
        } else {
            ItemOutcome::Fatal { condition, message }
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Applied(Action::NoOp) => "noop",
            ItemOutcome::Applied(_) => "applied",
            ItemOutcome::Recoverable { .. } => "recoverable",
            ItemOutcome::Fatal { .. } => "fatal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    /// Volume group name, mount path, region or device
    pub item: String,
    pub outcome: ItemOutcome,
}

/// Per-item outcomes of one phase for one resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub kind: ResourceKind,
    pub items: Vec<ItemReport>,
}

impl SweepReport {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    pub fn applied(&mut self, item: impl Into<String>, action: Action) {
        self.items.push(ItemReport {
            item: item.into(),
            outcome: ItemOutcome::Applied(action),
        });
    }

    pub fn failed(&mut self, item: impl Into<String>, err: &Error) {
        self.items.push(ItemReport {
            item: item.into(),
            outcome: ItemOutcome::from_error(err),
        });
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.items.extend(other.items);
    }

    /// Actions applied in this phase, no-ops included
    pub fn actions(&self) -> Vec<&Action> {
        self.items
            .iter()
            .filter_map(|i| match &i.outcome {
                ItemOutcome::Applied(action) => Some(action),
                _ => None,
            })
            .collect()
    }

    /// Outcome recorded for `item`, the last one when several exist
    pub fn outcome(&self, item: &str) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .rev()
            .find(|i| i.item == item)
            .map(|i| &i.outcome)
    }

    pub fn count(&self, label: &str) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome.label() == label)
            .count()
    }
}

// =============================================================================
// Reconciler Capability
// =============================================================================

/// One resource kind's two-phase reconciliation
#[async_trait]
pub trait Reconciler: Send {
    fn kind(&self) -> ResourceKind;

    /// Replace the desired state with what `rules` ask of a node carrying
    /// `labels`. Items that cannot be admitted are reported and skipped.
    async fn analyse_desired_state(
        &mut self,
        rules: &[ResourceRule],
        labels: &BTreeMap<String, String>,
    ) -> Result<SweepReport>;

    /// Diff the desired state against the host and apply the missing parts.
    /// Fails only when the actual state cannot be determined at all.
    async fn apply_diff(&mut self) -> Result<SweepReport>;
}

// =============================================================================
// Set Helpers
// =============================================================================

/// Elements of `a` missing from `b`, in `a`'s order without repeats
pub fn difference(a: &[String], b: &[String]) -> Vec<String> {
    let exclude: BTreeSet<&String> = b.iter().collect();
    let mut seen = BTreeSet::new();
    a.iter()
        .filter(|x| !exclude.contains(x) && seen.insert(*x))
        .cloned()
        .collect()
}
