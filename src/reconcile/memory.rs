//! Memory Tier Reconciler
//!
//! Onlines persistent memory regions as system memory through a devdax
//! namespace.

use crate::domain::ports::PmemManagerRef;
use crate::error::{Error, Result};
use crate::model::{char_dev_name, NamespaceMode, ResourceKind, ResourceRule};
use crate::reconcile::lifecycle::PmemLifecycle;
use crate::reconcile::selector::rule_matches;
use crate::reconcile::{Action, Reconciler, SweepReport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{error, info};

/// One region to expose as memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub region: String,
    pub topology_type: String,
}

pub struct MemoryReconciler {
    lifecycle: PmemLifecycle,
    entries: Vec<MemoryEntry>,
}

impl MemoryReconciler {
    pub fn new(pmem: PmemManagerRef) -> Self {
        Self {
            lifecycle: PmemLifecycle::new(pmem),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    async fn apply_entry(&self, entry: &MemoryEntry) -> Result<Action> {
        let resolved = self
            .lifecycle
            .ensure_namespace(&entry.region, NamespaceMode::Devdax)
            .await?;
        let char_dev = char_dev_name(&resolved.device_path);

        if !self.lifecycle.convert_to_memory_tier(char_dev).await? {
            return Ok(Action::NoOp);
        }
        Ok(Action::TierToMemory {
            region: entry.region.clone(),
            char_dev: char_dev.to_string(),
        })
    }
}

#[async_trait]
impl Reconciler for MemoryReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Memory
    }

    async fn analyse_desired_state(
        &mut self,
        rules: &[ResourceRule],
        labels: &BTreeMap<String, String>,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::new(self.kind());
        let mut entries = Vec::new();

        for rule in rules.iter().filter(|r| rule_matches(r, labels)) {
            let regions = &rule.topology.regions;
            if regions.len() != 1 {
                let err = Error::Configuration(format!(
                    "memory rule {} needs exactly one region, got {:?}",
                    rule.name, regions
                ));
                error!("{}", err);
                report.failed(rule.name.as_str(), &err);
                continue;
            }
            entries.push(MemoryEntry {
                region: regions[0].clone(),
                topology_type: rule.topology.topology_type.clone(),
            });
        }

        self.entries = entries;
        Ok(report)
    }

    async fn apply_diff(&mut self) -> Result<SweepReport> {
        let mut report = SweepReport::new(self.kind());

        for entry in &self.entries {
            match self.apply_entry(entry).await {
                Ok(action) => {
                    if !action.is_noop() {
                        info!("Region {} exposed as system memory", entry.region);
                    }
                    report.applied(entry.region.as_str(), action);
                }
                Err(e) => {
                    error!("Memory region {}: {}", entry.region, e);
                    report.failed(entry.region.as_str(), &e);
                }
            }
        }

        Ok(report)
    }
}
