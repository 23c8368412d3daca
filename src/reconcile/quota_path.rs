//! Quota Path Reconciler
//!
//! Mounts a device or a persistent memory namespace at each configured path,
//! formatting it with project quota support when it is blank.

use crate::domain::ports::{EventKind, HostTools};
use crate::error::{Error, Result};
use crate::model::{NamespaceMode, ResourceKind, ResourceRule, TopologyType};
use crate::reconcile::lifecycle::PmemLifecycle;
use crate::reconcile::selector::rule_matches;
use crate::reconcile::{Action, Reconciler, SweepReport};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Event reason for devices carrying a foreign filesystem
pub const REASON_EXISTS_FORMAT: &str = "ExistsFormatErr";

/// Options injected into every format invocation
pub fn quota_format_options() -> Vec<String> {
    vec!["-O".to_string(), "project,quota".to_string()]
}

/// How one mount path is backed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPathConfig {
    /// Candidate devices, device topology only
    pub devices: Vec<String>,
    /// Backing region, pmem topology only
    pub region: Option<String>,
    pub fstype: String,
    pub options: String,
}

pub struct QuotaPathReconciler {
    tools: HostTools,
    lifecycle: PmemLifecycle,
    device_paths: BTreeMap<String, QuotaPathConfig>,
    region_paths: BTreeMap<String, QuotaPathConfig>,
}

impl QuotaPathReconciler {
    pub fn new(tools: HostTools) -> Self {
        let lifecycle = PmemLifecycle::new(tools.pmem.clone());
        Self {
            tools,
            lifecycle,
            device_paths: BTreeMap::new(),
            region_paths: BTreeMap::new(),
        }
    }

    pub fn device_paths(&self) -> &BTreeMap<String, QuotaPathConfig> {
        &self.device_paths
    }

    pub fn region_paths(&self) -> &BTreeMap<String, QuotaPathConfig> {
        &self.region_paths
    }

    async fn mount(
        &self,
        device: &str,
        mount_path: &str,
        config: &QuotaPathConfig,
    ) -> Result<Action> {
        self.tools.mounter.ensure_folder(mount_path).await?;

        let result = self
            .tools
            .mounter
            .format_and_mount(
                device,
                mount_path,
                &config.fstype,
                &quota_format_options(),
                &config.options,
            )
            .await;

        if let Err(e @ Error::ExistsFormat { .. }) = &result {
            self.tools
                .events
                .record(EventKind::Warning, REASON_EXISTS_FORMAT, &e.to_string())
                .await;
        }
        result?;

        info!("Mounted {} on quota path {}", device, mount_path);
        Ok(Action::FormatAndMount {
            device: device.to_string(),
            mount_path: mount_path.to_string(),
            fstype: config.fstype.clone(),
        })
    }

    async fn apply_device_path(
        &self,
        mount_path: &str,
        config: &QuotaPathConfig,
    ) -> Result<Action> {
        if self.tools.mounter.is_mounted(mount_path).await? {
            debug!("Quota path {} already mounted", mount_path);
            return Ok(Action::NoOp);
        }

        let device = config
            .devices
            .iter()
            .find(|d| self.tools.mounter.file_exists(d))
            .ok_or_else(|| Error::DeviceNotFound {
                device: config.devices.join(","),
            })?;

        self.mount(device, mount_path, config).await
    }

    async fn apply_region_path(
        &self,
        mount_path: &str,
        config: &QuotaPathConfig,
    ) -> Result<Action> {
        let region = config.region.as_deref().unwrap_or_default();
        let resolved = self
            .lifecycle
            .ensure_namespace(region, NamespaceMode::Fsdax)
            .await?;

        if self.tools.mounter.is_mounted(mount_path).await? {
            debug!("Quota path {} already mounted", mount_path);
            return Ok(Action::NoOp);
        }

        self.mount(&resolved.device_path, mount_path, config).await
    }
}

#[async_trait]
impl Reconciler for QuotaPathReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::QuotaPath
    }

    async fn analyse_desired_state(
        &mut self,
        rules: &[ResourceRule],
        labels: &BTreeMap<String, String>,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::new(self.kind());
        let mut device_paths = BTreeMap::new();
        let mut region_paths = BTreeMap::new();
        let mut seen = BTreeSet::new();

        for rule in rules.iter().filter(|r| rule_matches(r, labels)) {
            if seen.contains(&rule.name) {
                let err = Error::DuplicateConfig {
                    name: rule.name.clone(),
                };
                warn!("{}", err);
                report.failed(rule.name.as_str(), &err);
                continue;
            }

            let topology = &rule.topology;
            let mut config = QuotaPathConfig {
                devices: Vec::new(),
                region: None,
                fstype: topology.fstype.clone(),
                options: topology.options.clone(),
            };

            match topology.kind() {
                TopologyType::Device => {
                    config.devices = topology.devices.clone();
                    device_paths.insert(rule.name.clone(), config);
                }
                TopologyType::Pmem => {
                    if topology.regions.len() != 1 {
                        let err = Error::Configuration(format!(
                            "quota path {} needs exactly one region, got {:?}",
                            rule.name, topology.regions
                        ));
                        error!("{}", err);
                        report.failed(rule.name.as_str(), &err);
                        continue;
                    }
                    config.region = topology.regions.first().cloned();
                    region_paths.insert(rule.name.clone(), config);
                }
                other => {
                    let err = Error::UnsupportedTopology {
                        kind: self.kind().to_string(),
                        name: rule.name.clone(),
                        topology: match other {
                            TopologyType::Unknown(t) => t,
                            _ => topology.topology_type.clone(),
                        },
                    };
                    error!("{}", err);
                    report.failed(rule.name.as_str(), &err);
                    continue;
                }
            }
            seen.insert(rule.name.clone());
        }

        self.device_paths = device_paths;
        self.region_paths = region_paths;
        Ok(report)
    }

    async fn apply_diff(&mut self) -> Result<SweepReport> {
        let mut report = SweepReport::new(self.kind());

        for (mount_path, config) in &self.device_paths {
            match self.apply_device_path(mount_path, config).await {
                Ok(action) => report.applied(mount_path.as_str(), action),
                Err(e) => {
                    error!("Quota path {}: {}", mount_path, e);
                    report.failed(mount_path.as_str(), &e);
                }
            }
        }

        for (mount_path, config) in &self.region_paths {
            match self.apply_region_path(mount_path, config).await {
                Ok(action) => report.applied(mount_path.as_str(), action),
                Err(e) => {
                    error!("Quota path {}: {}", mount_path, e);
                    report.failed(mount_path.as_str(), &e);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConditionKind;
    use crate::model::{RuleDocument, Selector, SelectorOperator, Topology};
    use crate::host::NodeMounter;
    use crate::reconcile::testing::{FakeHost, ScriptedRunner};
    use crate::reconcile::ItemOutcome;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("bar".to_string(), "foo".to_string())])
    }

    fn pmem_rule(name: &str, regions: &[&str]) -> ResourceRule {
        ResourceRule {
            name: name.to_string(),
            selector: Selector {
                key: "bar".into(),
                operator: SelectorOperator::Exists,
                value: String::new(),
            },
            topology: Topology {
                topology_type: "pmem".into(),
                fstype: "ext4".into(),
                options: "prjquota".into(),
                regions: regions.iter().map(|r| r.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    const DEVICE_DOC: &str = r#"
quotapath:
- name: /mnt/path1
  key: bar
  operator: In
  value: foo
  topology:
    type: device
    options: prjquota
    fstype: ext4
    devices:
    - /dev/vdc
    - /dev/vdd
"#;

    fn device_rules() -> Vec<ResourceRule> {
        let doc: RuleDocument = serde_yaml::from_str(DEVICE_DOC).unwrap();
        doc.into_rules(ResourceKind::QuotaPath)
    }

    #[tokio::test]
    async fn test_device_path_mounts_first_existing_device() {
        let host = FakeHost::new();
        host.add_path("/dev/vdc");
        let mut reconciler = QuotaPathReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&device_rules(), &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_eq!(
            report.actions(),
            vec![&Action::FormatAndMount {
                device: "/dev/vdc".into(),
                mount_path: "/mnt/path1".into(),
                fstype: "ext4".into(),
            }]
        );
        assert_eq!(
            host.calls_with_prefix("mounter."),
            vec![
                "mounter.is_mounted /mnt/path1".to_string(),
                "mounter.ensure_folder /mnt/path1".to_string(),
                "mounter.format_and_mount /dev/vdc /mnt/path1 ext4 -O project,quota prjquota"
                    .to_string(),
            ]
        );
        assert!(!host.calls().iter().any(|c| c.contains("/dev/vdd")));
    }

    #[tokio::test]
    async fn test_device_path_is_idempotent() {
        let host = FakeHost::new();
        host.add_path("/dev/vdc");
        let mut reconciler = QuotaPathReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&device_rules(), &labels())
            .await
            .unwrap();
        reconciler.apply_diff().await.unwrap();
        let second = reconciler.apply_diff().await.unwrap();
        let third = reconciler.apply_diff().await.unwrap();

        assert_eq!(second.actions(), vec![&Action::NoOp]);
        assert_eq!(second, third);
        assert_eq!(host.count_calls("mounter.format_and_mount"), 1);
    }

    #[tokio::test]
    async fn test_node_mounter_second_sweep_is_noop() {
        let device = tempfile::NamedTempFile::new().unwrap();
        let device_path = device.path().display().to_string();
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_once("cat /proc/mounts", "/dev/vda1 / ext4 rw 0 0\n");
        let mounted = format!(
            "/dev/vda1 / ext4 rw 0 0\n{} /mnt/path1 ext4 rw,prjquota 0 0\n",
            device_path
        );
        runner.respond("cat /proc/mounts", &mounted);

        let host = FakeHost::new();
        let mut tools = host.tools();
        tools.mounter = Arc::new(NodeMounter::new(runner.clone()));
        let mut reconciler = QuotaPathReconciler::new(tools);

        let rule = ResourceRule {
            name: "/mnt/path1".to_string(),
            selector: Selector {
                key: "bar".into(),
                operator: SelectorOperator::Exists,
                value: String::new(),
            },
            topology: Topology {
                topology_type: "device".into(),
                fstype: "ext4".into(),
                options: "prjquota".into(),
                devices: vec![device_path.clone()],
                ..Default::default()
            },
        };
        reconciler
            .analyse_desired_state(&[rule], &labels())
            .await
            .unwrap();

        let first = reconciler.apply_diff().await.unwrap();
        assert_matches!(
            first.outcome("/mnt/path1"),
            Some(ItemOutcome::Applied(Action::FormatAndMount { .. }))
        );
        let issued = runner.commands().len();

        let second = reconciler.apply_diff().await.unwrap();
        assert_eq!(
            second.outcome("/mnt/path1"),
            Some(&ItemOutcome::Applied(Action::NoOp))
        );
        assert_eq!(runner.commands()[issued..], ["cat /proc/mounts".to_string()]);
    }

    #[tokio::test]
    async fn test_foreign_filesystem_raises_event() {
        let host = FakeHost::new();
        host.add_path("/dev/vdc");
        host.set_filesystem("/dev/vdc", "xfs");
        let mut reconciler = QuotaPathReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&device_rules(), &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_matches!(
            report.outcome("/mnt/path1"),
            Some(ItemOutcome::Fatal {
                condition: ConditionKind::ForeignFilesystem,
                ..
            })
        );
        let events = host.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EventKind::Warning);
        assert_eq!(events[0].1, REASON_EXISTS_FORMAT);
    }

    #[tokio::test]
    async fn test_no_existing_device_is_recoverable() {
        let host = FakeHost::new();
        let mut reconciler = QuotaPathReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&device_rules(), &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_matches!(report.outcome("/mnt/path1"), Some(ItemOutcome::Recoverable { .. }));
        assert_eq!(host.count_calls("mounter.format_and_mount"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_mount_path_first_wins() {
        let host = FakeHost::new();
        let mut reconciler = QuotaPathReconciler::new(host.tools());

        let mut rules = device_rules();
        rules.push(pmem_rule("/mnt/path1", &["region0"]));
        rules.push(pmem_rule("/mnt/path2", &["region0", "region1"]));
        let report = reconciler
            .analyse_desired_state(&rules, &labels())
            .await
            .unwrap();

        assert!(reconciler.device_paths().contains_key("/mnt/path1"));
        assert!(reconciler.region_paths().is_empty());
        assert_eq!(report.count("recoverable"), 2);
        assert_matches!(
            report.outcome("/mnt/path2"),
            Some(ItemOutcome::Recoverable {
                condition: ConditionKind::Configuration,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_region_path_creates_namespace_then_mounts() {
        let host = FakeHost::new();
        host.add_region("region0");
        let mut reconciler = QuotaPathReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&[pmem_rule("/mnt/pmem", &["region0"])], &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_eq!(
            host.calls_with_prefix("pmem."),
            vec![
                "pmem.resolve_namespace_device_path region0 fsdax".to_string(),
                "pmem.create_namespace region0 lvm".to_string(),
                "pmem.resolve_namespace_device_path region0 fsdax".to_string(),
            ]
        );
        assert_eq!(
            report.actions(),
            vec![&Action::FormatAndMount {
                device: "/dev/pmem0".into(),
                mount_path: "/mnt/pmem".into(),
                fstype: "ext4".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_region_path_skipped_when_resolution_still_fails() {
        let host = FakeHost::new();
        host.add_region("region0");
        host.ignore_namespace_creation();
        let mut reconciler = QuotaPathReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&[pmem_rule("/mnt/pmem", &["region0"])], &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_eq!(host.count_calls("pmem.create_namespace"), 1);
        assert_eq!(host.count_calls("pmem.resolve_namespace_device_path"), 2);
        assert_eq!(host.calls_with_prefix("mounter."), Vec::<String>::new());
        assert_matches!(report.outcome("/mnt/pmem"), Some(ItemOutcome::Recoverable { .. }));
    }
}
