//! Volume Group Reconciler
//!
//! Builds volume groups from explicit devices, local disks or persistent
//! memory regions. Groups only ever grow: a group that would lose members
//! is refused and left as it is.

use crate::domain::ports::{EventKind, HostTools};
use crate::error::{Error, Result};
use crate::model::{NamespaceMode, PmemRegions, ResourceKind, ResourceRule, TopologyType};
use crate::reconcile::lifecycle::{PmemLifecycle, RegionState};
use crate::reconcile::selector::rule_matches;
use crate::reconcile::{difference, Action, Reconciler, SweepReport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Event reason for configured devices absent from the node
pub const REASON_DEVICE_NOT_EXISTS: &str = "DeviceNotExists";

/// Decide how a group converges: create, extend with the missing members,
/// or nothing. Refuses when `actual` holds members `desired` does not.
pub fn plan_group(name: &str, desired: &[String], actual: Option<&Vec<String>>) -> Result<Action> {
    let Some(actual) = actual else {
        return Ok(Action::CreateVolumeGroup {
            name: name.to_string(),
            physical_volumes: difference(desired, &[]),
        });
    };

    let removed = difference(actual, desired);
    if !removed.is_empty() {
        return Err(Error::ShrinkRefused {
            name: name.to_string(),
            removed,
        });
    }

    let added = difference(desired, actual);
    if added.is_empty() {
        return Ok(Action::NoOp);
    }
    Ok(Action::ExtendVolumeGroup {
        name: name.to_string(),
        physical_volumes: added,
    })
}

pub struct VolumeGroupReconciler {
    tools: HostTools,
    lifecycle: PmemLifecycle,
    /// group name -> physical volumes
    device_groups: BTreeMap<String, Vec<String>>,
    /// group name -> regions
    region_groups: BTreeMap<String, Vec<String>>,
}

impl VolumeGroupReconciler {
    pub fn new(tools: HostTools) -> Self {
        let lifecycle = PmemLifecycle::new(tools.pmem.clone());
        Self {
            tools,
            lifecycle,
            device_groups: BTreeMap::new(),
            region_groups: BTreeMap::new(),
        }
    }

    pub fn device_groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.device_groups
    }

    pub fn region_groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.region_groups
    }

    /// Configured devices present on the node; absent ones raise an event
    async fn existing_devices(&self, devices: &[String], report: &mut SweepReport) -> Vec<String> {
        let mut exists = Vec::new();
        for device in devices {
            if self.tools.mounter.file_exists(device) {
                exists.push(device.clone());
                continue;
            }
            let err = Error::DeviceNotFound {
                device: device.clone(),
            };
            self.tools
                .events
                .record(EventKind::Normal, REASON_DEVICE_NOT_EXISTS, &err.to_string())
                .await;
            report.failed(device.as_str(), &err);
        }
        exists
    }

    fn existing_regions(
        &self,
        regions: &[String],
        listing: &PmemRegions,
        report: &mut SweepReport,
    ) -> Vec<String> {
        let mut exists = Vec::new();
        for region in regions {
            if listing.find(region).is_some() {
                exists.push(region.clone());
            } else {
                report.failed(
                    region.as_str(),
                    &Error::RegionNotFound {
                        region: region.clone(),
                    },
                );
            }
        }
        exists
    }

    async fn execute(&self, action: &Action) -> Result<()> {
        match action {
            Action::CreateVolumeGroup {
                name,
                physical_volumes,
            } => {
                info!("Creating volume group {} from {:?}", name, physical_volumes);
                self.tools
                    .lvm
                    .create_volume_group(name, physical_volumes, &[])
                    .await?;
            }
            Action::ExtendVolumeGroup {
                name,
                physical_volumes,
            } => {
                info!("Extending volume group {} with {:?}", name, physical_volumes);
                self.tools
                    .lvm
                    .extend_volume_group(name, physical_volumes)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Plan and execute one group, recording the outcome
    async fn converge(
        &self,
        name: &str,
        desired: &[String],
        actual: &BTreeMap<String, Vec<String>>,
        report: &mut SweepReport,
    ) {
        let result = match plan_group(name, desired, actual.get(name)) {
            Ok(action) => self.execute(&action).await.map(|_| action),
            Err(e) => Err(e),
        };

        match result {
            Ok(action) => report.applied(name, action),
            Err(e) => {
                error!("Volume group {}: {}", name, e);
                report.failed(name, &e);
            }
        }
    }

    /// Members of other groups among `devices`
    fn claimed_elsewhere(
        name: &str,
        devices: &[String],
        actual: &BTreeMap<String, Vec<String>>,
    ) -> Vec<String> {
        devices
            .iter()
            .filter(|d| {
                actual
                    .iter()
                    .any(|(group, pvs)| group != name && pvs.contains(d))
            })
            .cloned()
            .collect()
    }

    async fn apply_device_groups(
        &self,
        actual: &BTreeMap<String, Vec<String>>,
        report: &mut SweepReport,
    ) {
        for (name, desired) in &self.device_groups {
            debug!("Volume group {} desires {:?}", name, desired);

            let conflicts = Self::claimed_elsewhere(name, desired, actual);
            if !conflicts.is_empty() {
                let err = Error::DeviceConflict {
                    name: name.clone(),
                    devices: conflicts,
                };
                error!("{}", err);
                report.failed(name.as_str(), &err);
                continue;
            }

            self.converge(name, desired, actual, report).await;
        }
    }

    async fn apply_region_groups(
        &self,
        actual: &BTreeMap<String, Vec<String>>,
        report: &mut SweepReport,
    ) {
        'groups: for (name, regions) in &self.region_groups {
            debug!("Volume group {} desires regions {:?}", name, regions);

            let mut resolved = Vec::new();
            for region in regions {
                match self
                    .lifecycle
                    .ensure_namespace(region, NamespaceMode::Fsdax)
                    .await
                {
                    Ok(namespace) => resolved.push(namespace),
                    Err(e) => {
                        error!("Volume group {} skipped, region {}: {}", name, region, e);
                        report.failed(name.as_str(), &e);
                        continue 'groups;
                    }
                }
            }

            let members = actual.get(name).cloned().unwrap_or_default();
            for namespace in resolved.iter().filter(|ns| !members.contains(&ns.device_path)) {
                let err = match self.lifecycle.check_in_use(&namespace.device_path).await {
                    Ok(RegionState::InUse) => Error::RegionInUse {
                        region: namespace.region.clone(),
                        device: namespace.device_path.clone(),
                    },
                    Ok(_) => continue,
                    Err(e) => e,
                };
                error!("Volume group {} skipped, region {}: {}", name, namespace.region, err);
                report.failed(name.as_str(), &err);
                continue 'groups;
            }

            let devices: Vec<String> = resolved.into_iter().map(|ns| ns.device_path).collect();
            self.converge(name, &devices, actual, report).await;
        }
    }
}

#[async_trait]
impl Reconciler for VolumeGroupReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VolumeGroup
    }

    async fn analyse_desired_state(
        &mut self,
        rules: &[ResourceRule],
        labels: &BTreeMap<String, String>,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::new(self.kind());
        let mut device_groups = BTreeMap::new();
        let mut region_groups = BTreeMap::new();
        let mut regions: Option<PmemRegions> = None;

        for rule in rules {
            let matched = rule_matches(rule, labels);
            debug!("Volume group rule {} matched: {}", rule.name, matched);
            if !matched {
                continue;
            }
            if device_groups.contains_key(&rule.name) || region_groups.contains_key(&rule.name) {
                let err = Error::DuplicateConfig {
                    name: rule.name.clone(),
                };
                warn!("{}", err);
                report.failed(rule.name.as_str(), &err);
                continue;
            }

            let topology = &rule.topology;
            match topology.kind() {
                TopologyType::Device => {
                    let devices = self.existing_devices(&topology.devices, &mut report).await;
                    if devices.is_empty() {
                        warn!("Volume group {} has no device on this node", rule.name);
                        continue;
                    }
                    device_groups.insert(rule.name.clone(), devices);
                }
                TopologyType::LocalDisk => match self.tools.local_disks.local_disks() {
                    Ok(disks) if !disks.is_empty() => {
                        device_groups.insert(rule.name.clone(), disks);
                    }
                    Ok(_) => warn!("Volume group {} has no local disk on this node", rule.name),
                    Err(e) => {
                        error!("Local disk inventory failed for {}: {}", rule.name, e);
                        report.failed(rule.name.as_str(), &e);
                    }
                },
                TopologyType::Pmem => {
                    if regions.is_none() {
                        match self.lifecycle.list_regions().await {
                            Ok(listing) => regions = Some(listing),
                            Err(e) => {
                                error!("Listing pmem regions failed: {}", e);
                                report.failed(rule.name.as_str(), &e);
                                continue;
                            }
                        }
                    }
                    let Some(listing) = regions.as_ref() else {
                        continue;
                    };
                    let present = self.existing_regions(&topology.regions, listing, &mut report);
                    if present.is_empty() {
                        continue;
                    }
                    region_groups.insert(rule.name.clone(), present);
                }
                TopologyType::Pvc => {
                    info!("Volume group {}: pvc topology is not supported, skipped", rule.name);
                }
                TopologyType::Unknown(topology_type) => {
                    let err = Error::UnsupportedTopology {
                        kind: self.kind().to_string(),
                        name: rule.name.clone(),
                        topology: topology_type,
                    };
                    error!("{}", err);
                    report.failed(rule.name.as_str(), &err);
                }
            }
        }

        self.device_groups = device_groups;
        self.region_groups = region_groups;
        Ok(report)
    }

    async fn apply_diff(&mut self) -> Result<SweepReport> {
        let mut report = SweepReport::new(self.kind());

        let mut actual: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pv in self.tools.lvm.list_physical_volumes().await? {
            actual.entry(pv.vg_name).or_default().push(pv.name);
        }

        self.apply_device_groups(&actual, &mut report).await;
        self.apply_region_groups(&actual, &mut report).await;

        info!(
            "Volume group sweep finished: {} items",
            report.items.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConditionKind;
    use crate::model::{Selector, SelectorOperator, Topology};
    use crate::reconcile::testing::FakeHost;
    use crate::reconcile::ItemOutcome;
    use assert_matches::assert_matches;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("bar".to_string(), "foo".to_string())])
    }

    fn rule(name: &str, topology_type: &str, devices: &[&str], regions: &[&str]) -> ResourceRule {
        ResourceRule {
            name: name.to_string(),
            selector: Selector {
                key: "bar".into(),
                operator: SelectorOperator::In,
                value: "foo".into(),
            },
            topology: Topology {
                topology_type: topology_type.to_string(),
                devices: strings(devices),
                regions: strings(regions),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_plan_extend_only() {
        let desired = strings(&["pv1", "pv2"]);
        let actual = strings(&["pv1"]);
        assert_eq!(
            plan_group("vg0", &desired, Some(&actual)).unwrap(),
            Action::ExtendVolumeGroup {
                name: "vg0".into(),
                physical_volumes: strings(&["pv2"]),
            }
        );

        let err = plan_group("vg0", &actual, Some(&desired)).unwrap_err();
        assert_matches!(
            err,
            Error::ShrinkRefused { ref removed, .. } if removed == &strings(&["pv2"])
        );

        assert_eq!(plan_group("vg0", &desired, Some(&desired)).unwrap(), Action::NoOp);
        assert_matches!(
            plan_group("vg0", &desired, None).unwrap(),
            Action::CreateVolumeGroup { .. }
        );
    }

    #[test]
    fn test_plan_create_lists_each_device_once() {
        let desired = strings(&["/dev/vdb", "/dev/vdc", "/dev/vdb"]);
        assert_eq!(
            plan_group("vg0", &desired, None).unwrap(),
            Action::CreateVolumeGroup {
                name: "vg0".into(),
                physical_volumes: strings(&["/dev/vdb", "/dev/vdc"]),
            }
        );
    }

    #[tokio::test]
    async fn test_analyse_filters_missing_devices() {
        let host = FakeHost::new();
        host.add_path("/dev/vdb");
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        let report = reconciler
            .analyse_desired_state(
                &[rule("vg0", "device", &["/dev/vdb", "/dev/vdc"], &[])],
                &labels(),
            )
            .await
            .unwrap();

        assert_eq!(reconciler.device_groups()["vg0"], strings(&["/dev/vdb"]));
        assert_matches!(
            report.outcome("/dev/vdc"),
            Some(ItemOutcome::Recoverable {
                condition: ConditionKind::Resolution,
                ..
            })
        );
        assert_eq!(host.events()[0].1, REASON_DEVICE_NOT_EXISTS);
    }

    #[tokio::test]
    async fn test_analyse_topology_kinds() {
        let host = FakeHost::new();
        host.set_local_disks(&["/dev/vdd", "/dev/vde"]);
        host.add_region("region0");
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        let mut unmatched = rule("vg9", "device", &["/dev/vdb"], &[]);
        unmatched.selector.value = "other".into();
        let rules = vec![
            rule("local", "alibabacloud-local-disk", &[], &[]),
            rule("pmemvg", "pmem", &[], &["region0", "region5"]),
            rule("claims", "pvc", &[], &[]),
            rule("nfs", "nfs", &[], &[]),
            unmatched,
        ];
        let report = reconciler
            .analyse_desired_state(&rules, &labels())
            .await
            .unwrap();

        assert_eq!(reconciler.device_groups()["local"], strings(&["/dev/vdd", "/dev/vde"]));
        assert_eq!(reconciler.region_groups()["pmemvg"], strings(&["region0"]));
        assert!(!reconciler.device_groups().contains_key("claims"));
        assert!(!reconciler.device_groups().contains_key("vg9"));
        assert_matches!(report.outcome("region5"), Some(ItemOutcome::Recoverable { .. }));
        assert_matches!(
            report.outcome("nfs"),
            Some(ItemOutcome::Recoverable {
                condition: ConditionKind::Configuration,
                ..
            })
        );
        assert!(report.outcome("claims").is_none());
    }

    #[tokio::test]
    async fn test_apply_creates_then_noops() {
        let host = FakeHost::new();
        host.add_path("/dev/vdb");
        host.add_path("/dev/vdc");
        let mut reconciler = VolumeGroupReconciler::new(host.tools());
        let rules = [rule("vg0", "device", &["/dev/vdb", "/dev/vdc"], &[])];

        reconciler.analyse_desired_state(&rules, &labels()).await.unwrap();
        let first = reconciler.apply_diff().await.unwrap();
        assert_eq!(
            first.actions(),
            vec![&Action::CreateVolumeGroup {
                name: "vg0".into(),
                physical_volumes: strings(&["/dev/vdb", "/dev/vdc"]),
            }]
        );

        let second = reconciler.apply_diff().await.unwrap();
        assert!(second.actions().iter().all(|a| a.is_noop()));
        let third = reconciler.apply_diff().await.unwrap();
        assert_eq!(second, third);
        assert_eq!(host.count_calls("lvm.create_volume_group"), 1);
    }

    #[tokio::test]
    async fn test_apply_extends_with_missing_members_only() {
        let host = FakeHost::new();
        host.add_path("/dev/vdb");
        host.add_path("/dev/vdc");
        host.add_physical_volume("vg0", "/dev/vdb");
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(
                &[rule("vg0", "device", &["/dev/vdb", "/dev/vdc"], &[])],
                &labels(),
            )
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_eq!(
            report.actions(),
            vec![&Action::ExtendVolumeGroup {
                name: "vg0".into(),
                physical_volumes: strings(&["/dev/vdc"]),
            }]
        );
        assert!(host
            .calls()
            .contains(&"lvm.extend_volume_group vg0 /dev/vdc".to_string()));
    }

    #[tokio::test]
    async fn test_apply_refuses_shrink() {
        let host = FakeHost::new();
        host.add_path("/dev/vdb");
        host.add_physical_volume("vg0", "/dev/vdb");
        host.add_physical_volume("vg0", "/dev/vdc");
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&[rule("vg0", "device", &["/dev/vdb"], &[])], &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_matches!(
            report.outcome("vg0"),
            Some(ItemOutcome::Fatal {
                condition: ConditionKind::Refusal,
                ..
            })
        );
        assert_eq!(host.count_calls("lvm.extend_volume_group"), 0);
        assert_eq!(host.count_calls("lvm.create_volume_group"), 0);
    }

    #[tokio::test]
    async fn test_apply_refuses_device_of_another_group() {
        let host = FakeHost::new();
        host.add_path("/dev/vdb");
        host.add_physical_volume("other", "/dev/vdb");
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&[rule("vg0", "device", &["/dev/vdb"], &[])], &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_matches!(
            report.outcome("vg0"),
            Some(ItemOutcome::Fatal {
                condition: ConditionKind::Refusal,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_region_group_creates_namespace_and_group() {
        let host = FakeHost::new();
        host.add_region("region0");
        host.add_namespace("region1", NamespaceMode::Fsdax);
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(
                &[rule("pmemvg", "pmem", &[], &["region0", "region1"])],
                &labels(),
            )
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_eq!(
            report.actions(),
            vec![&Action::CreateVolumeGroup {
                name: "pmemvg".into(),
                physical_volumes: strings(&["/dev/pmem0", "/dev/pmem1"]),
            }]
        );
        assert_eq!(host.count_calls("pmem.create_namespace region0 lvm"), 1);

        let again = reconciler.apply_diff().await.unwrap();
        assert!(again.actions().iter().all(|a| a.is_noop()));
    }

    #[tokio::test]
    async fn test_region_in_use_elsewhere_skips_group() {
        let host = FakeHost::new();
        host.add_namespace("region0", NamespaceMode::Fsdax);
        host.mark_in_use("/dev/pmem0");
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&[rule("pmemvg", "pmem", &[], &["region0"])], &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_matches!(
            report.outcome("pmemvg"),
            Some(ItemOutcome::Recoverable {
                condition: ConditionKind::Resolution,
                ..
            })
        );
        assert_eq!(host.count_calls("lvm.create_volume_group"), 0);
    }

    #[tokio::test]
    async fn test_region_with_unknown_usage_skips_group() {
        let host = FakeHost::new();
        host.add_namespace("region0", NamespaceMode::Fsdax);
        host.hide_usage("/dev/pmem0");
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(&[rule("pmemvg", "pmem", &[], &["region0"])], &labels())
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_matches!(
            report.outcome("pmemvg"),
            Some(ItemOutcome::Recoverable {
                condition: ConditionKind::Resolution,
                ..
            })
        );
        assert_eq!(host.count_calls("lvm.create_volume_group"), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_region_skips_whole_group() {
        let host = FakeHost::new();
        host.add_namespace("region0", NamespaceMode::Fsdax);
        host.add_namespace("region1", NamespaceMode::Devdax);
        let mut reconciler = VolumeGroupReconciler::new(host.tools());

        reconciler
            .analyse_desired_state(
                &[rule("pmemvg", "pmem", &[], &["region0", "region1"])],
                &labels(),
            )
            .await
            .unwrap();
        let report = reconciler.apply_diff().await.unwrap();

        assert_matches!(report.outcome("pmemvg"), Some(ItemOutcome::Recoverable { .. }));
        assert_eq!(host.count_calls("lvm."), 1);
    }
}
