//! Test doubles for the host ports
//!
//! [`FakeHost`] keeps a small in-memory model of devices, volume groups,
//! namespaces and mounts, and logs every port call so tests can assert on
//! exactly what a reconciler asked the host to do.

use crate::domain::ports::{
    CommandOutput, CommandRunner, EventKind, EventRecorder, HostTools, LocalDiskInventory,
    LvmManager, Mounter, PmemManager,
};
use crate::error::{Error, Result};
use crate::model::{
    region_to_namespace, LogicalVolume, NamespaceKind, NamespaceMode, PhysicalVolume,
    PmemNamespace, PmemRegion, PmemRegions, VolumeGroup,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// Scripted Command Runner
// =============================================================================

struct Script {
    prefix: String,
    output: CommandOutput,
    once: bool,
}

/// Command runner answering by longest matching command prefix; unmatched
/// commands succeed with empty output
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<Vec<Script>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, prefix: &str, status: i32, output: &str, once: bool) {
        self.scripts.lock().push(Script {
            prefix: prefix.to_string(),
            output: CommandOutput {
                status: Some(status),
                output: output.to_string(),
            },
            once,
        });
    }

    pub fn respond(&self, prefix: &str, output: &str) {
        self.push(prefix, 0, output, false);
    }

    /// Answer the next matching command only
    pub fn respond_once(&self, prefix: &str, output: &str) {
        self.push(prefix, 0, output, true);
    }

    pub fn fail(&self, prefix: &str, status: i32, output: &str) {
        self.push(prefix, status, output, false);
    }

    /// Fail the next matching command only
    pub fn fail_once(&self, prefix: &str, status: i32, output: &str) {
        self.push(prefix, status, output, true);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        self.commands.lock().push(command.to_string());

        let mut scripts = self.scripts.lock();
        let best = scripts
            .iter()
            .enumerate()
            .filter(|(_, s)| command.starts_with(&s.prefix))
            .max_by_key(|(i, s)| (s.once, s.prefix.len(), *i))
            .map(|(i, _)| i);

        let Some(index) = best else {
            return Ok(CommandOutput {
                status: Some(0),
                output: String::new(),
            });
        };
        let output = scripts[index].output.clone();
        if scripts[index].once {
            scripts.remove(index);
        }
        Ok(output)
    }
}

// =============================================================================
// Fake Host
// =============================================================================

#[derive(Default)]
struct HostState {
    paths: BTreeSet<String>,
    mounts: BTreeSet<String>,
    filesystems: BTreeMap<String, String>,
    physical_volumes: Vec<PhysicalVolume>,
    regions: BTreeMap<String, Vec<NamespaceMode>>,
    in_use: BTreeSet<String>,
    usage_unknown: BTreeSet<String>,
    tiered: BTreeSet<String>,
    local_disks: Vec<String>,
    events: Vec<(EventKind, String, String)>,
    calls: Vec<String>,
    ignore_namespace_creation: bool,
    fail_lvm_listing: bool,
}

/// In-memory host implementing every storage port
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

fn region_index(region: &str) -> &str {
    region.strip_prefix("region").unwrap_or(region)
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tools(self: &Arc<Self>) -> HostTools {
        HostTools {
            mounter: self.clone(),
            lvm: self.clone(),
            pmem: self.clone(),
            events: self.clone(),
            local_disks: self.clone(),
        }
    }

    // ----- setup -----

    pub fn add_path(&self, path: &str) {
        self.state.lock().paths.insert(path.to_string());
    }

    pub fn set_filesystem(&self, device: &str, fstype: &str) {
        self.state
            .lock()
            .filesystems
            .insert(device.to_string(), fstype.to_string());
    }

    pub fn add_physical_volume(&self, vg: &str, device: &str) {
        self.state.lock().physical_volumes.push(PhysicalVolume {
            name: device.to_string(),
            vg_name: vg.to_string(),
            size: 1 << 30,
            uuid: format!("uuid-{}", device),
        });
    }

    pub fn add_region(&self, region: &str) {
        self.state
            .lock()
            .regions
            .entry(region.to_string())
            .or_default();
    }

    pub fn add_namespace(&self, region: &str, mode: NamespaceMode) {
        self.state
            .lock()
            .regions
            .entry(region.to_string())
            .or_default()
            .push(mode);
    }

    pub fn mark_in_use(&self, device: &str) {
        self.state.lock().in_use.insert(device.to_string());
    }

    /// Usage checks on `device` fail
    pub fn hide_usage(&self, device: &str) {
        self.state.lock().usage_unknown.insert(device.to_string());
    }

    pub fn set_local_disks(&self, disks: &[&str]) {
        self.state.lock().local_disks = disks.iter().map(|d| d.to_string()).collect();
    }

    /// Namespace creation is accepted but leaves the region unchanged
    pub fn ignore_namespace_creation(&self) {
        self.state.lock().ignore_namespace_creation = true;
    }

    pub fn fail_lvm_listing(&self) {
        self.state.lock().fail_lvm_listing = true;
    }

    // ----- inspection -----

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls_with_prefix(prefix).len()
    }

    pub fn events(&self) -> Vec<(EventKind, String, String)> {
        self.state.lock().events.clone()
    }

    fn log(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn namespace(region: &str, index: usize, mode: NamespaceMode) -> PmemNamespace {
        let id = region_index(region);
        let dev = if index == 0 {
            region_to_namespace(region)
        } else {
            format!("namespace{}.{}", id, index)
        };
        PmemNamespace {
            dev,
            mode: mode.as_str().to_string(),
            block_dev: match mode {
                NamespaceMode::Fsdax => format!("pmem{}", id),
                NamespaceMode::Devdax => String::new(),
            },
            char_dev: match mode {
                NamespaceMode::Fsdax => String::new(),
                NamespaceMode::Devdax => format!("dax{}.{}", id, index),
            },
            ..Default::default()
        }
    }
}

#[async_trait]
impl Mounter for FakeHost {
    async fn ensure_folder(&self, path: &str) -> Result<()> {
        self.log(format!("mounter.ensure_folder {}", path));
        self.state.lock().paths.insert(path.to_string());
        Ok(())
    }

    fn file_exists(&self, path: &str) -> bool {
        self.state.lock().paths.contains(path)
    }

    async fn format_and_mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        format_options: &[String],
        mount_options: &str,
    ) -> Result<()> {
        self.log(format!(
            "mounter.format_and_mount {} {} {} {} {}",
            source,
            target,
            fstype,
            format_options.join(" "),
            mount_options
        ));

        let mut state = self.state.lock();
        match state.filesystems.get(source) {
            Some(existing) if existing != fstype => {
                return Err(Error::ExistsFormat {
                    fstype: fstype.to_string(),
                    existing: existing.clone(),
                    mount_error: "wrong fs type, bad option, bad superblock".to_string(),
                });
            }
            Some(_) => {}
            None => {
                state
                    .filesystems
                    .insert(source.to_string(), fstype.to_string());
            }
        }
        state.mounts.insert(target.to_string());
        Ok(())
    }

    async fn is_mounted(&self, target: &str) -> Result<bool> {
        self.log(format!("mounter.is_mounted {}", target));
        Ok(self.state.lock().mounts.contains(target))
    }
}

#[async_trait]
impl LvmManager for FakeHost {
    async fn list_logical_volumes(&self, list_spec: &str) -> Result<Vec<LogicalVolume>> {
        self.log(format!("lvm.list_logical_volumes {}", list_spec));
        Ok(Vec::new())
    }

    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>> {
        self.log("lvm.list_volume_groups".to_string());
        let state = self.state.lock();
        let names: BTreeSet<&String> =
            state.physical_volumes.iter().map(|pv| &pv.vg_name).collect();
        Ok(names
            .into_iter()
            .map(|name| VolumeGroup {
                name: name.clone(),
                size: 0,
                free_size: 0,
                uuid: String::new(),
                tags: Vec::new(),
            })
            .collect())
    }

    async fn list_physical_volumes(&self) -> Result<Vec<PhysicalVolume>> {
        self.log("lvm.list_physical_volumes".to_string());
        let state = self.state.lock();
        if state.fail_lvm_listing {
            return Err(Error::MalformedRecord(
                "expected 4 components, got 2".to_string(),
            ));
        }
        Ok(state.physical_volumes.clone())
    }

    async fn create_volume_group(
        &self,
        name: &str,
        physical_volumes: &[String],
        _tags: &[String],
    ) -> Result<String> {
        self.log(format!(
            "lvm.create_volume_group {} {}",
            name,
            physical_volumes.join(" ")
        ));
        for pv in physical_volumes {
            self.add_physical_volume(name, pv);
        }
        Ok(String::new())
    }

    async fn extend_volume_group(
        &self,
        name: &str,
        physical_volumes: &[String],
    ) -> Result<String> {
        self.log(format!(
            "lvm.extend_volume_group {} {}",
            name,
            physical_volumes.join(" ")
        ));
        for pv in physical_volumes {
            self.add_physical_volume(name, pv);
        }
        Ok(String::new())
    }
}

#[async_trait]
impl PmemManager for FakeHost {
    async fn list_regions(&self) -> Result<PmemRegions> {
        self.log("pmem.list_regions".to_string());
        let state = self.state.lock();
        let regions = state
            .regions
            .iter()
            .map(|(region, modes)| PmemRegion {
                dev: region.clone(),
                namespaces: modes
                    .iter()
                    .enumerate()
                    .map(|(i, mode)| Self::namespace(region, i, *mode))
                    .collect(),
                ..Default::default()
            })
            .collect();
        Ok(PmemRegions { regions })
    }

    async fn create_namespace(&self, region: &str, kind: NamespaceKind) -> Result<()> {
        self.log(format!("pmem.create_namespace {} {}", region, kind));
        let mut state = self.state.lock();
        if state.ignore_namespace_creation {
            return Ok(());
        }
        let mode = match kind {
            NamespaceKind::General => NamespaceMode::Fsdax,
            NamespaceKind::Dax => NamespaceMode::Devdax,
        };
        state
            .regions
            .entry(region.to_string())
            .or_default()
            .push(mode);
        Ok(())
    }

    async fn check_namespace_used(&self, device_path: &str) -> Result<bool> {
        self.log(format!("pmem.check_namespace_used {}", device_path));
        let state = self.state.lock();
        if state.usage_unknown.contains(device_path) {
            return Err(Error::UsageUnknown {
                device: device_path.to_string(),
                reason: "blkid exited with status 2".to_string(),
            });
        }
        Ok(state.in_use.contains(device_path)
            || state.physical_volumes.iter().any(|pv| pv.name == device_path))
    }

    async fn resolve_namespace_device_path(
        &self,
        region: &str,
        mode: NamespaceMode,
    ) -> Result<(String, String)> {
        self.log(format!(
            "pmem.resolve_namespace_device_path {} {}",
            region, mode
        ));
        let state = self.state.lock();
        let modes = state.regions.get(region).ok_or_else(|| Error::RegionNotFound {
            region: region.to_string(),
        })?;
        if modes.len() != 1 {
            return Err(Error::NamespaceCount {
                region: region.to_string(),
                count: modes.len(),
            });
        }
        let namespace = Self::namespace(region, 0, modes[0]);
        if modes[0] != mode {
            return Err(Error::NamespaceMode {
                region: region.to_string(),
                namespace: namespace.dev,
                actual: modes[0].to_string(),
                expected: mode.to_string(),
            });
        }
        Ok((namespace.device_path(mode), namespace.dev))
    }

    async fn tier_to_memory(&self, char_dev: &str) -> Result<()> {
        self.log(format!("pmem.tier_to_memory {}", char_dev));
        self.state.lock().tiered.insert(char_dev.to_string());
        Ok(())
    }

    async fn is_memory_tiered(&self, char_dev: &str) -> Result<bool> {
        self.log(format!("pmem.is_memory_tiered {}", char_dev));
        Ok(self.state.lock().tiered.contains(char_dev))
    }
}

#[async_trait]
impl EventRecorder for FakeHost {
    async fn record(&self, kind: EventKind, reason: &str, message: &str) {
        self.state
            .lock()
            .events
            .push((kind, reason.to_string(), message.to_string()));
    }
}

impl LocalDiskInventory for FakeHost {
    fn local_disks(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().local_disks.clone())
    }
}
