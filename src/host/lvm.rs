//! LVM Tools Adapter
//!
//! Lists and mutates volume groups through `pvs`, `vgs`, `lvs`, `vgcreate`
//! and `vgextend`. Listings use `--nameprefixes` rows joined by the fixed
//! separator and are decoded by [`crate::model::lvm`].

use crate::domain::ports::{CommandRunnerRef, LvmManager};
use crate::error::Result;
use crate::model::lvm::{parse_rows, LogicalVolume, PhysicalVolume, VolumeGroup, SEPARATOR};
use async_trait::async_trait;
use tracing::{debug, info};

const LIST_FLAGS: &str = "--units=b --nosuffix --noheadings --nameprefixes -a";

const LV_COLUMNS: &str =
    "lv_name,lv_size,lv_uuid,lv_attr,copy_percent,lv_kernel_major,lv_kernel_minor,lv_tags";
const VG_COLUMNS: &str = "vg_name,vg_size,vg_free,vg_uuid,vg_tags";
const PV_COLUMNS: &str = "vg_name,pv_name,pv_size,pv_uuid";

/// LVM manager backed by the host's LVM command line tools
pub struct NodeLvm {
    runner: CommandRunnerRef,
}

impl NodeLvm {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self { runner }
    }

    fn list_command(tool: &str, columns: &str) -> String {
        format!(
            "{} --separator=\"{}\" -o {} {}",
            tool, SEPARATOR, columns, LIST_FLAGS
        )
    }
}

#[async_trait]
impl LvmManager for NodeLvm {
    async fn list_logical_volumes(&self, list_spec: &str) -> Result<Vec<LogicalVolume>> {
        let mut cmd = Self::list_command("lvs", LV_COLUMNS);
        if !list_spec.is_empty() {
            cmd.push(' ');
            cmd.push_str(list_spec);
        }
        let out = self.runner.run(&cmd).await?;

        let rows: String = out
            .lines()
            .filter(|line| line.contains("LVM2_LV_NAME"))
            .collect::<Vec<_>>()
            .join("\n");
        parse_rows(&rows, LogicalVolume::parse)
    }

    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>> {
        let out = self
            .runner
            .run(&Self::list_command("vgs", VG_COLUMNS))
            .await?;
        parse_rows(&out, VolumeGroup::parse)
    }

    async fn list_physical_volumes(&self) -> Result<Vec<PhysicalVolume>> {
        let out = self
            .runner
            .run(&Self::list_command("pvs", PV_COLUMNS))
            .await?;

        let pvs = parse_rows(&out, PhysicalVolume::parse)?
            .into_iter()
            .filter(|pv| !pv.name.is_empty() && !pv.vg_name.is_empty())
            .collect::<Vec<_>>();
        debug!("Found {} physical volumes in volume groups", pvs.len());
        Ok(pvs)
    }

    async fn create_volume_group(
        &self,
        name: &str,
        physical_volumes: &[String],
        tags: &[String],
    ) -> Result<String> {
        let mut cmd = format!("vgcreate {} {} -v", name, physical_volumes.join(" "));
        for tag in tags {
            cmd.push_str(" --add-tag ");
            cmd.push_str(tag);
        }

        let out = self.runner.run(&cmd).await?;
        info!("Created volume group {} with {:?}", name, physical_volumes);
        Ok(out)
    }

    async fn extend_volume_group(
        &self,
        name: &str,
        physical_volumes: &[String],
    ) -> Result<String> {
        let cmd = format!("vgextend {} {} -v", name, physical_volumes.join(" "));
        let out = self.runner.run(&cmd).await?;
        info!("Extended volume group {} with {:?}", name, physical_volumes);
        Ok(out)
    }
}
