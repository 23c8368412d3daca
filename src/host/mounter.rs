//! Filesystem Mounter
//!
//! Directory creation, filesystem checks, formatting and mounting of block
//! devices on the host.

use crate::domain::ports::{CommandRunnerRef, Mounter};
use crate::error::{Error, Result};
use crate::host::pmem::parse_blkid_type;
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

/// fsck exit code: errors were found and corrected
const FSCK_ERRORS_CORRECTED: i32 = 1;
/// fsck exit code: errors were found and left uncorrected
const FSCK_ERRORS_UNCORRECTED: i32 = 4;
/// shell exit code: command not found
const COMMAND_NOT_FOUND: i32 = 127;

const DEFAULT_FSTYPE: &str = "ext4";

/// Mount table of the namespace the runner executes in
pub const MOUNTS_FILE: &str = "/proc/mounts";

/// Mounter backed by host tools
///
/// The mount table is read through the runner, so a runner that enters the
/// host's mount namespace sees the mounts it made there.
pub struct NodeMounter {
    runner: CommandRunnerRef,
}

impl NodeMounter {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self { runner }
    }

    async fn fsck(&self, source: &str) -> Result<()> {
        let out = self.runner.execute(&format!("fsck -a {}", source)).await?;
        match out.status {
            Some(0) => Ok(()),
            Some(FSCK_ERRORS_CORRECTED) => {
                info!("Device {} has errors which were corrected by fsck", source);
                Ok(())
            }
            Some(FSCK_ERRORS_UNCORRECTED) => Err(Error::Mount {
                source_path: source.to_string(),
                target: String::new(),
                reason: format!(
                    "fsck found errors on device but could not correct them: {}",
                    out.output.trim()
                ),
            }),
            Some(COMMAND_NOT_FOUND) => {
                warn!("fsck not found on system; continuing mount without running fsck");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Existing filesystem on the device, empty when unformatted
    async fn disk_format(&self, source: &str) -> Result<String> {
        let sniff = self.runner.run(&format!("file -bsL {}", source)).await?;
        if sniff.trim() == "data" {
            return Ok(String::new());
        }
        let out = self
            .runner
            .run(&format!("blkid -c /dev/null -o export {}", source))
            .await?;
        parse_blkid_type(&out)
    }
}

/// `mkfs.<fstype>` arguments; format options replace the ext defaults
pub fn mkfs_args(fstype: &str, source: &str, format_options: &[String]) -> Vec<String> {
    let mut args = Vec::new();
    if fstype == "ext4" || fstype == "ext3" {
        if format_options.is_empty() {
            args.push("-F".to_string());
            args.push("-m0".to_string());
        } else {
            args.extend(format_options.iter().cloned());
        }
    }
    args.push(source.to_string());
    args
}

#[async_trait]
impl Mounter for NodeMounter {
    async fn ensure_folder(&self, path: &str) -> Result<()> {
        self.runner.run(&format!("mkdir -p {}", path)).await?;
        Ok(())
    }

    fn file_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    async fn format_and_mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        format_options: &[String],
        mount_options: &str,
    ) -> Result<()> {
        self.fsck(source).await?;

        let mount_cmd = if mount_options.is_empty() {
            format!("mount {} {}", source, target)
        } else {
            format!("mount -o {} {} {}", mount_options, source, target)
        };
        info!("Mounting {} on {}", source, target);

        let mount_err = match self.runner.run(&mount_cmd).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        let existing = self.disk_format(source).await?;
        if existing.is_empty() {
            let fstype = if fstype.is_empty() {
                DEFAULT_FSTYPE
            } else {
                fstype
            };
            let args = mkfs_args(fstype, source, format_options);
            info!(
                "Device {} appears to be unformatted, formatting as {} with {:?}",
                source, fstype, args
            );
            self.runner
                .run(&format!("mkfs.{} {}", fstype, args.join(" ")))
                .await?;
            self.runner.run(&mount_cmd).await?;
            return Ok(());
        }

        if fstype.is_empty() || fstype == existing {
            return Err(Error::Mount {
                source_path: source.to_string(),
                target: target.to_string(),
                reason: mount_err.to_string(),
            });
        }

        Err(Error::ExistsFormat {
            fstype: fstype.to_string(),
            existing,
            mount_error: mount_err.to_string(),
        })
    }

    async fn is_mounted(&self, target: &str) -> Result<bool> {
        if target.is_empty() {
            return Err(Error::Configuration(
                "target is not specified for checking the mount".to_string(),
            ));
        }
        let table = self.runner.run(&format!("cat {}", MOUNTS_FILE)).await?;
        let target = match target.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        Ok(table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|mount_point| mount_point == target))
    }
}
