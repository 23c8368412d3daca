//! Shell Command Runner
//!
//! Runs host tools through `sh -c`, optionally entering the host's mount,
//! IPC, network and UTS namespaces first so a containerised agent sees the
//! node's devices and LVM metadata.

use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::error::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Prefix that enters the namespaces of the host's init process
pub const NSENTER_PREFIX: &str = "/usr/bin/nsenter --mount=/proc/1/ns/mnt --ipc=/proc/1/ns/ipc --net=/proc/1/ns/net --uts=/proc/1/ns/uts";

/// Runs commands on the host through a shell
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    nsenter: bool,
}

impl ShellRunner {
    pub fn new(nsenter: bool) -> Self {
        Self { nsenter }
    }

    /// The full command line handed to the shell
    pub fn command_line(&self, command: &str) -> String {
        if self.nsenter {
            format!("{} {}", NSENTER_PREFIX, command)
        } else {
            command.to_string()
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let line = self.command_line(command);
        debug!("Running host command: {}", line);

        let out = Command::new("sh").arg("-c").arg(&line).output().await?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(CommandOutput {
            status: out.status.code(),
            output,
        })
    }
}
