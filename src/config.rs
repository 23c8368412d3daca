//! Agent Configuration
//!
//! Runtime settings built from the command line, and the loader for the
//! declarative rule files mounted into the agent's config directory.

use crate::domain::ports::RuleLoader;
use crate::error::Result;
use crate::host::LocalDiskConfig;
use crate::model::{ResourceKind, ResourceRule, RuleDocument};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default directory holding the `volumegroup`, `quotapath` and `memory` files
pub const DEFAULT_CONFIG_DIR: &str = "/etc/unified-config";

/// Default pause between sweeps
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(20);

// =============================================================================
// Agent Configuration
// =============================================================================

/// Settings for one agent process
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Kubernetes node this agent manages
    pub node_name: String,
    /// Directory of the rule files
    pub config_dir: PathBuf,
    /// Pause between sweeps
    pub update_interval: Duration,
    /// Run host tools inside the host's namespaces
    pub nsenter: bool,
    /// Pod raising events
    pub pod_name: String,
    pub pod_namespace: String,
    /// Local disk enumeration for the local-disk topology
    pub local_disk: LocalDiskConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            nsenter: true,
            pod_name: String::new(),
            pod_namespace: "kube-system".to_string(),
            local_disk: LocalDiskConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loader reading the rule files of this agent
    pub fn rule_loader(&self) -> FileRuleLoader {
        FileRuleLoader::new(&self.config_dir)
    }
}

// =============================================================================
// Rule Loader
// =============================================================================

/// Reads rules from `<dir>/volumegroup`, `<dir>/quotapath` and `<dir>/memory`
#[derive(Debug, Clone)]
pub struct FileRuleLoader {
    dir: PathBuf,
}

impl FileRuleLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// `<dir>/<config key>`
    pub fn rule_path(&self, kind: ResourceKind) -> PathBuf {
        self.dir.join(kind.config_key())
    }
}

#[async_trait]
impl RuleLoader for FileRuleLoader {
    async fn load_rules(&self, kind: ResourceKind) -> Result<Vec<ResourceRule>> {
        let path = self.rule_path(kind);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Rule file {} does not exist", path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let document: RuleDocument = serde_yaml::from_str(&content)?;
        Ok(document.into_rules(kind))
    }
}
