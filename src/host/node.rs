//! Node Label Source

use crate::domain::ports::NodeInfoSource;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::info;

/// Reads the node's labels from the Kubernetes API
pub struct KubeNodeSource {
    client: Client,
}

impl KubeNodeSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeInfoSource for KubeNodeSource {
    async fn node_labels(&self, node_name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api.get(node_name).await.map_err(|e| Error::NodeIdentity {
            node: node_name.to_string(),
            reason: e.to_string(),
        })?;

        let labels = node.labels().clone();
        info!("Resolved node {} with {} labels", node_name, labels.len());
        Ok(labels)
    }
}
