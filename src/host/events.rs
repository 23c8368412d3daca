//! Event Recorders
//!
//! Publishes audit events against the agent's pod. Delivery is best effort:
//! publish failures are logged and never surface to the reconcilers.

use crate::domain::ports::{EventKind, EventRecorder};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::{info, warn};

/// Controller name shown as the event source
pub const EVENT_SOURCE: &str = "node-resource-manager";

/// Records events through the Kubernetes events API
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client, pod_name: &str, pod_namespace: &str) -> Self {
        let reporter = Reporter {
            controller: EVENT_SOURCE.to_string(),
            instance: Some(pod_name.to_string()),
        };
        Self {
            recorder: Recorder::new(client, reporter, pod_reference(pod_name, pod_namespace)),
        }
    }
}

/// Involved object for events raised by the agent
pub fn pod_reference(pod_name: &str, pod_namespace: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Pod".to_string()),
        name: Some(pod_name.to_string()),
        namespace: Some(pod_namespace.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, kind: EventKind, reason: &str, message: &str) {
        let type_ = match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };

        if let Err(e) = self.recorder.publish(event).await {
            warn!("Failed to publish event {}: {}", reason, e);
        }
    }
}

/// Writes events to the log only, used when no cluster client is configured
#[derive(Debug, Default)]
pub struct LogEventRecorder;

#[async_trait]
impl EventRecorder for LogEventRecorder {
    async fn record(&self, kind: EventKind, reason: &str, message: &str) {
        match kind {
            EventKind::Normal => info!(reason = reason, "Event: {}", message),
            EventKind::Warning => warn!(reason = reason, "Event: {}", message),
        }
    }
}
