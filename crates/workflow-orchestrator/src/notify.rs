//! Workflow lifecycle notifications.
//!
//! The engine emits a [`WorkflowEvent`] on create, start, completion,
//! failure and cancellation. Delivery (email, SMS, push, sockets) belongs to
//! the [`NotificationSink`]. A sink error is logged and never affects the
//! workflow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowCreated,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WorkflowCreated => "workflow_created",
            EventKind::WorkflowStarted => "workflow_started",
            EventKind::WorkflowCompleted => "workflow_completed",
            EventKind::WorkflowFailed => "workflow_failed",
            EventKind::WorkflowCancelled => "workflow_cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub workflow_id: String,
    pub workflow_name: String,
    pub timestamp: DateTime<Utc>,
    /// Event-specific details (failed steps, elapsed time, ...).
    #[serde(default)]
    pub extra: JsonValue,
}

impl WorkflowEvent {
    pub fn new(
        kind: EventKind,
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        extra: JsonValue,
    ) -> Self {
        Self {
            kind,
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            timestamp: Utc::now(),
            extra,
        }
    }
}

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: WorkflowEvent) -> Result<(), NotifyError>;
}

/// Writes events to the tracing log. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: WorkflowEvent) -> Result<(), NotifyError> {
        info!(
            event = event.kind.as_str(),
            workflow_id = %event.workflow_id,
            workflow_name = %event.workflow_name,
            extra = %event.extra,
            "Workflow event"
        );
        Ok(())
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelNotifier {
    /// Creates the sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotifier {
    async fn notify(&self, event: WorkflowEvent) -> Result<(), NotifyError> {
        self.sender
            .send(event)
            .map_err(|_| NotifyError("receiver dropped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (sink, mut rx) = ChannelNotifier::new();
        sink.notify(WorkflowEvent::new(
            EventKind::WorkflowStarted,
            "wf-1",
            "Risk",
            json!({}),
        ))
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::WorkflowStarted);
        assert_eq!(event.workflow_id, "wf-1");
    }

    #[tokio::test]
    async fn test_channel_notifier_reports_closed_receiver() {
        let (sink, rx) = ChannelNotifier::new();
        drop(rx);
        let result = sink
            .notify(WorkflowEvent::new(EventKind::WorkflowFailed, "wf", "n", json!(null)))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = WorkflowEvent::new(
            EventKind::WorkflowCancelled,
            "wf-2",
            "ESG",
            json!({"reason": "user"}),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "workflow_cancelled");
        assert_eq!(value["extra"]["reason"], "user");
    }
}
