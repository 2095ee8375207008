//! # Events
//!
//! Fire-and-forget event recording for owner resources.
//!
//! [`KubeEventRecorder`] pushes events into a bounded broadcast channel that a
//! background task drains into Kubernetes Events. When the task falls behind,
//! the oldest events are dropped and recording never blocks the reconciler.

use crate::constants::CONTROLLER_NAME;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event reasons
pub const REASON_ASSOCIATION_ERROR: &str = "AssociationError";
pub const REASON_VALIDATION: &str = "Validation";
pub const REASON_RECONCILE_ERROR: &str = "ReconciliationError";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => f.write_str("Normal"),
            Severity::Warning => f.write_str("Warning"),
        }
    }
}

/// Records events against an owner; must not block
pub trait EventRecorder: Send + Sync {
    fn record(&self, owner: &ObjectReference, severity: Severity, reason: &str, message: &str);
}

#[derive(Debug, Clone)]
struct PendingEvent {
    owner: ObjectReference,
    severity: Severity,
    reason: String,
    message: String,
}

/// Recorder publishing Kubernetes Events from a background task
#[derive(Debug, Clone)]
pub struct KubeEventRecorder {
    sender: broadcast::Sender<PendingEvent>,
}

impl KubeEventRecorder {
    /// Create the recorder and spawn the task publishing its events
    pub fn start(client: Client, buffer_size: usize) -> Self {
        let (sender, receiver) = broadcast::channel(buffer_size.max(1));
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        let recorder = Recorder::new(client, reporter);
        tokio::spawn(publish_events(recorder, receiver));
        Self { sender }
    }
}

async fn publish_events(recorder: Recorder, mut receiver: broadcast::Receiver<PendingEvent>) {
    loop {
        let pending = match receiver.recv().await {
            Ok(pending) => pending,
            Err(broadcast::error::RecvError::Lagged(dropped)) => {
                warn!("Event buffer full, dropped {dropped} oldest events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let event = Event {
            type_: match pending.severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: pending.reason.clone(),
            note: Some(pending.message.clone()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(&event, &pending.owner).await {
            warn!(reason = %pending.reason, "Failed to publish event: {e}");
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    fn record(&self, owner: &ObjectReference, severity: Severity, reason: &str, message: &str) {
        debug!(%severity, reason, message, "event.record");
        // No receiver only happens during shutdown
        let _ = self.sender.send(PendingEvent {
            owner: owner.clone(),
            severity,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

/// In-memory recorder keeping the most recent events as
/// `"<Severity> <Reason> <message>"`
#[derive(Debug)]
pub struct FakeRecorder {
    capacity: usize,
    events: Mutex<VecDeque<String>>,
}

impl FakeRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for FakeRecorder {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl EventRecorder for FakeRecorder {
    fn record(&self, _owner: &ObjectReference, severity: Severity, reason: &str, message: &str) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(format!("{severity} {reason} {message}"));
    }
}
