//! Logical events the engine emits for external subscribers (notification
//! delivery, analytics). The core only dispatches; it never sends anything.

use serde::Serialize;

use crate::models::{Id, IssueStatus};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    IssueCreated {
        issue_id: Id,
        reporter_id: Option<String>,
    },
    StatusChanged {
        issue_id: Id,
        from: IssueStatus,
        to: IssueStatus,
        changed_by: String,
    },
    AutoHidden {
        issue_id: Id,
        flag_count: usize,
    },
}

pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: DomainEvent);
}

/// Default sink: structured log line per event. Good enough until a real
/// dispatcher is wired in.
pub struct LogSink;

impl EventSink for LogSink {
    fn dispatch(&self, event: DomainEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "civix::events", event = %json, "domain event"),
            Err(e) => tracing::error!(error = %e, "unserializable domain event"),
        }
    }
}

/// Test sink that records every dispatched event in order.
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn dispatch(&self, event: DomainEvent) {
        self.events.lock().unwrap().push(event);
    }
}
