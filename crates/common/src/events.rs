use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Acm, ChangeToken};

/// Payload published after every successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub action: String,
    pub actor: String,
    pub object_id: Uuid,
    pub change_token: ChangeToken,
    pub acm: Acm,
    pub audit: BTreeMap<String, String>,
}

impl Event {
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        object_id: Uuid,
        change_token: ChangeToken,
        acm: Acm,
    ) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            object_id,
            change_token,
            acm,
            audit: BTreeMap::new(),
        }
    }

    pub fn with_audit(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.audit.insert(key.into(), value.to_string());
        self
    }
}

/// Sink for mutation events. Publishing never fails the mutation.
pub trait EventPublisher: Send + Sync + std::fmt::Debug {
    fn publish(&self, event: Event);
}

/// Emits each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: Event) {
        let audit = serde_json::to_string(&event.audit).unwrap_or_default();
        tracing::info!(
            target: "drive::events",
            action = %event.action,
            actor = %event.actor,
            object_id = %event.object_id,
            change_token = %event.change_token,
            acm = %event.acm.to_json(),
            audit = %audit,
            "object event"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<Event>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.action.clone()).collect()
    }
}

impl EventPublisher for MemoryPublisher {
    fn publish(&self, event: Event) {
        self.events.lock().push(event);
    }
}
