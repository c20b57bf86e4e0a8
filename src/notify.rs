//! Outbound status messages
//!
//! Every user-visible outcome is published on a broadcast channel, mirrored
//! into tracing and, when an event log is attached, recorded in SQLite.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::state::{EventType, Severity, StateDb, SyncEventBuilder};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: Severity,
    pub world: Option<String>,
    pub text: String,
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<StatusMessage>,
    events: Option<Arc<Mutex<StateDb>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            events: None,
        }
    }

    pub fn with_event_log(mut self, db: StateDb) -> Self {
        self.events = Some(Arc::new(Mutex::new(db)));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMessage> {
        self.sender.subscribe()
    }

    /// Publish a message for a world and record it as `event_type`
    pub fn world_event(&self, event_type: EventType, world: &str, text: impl Into<String>) {
        self.emit(event_type, world, text.into(), None);
    }

    /// Like [`world_event`](Self::world_event), keeping the underlying error in the event log
    pub fn world_failure(
        &self,
        event_type: EventType,
        world: &str,
        text: impl Into<String>,
        details: impl Into<String>,
    ) {
        self.emit(event_type, world, text.into(), Some(details.into()));
    }

    fn emit(&self, event_type: EventType, world: &str, text: String, details: Option<String>) {
        let level = event_type.severity();

        match level {
            Severity::Info => info!(world = %world, "{}", text),
            Severity::Warning => warn!(world = %world, "{}", text),
            Severity::Error => error!(world = %world, "{}", text),
        }

        let mut builder = SyncEventBuilder::new(event_type, text.clone()).world(world);
        if let Some(details) = details {
            builder = builder.details(details);
        }
        self.record(builder);
        self.publish(StatusMessage {
            level,
            world: Some(world.to_string()),
            text,
        });
    }

    /// Publish a message that is not tied to one world
    pub fn general(&self, level: Severity, text: impl Into<String>) {
        let text = text.into();
        match level {
            Severity::Info => info!("{}", text),
            Severity::Warning => warn!("{}", text),
            Severity::Error => error!("{}", text),
        }

        let event_type = match level {
            Severity::Error => EventType::SyncError,
            _ => EventType::Reconciled,
        };
        self.record(SyncEventBuilder::new(event_type, text.clone()));
        self.publish(StatusMessage {
            level,
            world: None,
            text,
        });
    }

    fn publish(&self, message: StatusMessage) {
        // No subscribers is fine
        let _ = self.sender.send(message);
    }

    fn record(&self, builder: SyncEventBuilder) {
        let Some(events) = &self.events else {
            return;
        };
        let Ok(db) = events.lock() else {
            warn!("Event log lock poisoned, dropping event");
            return;
        };
        if let Err(e) = db.record_event(builder) {
            warn!("Failed to record event: {}", e);
        }
    }
}

/// Take every message already queued on `receiver`
///
/// Messages overwritten while the receiver lagged are skipped; the rest are kept.
pub fn drain(receiver: &mut broadcast::Receiver<StatusMessage>) -> Vec<StatusMessage> {
    let mut messages = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(message) => messages.push(message),
            Err(TryRecvError::Lagged(skipped)) => {
                debug!("Status receiver lagged, {} messages dropped", skipped);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    messages
}
