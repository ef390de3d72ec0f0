//! Outbound file reference event publishing.

use async_trait::async_trait;
use std::sync::Mutex;
use strata_core::{Checksum, FileReferenceEvent, FileReferenceEventType};
use tokio::sync::broadcast;

/// Sink for outcome notifications.
///
/// Publishing never fails from the caller's point of view: an event that
/// cannot be delivered is logged by the implementation.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: FileReferenceEvent);
}

/// Log, count and hand an event to the publisher.
pub async fn emit(publisher: &dyn EventPublisher, event: FileReferenceEvent) {
    crate::metrics::EVENTS_PUBLISHED
        .with_label_values(&[event.event_type.as_str()])
        .inc();
    if event.event_type.is_error() {
        tracing::info!(
            tenant = %event.tenant,
            checksum = %event.checksum,
            event = %event.event_type,
            storage = ?event.storage,
            message = %event.message,
            "publishing error event"
        );
    } else {
        tracing::debug!(
            tenant = %event.tenant,
            checksum = %event.checksum,
            event = %event.event_type,
            storage = ?event.storage,
            "publishing event"
        );
    }
    publisher.publish(event).await;
}

/// Fan-out publisher backed by a tokio broadcast channel.
pub struct BroadcastPublisher {
    sender: broadcast::Sender<FileReferenceEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FileReferenceEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: FileReferenceEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::debug!(
                checksum = %event.checksum,
                event = %event.event_type,
                "no event subscribers, event dropped"
            );
        }
    }
}

/// Publisher that keeps every event in memory.
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<FileReferenceEvent>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events published so far, in order.
    pub fn events(&self) -> Vec<FileReferenceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Events of one type about one checksum.
    pub fn matching(
        &self,
        checksum: &Checksum,
        event_type: FileReferenceEventType,
    ) -> Vec<FileReferenceEvent> {
        self.events()
            .into_iter()
            .filter(|e| &e.checksum == checksum && e.event_type == event_type)
            .collect()
    }

    pub fn count(&self, event_type: FileReferenceEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: FileReferenceEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
