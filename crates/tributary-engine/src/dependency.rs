//! Subscriber publication.
//!
//! Dependent replicators are notified synchronously inside the upsert
//! pipeline (see [`crate::replicator`]); external subscribers instead
//! receive a [`RowUpsertEvent`] through an [`EventPublisher`], which
//! hands the payload to the job queue so a slow third-party delivery
//! cannot block ingestion.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::storage::Row;

/// Payload published to external subscribers when a row changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowUpsertEvent {
    /// Opaque id of the integration that wrote the row.
    pub integration_id: String,
    /// The written row.
    pub row: Row,
    /// Which column holds the remote key.
    pub external_id_column: String,
    /// The row's remote key, rendered as text.
    pub external_id: String,
}

/// Hands row-upsert events to an asynchronous delivery mechanism.
pub trait EventPublisher: Send + Sync {
    /// Enqueues one event. Must not block on subscriber delivery.
    fn publish(&self, event: RowUpsertEvent);
}

/// Publisher backed by an mpsc channel; the job-queue consumer drains
/// the receiving end.
#[derive(Debug)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<RowUpsertEvent>,
}

impl ChannelPublisher {
    /// Creates a publisher and its consumer end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RowUpsertEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: RowUpsertEvent) {
        if let Err(err) = self.sender.send(event) {
            // A dropped consumer means delivery is shutting down;
            // ingestion must not fail because of it.
            warn!(integration_id = %err.0.integration_id, "subscriber event dropped");
        }
    }
}
