//! Event publication (spec.md §4.5 "Event Stream").
//!
//! A thin wrapper around [`Bus::publish`] that encodes a [`StoreEvent`] the
//! way spec.md requires — "preserved bit-for-bit" — and sends it on the
//! store's event topic. Kept as its own module (rather than inlined in
//! `store::actor`) because C7 is its own line item in spec.md's component
//! table, independently testable against the wire encoding.

use std::sync::Arc;

use broker_core::{Bus, StoreEvent, StoreId};
use tracing::trace;

/// Publishes [`StoreEvent`]s for one store onto `store_events/<name>`.
pub struct EventPublisher {
    bus: Arc<dyn Bus>,
    topic: String,
}

impl EventPublisher {
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, store_id: &StoreId) -> Self {
        Self {
            bus,
            topic: store_id.event_topic(),
        }
    }

    /// Encodes `event` as `data` (spec.md §4.5) and publishes it.
    pub async fn publish(&self, event: &StoreEvent) {
        let encoded = event.to_data();
        trace!(topic = %self.topic, ?encoded, "publishing store event");
        let bytes = rmp_serde::to_vec_named(&encoded).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode store event for publication");
            Vec::new()
        });
        if !bytes.is_empty() {
            self.bus.publish(&self.topic, bytes).await;
        }
    }
}
