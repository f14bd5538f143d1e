//! Event encoding (spec.md §4.5 "Event Stream").
//!
//! Events are self-describing `data` vectors, preserved bit-for-bit in
//! their encoding so non-Rust consumers (scripting languages, per the
//! broker's original design notes) can read them without linking against
//! store-internal types — the same rationale the teacher workspace states
//! for its own wire message enums.

use crate::data::Data;
use crate::ids::EntityId;
use crate::time::Timestamp;

/// One store-mutation event, ready to publish on `store_events/<name>`.
///
/// `expiry` carries the entry's resolved absolute expiry instant, not the
/// span originally requested by the caller. This is a deliberate,
/// confirmed departure from spec.md §4.5's literal wording for this slot
/// ("the timespan value or nil"), not an oversight: §3 fixes an entry's
/// stored expiry as an absolute timestamp, so the value this slot actually
/// has available at event-publish time already *is* a `Timestamp`, not the
/// caller's original span, and a relative span recomputed from "now" at
/// publish time would stop meaning anything by the time a subscriber reads
/// the event, and would also differ between the master's event and a
/// clone's replicated copy of the same mutation, published at a different
/// wall-clock moment. Recording the resolved absolute instant keeps
/// master- and clone-originated events for the same mutation byte-for-byte
/// identical, which §8's clone-consistency property depends on. A
/// spec-conformant consumer expecting a `Timespan`-tagged value in this
/// slot should instead expect `Timestamp`-tagged for any non-nil expiry;
/// see `Data::optional_timestamp` below and DESIGN.md's "Open Question:
/// expiry as relative span vs. absolute instant" for the full reasoning.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Insert {
        store_name: String,
        key: Data,
        value: Data,
        expiry: Option<Timestamp>,
        publisher: EntityId,
    },
    Update {
        store_name: String,
        key: Data,
        old_value: Data,
        new_value: Data,
        expiry: Option<Timestamp>,
        publisher: EntityId,
    },
    Erase {
        store_name: String,
        key: Data,
        publisher: EntityId,
    },
    Expire {
        store_name: String,
        key: Data,
        publisher: EntityId,
    },
}

impl StoreEvent {
    /// Encodes this event as the `data` vector laid out in spec.md §4.5's
    /// table.
    #[must_use]
    pub fn to_data(&self) -> Data {
        match self {
            StoreEvent::Insert {
                store_name,
                key,
                value,
                expiry,
                publisher,
            } => Data::Vector(vec![
                Data::String(b"insert".to_vec()),
                Data::String(store_name.clone().into_bytes()),
                key.clone(),
                value.clone(),
                Data::optional_timestamp(*expiry),
                Data::entity(publisher.clone()),
            ]),
            StoreEvent::Update {
                store_name,
                key,
                old_value,
                new_value,
                expiry,
                publisher,
            } => Data::Vector(vec![
                Data::String(b"update".to_vec()),
                Data::String(store_name.clone().into_bytes()),
                key.clone(),
                old_value.clone(),
                new_value.clone(),
                Data::optional_timestamp(*expiry),
                Data::entity(publisher.clone()),
            ]),
            StoreEvent::Erase {
                store_name,
                key,
                publisher,
            } => Data::Vector(vec![
                Data::String(b"erase".to_vec()),
                Data::String(store_name.clone().into_bytes()),
                key.clone(),
                Data::entity(publisher.clone()),
            ]),
            StoreEvent::Expire {
                store_name,
                key,
                publisher,
            } => Data::Vector(vec![
                Data::String(b"expire".to_vec()),
                Data::String(store_name.clone().into_bytes()),
                key.clone(),
                Data::entity(publisher.clone()),
            ]),
        }
    }

    /// The store name this event concerns, used to derive the topic it was
    /// (or will be) published on.
    #[must_use]
    pub fn store_name(&self) -> &str {
        match self {
            StoreEvent::Insert { store_name, .. }
            | StoreEvent::Update { store_name, .. }
            | StoreEvent::Erase { store_name, .. }
            | StoreEvent::Expire { store_name, .. } => store_name,
        }
    }
}
