//! Entity and store identity.
//!
//! `EntityId` identifies the originator of a command or event: the
//! `(endpoint, object)` pair from spec.md §3. `StoreId` identifies a store
//! instance and derives its event/command topic names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a peering endpoint (a node in the broker's transport layer).
///
/// The transport/peering layer itself is out of scope for this crate (see
/// `SPEC_FULL.md` §1); `EndpointId` is only the opaque handle events and
/// commands carry to identify where they came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub String);

impl EndpointId {
    /// The absent-endpoint sentinel (spec.md §3 "Entity id").
    #[must_use]
    pub fn nil() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "<nil>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Identifies an actor within an endpoint (e.g. a particular frontend,
/// proxy, or store actor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl ActorId {
    #[must_use]
    pub fn nil() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }
}

/// `(endpoint, object)` — identifies the originator of a command or event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub endpoint: EndpointId,
    pub object: ActorId,
}

impl EntityId {
    #[must_use]
    pub fn new(endpoint: EndpointId, object: ActorId) -> Self {
        Self { endpoint, object }
    }

    /// A local, unaddressable entity (no endpoint, no object) — the value
    /// used when a publisher cannot be identified.
    #[must_use]
    pub fn nil() -> Self {
        Self {
            endpoint: EndpointId::nil(),
            object: ActorId::nil(),
        }
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.endpoint.is_nil() && self.object.is_nil()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::nil()
    }
}

/// `(endpoint_id, store_name)` — identifies a store instance.
///
/// `store_name` must be non-empty; it both identifies the store and
/// derives its event topic (`store_events/<store_name>`) and command
/// topic (`store_commands/<store_name>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId {
    pub endpoint: EndpointId,
    pub name: String,
}

/// Default topic-hierarchy separator. Implementations embedding this crate
/// in a broker with a different separator convention can use
/// [`StoreId::event_topic_with_sep`]/[`StoreId::command_topic_with_sep`].
pub const DEFAULT_TOPIC_SEPARATOR: &str = "/";

impl StoreId {
    /// # Panics
    /// Panics if `name` is empty — store names are required to be non-empty
    /// (spec.md §3 "Store identity").
    #[must_use]
    pub fn new(endpoint: EndpointId, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "store_name must be non-empty");
        Self { endpoint, name }
    }

    #[must_use]
    pub fn event_topic(&self) -> String {
        self.event_topic_with_sep(DEFAULT_TOPIC_SEPARATOR)
    }

    #[must_use]
    pub fn event_topic_with_sep(&self, sep: &str) -> String {
        format!("store_events{sep}{}", self.name)
    }

    #[must_use]
    pub fn command_topic(&self) -> String {
        self.command_topic_with_sep(DEFAULT_TOPIC_SEPARATOR)
    }

    #[must_use]
    pub fn command_topic_with_sep(&self, sep: &str) -> String {
        format!("store_commands{sep}{}", self.name)
    }

    /// Topic carrying clone→master traffic: forwarded pre-commit write
    /// requests and `snapshot_request`, plus master→clone point-to-point
    /// replies (`snapshot_reply`, `ack_clone`, `put_unique_result`) — spec.md
    /// §6's wire vocabulary, split onto its own topic from
    /// [`command_topic`](Self::command_topic) (which only ever carries the
    /// master's seq-ordered replication broadcast) so a clone's sequencing
    /// state machine never has to filter pre-commit traffic out of the
    /// ordered stream.
    #[must_use]
    pub fn request_topic(&self) -> String {
        self.request_topic_with_sep(DEFAULT_TOPIC_SEPARATOR)
    }

    #[must_use]
    pub fn request_topic_with_sep(&self, sep: &str) -> String {
        format!("store_requests{sep}{}", self.name)
    }
}
