//! The command protocol message vocabulary (spec.md §6).
//!
//! `CommandPayload` is modeled the way the teacher workspace models its
//! inter-node wire messages (`topgun_server::cluster::messages::ClusterMessage`):
//! an internally-tagged enum serialized with `rmp_serde::to_vec_named`,
//! `SCREAMING_SNAKE_CASE` variant names matching the wire tag set in
//! spec.md §6's table verbatim.

use serde::{Deserialize, Serialize};

use crate::data::{Data, TypeTag};
use crate::ids::EntityId;
use crate::time::Timestamp;

/// A structured command message (spec.md §3 "Command").
///
/// `seq` is meaningless (and ignored on application) for
/// `SnapshotRequest` and any frontend→master pre-commit payload — see
/// spec.md §6 "Each command is tagged with the master's current `seq`
/// except `snapshot_request` and frontend→master requests".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub sender: EntityId,
    pub seq: u64,
    pub payload: CommandPayload,
}

impl Command {
    #[must_use]
    pub fn new(sender: EntityId, seq: u64, payload: CommandPayload) -> Self {
        Self {
            sender,
            seq,
            payload,
        }
    }
}

/// One entry of a snapshot: a key, its value, and its optional expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: Data,
    pub value: Data,
    pub expiry: Option<Timestamp>,
}

/// The command payload vocabulary, tagged on `"type"` with
/// `SCREAMING_SNAKE_CASE` variant names (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandPayload {
    Put {
        key: Data,
        value: Data,
        expiry: Option<Timestamp>,
        publisher: EntityId,
    },
    PutUnique {
        key: Data,
        value: Data,
        expiry: Option<Timestamp>,
        publisher: EntityId,
        req_id: u64,
    },
    PutUniqueResult {
        req_id: u64,
        inserted: bool,
    },
    Erase {
        key: Data,
        publisher: EntityId,
    },
    Expire {
        key: Data,
        publisher: EntityId,
    },
    Clear {
        publisher: EntityId,
    },
    Add {
        key: Data,
        value: Data,
        init_type: TypeTag,
        expiry: Option<Timestamp>,
        publisher: EntityId,
    },
    Subtract {
        key: Data,
        value: Data,
        expiry: Option<Timestamp>,
        publisher: EntityId,
    },
    SnapshotRequest {
        clone_id: EntityId,
    },
    SnapshotReply {
        clone_id: EntityId,
        seq: u64,
        entries: Vec<SnapshotEntry>,
    },
    AckClone {
        clone_id: EntityId,
    },
}

impl CommandPayload {
    /// `true` for payloads exempt from sequence-number gap checking
    /// (spec.md §6): `snapshot_request` and any frontend→master pre-commit
    /// payload (`put_unique`'s `req_id` marks it as such; in this crate
    /// frontend→master requests are sent as plain `Put`/`Erase`/etc.
    /// payloads over a distinct channel rather than the replicated
    /// command topic, so in practice only `SnapshotRequest` needs this
    /// flag on the replication stream).
    #[must_use]
    pub fn is_pre_commit(&self) -> bool {
        matches!(self, CommandPayload::SnapshotRequest { .. })
    }

    /// The publisher entity carried by mutation payloads, if any.
    #[must_use]
    pub fn publisher(&self) -> Option<&EntityId> {
        match self {
            CommandPayload::Put { publisher, .. }
            | CommandPayload::PutUnique { publisher, .. }
            | CommandPayload::Erase { publisher, .. }
            | CommandPayload::Expire { publisher, .. }
            | CommandPayload::Clear { publisher, .. }
            | CommandPayload::Add { publisher, .. }
            | CommandPayload::Subtract { publisher, .. } => Some(publisher),
            CommandPayload::PutUniqueResult { .. }
            | CommandPayload::SnapshotRequest { .. }
            | CommandPayload::SnapshotReply { .. }
            | CommandPayload::AckClone { .. } => None,
        }
    }
}
