//! The broker error taxonomy (spec.md §7) and its `data` round-trip.
//!
//! Mirrors the split already used in the teacher workspace: a flat,
//! `thiserror`-derived enum for the kinds callers match on (like
//! `topgun_server::service::operation::OperationError`), plus a generic
//! `anyhow`-wrapped variant for backend-implementation-specific failures
//! that don't need their own kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::Data;
use crate::ids::EntityId;

/// Error kind, matching the taxonomy in spec.md §7 by name. Kept as a
/// plain enum (not `thiserror` itself) so it can appear both inside
/// `BrokerError` and on the wire as `enum_value(kind_name)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    Unspecified,
    // peer lifecycle
    PeerIncompatible,
    PeerInvalid,
    PeerUnavailable,
    PeerDisconnectDuringHandshake,
    PeerTimeout,
    // store topology
    MasterExists,
    NoSuchMaster,
    // data-plane
    NoSuchKey,
    TypeClash,
    InvalidData,
    StaleData,
    // timing
    RequestTimeout,
    // backend
    BackendFailure,
    CannotOpenFile,
    CannotWriteFile,
    // protocol/parse
    InvalidTopicKey,
    EndOfFile,
    InvalidTag,
    InvalidStatus,
}

impl ErrorKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Unspecified => "unspecified",
            Self::PeerIncompatible => "peer_incompatible",
            Self::PeerInvalid => "peer_invalid",
            Self::PeerUnavailable => "peer_unavailable",
            Self::PeerDisconnectDuringHandshake => "peer_disconnect_during_handshake",
            Self::PeerTimeout => "peer_timeout",
            Self::MasterExists => "master_exists",
            Self::NoSuchMaster => "no_such_master",
            Self::NoSuchKey => "no_such_key",
            Self::TypeClash => "type_clash",
            Self::InvalidData => "invalid_data",
            Self::StaleData => "stale_data",
            Self::RequestTimeout => "request_timeout",
            Self::BackendFailure => "backend_failure",
            Self::CannotOpenFile => "cannot_open_file",
            Self::CannotWriteFile => "cannot_write_file",
            Self::InvalidTopicKey => "invalid_topic_key",
            Self::EndOfFile => "end_of_file",
            Self::InvalidTag => "invalid_tag",
            Self::InvalidStatus => "invalid_status",
        }
    }

    /// The category tag namespacing this kind, used in the `data`
    /// round-trip's `enum_value`.
    #[must_use]
    pub fn category(self) -> &'static str {
        match self {
            Self::None | Self::Unspecified => "generic",
            Self::PeerIncompatible
            | Self::PeerInvalid
            | Self::PeerUnavailable
            | Self::PeerDisconnectDuringHandshake
            | Self::PeerTimeout => "peer",
            Self::MasterExists | Self::NoSuchMaster => "store_topology",
            Self::NoSuchKey | Self::TypeClash | Self::InvalidData | Self::StaleData => {
                "data_plane"
            }
            Self::RequestTimeout => "timing",
            Self::BackendFailure | Self::CannotOpenFile | Self::CannotWriteFile => "backend",
            Self::InvalidTopicKey | Self::EndOfFile | Self::InvalidTag | Self::InvalidStatus => {
                "protocol"
            }
        }
    }
}

/// Context attached to an error: a human description, and optionally the
/// endpoint the error concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorContext {
    pub endpoint: Option<EntityId>,
    pub description: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub fn description(desc: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            description: Some(desc.into()),
        }
    }

    #[must_use]
    pub fn with_endpoint(endpoint: EntityId, desc: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint),
            description: Some(desc.into()),
        }
    }
}

/// A broker error: a kind plus optional context.
///
/// `none` is a valid, empty error (spec.md §7): callers that thread
/// `BrokerError` through `expected<data>`-shaped results use
/// `BrokerError::NONE` to mean "no error" where a sentinel is needed on
/// the wire, though in Rust this is normally just `Ok`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {context:?}", kind = self.kind, context = self.context)]
pub struct BrokerError {
    pub kind: ErrorKind,
    pub context: ErrorContext,
}

impl BrokerError {
    pub const NONE: Self = Self {
        kind: ErrorKind::None,
        context: ErrorContext {
            endpoint: None,
            description: None,
        },
    };

    #[must_use]
    pub fn new(kind: ErrorKind, context: ErrorContext) -> Self {
        Self { kind, context }
    }

    #[must_use]
    pub fn simple(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: ErrorContext::default(),
        }
    }

    #[must_use]
    pub fn with_description(kind: ErrorKind, desc: impl Into<String>) -> Self {
        Self {
            kind,
            context: ErrorContext::description(desc),
        }
    }

    /// Encodes this error as a `data` vector: `["error", enum_value(kind), context]`.
    #[must_use]
    pub fn to_data(&self) -> Data {
        let context = match (&self.context.endpoint, &self.context.description) {
            (None, None) => Data::None,
            (None, Some(desc)) => Data::Vector(vec![Data::String(desc.clone().into_bytes())]),
            (Some(endpoint), desc) => Data::Vector(vec![
                Data::entity(endpoint.clone()),
                desc.clone()
                    .map_or(Data::None, |d| Data::String(d.into_bytes())),
            ]),
        };
        Data::Vector(vec![
            Data::String(b"error".to_vec()),
            Data::Enum(self.kind.name().to_string()),
            context,
        ])
    }

    /// Decodes a `data` vector produced by [`to_data`](Self::to_data).
    ///
    /// # Errors
    /// Returns `Err` if `data` is not a well-formed `["error", kind, context]`
    /// vector.
    pub fn from_data(data: &Data) -> Result<Self, &'static str> {
        let Data::Vector(items) = data else {
            return Err("not a vector");
        };
        let [tag, kind_val, context_val] = items.as_slice() else {
            return Err("wrong arity");
        };
        if *tag != Data::String(b"error".to_vec()) {
            return Err("missing error tag");
        }
        let Data::Enum(kind_name) = kind_val else {
            return Err("kind is not an enum_value");
        };
        let kind = kind_from_name(kind_name).ok_or("unknown error kind")?;
        let context = match context_val {
            Data::None => ErrorContext::default(),
            Data::Vector(parts) if parts.len() == 1 => ErrorContext {
                endpoint: None,
                description: match &parts[0] {
                    Data::String(s) => Some(String::from_utf8_lossy(s).into_owned()),
                    Data::None => None,
                    _ => return Err("malformed description"),
                },
            },
            Data::Vector(parts) if parts.len() == 2 => ErrorContext {
                endpoint: match &parts[0] {
                    Data::None => None,
                    other => Some(other.as_entity().ok_or("malformed endpoint")?),
                },
                description: match &parts[1] {
                    Data::String(s) => Some(String::from_utf8_lossy(s).into_owned()),
                    Data::None => None,
                    _ => return Err("malformed description"),
                },
            },
            _ => return Err("malformed context"),
        };
        Ok(Self { kind, context })
    }
}

fn kind_from_name(name: &str) -> Option<ErrorKind> {
    use ErrorKind::{
        BackendFailure, CannotOpenFile, CannotWriteFile, EndOfFile, InvalidData, InvalidStatus,
        InvalidTag, InvalidTopicKey, MasterExists, NoSuchKey, NoSuchMaster,
        PeerDisconnectDuringHandshake, PeerIncompatible, PeerInvalid, PeerTimeout,
        PeerUnavailable, RequestTimeout, StaleData, TypeClash, Unspecified,
    };
    Some(match name {
        "none" => ErrorKind::None,
        "unspecified" => Unspecified,
        "peer_incompatible" => PeerIncompatible,
        "peer_invalid" => PeerInvalid,
        "peer_unavailable" => PeerUnavailable,
        "peer_disconnect_during_handshake" => PeerDisconnectDuringHandshake,
        "peer_timeout" => PeerTimeout,
        "master_exists" => MasterExists,
        "no_such_master" => NoSuchMaster,
        "no_such_key" => NoSuchKey,
        "type_clash" => TypeClash,
        "invalid_data" => InvalidData,
        "stale_data" => StaleData,
        "request_timeout" => RequestTimeout,
        "backend_failure" => BackendFailure,
        "cannot_open_file" => CannotOpenFile,
        "cannot_write_file" => CannotWriteFile,
        "invalid_topic_key" => InvalidTopicKey,
        "end_of_file" => EndOfFile,
        "invalid_tag" => InvalidTag,
        "invalid_status" => InvalidStatus,
        _ => return None,
    })
}

/// `expected<data>`: the result type frontend/proxy reads return.
pub type Expected<T = Data> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_error() {
        let err = BrokerError::simple(ErrorKind::NoSuchKey);
        assert_eq!(BrokerError::from_data(&err.to_data()).unwrap(), err);
    }

    #[test]
    fn round_trips_error_with_description() {
        let err = BrokerError::with_description(ErrorKind::TypeClash, "count + string");
        assert_eq!(BrokerError::from_data(&err.to_data()).unwrap(), err);
    }

    #[test]
    fn round_trips_error_with_endpoint_and_description() {
        let entity = EntityId::new(crate::ids::EndpointId("e1".into()), crate::ids::ActorId(9));
        let err = BrokerError::new(
            ErrorKind::PeerTimeout,
            ErrorContext::with_endpoint(entity, "handshake stalled"),
        );
        assert_eq!(BrokerError::from_data(&err.to_data()).unwrap(), err);
    }

    #[test]
    fn round_trips_none_kind() {
        let err = BrokerError::NONE;
        assert_eq!(BrokerError::from_data(&err.to_data()).unwrap(), err);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_all_kinds(idx in 0usize..20) {
            let kinds = [
                ErrorKind::None, ErrorKind::Unspecified, ErrorKind::PeerIncompatible,
                ErrorKind::PeerInvalid, ErrorKind::PeerUnavailable,
                ErrorKind::PeerDisconnectDuringHandshake, ErrorKind::PeerTimeout,
                ErrorKind::MasterExists, ErrorKind::NoSuchMaster, ErrorKind::NoSuchKey,
                ErrorKind::TypeClash, ErrorKind::InvalidData, ErrorKind::StaleData,
                ErrorKind::RequestTimeout, ErrorKind::BackendFailure, ErrorKind::CannotOpenFile,
                ErrorKind::CannotWriteFile, ErrorKind::InvalidTopicKey, ErrorKind::EndOfFile,
                ErrorKind::InvalidTag,
            ];
            let err = BrokerError::simple(kinds[idx]);
            let decoded = BrokerError::from_data(&err.to_data()).unwrap();
            assert_eq!(decoded, err);
        }
    }
}
