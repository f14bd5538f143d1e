//! The `data` value universe (spec.md §3 "Value") and its operations
//! (spec.md §4.1).
//!
//! Modeled as a tagged enum in the style of the teacher workspace's
//! intended `Value` type (`topgun_core::types` / `topgun_core::lib` doc
//! comments describe `Null`/`Bool`/`Int`/`Float`/`String`/`Bytes`/`Array`/
//! `Map`), extended with the broker-specific scalar kinds spec.md names:
//! `address`, `subnet`, `port`, `timestamp`, `timespan`, and `enum`, plus a
//! `set` container distinct from `table`/`vector`.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::ids::{ActorId, EndpointId, EntityId};
use crate::time::{Timespan, Timestamp};

/// An IP subnet: a network address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subnet {
    pub address: IpAddr,
    pub prefix_len: u8,
}

/// Transport-level port, with an optional protocol tag (mirrors the
/// `port`/`protocol` pairing the broker's wire format uses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub proto: PortProto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProto {
    Tcp,
    Udp,
    Icmp,
    Unknown,
}

/// The tagged `data` value.
///
/// Compares by structural equality; ordered within each scalar type and
/// lexicographically (by discriminant rank, then payload) for composites,
/// so `Data` can live inside `BTreeSet`/`BTreeMap` keys for `set`/`table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Data {
    None,
    Bool(bool),
    /// Unsigned count.
    Count(u64),
    /// Signed integer.
    Int(i64),
    /// Double-precision real, ordered via `OrderedFloat` (NaN sorts last,
    /// equal to itself — acceptable for a store key/value universe that
    /// never needs IEEE-754 NaN semantics).
    Real(OrderedFloat<f64>),
    /// Text convention: callers treat this as UTF-8, but it is carried as
    /// raw bytes so arbitrary binary payloads round-trip too.
    String(Vec<u8>),
    Address(IpAddr),
    Subnet(Subnet),
    Port(Port),
    Timestamp(Timestamp),
    Timespan(Timespan),
    /// A named enum tag (distinct from a `string`: compares and
    /// round-trips as an enumerated symbol, matching spec.md's error-kind
    /// encoding, `enum_value(kind_name)`).
    Enum(String),
    Set(BTreeSet<Data>),
    Table(BTreeMap<Data, Data>),
    Vector(Vec<Data>),
}

impl Eq for Data {}

/// Discriminant rank, used for cross-variant ordering ("lexicographically
/// for composites" — composites order first by what they contain, but
/// distinct variants must still have a total order between them).
fn rank(d: &Data) -> u8 {
    match d {
        Data::None => 0,
        Data::Bool(_) => 1,
        Data::Count(_) => 2,
        Data::Int(_) => 3,
        Data::Real(_) => 4,
        Data::String(_) => 5,
        Data::Address(_) => 6,
        Data::Subnet(_) => 7,
        Data::Port(_) => 8,
        Data::Timestamp(_) => 9,
        Data::Timespan(_) => 10,
        Data::Enum(_) => 11,
        Data::Set(_) => 12,
        Data::Table(_) => 13,
        Data::Vector(_) => 14,
    }
}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Data::None, Data::None) => Ordering::Equal,
            (Data::Bool(a), Data::Bool(b)) => a.cmp(b),
            (Data::Count(a), Data::Count(b)) => a.cmp(b),
            (Data::Int(a), Data::Int(b)) => a.cmp(b),
            (Data::Real(a), Data::Real(b)) => a.cmp(b),
            (Data::String(a), Data::String(b)) => a.cmp(b),
            (Data::Address(a), Data::Address(b)) => a.cmp(b),
            (Data::Subnet(a), Data::Subnet(b)) => a.cmp(b),
            (Data::Port(a), Data::Port(b)) => a.cmp(b),
            (Data::Timestamp(a), Data::Timestamp(b)) => a.cmp(b),
            (Data::Timespan(a), Data::Timespan(b)) => a.cmp(b),
            (Data::Enum(a), Data::Enum(b)) => a.cmp(b),
            (Data::Set(a), Data::Set(b)) => a.cmp(b),
            (Data::Table(a), Data::Table(b)) => a.cmp(b),
            (Data::Vector(a), Data::Vector(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

/// Discriminant of a `data` type, used as the `init_type` argument to
/// `add` (spec.md §4.1): "initialize as the zero/empty value of
/// `init_type`" when the target key is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Count,
    Int,
    Real,
    String,
    Set,
    Table,
    Vector,
    Timespan,
}

impl TypeTag {
    #[must_use]
    pub fn zero_value(self) -> Data {
        match self {
            TypeTag::Count => Data::Count(0),
            TypeTag::Int => Data::Int(0),
            TypeTag::Real => Data::Real(OrderedFloat(0.0)),
            TypeTag::String => Data::String(Vec::new()),
            TypeTag::Set => Data::Set(BTreeSet::new()),
            TypeTag::Table => Data::Table(BTreeMap::new()),
            TypeTag::Vector => Data::Vector(Vec::new()),
            TypeTag::Timespan => Data::Timespan(Timespan::ZERO),
        }
    }
}

impl Data {
    /// Encodes an `EntityId` as the two-slot `(endpoint_as_data, object_id)`
    /// pairing spec.md §4.5/§7 use for publisher/endpoint fields. Both
    /// slots are `nil` when the entity itself is nil.
    #[must_use]
    pub fn entity(entity: EntityId) -> Data {
        if entity.is_nil() {
            Data::Vector(vec![Data::None, Data::None])
        } else {
            Data::Vector(vec![
                Data::String(entity.endpoint.0.into_bytes()),
                Data::Count(entity.object.0),
            ])
        }
    }

    /// Inverse of [`entity`](Self::entity).
    #[must_use]
    pub fn as_entity(&self) -> Option<EntityId> {
        let Data::Vector(slots) = self else {
            return None;
        };
        let [endpoint, object] = slots.as_slice() else {
            return None;
        };
        match (endpoint, object) {
            (Data::None, Data::None) => Some(EntityId::nil()),
            (Data::String(e), Data::Count(o)) => Some(EntityId::new(
                EndpointId(String::from_utf8_lossy(e).into_owned()),
                ActorId(*o),
            )),
            _ => None,
        }
    }

    /// Encodes `Option<Timespan>` the way spec.md §4.5 encodes
    /// `optional<expiry>`: one slot, the timespan value or `nil`.
    #[must_use]
    pub fn optional_timespan(span: Option<Timespan>) -> Data {
        span.map_or(Data::None, Data::Timespan)
    }

    /// Encodes `Option<Timestamp>` the same way, for event fields that carry
    /// the entry's resolved absolute expiry rather than the originally
    /// requested span. Confirmed intentional: see `event.rs`'s module doc
    /// for why `StoreEvent` uses this encoder instead of
    /// `optional_timespan` despite spec.md §4.5 describing the slot as a
    /// timespan.
    #[must_use]
    pub fn optional_timestamp(ts: Option<Timestamp>) -> Data {
        ts.map_or(Data::None, Data::Timestamp)
    }

    /// `add(target, delta, init_type)` (spec.md §4.1).
    ///
    /// `target` is `None` when the key is absent; the zero/empty value of
    /// `init_type` is used as the starting point before `delta` is applied.
    ///
    /// # Errors
    /// Returns `ErrorKind::TypeClash` if `delta` is not compatible with the
    /// (possibly just-initialized) target type.
    pub fn add(target: Option<&Data>, delta: &Data, init_type: TypeTag) -> Result<Data, ErrorKind> {
        let base = target.cloned().unwrap_or_else(|| init_type.zero_value());
        match (&base, delta) {
            (Data::Count(a), Data::Count(b)) => Ok(Data::Count(a.wrapping_add(*b))),
            (Data::Int(a), Data::Int(b)) => Ok(Data::Int(a.wrapping_add(*b))),
            (Data::Real(a), Data::Real(b)) => Ok(Data::Real(OrderedFloat(a.0 + b.0))),
            (Data::Timestamp(ts), Data::Timespan(span)) => Ok(Data::Timestamp(ts.add_span(*span))),
            (Data::Timespan(a), Data::Timespan(b)) => {
                Ok(Data::Timespan(Timespan(a.0.saturating_add(b.0))))
            }
            (Data::String(a), Data::String(b)) => {
                let mut out = a.clone();
                out.extend_from_slice(b);
                Ok(Data::String(out))
            }
            (Data::Set(s), delta) => {
                let mut out = s.clone();
                out.insert(delta.clone());
                Ok(Data::Set(out))
            }
            (Data::Table(t), Data::Vector(kv)) if kv.len() == 2 => {
                let mut out = t.clone();
                out.insert(kv[0].clone(), kv[1].clone());
                Ok(Data::Table(out))
            }
            (Data::Vector(v), delta) => {
                let mut out = v.clone();
                out.push(delta.clone());
                Ok(Data::Vector(out))
            }
            _ => Err(ErrorKind::TypeClash),
        }
    }

    /// `subtract(target, delta)` (spec.md §4.1).
    ///
    /// # Errors
    /// `ErrorKind::NoSuchKey` if `target` is absent; `ErrorKind::TypeClash`
    /// if `delta` is incompatible with `target`'s type.
    pub fn subtract(target: Option<&Data>, delta: &Data) -> Result<Data, ErrorKind> {
        let base = target.ok_or(ErrorKind::NoSuchKey)?;
        match (base, delta) {
            (Data::Count(a), Data::Count(b)) => Ok(Data::Count(a.saturating_sub(*b))),
            (Data::Int(a), Data::Int(b)) => Ok(Data::Int(a.wrapping_sub(*b))),
            (Data::Real(a), Data::Real(b)) => Ok(Data::Real(OrderedFloat(a.0 - b.0))),
            (Data::Timestamp(ts), Data::Timespan(span)) => Ok(Data::Timestamp(ts.sub_span(*span))),
            (Data::Timespan(a), Data::Timespan(b)) => {
                Ok(Data::Timespan(Timespan(a.0.saturating_sub(b.0))))
            }
            (Data::Set(s), delta) => {
                let mut out = s.clone();
                out.remove(delta);
                Ok(Data::Set(out))
            }
            (Data::Table(t), key) => {
                let mut out = t.clone();
                out.remove(key);
                Ok(Data::Table(out))
            }
            (Data::Vector(v), _) => {
                // "vector pop-last" (spec.md §4.1 / §9 open question): the
                // delta value is ignored for vectors, matching the spec's
                // recommended resolution over the ambiguous source encoding.
                let mut out = v.clone();
                out.pop();
                Ok(Data::Vector(out))
            }
            _ => Err(ErrorKind::TypeClash),
        }
    }

    /// `index_into(container, index)` (spec.md §4.1).
    ///
    /// For `table`/`vector`, returns the value at `index` or
    /// `ErrorKind::NoSuchKey`. For `set`, returns a `bool` `data` value
    /// indicating membership.
    ///
    /// # Errors
    /// `ErrorKind::TypeClash` if `container` is not a `set`/`table`/`vector`.
    pub fn index_into(container: &Data, index: &Data) -> Result<Data, ErrorKind> {
        match container {
            Data::Set(set) => Ok(Data::Bool(set.contains(index))),
            Data::Table(table) => table.get(index).cloned().ok_or(ErrorKind::NoSuchKey),
            Data::Vector(vec) => {
                let Data::Count(i) = index else {
                    return Err(ErrorKind::TypeClash);
                };
                let i = usize::try_from(*i).map_err(|_| ErrorKind::NoSuchKey)?;
                vec.get(i).cloned().ok_or(ErrorKind::NoSuchKey)
            }
            _ => Err(ErrorKind::TypeClash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_count_to_absent_key_initializes_from_zero() {
        let result = Data::add(None, &Data::Count(5), TypeTag::Count).unwrap();
        assert_eq!(result, Data::Count(5));
    }

    #[test]
    fn add_mismatched_types_is_type_clash() {
        let err = Data::add(Some(&Data::Count(1)), &Data::String(b"x".to_vec()), TypeTag::Count)
            .unwrap_err();
        assert_eq!(err, ErrorKind::TypeClash);
    }

    #[test]
    fn add_table_requires_two_element_vector() {
        let table = Data::Table(BTreeMap::new());
        let kv = Data::Vector(vec![Data::String(b"k".to_vec()), Data::Int(1)]);
        let result = Data::add(Some(&table), &kv, TypeTag::Table).unwrap();
        let Data::Table(t) = result else { panic!() };
        assert_eq!(t.get(&Data::String(b"k".to_vec())), Some(&Data::Int(1)));
    }

    #[test]
    fn subtract_absent_key_is_no_such_key() {
        let err = Data::subtract(None, &Data::Count(1)).unwrap_err();
        assert_eq!(err, ErrorKind::NoSuchKey);
    }

    #[test]
    fn subtract_vector_pops_last_ignoring_delta() {
        let vec = Data::Vector(vec![Data::Int(1), Data::Int(2), Data::Int(3)]);
        let result = Data::subtract(Some(&vec), &Data::Int(999)).unwrap();
        assert_eq!(result, Data::Vector(vec![Data::Int(1), Data::Int(2)]));
    }

    #[test]
    fn index_into_set_reports_membership() {
        let mut set = BTreeSet::new();
        set.insert(Data::Int(1));
        let data = Data::Set(set);
        assert_eq!(Data::index_into(&data, &Data::Int(1)).unwrap(), Data::Bool(true));
        assert_eq!(Data::index_into(&data, &Data::Int(2)).unwrap(), Data::Bool(false));
    }

    #[test]
    fn index_into_vector_by_count() {
        let data = Data::Vector(vec![Data::Int(10), Data::Int(20)]);
        assert_eq!(Data::index_into(&data, &Data::Count(1)).unwrap(), Data::Int(20));
        assert_eq!(
            Data::index_into(&data, &Data::Count(5)).unwrap_err(),
            ErrorKind::NoSuchKey
        );
    }

    #[test]
    fn entity_round_trips_including_nil() {
        assert_eq!(Data::entity(EntityId::nil()).as_entity(), Some(EntityId::nil()));
        let entity = EntityId::new(EndpointId("e1".into()), ActorId(3));
        assert_eq!(Data::entity(entity.clone()).as_entity(), Some(entity));
    }

    #[test]
    fn ordering_is_total_across_variants() {
        let mut values = vec![
            Data::Vector(vec![]),
            Data::None,
            Data::Int(1),
            Data::Bool(true),
        ];
        values.sort();
        assert_eq!(values[0], Data::None);
    }
}
