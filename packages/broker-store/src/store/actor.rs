//! The store actor (spec.md §4.3 "Store Actor (C4)") and the command
//! protocol state machine linking masters and clones (spec.md §4.3
//! "Command application"/"Snapshot protocol", §4.3's table in §6).
//!
//! Re-architected per spec.md §9's design notes: each store is an owned
//! tokio task with a single inbound channel selecting over (request |
//! replication command | request-topic traffic | tick | shutdown), rather
//! than the source's actor-framework mailbox loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker_core::{
    Bus, BrokerError, Command, CommandPayload, Data, EntityId, ErrorKind, Expected, SnapshotEntry,
    StoreEvent, StoreId, Timespan, Timestamp, TypeTag,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backend::{Backend, ExpiryUpdate};
use crate::store::events::EventPublisher;

/// Bounded resync buffer (spec.md §4.3 "capped at a bounded window").
const RESYNC_BUFFER_CAP: usize = 256;

/// The request vocabulary a [`Frontend`](crate::store::frontend::Frontend)
/// or [`Proxy`](crate::store::proxy::Proxy) sends to a store actor (spec.md
/// §4.3 "Request operations").
#[derive(Debug, Clone)]
pub enum StoreRequest {
    Exists { key: Data },
    Get { key: Data },
    GetIndexFromValue { key: Data, index: Data },
    Keys,
    PutUnique { key: Data, value: Data, expiry: Option<Timestamp> },
    Put { key: Data, value: Data, expiry: Option<Timestamp> },
    Erase { key: Data },
    Clear,
    Add { key: Data, value: Data, init_type: TypeTag, expiry: Option<Timestamp> },
    Subtract { key: Data, value: Data, expiry: Option<Timestamp> },
}

impl StoreRequest {
    fn is_write(&self) -> bool {
        !matches!(
            self,
            StoreRequest::Exists { .. }
                | StoreRequest::Get { .. }
                | StoreRequest::GetIndexFromValue { .. }
                | StoreRequest::Keys
        )
    }
}

/// One message accepted by a store actor's inbound channel.
enum ActorMessage {
    Request {
        requester: EntityId,
        payload: StoreRequest,
        reply: oneshot::Sender<Expected<Data>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// A caller-facing handle to a running store actor. Cloned freely; cheap
/// (an `mpsc::Sender` plus the actor's identity).
#[derive(Clone)]
pub struct StoreActorHandle {
    tx: mpsc::Sender<ActorMessage>,
    store_id: Arc<StoreId>,
}

impl StoreActorHandle {
    #[must_use]
    pub fn store_id(&self) -> &StoreId {
        &self.store_id
    }

    /// Sends a request and awaits its reply (used by
    /// [`Frontend`](crate::store::frontend::Frontend)'s synchronous methods
    /// and by [`Proxy`](crate::store::proxy::Proxy)).
    ///
    /// # Errors
    /// `ErrorKind::RequestTimeout` if `timeout` elapses; `ErrorKind::Unspecified`
    /// if the actor has already shut down.
    pub async fn request(
        &self,
        requester: EntityId,
        payload: StoreRequest,
        timeout: Duration,
    ) -> Expected<Data> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ActorMessage::Request { requester, payload, reply: reply_tx })
            .await
            .map_err(|_| BrokerError::simple(ErrorKind::Unspecified))?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrokerError::simple(ErrorKind::Unspecified)),
            Err(_) => Err(BrokerError::simple(ErrorKind::RequestTimeout)),
        }
    }

    /// Sends a request without waiting for the reply's delivery beyond the
    /// actor accepting it onto its queue (spec.md §4.4 "Fire-and-forget
    /// modifiers... return immediately"). Errors are not surfaced to the
    /// caller; the actor logs them (spec.md §7).
    pub async fn request_fire_and_forget(&self, requester: EntityId, payload: StoreRequest) {
        let (reply_tx, _reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(ActorMessage::Request { requester, payload, reply: reply_tx })
            .await;
    }

    /// Requests an orderly shutdown and waits for the actor's task to drain
    /// (spec.md §5 "Shutdown drains in-flight inbound messages...").
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(ActorMessage::Shutdown { done: done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// This store's replication role.
pub enum Role {
    Master,
    Clone(CloneState),
}

pub struct CloneState {
    master_entity: EntityId,
    expected_seq: u64,
    resync_pending: bool,
    buffer: VecDeque<Command>,
    /// `PutUnique` requests forwarded to the master, awaiting
    /// `put_unique_result` (spec.md §6).
    pending_put_unique: std::collections::HashMap<u64, oneshot::Sender<Expected<Data>>>,
}

impl CloneState {
    #[must_use]
    pub fn new(master_entity: EntityId) -> Self {
        Self {
            master_entity,
            expected_seq: 0,
            resync_pending: false,
            buffer: VecDeque::new(),
            pending_put_unique: std::collections::HashMap::new(),
        }
    }
}

/// Spawns a store actor and returns a handle to it.
///
/// `self_entity` identifies this actor as a command sender/publisher.
/// `req_id_counter` is shared across every actor hosting the same store
/// (master and all its clones) so `put_unique` request ids never collide
/// across clones — see `DESIGN.md` for the rationale (a real multi-process
/// deployment would allocate per-clone ranges through the master instead).
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    store_id: StoreId,
    self_entity: EntityId,
    role: Role,
    mut backend: Box<dyn Backend>,
    bus: Arc<dyn Bus>,
    req_id_counter: Arc<AtomicU64>,
    tick_interval: Duration,
) -> StoreActorHandle {
    let (tx, mut rx) = mpsc::channel::<ActorMessage>(256);
    let store_id = Arc::new(store_id);
    let handle = StoreActorHandle { tx, store_id: store_id.clone() };

    tokio::spawn(async move {
        let events = EventPublisher::new(bus.clone(), &store_id);
        let command_topic = store_id.command_topic();
        let request_topic = store_id.request_topic();
        let mut role = role;

        // Clones subscribe to the replication broadcast; masters author it
        // and never consume their own broadcasts.
        let mut command_sub = matches!(role, Role::Clone(_)).then(|| bus.subscribe(&command_topic));
        let mut request_sub = bus.subscribe(&request_topic);

        let mut seq: u64 = 0;

        // A freshly attached clone bootstraps exactly like a gap recovery
        // (spec.md §4.3 "A clone, on attach or after a gap, sends
        // snapshot_request").
        if let Role::Clone(ref mut clone) = role {
            clone.resync_pending = true;
            bus.publish(
                &request_topic,
                encode_command(&Command::new(
                    self_entity.clone(),
                    0,
                    CommandPayload::SnapshotRequest { clone_id: self_entity.clone() },
                )),
            )
            .await;
        }

        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                Some(msg) = rx.recv() => {
                    match msg {
                        ActorMessage::Request { requester, payload, reply } => {
                            handle_request(
                                &store_id, &self_entity, &mut role, &mut backend, &events,
                                &bus, &command_topic, &request_topic, &mut seq,
                                &req_id_counter, requester, payload, reply,
                            ).await;
                        }
                        ActorMessage::Shutdown { done } => {
                            // Drain whatever is already queued, replying with
                            // an error to each (spec.md §5).
                            while let Ok(msg) = rx.try_recv() {
                                if let ActorMessage::Request { reply, .. } = msg {
                                    let _ = reply.send(Err(BrokerError::simple(ErrorKind::Unspecified)));
                                }
                            }
                            info!(store = %store_id.name, "store actor shut down");
                            let _ = done.send(());
                            return;
                        }
                    }
                }

                Some(bytes) = async {
                    match command_sub.as_mut() {
                        Some(sub) => sub.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Role::Clone(ref mut clone) = role {
                        apply_replicated_command(
                            &store_id, &self_entity, clone, &mut backend, &events, &bus, &request_topic, bytes,
                        ).await;
                    }
                }

                Some(bytes) = request_sub.recv() => {
                    handle_request_topic_message(
                        &store_id, &self_entity, &mut role, &mut backend, &events,
                        &bus, &command_topic, &request_topic, &mut seq, bytes,
                    ).await;
                }

                _ = ticker.tick(), if matches!(role, Role::Master) => {
                    run_expiry_tick(&store_id, &self_entity, &mut backend, &events, &bus, &command_topic, &mut seq).await;
                }
            }
        }
    });

    handle
}

fn encode_command(command: &Command) -> Vec<u8> {
    rmp_serde::to_vec_named(command).unwrap_or_default()
}

fn decode_command(bytes: &[u8]) -> Option<Command> {
    rmp_serde::from_slice(bytes).ok()
}

/// The result of applying a mutation to the backend, used to build the
/// correct event (insert vs update) per spec.md §4.5.
enum MutationOutcome {
    Inserted(Data),
    Updated { old: Data, new: Data },
    Erased,
    NotErased,
}

async fn apply_put(
    backend: &mut Box<dyn Backend>,
    key: &Data,
    value: &Data,
    expiry: ExpiryUpdate,
) -> Result<MutationOutcome, ErrorKind> {
    let existed = backend.exists(key).await?;
    let old = if existed { Some(backend.get(key).await?) } else { None };
    backend.put(key.clone(), value.clone(), expiry).await?;
    Ok(match old {
        Some(old) => MutationOutcome::Updated { old, new: value.clone() },
        None => MutationOutcome::Inserted(value.clone()),
    })
}

async fn apply_add(
    backend: &mut Box<dyn Backend>,
    key: &Data,
    value: &Data,
    init_type: TypeTag,
    expiry: ExpiryUpdate,
) -> Result<(MutationOutcome, Data), ErrorKind> {
    let existed = backend.exists(key).await?;
    let old = if existed { Some(backend.get(key).await?) } else { None };
    let new = backend.add(key.clone(), value.clone(), init_type, expiry).await?;
    let outcome = match old {
        Some(old) => MutationOutcome::Updated { old, new: new.clone() },
        None => MutationOutcome::Inserted(new.clone()),
    };
    Ok((outcome, new))
}

async fn apply_subtract(
    backend: &mut Box<dyn Backend>,
    key: &Data,
    value: &Data,
    expiry: ExpiryUpdate,
) -> Result<(MutationOutcome, Data), ErrorKind> {
    let old = backend.get(key).await?;
    let new = backend.subtract(key.clone(), value.clone(), expiry).await?;
    Ok((MutationOutcome::Updated { old, new: new.clone() }, new))
}

async fn apply_erase(backend: &mut Box<dyn Backend>, key: &Data) -> Result<MutationOutcome, ErrorKind> {
    let existed = backend.exists(key).await?;
    backend.erase(key).await?;
    Ok(if existed { MutationOutcome::Erased } else { MutationOutcome::NotErased })
}

async fn emit_for_outcome(
    events: &EventPublisher,
    store_name: &str,
    key: &Data,
    outcome: &MutationOutcome,
    expiry: Option<Timestamp>,
    publisher: EntityId,
) {
    let event = match outcome {
        MutationOutcome::Inserted(value) => Some(StoreEvent::Insert {
            store_name: store_name.to_string(),
            key: key.clone(),
            value: value.clone(),
            expiry,
            publisher,
        }),
        MutationOutcome::Updated { old, new } => Some(StoreEvent::Update {
            store_name: store_name.to_string(),
            key: key.clone(),
            old_value: old.clone(),
            new_value: new.clone(),
            expiry,
            publisher,
        }),
        MutationOutcome::Erased => Some(StoreEvent::Erase {
            store_name: store_name.to_string(),
            key: key.clone(),
            publisher,
        }),
        MutationOutcome::NotErased => None,
    };
    if let Some(event) = event {
        events.publish(&event).await;
    }
}

/// Handles one locally-submitted request (spec.md §4.3 "Request operations").
#[allow(clippy::too_many_arguments)]
async fn handle_request(
    store_id: &StoreId,
    self_entity: &EntityId,
    role: &mut Role,
    backend: &mut Box<dyn Backend>,
    events: &EventPublisher,
    bus: &Arc<dyn Bus>,
    command_topic: &str,
    request_topic: &str,
    seq: &mut u64,
    req_id_counter: &Arc<AtomicU64>,
    requester: EntityId,
    payload: StoreRequest,
    reply: oneshot::Sender<Expected<Data>>,
) {
    // Reads are always served locally regardless of role (spec.md §4.3).
    if !payload.is_write() {
        let result = read_local(backend, &payload).await;
        let _ = reply.send(result);
        return;
    }

    match role {
        Role::Master => {
            let result = apply_master_write(
                store_id, self_entity, backend, events, bus, command_topic, seq, requester, payload,
            )
            .await;
            let _ = reply.send(result);
        }
        Role::Clone(clone) => {
            // spec.md §4.3: "on a clone, forwarded as command to master...
            // does NOT apply locally until it receives the replay."
            match payload {
                StoreRequest::PutUnique { key, value, expiry } => {
                    let req_id = req_id_counter.fetch_add(1, Ordering::Relaxed);
                    clone.pending_put_unique.insert(req_id, reply);
                    bus.publish(
                        request_topic,
                        encode_command(&Command::new(
                            self_entity.clone(),
                            0,
                            CommandPayload::PutUnique {
                                key,
                                value,
                                expiry,
                                publisher: requester,
                                req_id,
                            },
                        )),
                    )
                    .await;
                }
                other => {
                    let command_payload = write_request_to_payload(other, requester);
                    bus.publish(
                        request_topic,
                        encode_command(&Command::new(self_entity.clone(), 0, command_payload)),
                    )
                    .await;
                    // Fire-and-forget from the caller's perspective: the
                    // forward was accepted.
                    let _ = reply.send(Ok(Data::None));
                }
            }
        }
    }
}

async fn read_local(backend: &Box<dyn Backend>, payload: &StoreRequest) -> Expected<Data> {
    match payload {
        StoreRequest::Exists { key } => backend.exists(key).await.map(Data::Bool).map_err(BrokerError::simple),
        StoreRequest::Get { key } => backend.get(key).await.map_err(BrokerError::simple),
        StoreRequest::GetIndexFromValue { key, index } => {
            let container = backend.get(key).await.map_err(BrokerError::simple)?;
            Data::index_into(&container, index).map_err(BrokerError::simple)
        }
        StoreRequest::Keys => backend
            .keys()
            .await
            .map(|ks| Data::Vector(ks))
            .map_err(BrokerError::simple),
        _ => unreachable!("read_local called with a write request"),
    }
}

fn write_request_to_payload(request: StoreRequest, publisher: EntityId) -> CommandPayload {
    match request {
        StoreRequest::Put { key, value, expiry } => CommandPayload::Put { key, value, expiry, publisher },
        StoreRequest::Erase { key } => CommandPayload::Erase { key, publisher },
        StoreRequest::Clear => CommandPayload::Clear { publisher },
        StoreRequest::Add { key, value, init_type, expiry } => {
            CommandPayload::Add { key, value, init_type, expiry, publisher }
        }
        StoreRequest::Subtract { key, value, expiry } => {
            CommandPayload::Subtract { key, value, expiry, publisher }
        }
        StoreRequest::PutUnique { .. } => unreachable!("put_unique has its own forwarding path"),
        _ => unreachable!("write_request_to_payload called with a read request"),
    }
}

/// Applies a write directly on a master: mutate, bump `seq`, broadcast,
/// emit event (spec.md §4.3 "Command emission").
#[allow(clippy::too_many_arguments)]
async fn apply_master_write(
    store_id: &StoreId,
    self_entity: &EntityId,
    backend: &mut Box<dyn Backend>,
    events: &EventPublisher,
    bus: &Arc<dyn Bus>,
    command_topic: &str,
    seq: &mut u64,
    requester: EntityId,
    payload: StoreRequest,
) -> Expected<Data> {
    match payload {
        StoreRequest::Put { key, value, expiry } => {
            let outcome = apply_put(backend, &key, &value, ExpiryUpdate::from_option(expiry))
                .await
                .map_err(BrokerError::simple)?;
            *seq += 1;
            broadcast(
                bus, command_topic, self_entity, *seq,
                CommandPayload::Put { key: key.clone(), value: value.clone(), expiry, publisher: requester.clone() },
            ).await;
            emit_for_outcome(events, &store_id.name, &key, &outcome, expiry, requester).await;
            Ok(Data::None)
        }
        StoreRequest::PutUnique { key, value, expiry } => {
            let inserted = !backend.exists(&key).await.map_err(BrokerError::simple)?;
            if inserted {
                backend
                    .put(key.clone(), value.clone(), ExpiryUpdate::from_option(expiry))
                    .await
                    .map_err(BrokerError::simple)?;
                *seq += 1;
                broadcast(
                    bus, command_topic, self_entity, *seq,
                    CommandPayload::Put { key: key.clone(), value: value.clone(), expiry, publisher: requester.clone() },
                ).await;
                let event = StoreEvent::Insert {
                    store_name: store_id.name.clone(), key: key.clone(), value, expiry, publisher: requester,
                };
                events.publish(&event).await;
            }
            Ok(Data::Bool(inserted))
        }
        StoreRequest::Erase { key } => {
            let outcome = apply_erase(backend, &key).await.map_err(BrokerError::simple)?;
            if matches!(outcome, MutationOutcome::Erased) {
                *seq += 1;
                broadcast(
                    bus, command_topic, self_entity, *seq,
                    CommandPayload::Erase { key: key.clone(), publisher: requester.clone() },
                ).await;
            }
            emit_for_outcome(events, &store_id.name, &key, &outcome, None, requester).await;
            Ok(Data::None)
        }
        StoreRequest::Clear => {
            backend.clear().await.map_err(BrokerError::simple)?;
            *seq += 1;
            broadcast(bus, command_topic, self_entity, *seq, CommandPayload::Clear { publisher: requester }).await;
            Ok(Data::None)
        }
        StoreRequest::Add { key, value, init_type, expiry } => {
            let (outcome, new_value) = apply_add(backend, &key, &value, init_type, ExpiryUpdate::from_option(expiry))
                .await
                .map_err(BrokerError::simple)?;
            *seq += 1;
            broadcast(
                bus, command_topic, self_entity, *seq,
                CommandPayload::Add { key: key.clone(), value: value.clone(), init_type, expiry, publisher: requester.clone() },
            ).await;
            emit_for_outcome(events, &store_id.name, &key, &outcome, expiry, requester).await;
            Ok(new_value)
        }
        StoreRequest::Subtract { key, value, expiry } => {
            let (outcome, new_value) = apply_subtract(backend, &key, &value, ExpiryUpdate::from_option(expiry))
                .await
                .map_err(BrokerError::simple)?;
            *seq += 1;
            broadcast(
                bus, command_topic, self_entity, *seq,
                CommandPayload::Subtract { key: key.clone(), value: value.clone(), expiry, publisher: requester.clone() },
            ).await;
            emit_for_outcome(events, &store_id.name, &key, &outcome, expiry, requester).await;
            Ok(new_value)
        }
        _ => unreachable!("apply_master_write called with a read request"),
    }
}

async fn broadcast(bus: &Arc<dyn Bus>, topic: &str, sender: &EntityId, seq: u64, payload: CommandPayload) {
    let command = Command::new(sender.clone(), seq, payload);
    bus.publish(topic, encode_command(&command)).await;
}

/// Handles traffic on `request_topic`: forwarded writes and
/// `snapshot_request` (master side), and targeted replies (clone side).
#[allow(clippy::too_many_arguments)]
async fn handle_request_topic_message(
    store_id: &StoreId,
    self_entity: &EntityId,
    role: &mut Role,
    backend: &mut Box<dyn Backend>,
    events: &EventPublisher,
    bus: &Arc<dyn Bus>,
    command_topic: &str,
    request_topic: &str,
    seq: &mut u64,
    bytes: Vec<u8>,
) {
    let Some(command) = decode_command(&bytes) else { return };

    match role {
        Role::Master => {
            // Ignore anything this master itself might have published that
            // happens to loop back, and ignore traffic addressed to a clone.
            if command.sender == *self_entity {
                return;
            }
            match command.payload {
                CommandPayload::SnapshotRequest { clone_id } => {
                    let entries = snapshot_entries(backend).await;
                    bus.publish(
                        request_topic,
                        encode_command(&Command::new(
                            self_entity.clone(), *seq,
                            CommandPayload::SnapshotReply { clone_id: clone_id.clone(), seq: *seq, entries },
                        )),
                    )
                    .await;
                    bus.publish(
                        request_topic,
                        encode_command(&Command::new(
                            self_entity.clone(), 0, CommandPayload::AckClone { clone_id },
                        )),
                    )
                    .await;
                }
                CommandPayload::PutUnique { key, value, expiry, publisher, req_id } => {
                    let requester = publisher;
                    let result = apply_master_write(
                        store_id, self_entity, backend, events, bus, command_topic, seq, requester,
                        StoreRequest::PutUnique { key, value, expiry },
                    )
                    .await;
                    let inserted = matches!(result, Ok(Data::Bool(true)));
                    bus.publish(
                        request_topic,
                        encode_command(&Command::new(
                            self_entity.clone(), 0,
                            CommandPayload::PutUniqueResult { req_id, inserted },
                        )),
                    )
                    .await;
                }
                CommandPayload::Put { key, value, expiry, publisher } => {
                    let _ = apply_master_write(
                        store_id, self_entity, backend, events, bus, command_topic, seq, publisher,
                        StoreRequest::Put { key, value, expiry },
                    ).await;
                }
                CommandPayload::Erase { key, publisher } => {
                    let _ = apply_master_write(
                        store_id, self_entity, backend, events, bus, command_topic, seq, publisher,
                        StoreRequest::Erase { key },
                    ).await;
                }
                CommandPayload::Clear { publisher } => {
                    let _ = apply_master_write(
                        store_id, self_entity, backend, events, bus, command_topic, seq, publisher,
                        StoreRequest::Clear,
                    ).await;
                }
                CommandPayload::Add { key, value, init_type, expiry, publisher } => {
                    let _ = apply_master_write(
                        store_id, self_entity, backend, events, bus, command_topic, seq, publisher,
                        StoreRequest::Add { key, value, init_type, expiry },
                    ).await;
                }
                CommandPayload::Subtract { key, value, expiry, publisher } => {
                    let _ = apply_master_write(
                        store_id, self_entity, backend, events, bus, command_topic, seq, publisher,
                        StoreRequest::Subtract { key, value, expiry },
                    ).await;
                }
                _ => {}
            }
        }
        Role::Clone(clone) => {
            if command.sender != clone.master_entity && command.sender != *self_entity {
                return;
            }
            match command.payload {
                CommandPayload::SnapshotReply { clone_id, seq: snap_seq, entries } if clone_id == *self_entity => {
                    apply_snapshot(backend, &entries).await;
                    clone.expected_seq = snap_seq + 1;
                    clone.resync_pending = false;
                    drain_resync_buffer(store_id, clone, backend, events).await;
                    debug!(store = %store_id.name, expected_seq = clone.expected_seq, "clone resynced from snapshot");
                }
                CommandPayload::AckClone { clone_id } if clone_id == *self_entity => {
                    debug!(store = %store_id.name, "clone attach acknowledged by master");
                }
                CommandPayload::PutUniqueResult { req_id, inserted } => {
                    if let Some(reply) = clone.pending_put_unique.remove(&req_id) {
                        let _ = reply.send(Ok(Data::Bool(inserted)));
                    }
                }
                _ => {}
            }
        }
    }
}

async fn snapshot_entries(backend: &Box<dyn Backend>) -> Vec<SnapshotEntry> {
    backend
        .snapshot()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|(key, v)| SnapshotEntry { key, value: v.value, expiry: v.expiry })
        .collect()
}

async fn apply_snapshot(backend: &mut Box<dyn Backend>, entries: &[SnapshotEntry]) {
    let _ = backend.clear().await;
    for entry in entries {
        let _ = backend
            .put(entry.key.clone(), entry.value.clone(), ExpiryUpdate::from_option(entry.expiry))
            .await;
    }
}

/// Replays buffered commands that are now contiguous with `expected_seq`,
/// discarding any that turned out to be stale (spec.md §4.3 step 4).
async fn drain_resync_buffer(
    store_id: &StoreId,
    clone: &mut CloneState,
    backend: &mut Box<dyn Backend>,
    events: &EventPublisher,
) {
    loop {
        match clone.buffer.front() {
            Some(command) if command.seq < clone.expected_seq => {
                clone.buffer.pop_front();
            }
            Some(command) if command.seq == clone.expected_seq => {
                let command = clone.buffer.pop_front().unwrap();
                apply_one_replicated(store_id, backend, events, command).await;
                clone.expected_seq += 1;
            }
            _ => break,
        }
    }
}

async fn apply_replicated_command(
    store_id: &StoreId,
    self_entity: &EntityId,
    clone: &mut CloneState,
    backend: &mut Box<dyn Backend>,
    events: &EventPublisher,
    bus: &Arc<dyn Bus>,
    request_topic: &str,
    bytes: Vec<u8>,
) {
    let Some(command) = decode_command(&bytes) else { return };
    if command.sender != clone.master_entity {
        return;
    }

    if command.seq < clone.expected_seq {
        return; // duplicate
    }

    if command.seq > clone.expected_seq {
        clone.buffer.push_back(command);
        // Keep the buffer in seq order so draining can assume sorted input.
        let v: Vec<_> = clone.buffer.drain(..).collect();
        let mut v = v;
        v.sort_by_key(|c| c.seq);
        clone.buffer = v.into();

        if clone.buffer.len() > RESYNC_BUFFER_CAP {
            let dropped = clone.buffer.pop_front();
            warn!(
                store = %store_id.name,
                dropped_seq = dropped.map(|c| c.seq),
                "resync buffer overflow, forcing fresh resync",
            );
        }

        if !clone.resync_pending {
            clone.resync_pending = true;
            bus.publish(
                request_topic,
                encode_command(&Command::new(
                    self_entity.clone(), 0,
                    CommandPayload::SnapshotRequest { clone_id: self_entity.clone() },
                )),
            )
            .await;
        }
        return;
    }

    // seq == expected_seq
    apply_one_replicated(store_id, backend, events, command).await;
    clone.expected_seq += 1;
    drain_resync_buffer(store_id, clone, backend, events).await;
}

async fn apply_one_replicated(
    store_id: &StoreId,
    backend: &mut Box<dyn Backend>,
    events: &EventPublisher,
    command: Command,
) {
    match command.payload {
        CommandPayload::Put { key, value, expiry, publisher } => {
            match apply_put(backend, &key, &value, ExpiryUpdate::from_option(expiry)).await {
                Ok(outcome) => emit_for_outcome(events, &store_id.name, &key, &outcome, expiry, publisher).await,
                Err(e) => warn!(store = %store_id.name, error = ?e, "clone failed to apply replicated put"),
            }
        }
        CommandPayload::Erase { key, publisher } => {
            match apply_erase(backend, &key).await {
                Ok(outcome) => emit_for_outcome(events, &store_id.name, &key, &outcome, None, publisher).await,
                Err(e) => warn!(store = %store_id.name, error = ?e, "clone failed to apply replicated erase"),
            }
        }
        CommandPayload::Expire { key, publisher } => {
            match backend.erase(&key).await {
                Ok(()) => {
                    let event = StoreEvent::Expire { store_name: store_id.name.clone(), key, publisher };
                    events.publish(&event).await;
                }
                Err(e) => warn!(store = %store_id.name, error = ?e, "clone failed to apply replicated expire"),
            }
        }
        CommandPayload::Clear { .. } => {
            if let Err(e) = backend.clear().await {
                warn!(store = %store_id.name, error = ?e, "clone failed to apply replicated clear");
            }
        }
        CommandPayload::Add { key, value, init_type, expiry, publisher } => {
            match apply_add(backend, &key, &value, init_type, ExpiryUpdate::from_option(expiry)).await {
                Ok((outcome, _)) => emit_for_outcome(events, &store_id.name, &key, &outcome, expiry, publisher).await,
                Err(e) => warn!(store = %store_id.name, error = ?e, "clone failed to apply replicated add"),
            }
        }
        CommandPayload::Subtract { key, value, expiry, publisher } => {
            match apply_subtract(backend, &key, &value, ExpiryUpdate::from_option(expiry)).await {
                Ok((outcome, _)) => emit_for_outcome(events, &store_id.name, &key, &outcome, expiry, publisher).await,
                Err(e) => warn!(store = %store_id.name, error = ?e, "clone failed to apply replicated subtract"),
            }
        }
        _ => {}
    }
}

/// The master's expiry scan (spec.md §4.3 "Expiry tick").
async fn run_expiry_tick(
    store_id: &StoreId,
    self_entity: &EntityId,
    backend: &mut Box<dyn Backend>,
    events: &EventPublisher,
    bus: &Arc<dyn Bus>,
    command_topic: &str,
    seq: &mut u64,
) {
    let now = Timestamp::now();
    let due: Vec<Data> = backend
        .expiries()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|ke| ke.expiry.has_elapsed(now))
        .map(|ke| ke.key)
        .collect();

    for key in due {
        match backend.expire(&key, now).await {
            Ok(true) => {
                *seq += 1;
                broadcast(
                    bus, command_topic, self_entity, *seq,
                    CommandPayload::Expire { key: key.clone(), publisher: EntityId::nil() },
                ).await;
                let event = StoreEvent::Expire {
                    store_name: store_id.name.clone(), key, publisher: EntityId::nil(),
                };
                events.publish(&event).await;
            }
            Ok(false) => {}
            Err(e) => warn!(store = %store_id.name, error = ?e, "expiry tick failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::{EndpointId, InProcessBus};
    use crate::backend::memory::MemoryBackend;

    fn key(s: &str) -> Data {
        Data::String(s.as_bytes().to_vec())
    }

    fn master_entity() -> EntityId {
        EntityId::new(EndpointId("master".into()), broker_core::ActorId(1))
    }

    async fn spawn_master(store_name: &str, bus: Arc<dyn Bus>) -> StoreActorHandle {
        spawn(
            StoreId::new(EndpointId::nil(), store_name),
            master_entity(),
            Role::Master,
            Box::new(MemoryBackend::new()),
            bus,
            Arc::new(AtomicU64::new(1)),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn s1_basic_put_get_and_insert_event() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let store_id = StoreId::new(EndpointId::nil(), "S");
        let mut event_sub = bus.subscribe(&store_id.event_topic());
        let actor = spawn_master("S", bus.clone()).await;

        actor
            .request(EntityId::nil(), StoreRequest::Put { key: key("a"), value: Data::Int(1), expiry: None }, Duration::from_secs(1))
            .await
            .unwrap();

        let got = actor
            .request(EntityId::nil(), StoreRequest::Get { key: key("a") }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(got, Data::Int(1));

        let event_bytes = event_sub.recv().await.unwrap();
        let event: Data = rmp_serde::from_slice(&event_bytes).unwrap();
        assert_eq!(
            event,
            Data::Vector(vec![
                Data::String(b"insert".to_vec()),
                Data::String(b"S".to_vec()),
                key("a"),
                Data::Int(1),
                Data::None,
                Data::entity(EntityId::nil()),
            ])
        );
    }

    #[tokio::test]
    async fn s2_second_put_is_an_update_event() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let store_id = StoreId::new(EndpointId::nil(), "S");
        let mut event_sub = bus.subscribe(&store_id.event_topic());
        let actor = spawn_master("S", bus.clone()).await;

        actor.request(EntityId::nil(), StoreRequest::Put { key: key("a"), value: Data::Int(1), expiry: None }, Duration::from_secs(1)).await.unwrap();
        let _ = event_sub.recv().await.unwrap();

        actor.request(EntityId::nil(), StoreRequest::Put { key: key("a"), value: Data::Int(2), expiry: None }, Duration::from_secs(1)).await.unwrap();
        let event_bytes = event_sub.recv().await.unwrap();
        let event: Data = rmp_serde::from_slice(&event_bytes).unwrap();
        assert_eq!(
            event,
            Data::Vector(vec![
                Data::String(b"update".to_vec()),
                Data::String(b"S".to_vec()),
                key("a"),
                Data::Int(1),
                Data::Int(2),
                Data::None,
                Data::entity(EntityId::nil()),
            ])
        );
    }

    #[tokio::test]
    async fn put_unique_inserts_exactly_once() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let actor = spawn_master("S", bus).await;

        let first = actor.request(EntityId::nil(), StoreRequest::PutUnique { key: key("k"), value: Data::String(b"A".to_vec()), expiry: None }, Duration::from_secs(1)).await.unwrap();
        let second = actor.request(EntityId::nil(), StoreRequest::PutUnique { key: key("k"), value: Data::String(b"B".to_vec()), expiry: None }, Duration::from_secs(1)).await.unwrap();

        assert_eq!(first, Data::Bool(true));
        assert_eq!(second, Data::Bool(false));

        let value = actor.request(EntityId::nil(), StoreRequest::Get { key: key("k") }, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, Data::String(b"A".to_vec()));
    }

    #[tokio::test]
    async fn get_missing_key_is_no_such_key() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let actor = spawn_master("S", bus).await;
        let err = actor.request(EntityId::nil(), StoreRequest::Get { key: key("missing") }, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchKey);
    }

    #[tokio::test]
    async fn expiry_tick_erases_and_emits_expire() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let store_id = StoreId::new(EndpointId::nil(), "S");
        let mut event_sub = bus.subscribe(&store_id.event_topic());
        let actor = spawn_master("S", bus).await;

        actor.request(
            EntityId::nil(),
            StoreRequest::Put { key: key("t"), value: Data::Int(1), expiry: Some(Timestamp::now().add_span(Timespan::from_millis(10))) },
            Duration::from_secs(1),
        ).await.unwrap();
        let _ = event_sub.recv().await.unwrap(); // insert

        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = actor.request(EntityId::nil(), StoreRequest::Get { key: key("t") }, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchKey);

        let event_bytes = tokio::time::timeout(Duration::from_secs(1), event_sub.recv()).await.unwrap().unwrap();
        let event: Data = rmp_serde::from_slice(&event_bytes).unwrap();
        let Data::Vector(items) = event else { panic!() };
        assert_eq!(items[0], Data::String(b"expire".to_vec()));
    }

    #[tokio::test]
    async fn clone_resyncs_from_master_snapshot() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let master_id = master_entity();
        let master = spawn_master("S", bus.clone()).await;

        master.request(EntityId::nil(), StoreRequest::Put { key: key("a"), value: Data::Int(1), expiry: None }, Duration::from_secs(1)).await.unwrap();
        master.request(EntityId::nil(), StoreRequest::Put { key: key("b"), value: Data::Int(2), expiry: None }, Duration::from_secs(1)).await.unwrap();

        let clone_entity = EntityId::new(EndpointId("clone".into()), broker_core::ActorId(2));
        let clone = spawn(
            StoreId::new(EndpointId::nil(), "S"),
            clone_entity,
            Role::Clone(CloneState::new(master_id)),
            Box::new(MemoryBackend::new()),
            bus,
            Arc::new(AtomicU64::new(1)),
            Duration::from_millis(20),
        );

        // Give the resync round trip time to complete.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let value = clone.request(EntityId::nil(), StoreRequest::Get { key: key("a") }, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, Data::Int(1));
        let value = clone.request(EntityId::nil(), StoreRequest::Get { key: key("b") }, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, Data::Int(2));
    }

    #[tokio::test]
    async fn clone_write_is_forwarded_and_replicated() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let master_id = master_entity();
        let master = spawn_master("S", bus.clone()).await;

        let clone_entity = EntityId::new(EndpointId("clone".into()), broker_core::ActorId(2));
        let clone = spawn(
            StoreId::new(EndpointId::nil(), "S"),
            clone_entity,
            Role::Clone(CloneState::new(master_id)),
            Box::new(MemoryBackend::new()),
            bus,
            Arc::new(AtomicU64::new(1)),
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        clone.request(EntityId::nil(), StoreRequest::Put { key: key("x"), value: Data::Int(9), expiry: None }, Duration::from_secs(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let on_master = master.request(EntityId::nil(), StoreRequest::Get { key: key("x") }, Duration::from_secs(1)).await.unwrap();
        assert_eq!(on_master, Data::Int(9));
        let on_clone = clone.request(EntityId::nil(), StoreRequest::Get { key: key("x") }, Duration::from_secs(1)).await.unwrap();
        assert_eq!(on_clone, Data::Int(9));
    }

    #[tokio::test]
    async fn shutdown_drains_and_errors_pending_requests() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let actor = spawn_master("S", bus).await;
        actor.shutdown().await;
        let err = actor
            .request(EntityId::nil(), StoreRequest::Get { key: key("a") }, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unspecified);
    }
}
