//! Store lifecycle management (spec.md §9 supplemented behavior, modeled on
//! the teacher workspace's `service::registry::ServiceRegistry`).
//!
//! Unlike `ServiceRegistry` (a fixed, compile-time set of services with a
//! single init/shutdown ordering), a `StoreRegistry` attaches and detaches
//! stores dynamically at runtime, one local actor per store name, the way
//! spec.md §4.3 describes stores coming and going as masters/clones attach.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use broker_core::{ActorId, Bus, BrokerError, EndpointId, EntityId, ErrorKind, Expected, StoreId};
use dashmap::DashMap;
use tracing::info;

use crate::backend::factory::BackendKind;
use crate::config::StoreConfig;
use crate::store::actor::{spawn, CloneState, Role, StoreActorHandle};
use crate::store::frontend::Frontend;
use crate::store::proxy::Proxy;

struct StoreEntry {
    handle: StoreActorHandle,
    self_entity: EntityId,
    req_id_counter: Arc<AtomicU64>,
}

/// Owns every store actor attached locally and hands out
/// [`Frontend`]/[`Proxy`] views onto them.
pub struct StoreRegistry {
    endpoint: EndpointId,
    bus: Arc<dyn Bus>,
    config: StoreConfig,
    next_actor_id: AtomicU64,
    entries: DashMap<String, StoreEntry>,
}

impl StoreRegistry {
    #[must_use]
    pub fn new(endpoint: EndpointId, bus: Arc<dyn Bus>, config: StoreConfig) -> Self {
        Self {
            endpoint,
            bus,
            config,
            next_actor_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    fn next_entity(&self) -> EntityId {
        let id = self.next_actor_id.fetch_add(1, Ordering::Relaxed);
        EntityId::new(self.endpoint.clone(), ActorId(id))
    }

    /// Attaches a master for `name`, returning the [`EntityId`] clones will
    /// need to address it and the `req_id` counter they must share (see
    /// `DESIGN.md`).
    ///
    /// # Errors
    /// `ErrorKind::MasterExists` if a store of this name is already
    /// attached locally; whatever `backend_kind.build()` reports on
    /// backend construction failure.
    pub async fn attach_master(
        &self,
        name: &str,
        backend_kind: BackendKind,
    ) -> Expected<(EntityId, Arc<AtomicU64>)> {
        if self.entries.contains_key(name) {
            return Err(BrokerError::simple(ErrorKind::MasterExists));
        }
        let backend = backend_kind.build().await.map_err(BrokerError::simple)?;
        let self_entity = self.next_entity();
        let req_id_counter = Arc::new(AtomicU64::new(1));
        let handle = spawn(
            StoreId::new(self.endpoint.clone(), name),
            self_entity.clone(),
            Role::Master,
            backend,
            self.bus.clone(),
            req_id_counter.clone(),
            self.config.tick_interval,
        );
        info!(store = name, entity = ?self_entity, "attached store master");
        self.entries.insert(
            name.to_string(),
            StoreEntry { handle, self_entity: self_entity.clone(), req_id_counter: req_id_counter.clone() },
        );
        Ok((self_entity, req_id_counter))
    }

    /// Attaches a clone of `name`, following `master_entity` and sharing
    /// `req_id_counter` with the master and every other clone of this store
    /// (obtained from [`attach_master`](Self::attach_master) or another
    /// clone's attach call).
    ///
    /// # Errors
    /// `ErrorKind::MasterExists` if a store of this name is already
    /// attached locally; propagates backend construction failures.
    pub async fn attach_clone(
        &self,
        name: &str,
        master_entity: EntityId,
        req_id_counter: Arc<AtomicU64>,
        backend_kind: BackendKind,
    ) -> Expected<EntityId> {
        if self.entries.contains_key(name) {
            return Err(BrokerError::simple(ErrorKind::MasterExists));
        }
        let backend = backend_kind.build().await.map_err(BrokerError::simple)?;
        let self_entity = self.next_entity();
        let handle = spawn(
            StoreId::new(self.endpoint.clone(), name),
            self_entity.clone(),
            Role::Clone(CloneState::new(master_entity)),
            backend,
            self.bus.clone(),
            req_id_counter.clone(),
            self.config.tick_interval,
        );
        info!(store = name, entity = ?self_entity, "attached store clone");
        self.entries.insert(
            name.to_string(),
            StoreEntry { handle, self_entity: self_entity.clone(), req_id_counter },
        );
        Ok(self_entity)
    }

    /// Detaches and shuts down the local actor for `name`.
    ///
    /// # Errors
    /// `ErrorKind::NoSuchMaster` if nothing by this name is attached.
    pub async fn detach(&self, name: &str) -> Expected<()> {
        let Some((_, entry)) = self.entries.remove(name) else {
            return Err(BrokerError::simple(ErrorKind::NoSuchMaster));
        };
        entry.handle.shutdown().await;
        info!(store = name, "detached store");
        Ok(())
    }

    #[must_use]
    pub fn req_id_counter(&self, name: &str) -> Option<Arc<AtomicU64>> {
        self.entries.get(name).map(|e| e.req_id_counter.clone())
    }

    #[must_use]
    pub fn entity_of(&self, name: &str) -> Option<EntityId> {
        self.entries.get(name).map(|e| e.self_entity.clone())
    }

    #[must_use]
    pub fn frontend(&self, name: &str, requester: EntityId) -> Option<Frontend> {
        self.entries
            .get(name)
            .map(|e| Frontend::new(e.handle.clone(), requester, self.config.request_timeout))
    }

    /// # Errors
    /// Propagates `io::Error` if the proxy's backing flare cannot be
    /// created.
    pub fn proxy(&self, name: &str, requester: EntityId) -> Option<std::io::Result<Arc<Proxy>>> {
        self.entries.get(name).map(|e| Proxy::new(e.handle.clone(), requester))
    }

    #[must_use]
    pub fn attached_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::{Data, InProcessBus};
    use std::time::Duration;

    fn registry(endpoint: &str, bus: Arc<dyn Bus>) -> StoreRegistry {
        StoreRegistry::new(
            EndpointId(endpoint.to_string()),
            bus,
            StoreConfig { tick_interval: Duration::from_millis(20), ..StoreConfig::default() },
        )
    }

    #[tokio::test]
    async fn attach_master_twice_is_master_exists() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let registry = registry("node-a", bus);
        registry.attach_master("S", BackendKind::Memory).await.unwrap();
        let err = registry.attach_master("S", BackendKind::Memory).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MasterExists);
    }

    #[tokio::test]
    async fn detach_unknown_store_is_no_such_master() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let registry = registry("node-a", bus);
        let err = registry.detach("missing").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchMaster);
    }

    #[tokio::test]
    async fn clone_on_a_second_registry_resyncs_from_master() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let master_registry = registry("node-a", bus.clone());
        let (master_entity, counter) =
            master_registry.attach_master("S", BackendKind::Memory).await.unwrap();

        let master_fe = master_registry.frontend("S", EntityId::nil()).unwrap();
        master_fe.put(Data::String(b"a".to_vec()), Data::Int(1), None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let clone_registry = registry("node-b", bus);
        clone_registry
            .attach_clone("S", master_entity, counter, BackendKind::Memory)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let clone_fe = clone_registry.frontend("S", EntityId::nil()).unwrap();
        assert_eq!(clone_fe.get(Data::String(b"a".to_vec())).await.unwrap(), Data::Int(1));
    }
}
