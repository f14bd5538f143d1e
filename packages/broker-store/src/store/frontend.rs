//! The frontend: a synchronous-looking façade over a store actor (spec.md
//! §4.4 "Frontend").
//!
//! Read/lookup operations and `put_unique` block for a reply, bounded by a
//! configurable timeout (`ErrorKind::RequestTimeout` on expiry). Every other
//! modifier is fire-and-forget: it returns as soon as the actor accepts the
//! request onto its queue, and any failure is only logged by the actor
//! (spec.md §4.4 "errors from fire-and-forget modifiers are not surfaced to
//! the caller").

use std::time::Duration;

use broker_core::{Data, EntityId, Expected, Timespan, Timestamp, TypeTag};

use super::actor::{StoreActorHandle, StoreRequest};

/// Resolves a caller-requested TTL into the absolute instant the store
/// actor and backend operate on (spec.md §3 "Expiry is absolute... derived
/// from `now + requested_timespan`").
fn resolve_expiry(expiry: Option<Timespan>) -> Option<Timestamp> {
    expiry.map(|span| Timestamp::now().add_span(span))
}

/// A synchronous client of one store.
pub struct Frontend {
    handle: StoreActorHandle,
    requester: EntityId,
    request_timeout: Duration,
}

impl Frontend {
    #[must_use]
    pub fn new(handle: StoreActorHandle, requester: EntityId, request_timeout: Duration) -> Self {
        Self { handle, requester, request_timeout }
    }

    async fn call(&self, payload: StoreRequest) -> Expected<Data> {
        self.handle.request(self.requester.clone(), payload, self.request_timeout).await
    }

    async fn cast(&self, payload: StoreRequest) {
        self.handle.request_fire_and_forget(self.requester.clone(), payload).await;
    }

    // -- blocking reads --

    pub async fn exists(&self, key: Data) -> Expected<bool> {
        match self.call(StoreRequest::Exists { key }).await? {
            Data::Bool(b) => Ok(b),
            _ => Ok(false),
        }
    }

    pub async fn get(&self, key: Data) -> Expected<Data> {
        self.call(StoreRequest::Get { key }).await
    }

    pub async fn get_index_from_value(&self, key: Data, index: Data) -> Expected<Data> {
        self.call(StoreRequest::GetIndexFromValue { key, index }).await
    }

    pub async fn keys(&self) -> Expected<Vec<Data>> {
        match self.call(StoreRequest::Keys).await? {
            Data::Vector(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }

    /// `put_unique` blocks because the caller needs to know whether the
    /// insert happened (spec.md §4.4 lists it alongside the blocking reads).
    pub async fn put_unique(&self, key: Data, value: Data, expiry: Option<Timespan>) -> Expected<bool> {
        let expiry = resolve_expiry(expiry);
        match self.call(StoreRequest::PutUnique { key, value, expiry }).await? {
            Data::Bool(inserted) => Ok(inserted),
            _ => Ok(false),
        }
    }

    // -- fire-and-forget modifiers --

    pub async fn put(&self, key: Data, value: Data, expiry: Option<Timespan>) {
        let expiry = resolve_expiry(expiry);
        self.cast(StoreRequest::Put { key, value, expiry }).await;
    }

    pub async fn erase(&self, key: Data) {
        self.cast(StoreRequest::Erase { key }).await;
    }

    pub async fn clear(&self) {
        self.cast(StoreRequest::Clear).await;
    }

    pub async fn increment(&self, key: Data, by: Data) {
        self.cast(StoreRequest::Add { key, value: by, init_type: TypeTag::Count, expiry: None }).await;
    }

    pub async fn decrement(&self, key: Data, by: Data) {
        self.cast(StoreRequest::Subtract { key, value: by, expiry: None }).await;
    }

    pub async fn append(&self, key: Data, suffix: Data) {
        self.cast(StoreRequest::Add { key, value: suffix, init_type: TypeTag::String, expiry: None }).await;
    }

    pub async fn insert_into(&self, key: Data, element: Data) {
        self.cast(StoreRequest::Add { key, value: element, init_type: TypeTag::Set, expiry: None }).await;
    }

    pub async fn push(&self, key: Data, element: Data) {
        self.cast(StoreRequest::Add { key, value: element, init_type: TypeTag::Vector, expiry: None }).await;
    }

    pub async fn pop(&self, key: Data) {
        self.cast(StoreRequest::Subtract { key, value: Data::None, expiry: None }).await;
    }

    pub async fn remove_from(&self, key: Data, element_or_index: Data) {
        self.cast(StoreRequest::Subtract { key, value: element_or_index, expiry: None }).await;
    }
}
