//! The proxy: an async mailbox over a store actor (spec.md §4.4 "Proxy").
//!
//! A proxy issues requests and lets the caller collect responses whenever
//! it is ready, rather than awaiting each call individually the way
//! [`Frontend`](crate::store::frontend::Frontend) does. Responses are
//! delivered in arrival order, which is not necessarily request order,
//! because different operations complete at different times.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker_core::{EntityId, Expected};
use tokio::sync::Mutex;

use super::actor::{StoreActorHandle, StoreRequest};
use super::flare::Flare;

/// One delivered response: the id of the request it answers, and its result.
pub struct ProxyResponse {
    pub request_id: u64,
    pub result: Expected<broker_core::Data>,
}

/// An async mailbox in front of a store actor.
pub struct Proxy {
    handle: StoreActorHandle,
    requester: EntityId,
    next_request_id: AtomicU64,
    mailbox: Mutex<VecDeque<ProxyResponse>>,
    flare: Arc<Flare>,
}

impl Proxy {
    /// # Errors
    /// Propagates `io::Error` if the backing [`Flare`] cannot be created.
    pub fn new(handle: StoreActorHandle, requester: EntityId) -> std::io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            handle,
            requester,
            next_request_id: AtomicU64::new(1),
            mailbox: Mutex::new(VecDeque::new()),
            flare: Flare::new()?,
        }))
    }

    /// The raw file descriptor external event loops can poll for readiness
    /// (spec.md §6 "Mailbox readiness").
    #[must_use]
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.flare.as_raw_fd()
    }

    /// Submits a request and returns its id immediately (spec.md §4.4
    /// "submit returns a request id without waiting for the reply").
    pub async fn submit(self: &Arc<Self>, payload: StoreRequest) -> u64 {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let this = self.clone();
        let requester = self.requester.clone();
        tokio::spawn(async move {
            let result = this
                .handle
                .request(requester, payload, Duration::from_secs(3600))
                .await;
            let mut mailbox = this.mailbox.lock().await;
            mailbox.push_back(ProxyResponse { request_id, result });
            this.flare.set();
        });
        request_id
    }

    /// Blocks until at least one response is available, then returns it.
    pub async fn receive(&self) -> ProxyResponse {
        loop {
            {
                let mut mailbox = self.mailbox.lock().await;
                if let Some(response) = mailbox.pop_front() {
                    if mailbox.is_empty() {
                        self.flare.clear();
                    }
                    return response;
                }
            }
            self.flare.notified().await;
        }
    }

    /// Blocks until `n` responses are available, then returns them in
    /// arrival order.
    pub async fn receive_n(&self, n: usize) -> Vec<ProxyResponse> {
        let mut collected = Vec::with_capacity(n);
        while collected.len() < n {
            collected.push(self.receive().await);
        }
        collected
    }

    /// Number of responses currently waiting to be collected.
    pub async fn pending(&self) -> usize {
        self.mailbox.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::store::actor::{spawn, Role};
    use broker_core::{Bus, Data, EndpointId, InProcessBus};

    fn key(s: &str) -> Data {
        Data::String(s.as_bytes().to_vec())
    }

    fn spawn_master(bus: Arc<dyn Bus>) -> StoreActorHandle {
        spawn(
            broker_core::StoreId::new(EndpointId::nil(), "S"),
            EntityId::nil(),
            Role::Master,
            Box::new(MemoryBackend::new()),
            bus,
            Arc::new(AtomicU64::new(1)),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn receive_returns_one_response_in_order_submitted() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let handle = spawn_master(bus);
        let proxy = Proxy::new(handle, EntityId::nil()).unwrap();

        proxy
            .submit(StoreRequest::Put { key: key("a"), value: Data::Int(1), expiry: None })
            .await;
        let response = proxy.receive().await;
        assert!(response.result.is_ok());
    }

    #[tokio::test]
    async fn receive_n_collects_multiple_responses() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let handle = spawn_master(bus);
        let proxy = Proxy::new(handle, EntityId::nil()).unwrap();

        for i in 0..3 {
            proxy
                .submit(StoreRequest::Put { key: key(&format!("k{i}")), value: Data::Int(i), expiry: None })
                .await;
        }
        let responses = proxy.receive_n(3).await;
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| r.result.is_ok()));
    }

    #[tokio::test]
    async fn flare_clears_once_mailbox_drained() {
        let bus: Arc<dyn Bus> = InProcessBus::new();
        let handle = spawn_master(bus);
        let proxy = Proxy::new(handle, EntityId::nil()).unwrap();

        proxy
            .submit(StoreRequest::Put { key: key("a"), value: Data::Int(1), expiry: None })
            .await;
        let _ = proxy.receive().await;
        assert_eq!(proxy.pending().await, 0);
    }
}
