//! Client connections.
//!
//! A [`Client`] owns its subscriptions (by name) and an outbound response
//! queue. Roots wake clients through a ping channel; the connection's
//! dispatch loop then calls [`Client::run_subscriptions`].

use crate::response::Response;
use crate::subscriptions::{
    DeliveryEngine, DeliveryOutcome, RegistryEntry, Subscription, SubscriptionRegistry,
};
use crate::root::BusRegistration;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// A connected client.
pub struct Client {
    id: ClientId,
    weak_self: Weak<Client>,
    registry: Mutex<SubscriptionRegistry>,
    response_tx: Sender<Response>,
    response_rx: Receiver<Response>,
    /// Capacity 1: pending wakeups coalesce.
    ping_tx: Sender<()>,
    ping_rx: Receiver<()>,
    engine: DeliveryEngine,
}

impl Client {
    pub fn new() -> Arc<Self> {
        let (response_tx, response_rx) = unbounded();
        let (ping_tx, ping_rx) = bounded(1);
        Arc::new_cyclic(|weak_self| Self {
            id: ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst)),
            weak_self: weak_self.clone(),
            registry: Mutex::new(SubscriptionRegistry::new()),
            response_tx,
            response_rx,
            ping_tx,
            ping_rx,
            engine: DeliveryEngine::new(),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Non-owning handle for subscriptions and bus callbacks.
    pub fn weak(&self) -> Weak<Client> {
        self.weak_self.clone()
    }

    // --- Outbound Queue ---

    pub fn enqueue_response(&self, response: Response) {
        // The receiver lives in `self`, so the channel cannot be disconnected
        let _ = self.response_tx.send(response);
    }

    pub fn try_recv(&self) -> Result<Response, TryRecvError> {
        self.response_rx.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Response, RecvTimeoutError> {
        self.response_rx.recv_timeout(timeout)
    }

    /// Take everything currently queued.
    pub fn drain_responses(&self) -> Vec<Response> {
        self.response_rx.try_iter().collect()
    }

    // --- Wakeups ---

    /// Wake the dispatch loop. Multiple pings before a pass collapse into one.
    pub fn ping(&self) {
        let _ = self.ping_tx.try_send(());
    }

    /// Block until pinged or `timeout` elapses. Returns true if pinged.
    pub fn wait_for_ping(&self, timeout: Duration) -> bool {
        self.ping_rx.recv_timeout(timeout).is_ok()
    }

    /// Run one delivery pass over every subscription.
    pub fn run_subscriptions(&self) -> Vec<(String, DeliveryOutcome)> {
        while self.ping_rx.try_recv().is_ok() {}

        // Snapshot so delivery runs without the registry lock; entries
        // removed meanwhile are closed and skipped by the engine
        let subscriptions = self.registry.lock().subscriptions();
        subscriptions
            .iter()
            .map(|sub| (sub.name().to_string(), self.engine.process(sub)))
            .collect()
    }

    // --- Registry ---

    /// Register a subscription, replacing (and closing) any existing one
    /// with the same name.
    pub fn add_subscription(&self, subscription: Arc<Subscription>, registration: BusRegistration) {
        let replaced = self.registry.lock().insert(subscription, registration);
        if let Some(entry) = replaced {
            debug!(
                client = self.id.0,
                subscription = entry.subscription().name(),
                "replacing existing subscription"
            );
            entry.close();
        }
    }

    /// Remove a subscription by name. Returns whether one existed.
    pub fn unsub_by_name(&self, name: &str) -> bool {
        let removed = self.registry.lock().remove_by_name(name);
        match removed {
            Some(entry) => {
                entry.close();
                true
            }
            None => false,
        }
    }

    /// Identity-checked removal, used by a subscription tearing itself down.
    pub(crate) fn remove_subscription_if_current(&self, name: &str, subscription: &Subscription) -> bool {
        let removed = self.registry.lock().remove_if_current(name, subscription);
        match removed {
            Some(entry) => {
                entry.close();
                true
            }
            None => false,
        }
    }

    pub fn subscription(&self, name: &str) -> Option<Arc<Subscription>> {
        self.registry.lock().get(name).cloned()
    }

    pub fn subscription_names(&self) -> Vec<String> {
        self.registry.lock().names()
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Connection teardown: close every subscription and release its bus
    /// registration.
    pub fn disconnect(&self) {
        let entries = self.registry.lock().clear();
        debug!(client = self.id.0, count = entries.len(), "client disconnecting");
        close_all(entries);
    }
}

fn close_all(entries: Vec<RegistryEntry>) {
    for entry in entries {
        entry.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        close_all(self.registry.get_mut().clear());
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("id", &self.id).finish()
    }
}
