//! A client's standing interest in a root.

use crate::client::Client;
use crate::query::Query;
use crate::root::Root;
use crate::types::ClockSpec;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::types::StatePolicies;

/// Mutable delivery state, guarded for the whole of a delivery attempt.
#[derive(Debug)]
pub(crate) struct SubscriptionState {
    pub(crate) query: Query,
    /// Last tick fully accounted for (delivered or dropped).
    pub(crate) last_tick: u32,
}

impl SubscriptionState {
    /// Move `last_tick` forward. Never regresses.
    pub(crate) fn advance_to(&mut self, ticks: u32) {
        if ticks > self.last_tick {
            self.last_tick = ticks;
        }
    }
}

/// A subscription.
///
/// Holds its root strongly (the query needs a live view) and its client
/// weakly (a subscription must never keep a connection alive).
pub struct Subscription {
    name: String,
    root: Arc<Root>,
    client: Weak<Client>,
    state: Mutex<SubscriptionState>,
    policies: StatePolicies,
    vcs_defer: bool,
    closed: AtomicBool,
}

impl Subscription {
    /// Create a subscription. Inputs are expected to be validated already.
    pub fn new(
        root: Arc<Root>,
        client: Weak<Client>,
        name: impl Into<String>,
        query: Query,
        policies: StatePolicies,
        vcs_defer: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            root,
            client,
            state: Mutex::new(SubscriptionState {
                query,
                last_tick: 0,
            }),
            policies,
            vcs_defer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Arc<Root> {
        &self.root
    }

    pub fn policies(&self) -> &StatePolicies {
        &self.policies
    }

    pub fn vcs_defer(&self) -> bool {
        self.vcs_defer
    }

    pub fn last_tick(&self) -> u32 {
        self.state.lock().last_tick
    }

    /// Current query baseline.
    pub fn since(&self) -> Option<ClockSpec> {
        self.state.lock().query.since.clone()
    }

    /// Copy of the stored query.
    pub fn query(&self) -> Query {
        self.state.lock().query.clone()
    }

    /// Upgrade the owner reference. `None` once the client disconnected.
    pub fn resolve_client(&self) -> Option<Arc<Client>> {
        self.client.upgrade()
    }

    /// Tear down the subscription. Safe to call from any removal path and
    /// any number of times; if the client is still live, its registry entry
    /// for this subscription is removed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(subscription = %self.name, "closing subscription");
        if let Some(client) = self.resolve_client() {
            client.remove_subscription_if_current(&self.name, self);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SubscriptionState> {
        self.state.lock()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("root", &self.root.path())
            .field("vcs_defer", &self.vcs_defer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootConfig;
    use crate::root::InMemoryView;

    fn test_root() -> Arc<Root> {
        Root::new("/src/project", RootConfig::default(), Arc::new(InMemoryView::new(1)))
    }

    #[test]
    fn test_advance_never_regresses() {
        let mut state = SubscriptionState {
            query: Query::default(),
            last_tick: 5,
        };
        state.advance_to(3);
        assert_eq!(state.last_tick, 5);
        state.advance_to(9);
        assert_eq!(state.last_tick, 9);
    }

    #[test]
    fn test_does_not_keep_client_alive() {
        let client = Client::new();
        let sub = Subscription::new(
            test_root(),
            Arc::downgrade(&client),
            "mysub",
            Query::default(),
            StatePolicies::new(),
            true,
        );
        assert!(sub.resolve_client().is_some());

        drop(client);
        assert!(sub.resolve_client().is_none());
    }

    #[test]
    fn test_close_is_idempotent_without_client() {
        let sub = Subscription::new(
            test_root(),
            Weak::new(),
            "orphan",
            Query::default(),
            StatePolicies::new(),
            true,
        );
        sub.close();
        sub.close();
        assert!(sub.is_closed());
    }
}
