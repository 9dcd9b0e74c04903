//! Subscription policy and outcome types.

use std::collections::{btree_map, BTreeMap, BTreeSet};

/// What to do with a subscription while a named state is asserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatePolicy {
    /// Hold delivery; changes are reported once the state is vacated.
    Defer,
    /// Skip delivery and fast-forward past the changes.
    Drop,
}

/// Per-subscription policies, keyed by state name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatePolicies {
    policies: BTreeMap<String, StatePolicy>,
}

/// Result of evaluating policies against the asserted states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyVerdict {
    Defer { state: String },
    Drop { state: String },
}

impl StatePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from request lists. The drop list is applied last, so a name in
    /// both lists is dropped.
    pub fn from_lists<D, P>(defer: D, drop: P) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let mut policies = Self::new();
        for name in defer {
            policies.insert(name, StatePolicy::Defer);
        }
        for name in drop {
            policies.insert(name, StatePolicy::Drop);
        }
        policies
    }

    /// Set the policy for a state. Last write wins.
    pub fn insert(&mut self, name: impl Into<String>, policy: StatePolicy) {
        self.policies.insert(name.into(), policy);
    }

    pub fn get(&self, name: &str) -> Option<StatePolicy> {
        self.policies.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, StatePolicy> {
        self.policies.iter()
    }

    /// Decide what the asserted states mean for this subscription.
    ///
    /// Policies are scanned in name order. The first asserted one is
    /// remembered as the defer reason; an asserted drop policy ends the scan
    /// and wins over any defer.
    pub fn evaluate(&self, asserted: &BTreeSet<String>) -> Option<PolicyVerdict> {
        if asserted.is_empty() {
            return None;
        }

        let mut defer_state: Option<&str> = None;
        for (name, policy) in &self.policies {
            if !asserted.contains(name) {
                continue;
            }
            if defer_state.is_none() {
                defer_state = Some(name.as_str());
            }
            if *policy == StatePolicy::Drop {
                return Some(PolicyVerdict::Drop {
                    state: name.clone(),
                });
            }
        }

        defer_state.map(|state| PolicyVerdict::Defer {
            state: state.to_string(),
        })
    }
}

/// Why delivery was held back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeferReason {
    /// A state with a defer policy is asserted.
    State(String),
    /// The root reports a VCS operation in progress.
    VcsOperation,
}

/// Outcome of one delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing changed since the last accounted tick.
    UpToDate,
    /// A drop state is asserted; ticks were fast-forwarded.
    Dropped { state: String },
    /// Delivery held back; ticks unchanged.
    Deferred { reasons: Vec<DeferReason> },
    /// Query ran and a response was enqueued.
    Delivered,
    /// Query ran and matched nothing.
    NoResults,
    /// Query failed; ticks still advanced.
    Failed,
    /// The owning client has disconnected.
    ClientGone,
    /// The subscription has been closed.
    Closed,
}
