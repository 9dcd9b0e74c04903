//! Subscriptions and their delivery.
//!
//! A subscription is a client's standing query against a watched root.
//! Whenever the root settles, each subscription is re-evaluated:
//! - Up to date: nothing changed since the last accounted tick
//! - Dropped: a `drop` state is asserted; ticks fast-forward silently
//! - Deferred: a `defer` state (or a VCS operation) holds delivery
//! - Executed: the query re-runs from its baseline and results are pushed
//!
//! # Example
//!
//! ```ignore
//! let client = Client::new();
//! let sub = Subscription::new(root, client.weak(), "mysub", query, policies, true);
//! client.add_subscription(Arc::clone(&sub), registration);
//!
//! // On the root's change-detection thread
//! match DeliveryEngine::new().process(&sub) {
//!     DeliveryOutcome::Delivered => println!("pushed results"),
//!     DeliveryOutcome::Deferred { reasons } => println!("held: {:?}", reasons),
//!     other => println!("{:?}", other),
//! }
//! ```

mod delivery;
mod registry;
mod subscription;
mod types;

pub use delivery::DeliveryEngine;
pub use registry::{RegistryEntry, SubscriptionRegistry};
pub use subscription::Subscription;
pub use types::{DeferReason, DeliveryOutcome, PolicyVerdict, StatePolicies, StatePolicy};
