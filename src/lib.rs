//! # watchsub
//!
//! Subscription delivery for a file-watching daemon: turns "something
//! changed under this watched root" into "send this client an up-to-date,
//! minimal delta".
//!
//! ## Core Concepts
//!
//! - **Clock positions**: monotonic ticks per root; every subscription
//!   remembers the last tick it accounted for
//! - **State policies**: per-subscription `defer` / `drop` rules keyed on
//!   named states asserted on the root (e.g. a VCS checkout in progress)
//! - **Registries**: each client owns its subscriptions by name; a
//!   subscription only holds its client weakly
//! - **Delivery**: at each settle point, a stale subscription is dropped,
//!   deferred, or has its query re-run and the delta pushed
//!
//! ## Example
//!
//! ```ignore
//! use watchsub::{Client, CommandContext, CommandRegistry, InMemoryView, Root, RootConfig, WatchedRoots};
//!
//! let view = Arc::new(InMemoryView::new(1));
//! let roots = WatchedRoots::new();
//! roots.watch(Root::new("/src/project", RootConfig::default(), view.clone()));
//!
//! let commands = CommandRegistry::with_builtin_commands();
//! let client = Client::new();
//! commands.dispatch(
//!     &CommandContext::new(&roots),
//!     &client,
//!     &json!(["subscribe", "/src/project", "mysub", {"expression": ["true"], "defer": ["hg.update"]}]),
//! )?;
//!
//! view.write_file("src/lib.rs", 120);
//! roots.resolve("/src/project")?.settle();
//! if client.wait_for_ping(Duration::from_secs(1)) {
//!     client.run_subscriptions();
//! }
//! ```

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod query;
pub mod response;
pub mod root;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use client::{Client, ClientId};
pub use commands::{
    cmd_subscribe, cmd_unsubscribe, CommandContext, CommandDefinition, CommandFlags,
    CommandHandler, CommandRegistry, SubscribeRequest,
};
pub use config::RootConfig;
pub use error::{QueryError, Result, WatchError};
pub use query::{Expression, FileInfo, Query, QueryResult};
pub use response::{ErrorResponse, Response, SubscribeAck, SubscriptionResults, UnsubscribeAck};
pub use root::{
    AssertedStates, AssertedStatesGuard, BusEvent, BusRegistration, InMemoryView,
    NotificationBus, Root, RootView, ViewLockGuard, WatchedRoots,
};
pub use subscriptions::{
    DeferReason, DeliveryEngine, DeliveryOutcome, PolicyVerdict, RegistryEntry, StatePolicies,
    StatePolicy, Subscription, SubscriptionRegistry,
};
pub use types::{ClockPosition, ClockSpec};
