//! Watched roots.
//!
//! A [`Root`] bundles everything the subscription engine reads from a
//! watched directory:
//! - the filesystem view (clock position, VCS flag, locked query execution)
//! - the set of asserted named states
//! - the notification bus that wakes clients at settle points
//! - out-of-band warnings merged into every response
//!
//! Subscriptions hold a strong reference to their root; the root holds only
//! bus callbacks, never subscriptions or clients.

mod bus;
mod states;
mod view;

pub use bus::{BusEvent, BusRegistration, NotificationBus};
pub use states::{AssertedStates, AssertedStatesGuard};
pub use view::{InMemoryView, RootView, ViewLockGuard};

use crate::config::RootConfig;
use crate::error::{Result, WatchError};
use crate::types::ClockPosition;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A watched directory.
pub struct Root {
    path: PathBuf,
    config: RootConfig,
    view: Arc<dyn RootView>,
    states: AssertedStates,
    unilateral: NotificationBus,
    warning: RwLock<Option<String>>,
    closed: AtomicBool,
}

impl Root {
    pub fn new(path: impl Into<PathBuf>, config: RootConfig, view: Arc<dyn RootView>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            config,
            view,
            states: AssertedStates::new(),
            unilateral: NotificationBus::new(),
            warning: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root path as reported in responses.
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn config(&self) -> &RootConfig {
        &self.config
    }

    pub fn view(&self) -> &dyn RootView {
        self.view.as_ref()
    }

    pub fn current_clock_position(&self) -> ClockPosition {
        self.view.current_clock_position()
    }

    pub fn is_vcs_operation_in_progress(&self) -> bool {
        self.view.is_vcs_operation_in_progress()
    }

    // --- Asserted States ---

    pub fn asserted_states(&self) -> &AssertedStates {
        &self.states
    }

    pub fn assert_state(&self, name: &str) -> Result<()> {
        self.states.assert(name)?;
        debug!(root = %self.path.display(), state = name, "state asserted");
        Ok(())
    }

    /// Vacate a state and wake subscribers, so anything deferred on it is
    /// delivered at the next dispatch.
    pub fn vacate_state(&self, name: &str) -> Result<()> {
        self.states.vacate(name)?;
        debug!(root = %self.path.display(), state = name, "state vacated");
        self.settle();
        Ok(())
    }

    // --- Notifications ---

    pub fn subscribe_notifications<F>(&self, callback: F) -> BusRegistration
    where
        F: Fn(BusEvent) + Send + Sync + 'static,
    {
        self.unilateral.subscribe(callback)
    }

    /// Signal a settle point to every registered subscriber.
    pub fn settle(&self) -> usize {
        self.unilateral.notify()
    }

    pub fn notification_count(&self) -> usize {
        self.unilateral.len()
    }

    // --- Warnings ---

    pub fn set_warning(&self, warning: Option<String>) {
        *self.warning.write() = warning;
    }

    pub fn warning(&self) -> Option<String> {
        self.warning.read().clone()
    }

    // --- Lifecycle ---

    /// Tear the root down. Subscriptions are told via the bus and close
    /// themselves; later registrations are inert.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(root = %self.path.display(), "tearing down root");
        self.unilateral.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Table of watched roots, keyed by canonical path.
///
/// Paths are resolved through symlinks and `.`/`..` components when they
/// exist on disk, so a client may name a root by any equivalent path.
#[derive(Default)]
pub struct WatchedRoots {
    roots: RwLock<HashMap<PathBuf, Arc<Root>>>,
}

impl WatchedRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a root. A root previously watched at the same path is
    /// torn down.
    pub fn watch(&self, root: Arc<Root>) {
        let key = canonical_root_path(root.path());
        let previous = self.roots.write().insert(key, root);
        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Look up a root by the path a client sent.
    pub fn resolve(&self, path: &str) -> Result<Arc<Root>> {
        let root = self
            .roots
            .read()
            .get(&canonical_root_path(Path::new(path)))
            .cloned()
            .ok_or_else(|| WatchError::RootNotWatched(path.to_string()))?;
        if root.is_closed() {
            return Err(WatchError::RootClosed(path.to_string()));
        }
        Ok(root)
    }

    /// Stop watching and tear the root down.
    pub fn unwatch(&self, path: &str) -> bool {
        let removed = self.roots.write().remove(&canonical_root_path(Path::new(path)));
        match removed {
            Some(root) => {
                root.close();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.roots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Real path of `path`, or `path` itself if it cannot be resolved.
fn canonical_root_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
