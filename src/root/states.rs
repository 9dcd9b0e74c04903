//! Named states asserted on a root.

use crate::error::{Result, WatchError};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::BTreeSet;
use std::ops::Deref;

/// Set of currently asserted state names.
#[derive(Debug, Default)]
pub struct AssertedStates {
    states: RwLock<BTreeSet<String>>,
}

/// Scoped read access to the asserted set. Release it before taking the
/// view lock.
pub struct AssertedStatesGuard<'a> {
    guard: RwLockReadGuard<'a, BTreeSet<String>>,
}

impl Deref for AssertedStatesGuard<'_> {
    type Target = BTreeSet<String>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl AssertedStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> AssertedStatesGuard<'_> {
        AssertedStatesGuard {
            guard: self.states.read(),
        }
    }

    pub fn assert(&self, name: &str) -> Result<()> {
        if !self.states.write().insert(name.to_string()) {
            return Err(WatchError::StateAlreadyAsserted(name.to_string()));
        }
        Ok(())
    }

    pub fn vacate(&self, name: &str) -> Result<()> {
        if !self.states.write().remove(name) {
            return Err(WatchError::StateNotAsserted(name.to_string()));
        }
        Ok(())
    }

    pub fn is_asserted(&self, name: &str) -> bool {
        self.states.read().contains(name)
    }
}
