//! Filesystem view abstraction.

use crate::error::QueryError;
use crate::query::{FileInfo, Query, QueryResult};
use crate::types::{ClockPosition, ClockSpec};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// What the delivery engine needs from a watched root's filesystem view.
///
/// Implementations are mutated concurrently by change detection; queries
/// run under the view lock and must give up once `lock_timeout` expires.
pub trait RootView: Send + Sync {
    /// Most recent position in the change history.
    fn current_clock_position(&self) -> ClockPosition;

    /// True while a version-control operation is rewriting the tree.
    fn is_vcs_operation_in_progress(&self) -> bool;

    /// Run `query` against the view relative to its baseline.
    fn execute_query_locked(
        &self,
        query: &Query,
        lock_timeout: Duration,
    ) -> Result<QueryResult, QueryError>;
}

#[derive(Clone, Debug)]
struct FileEntry {
    exists: bool,
    size: u64,
    created_tick: u32,
    changed_tick: u32,
}

/// State protected by the view lock.
#[derive(Debug)]
struct ViewState {
    ticks: u32,
    files: BTreeMap<String, FileEntry>,
    /// Named cursors: name -> tick at last use.
    cursors: HashMap<String, u32>,
}

/// Held view lock (see [`InMemoryView::lock`]).
pub struct ViewLockGuard<'a> {
    _guard: MutexGuard<'a, ViewState>,
}

/// A tick-stamped, in-memory file table.
///
/// Every mutation bumps the tick counter and stamps the affected file, so an
/// incremental query is a scan for entries stamped after the baseline.
pub struct InMemoryView {
    root_number: u32,
    state: Mutex<ViewState>,
    /// Mirror of `ViewState::ticks`, readable without the view lock.
    latest_tick: AtomicU32,
    vcs_in_progress: AtomicBool,
}

impl InMemoryView {
    /// Create an empty view. Ticks start at 1.
    pub fn new(root_number: u32) -> Self {
        Self {
            root_number,
            state: Mutex::new(ViewState {
                ticks: 1,
                files: BTreeMap::new(),
                cursors: HashMap::new(),
            }),
            latest_tick: AtomicU32::new(1),
            vcs_in_progress: AtomicBool::new(false),
        }
    }

    /// Record a create or modify of `name`.
    pub fn write_file(&self, name: &str, size: u64) -> ClockPosition {
        let mut state = self.state.lock();
        state.ticks += 1;
        let tick = state.ticks;
        let entry = state.files.entry(name.to_string()).or_insert(FileEntry {
            exists: true,
            size,
            created_tick: tick,
            changed_tick: tick,
        });
        if !entry.exists {
            entry.created_tick = tick;
        }
        entry.exists = true;
        entry.size = size;
        entry.changed_tick = tick;
        self.latest_tick.store(tick, Ordering::SeqCst);
        ClockPosition::new(self.root_number, tick)
    }

    /// Record a modify of `name` without changing its size.
    pub fn touch(&self, name: &str) -> ClockPosition {
        let size = self
            .state
            .lock()
            .files
            .get(name)
            .filter(|e| e.exists)
            .map(|e| e.size)
            .unwrap_or(0);
        self.write_file(name, size)
    }

    /// Record a deletion. Returns `None` if the file was not present.
    pub fn remove_file(&self, name: &str) -> Option<ClockPosition> {
        let mut state = self.state.lock();
        if !state.files.get(name).map(|e| e.exists).unwrap_or(false) {
            return None;
        }
        state.ticks += 1;
        let tick = state.ticks;
        let entry = state.files.get_mut(name)?;
        entry.exists = false;
        entry.changed_tick = tick;
        self.latest_tick.store(tick, Ordering::SeqCst);
        Some(ClockPosition::new(self.root_number, tick))
    }

    pub fn set_vcs_operation_in_progress(&self, in_progress: bool) {
        self.vcs_in_progress.store(in_progress, Ordering::SeqCst);
    }

    /// Hold the view lock, as change detection does while crawling.
    pub fn lock(&self) -> ViewLockGuard<'_> {
        ViewLockGuard {
            _guard: self.state.lock(),
        }
    }
}

impl RootView for InMemoryView {
    fn current_clock_position(&self) -> ClockPosition {
        ClockPosition::new(self.root_number, self.latest_tick.load(Ordering::SeqCst))
    }

    fn is_vcs_operation_in_progress(&self) -> bool {
        self.vcs_in_progress.load(Ordering::SeqCst)
    }

    fn execute_query_locked(
        &self,
        query: &Query,
        lock_timeout: Duration,
    ) -> Result<QueryResult, QueryError> {
        let mut state = self
            .state
            .try_lock_for(lock_timeout)
            .ok_or(QueryError::LockTimeout(lock_timeout))?;

        let clock_at_start = ClockPosition::new(self.root_number, state.ticks);

        let baseline = match &query.since {
            None => None,
            Some(ClockSpec::Clock(position)) if position.root_number == self.root_number => {
                Some(position.ticks)
            }
            // A clock from an earlier view lifetime says nothing about this one
            Some(ClockSpec::Clock(_)) => None,
            Some(ClockSpec::Named(name)) => state.cursors.insert(name.clone(), clock_at_start.ticks),
        };

        let mut files = Vec::new();
        for (name, entry) in &state.files {
            let is_new = match baseline {
                None if !entry.exists => continue,
                None => true,
                Some(since) if entry.changed_tick <= since => continue,
                Some(since) => entry.created_tick > since,
            };
            let info = FileInfo {
                name: name.clone(),
                exists: entry.exists,
                is_new,
                size: entry.size,
            };
            if query.expression.matches(&info) {
                files.push(query.render(&info));
            }
        }

        Ok(QueryResult {
            files,
            is_fresh_instance: baseline.is_none(),
            clock_at_start,
        })
    }
}
