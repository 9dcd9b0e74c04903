//! Core clock types.

use crate::error::WatchError;
use std::fmt;
use std::str::FromStr;

/// Position in a watched root's change history.
///
/// `root_number` identifies one lifetime of the root's view; `ticks` counts
/// observed changes within it. Positions are only ordered meaningfully
/// within a single root number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockPosition {
    pub root_number: u32,
    pub ticks: u32,
}

impl ClockPosition {
    pub fn new(root_number: u32, ticks: u32) -> Self {
        Self { root_number, ticks }
    }

    /// Canonical string form, e.g. `c:1:42`.
    pub fn to_clock_string(&self) -> String {
        format!("c:{}:{}", self.root_number, self.ticks)
    }
}

impl fmt::Debug for ClockPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clock({}:{})", self.root_number, self.ticks)
    }
}

impl fmt::Display for ClockPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_clock_string())
    }
}

impl FromStr for ClockPosition {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WatchError::InvalidClock(s.to_string());
        let rest = s.strip_prefix("c:").ok_or_else(invalid)?;
        let (root_number, ticks) = rest.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            root_number: root_number.parse().map_err(|_| invalid())?,
            ticks: ticks.parse().map_err(|_| invalid())?,
        })
    }
}

/// Baseline a query is evaluated relative to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClockSpec {
    /// A concrete position; only changes after it are reported.
    Clock(ClockPosition),
    /// A symbolic cursor, resolved by the view. Meaningful on first use only.
    Named(String),
}

impl ClockSpec {
    /// The concrete position, if this is a tick-based spec.
    pub fn as_clock(&self) -> Option<ClockPosition> {
        match self {
            ClockSpec::Clock(position) => Some(*position),
            ClockSpec::Named(_) => None,
        }
    }
}

impl From<ClockPosition> for ClockSpec {
    fn from(position: ClockPosition) -> Self {
        ClockSpec::Clock(position)
    }
}

impl FromStr for ClockSpec {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("n:") {
            if name.is_empty() {
                return Err(WatchError::InvalidClock(s.to_string()));
            }
            return Ok(ClockSpec::Named(name.to_string()));
        }
        s.parse().map(ClockSpec::Clock)
    }
}

impl fmt::Display for ClockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockSpec::Clock(position) => write!(f, "{}", position),
            ClockSpec::Named(name) => write!(f, "n:{}", name),
        }
    }
}
