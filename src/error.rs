//! Error types for the subscription engine.

use std::time::Duration;
use thiserror::Error;

/// Errors raised at the command boundary.
///
/// These are surfaced to the requesting client as an error response and
/// never leave any subscription state behind.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wrong number of arguments for {0}")]
    WrongArgumentCount(&'static str),

    #[error("expected 2nd parameter to be subscription name")]
    InvalidSubscriptionName,

    #[error("failed to parse query: {0}")]
    QueryParse(String),

    #[error("{0} field must be an array of strings")]
    InvalidStateList(&'static str),

    #[error("defer_vcs field must be a boolean")]
    InvalidDeferVcs,

    #[error("unable to resolve root {0}: directory is not watched")]
    RootNotWatched(String),

    #[error("expected a root path as the first parameter")]
    InvalidRootPath,

    #[error("root {0} has been torn down")]
    RootClosed(String),

    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("state {0} is already asserted")]
    StateAlreadyAsserted(String),

    #[error("state {0} is not asserted")]
    StateNotAsserted(String),

    #[error("invalid clock string: {0}")]
    InvalidClock(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised while executing a query against a root's view.
///
/// These are transient: the delivery engine logs them and moves on.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("timed out waiting for view lock after {0:?}")]
    LockTimeout(Duration),

    #[error("root has been torn down")]
    RootClosed,
}

/// Result type for boundary operations.
pub type Result<T> = std::result::Result<T, WatchError>;
