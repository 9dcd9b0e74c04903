//! Command table.
//!
//! Requests arrive as JSON arrays whose first element names the command,
//! e.g. `["subscribe", "/src/project", "mysub", {"expression": ["true"]}]`.
//! The table is built once at startup by [`CommandRegistry::with_builtin_commands`].

mod subscribe;

pub use subscribe::{cmd_subscribe, cmd_unsubscribe, SubscribeRequest};

use crate::client::Client;
use crate::error::{Result, WatchError};
use crate::response::Response;
use crate::root::{Root, WatchedRoots};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// What a command handler can see of the daemon.
pub struct CommandContext<'a> {
    pub roots: &'a WatchedRoots,
}

impl<'a> CommandContext<'a> {
    pub fn new(roots: &'a WatchedRoots) -> Self {
        Self { roots }
    }

    /// Resolve the root named by `args[index]`.
    pub fn resolve_root(&self, args: &[Value], index: usize) -> Result<Arc<Root>> {
        let path = args
            .get(index)
            .and_then(Value::as_str)
            .ok_or(WatchError::InvalidRootPath)?;
        self.roots.resolve(path)
    }
}

/// Handler signature. Handlers enqueue their own replies; an `Err` is turned
/// into an error response by the dispatcher.
pub type CommandHandler = fn(&CommandContext<'_>, &Arc<Client>, &[Value]) -> Result<()>;

/// Capability flags for a command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandFlags {
    /// Must run inside the daemon (not client-side).
    pub daemon: bool,
    /// Permitted for users other than the daemon owner.
    pub allow_any_user: bool,
}

impl CommandFlags {
    pub const DAEMON_ANY_USER: Self = Self {
        daemon: true,
        allow_any_user: true,
    };
}

/// A registered command.
pub struct CommandDefinition {
    pub name: &'static str,
    pub handler: CommandHandler,
    pub flags: CommandFlags,
}

/// Command name -> handler table.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandDefinition>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in commands.
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        subscribe::register(&mut registry);
        registry
    }

    /// Add a command, returning any definition it replaced.
    pub fn register(&mut self, definition: CommandDefinition) -> Option<CommandDefinition> {
        self.commands.insert(definition.name, definition)
    }

    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.get(name)
    }

    /// Sorted command names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run a request for `client`. Failures are reported to the client as
    /// an error response and returned.
    pub fn dispatch(&self, ctx: &CommandContext<'_>, client: &Arc<Client>, request: &Value) -> Result<()> {
        let result = self.dispatch_inner(ctx, client, request);
        if let Err(e) = &result {
            warn!(client = client.id().0, error = %e, "command failed");
            client.enqueue_response(Response::error(e.to_string()));
        }
        result
    }

    fn dispatch_inner(&self, ctx: &CommandContext<'_>, client: &Arc<Client>, request: &Value) -> Result<()> {
        let args = request
            .as_array()
            .ok_or_else(|| WatchError::InvalidCommand("expected an array".into()))?;
        let name = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| WatchError::InvalidCommand("expected a command name".into()))?;
        let definition = self
            .get(name)
            .ok_or_else(|| WatchError::UnknownCommand(name.to_string()))?;
        (definition.handler)(ctx, client, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(_: &CommandContext<'_>, _: &Arc<Client>, _: &[Value]) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_builtin_commands() {
        let registry = CommandRegistry::with_builtin_commands();
        assert_eq!(registry.names(), vec!["subscribe", "unsubscribe"]);
        let subscribe = registry.get("subscribe").unwrap();
        assert_eq!(subscribe.flags, CommandFlags::DAEMON_ANY_USER);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = CommandRegistry::new();
        let def = || CommandDefinition {
            name: "noop",
            handler: noop,
            flags: CommandFlags::default(),
        };
        assert!(registry.register(def()).is_none());
        assert!(registry.register(def()).is_some());
        assert_eq!(registry.names(), vec!["noop"]);
    }

    #[test]
    fn test_dispatch_rejects_malformed_requests() {
        let registry = CommandRegistry::with_builtin_commands();
        let roots = WatchedRoots::new();
        let ctx = CommandContext::new(&roots);
        let client = Client::new();

        let result = registry.dispatch(&ctx, &client, &json!({"subscribe": true}));
        assert!(matches!(result, Err(WatchError::InvalidCommand(_))));

        let result = registry.dispatch(&ctx, &client, &json!([42]));
        assert!(matches!(result, Err(WatchError::InvalidCommand(_))));

        let result = registry.dispatch(&ctx, &client, &json!(["frobnicate"]));
        assert!(matches!(result, Err(WatchError::UnknownCommand(_))));

        let errors = client.drain_responses();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[2], Response::error("unknown command frobnicate"));
    }
}
