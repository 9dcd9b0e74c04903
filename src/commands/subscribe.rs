//! `subscribe` and `unsubscribe` commands.

use crate::client::Client;
use crate::error::{Result, WatchError};
use crate::query::Query;
use crate::response::{Response, SubscribeAck, UnsubscribeAck};
use crate::root::BusEvent;
use crate::subscriptions::{DeliveryEngine, StatePolicies, Subscription};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{CommandContext, CommandDefinition, CommandFlags, CommandRegistry};

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register(CommandDefinition {
        name: "subscribe",
        handler: cmd_subscribe,
        flags: CommandFlags::DAEMON_ANY_USER,
    });
    registry.register(CommandDefinition {
        name: "unsubscribe",
        handler: cmd_unsubscribe,
        flags: CommandFlags::DAEMON_ANY_USER,
    });
}

/// Validated `subscribe` arguments.
#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub name: String,
    pub query: Query,
    pub policies: StatePolicies,
    pub defer_vcs: bool,
}

impl SubscribeRequest {
    /// Validate the name and query spec of a subscribe request.
    pub fn parse(name: &Value, spec: &Value) -> Result<Self> {
        let name = name.as_str().ok_or(WatchError::InvalidSubscriptionName)?;
        let query = Query::parse(spec)?;

        let defer_list = state_list(spec, "defer")?;
        let drop_list = state_list(spec, "drop")?;

        let defer_vcs = match spec.get("defer_vcs") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(WatchError::InvalidDeferVcs),
        };

        Ok(Self {
            name: name.to_string(),
            query,
            policies: StatePolicies::from_lists(defer_list, drop_list),
            defer_vcs,
        })
    }
}

fn state_list(spec: &Value, field: &'static str) -> Result<Vec<String>> {
    match spec.get(field) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or(WatchError::InvalidStateList(field))
            })
            .collect(),
        Some(_) => Err(WatchError::InvalidStateList(field)),
    }
}

/// `["subscribe", root, name, spec]`
///
/// Subscribes the client to a root. Replies with the subscription name and
/// a clock, followed by the initial results if the query matched anything.
pub fn cmd_subscribe(ctx: &CommandContext<'_>, client: &Arc<Client>, args: &[Value]) -> Result<()> {
    if args.len() != 4 {
        return Err(WatchError::WrongArgumentCount("subscribe"));
    }

    let root = ctx.resolve_root(args, 1)?;
    let request = SubscribeRequest::parse(&args[2], &args[3])?;
    debug!(
        client = client.id().0,
        subscription = %request.name,
        root = %root.path().display(),
        "subscribe request"
    );

    let subscription = Subscription::new(
        Arc::clone(&root),
        client.weak(),
        request.name,
        request.query,
        request.policies,
        request.defer_vcs,
    );

    let registration = {
        let weak_client = client.weak();
        let weak_sub = Arc::downgrade(&subscription);
        root.subscribe_notifications(move |event| match event {
            BusEvent::Settled => {
                if let Some(client) = weak_client.upgrade() {
                    client.ping();
                }
            }
            BusEvent::Closed => {
                if let Some(sub) = weak_sub.upgrade() {
                    sub.close();
                }
            }
        })
    };

    DeliveryEngine::new().start(
        &subscription,
        || {
            client.add_subscription(Arc::clone(&subscription), registration);
            // A teardown that raced the lookup leaves an inert registration
            // (or has already closed this subscription before it was added)
            if root.is_closed() {
                client.remove_subscription_if_current(subscription.name(), &subscription);
                return Err(WatchError::RootClosed(root.path_string()));
            }
            debug!(
                client = client.id().0,
                subscription = subscription.name(),
                root = %root.path().display(),
                "subscribed"
            );
            Ok(())
        },
        |initial, clock| {
            client.enqueue_response(Response::Subscribe(SubscribeAck {
                subscribe: subscription.name().to_string(),
                clock: clock.to_clock_string(),
                warning: root.warning(),
            }));
            if let Some(results) = initial {
                client.enqueue_response(Response::Results(results));
            }
        },
    )
}

/// `["unsubscribe", root, name]`
///
/// Cancels a subscription. Reports whether it existed; a missing name is
/// not an error.
pub fn cmd_unsubscribe(ctx: &CommandContext<'_>, client: &Arc<Client>, args: &[Value]) -> Result<()> {
    if args.len() != 3 {
        return Err(WatchError::WrongArgumentCount("unsubscribe"));
    }

    ctx.resolve_root(args, 1)?;
    let name = args[2]
        .as_str()
        .ok_or(WatchError::InvalidSubscriptionName)?;

    let deleted = client.unsub_by_name(name);
    debug!(client = client.id().0, subscription = name, deleted, "unsubscribe");

    client.enqueue_response(Response::Unsubscribe(UnsubscribeAck {
        unsubscribe: name.to_string(),
        deleted,
    }));

    Ok(())
}
