//! Delivery decision and query execution.
//!
//! [`DeliveryEngine::process`] runs on the root's change-detection thread
//! for each subscription of a woken client. Each call re-evaluates from
//! scratch: up to date, dropped (fast-forward), deferred (hold), or
//! executed. Errors never escape; a failing subscription must not block
//! delivery to the others.

use crate::error::{QueryError, Result};
use crate::query::Query;
use crate::response::{Response, SubscriptionResults};
use crate::root::Root;
use crate::types::{ClockPosition, ClockSpec};
use std::time::Duration;
use tracing::{debug, error};

use super::subscription::Subscription;
use super::types::{DeferReason, DeliveryOutcome, PolicyVerdict};

/// Stateless delivery procedure.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeliveryEngine;

impl DeliveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decide what to do for `subscription` given its root's current state,
    /// and do it.
    pub fn process(&self, subscription: &Subscription) -> DeliveryOutcome {
        if subscription.is_closed() {
            debug!(subscription = subscription.name(), "skipping closed subscription");
            return DeliveryOutcome::Closed;
        }

        let client = match subscription.resolve_client() {
            Some(client) => client,
            None => {
                debug!(
                    subscription = subscription.name(),
                    "encountered a vacated client while running subscription rules"
                );
                return DeliveryOutcome::ClientGone;
            }
        };

        let root = subscription.root();
        let position = root.current_clock_position();

        // Held for the whole attempt: one delivery per subscription at a time
        let mut state = subscription.lock_state();

        debug!(
            subscription = subscription.name(),
            last = state.last_tick,
            pending = position.ticks,
            "processing subscription"
        );

        if state.last_tick == position.ticks {
            debug!(subscription = subscription.name(), "subscription is up to date");
            return DeliveryOutcome::UpToDate;
        }

        let verdict = if subscription.policies().is_empty() {
            None
        } else {
            let asserted = root.asserted_states().read();
            subscription.policies().evaluate(&asserted)
        };

        let mut reasons = Vec::new();
        let mut dropped = None;

        match verdict {
            Some(PolicyVerdict::Drop { state: name }) => {
                // Fast-forward over everything seen while in the drop state
                state.advance_to(position.ticks);
                state.query.since = Some(ClockSpec::Clock(position));
                debug!(
                    subscription = subscription.name(),
                    state = %name,
                    ticks = state.last_tick,
                    "dropping subscription notifications until state is vacated"
                );
                dropped = Some(name);
            }
            Some(PolicyVerdict::Defer { state: name }) => {
                debug!(
                    subscription = subscription.name(),
                    state = %name,
                    "deferring subscription notifications until state is vacated"
                );
                reasons.push(DeferReason::State(name));
            }
            None => {}
        }

        if subscription.vcs_defer() && root.is_vcs_operation_in_progress() {
            debug!(
                subscription = subscription.name(),
                "deferring subscription notifications until VCS operations complete"
            );
            reasons.push(DeferReason::VcsOperation);
        }

        if let Some(name) = dropped {
            return DeliveryOutcome::Dropped { state: name };
        }
        if !reasons.is_empty() {
            return DeliveryOutcome::Deferred { reasons };
        }

        let run = self.build_results(subscription.name(), &mut state.query, root);
        state.advance_to(position.ticks);
        drop(state);

        match run {
            Err(_) => DeliveryOutcome::Failed,
            Ok((None, _)) => DeliveryOutcome::NoResults,
            Ok((Some(results), _)) => {
                client.enqueue_response(Response::Results(results));
                DeliveryOutcome::Delivered
            }
        }
    }

    /// Publish a freshly created subscription and run its query once,
    /// outside the policy checks.
    ///
    /// The subscription's state lock is taken before `publish` and held
    /// until `reply` has returned. A delivery pass that sees the published
    /// subscription in between waits for the lock and then finds it up to
    /// date, so nothing can be queued ahead of the reply.
    ///
    /// `reply` receives the initial results (if any matched) and the clock
    /// for the acknowledgement. It is not called if `publish` fails.
    pub fn start<P, R>(&self, subscription: &Subscription, publish: P, reply: R) -> Result<()>
    where
        P: FnOnce() -> Result<()>,
        R: FnOnce(Option<SubscriptionResults>, ClockPosition),
    {
        let root = subscription.root();
        let mut state = subscription.lock_state();
        publish()?;

        let (results, clock) = match self.build_results(subscription.name(), &mut state.query, root) {
            Ok((results, clock)) => {
                state.advance_to(clock.ticks);
                (results, clock)
            }
            Err(_) => (None, root.current_clock_position()),
        };
        reply(results, clock);
        Ok(())
    }

    /// Execute `query` against the root and package any matches.
    ///
    /// On success the query's baseline is rebased to the clock captured when
    /// the query started, whether or not anything matched.
    fn build_results(
        &self,
        name: &str,
        query: &mut Query,
        root: &Root,
    ) -> std::result::Result<(Option<SubscriptionResults>, ClockPosition), QueryError> {
        let since_spec = query.since.clone();

        match since_spec.as_ref().and_then(ClockSpec::as_clock) {
            Some(since) => debug!(
                subscription = name,
                since = since.ticks,
                "running subscription rules"
            ),
            None => debug!(subscription = name, "running subscription rules (no since)"),
        }

        // Dispatch happens at settle points, which are already in sync
        query.sync_timeout = Duration::ZERO;
        // Contention on the change-detection thread means something is
        // wrong, so don't wait long
        query.lock_timeout = root.config().subscription_lock_timeout();

        let result = if root.is_closed() {
            Err(QueryError::RootClosed)
        } else {
            root.view().execute_query_locked(query, query.lock_timeout)
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!(subscription = name, error = %e, "error running subscription query");
                return Err(e);
            }
        };

        debug!(
            subscription = name,
            results = result.files.len(),
            "subscription generated results"
        );

        let clock = result.clock_at_start;
        query.since = Some(ClockSpec::Clock(clock));

        if result.files.is_empty() {
            return Ok((None, clock));
        }

        // Symbolic baselines are only meaningful on the first run, so only
        // tick-based ones are echoed back
        let since = since_spec
            .as_ref()
            .and_then(ClockSpec::as_clock)
            .map(|p| p.to_clock_string());

        let results = SubscriptionResults {
            since,
            is_fresh_instance: result.is_fresh_instance,
            clock: clock.to_clock_string(),
            files: result.files,
            root: root.path_string(),
            subscription: name.to_string(),
            unilateral: true,
            warning: root.warning(),
        };

        Ok((Some(results), clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::RootConfig;
    use crate::root::InMemoryView;
    use crate::subscriptions::StatePolicies;
    use crate::error::WatchError;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        view: Arc<InMemoryView>,
        root: Arc<Root>,
        client: Arc<Client>,
    }

    fn fixture() -> Fixture {
        let view = Arc::new(InMemoryView::new(1));
        let root = Root::new(
            "/src/project",
            RootConfig {
                subscription_lock_timeout_ms: 10,
            },
            Arc::clone(&view) as Arc<dyn crate::root::RootView>,
        );
        Fixture {
            view,
            root,
            client: Client::new(),
        }
    }

    fn subscribe(f: &Fixture, policies: StatePolicies, vcs_defer: bool) -> Arc<Subscription> {
        let query = Query::parse(&json!({"expression": ["true"], "fields": ["name"]})).unwrap();
        Subscription::new(
            Arc::clone(&f.root),
            Arc::downgrade(&f.client),
            "sub",
            query,
            policies,
            vcs_defer,
        )
    }

    fn file_names(response: Response) -> Vec<String> {
        match response {
            Response::Results(r) => r
                .files
                .iter()
                .map(|f| f["name"].as_str().unwrap().to_string())
                .collect(),
            other => panic!("Expected results, got {:?}", other),
        }
    }

    #[test]
    fn test_first_run_is_fresh_then_up_to_date() {
        let f = fixture();
        f.view.write_file("a.txt", 1);
        let sub = subscribe(&f, StatePolicies::new(), true);
        let engine = DeliveryEngine::new();

        assert_eq!(engine.process(&sub), DeliveryOutcome::Delivered);
        match f.client.try_recv().unwrap() {
            Response::Results(r) => {
                assert!(r.is_fresh_instance);
                assert!(r.since.is_none());
                assert_eq!(r.subscription, "sub");
                assert_eq!(r.root, "/src/project");
                assert!(r.unilateral);
            }
            other => panic!("Expected results, got {:?}", other),
        }

        assert_eq!(engine.process(&sub), DeliveryOutcome::UpToDate);
        assert!(f.client.try_recv().is_err());
    }

    #[test]
    fn test_incremental_reports_since() {
        let f = fixture();
        f.view.write_file("a.txt", 1);
        let sub = subscribe(&f, StatePolicies::new(), true);
        let engine = DeliveryEngine::new();
        engine.process(&sub);
        f.client.try_recv().unwrap();
        let baseline = sub.since().unwrap();

        f.view.write_file("b.txt", 1);
        assert_eq!(engine.process(&sub), DeliveryOutcome::Delivered);
        match f.client.try_recv().unwrap() {
            Response::Results(r) => {
                assert!(!r.is_fresh_instance);
                assert_eq!(r.since, Some(baseline.to_string()));
                assert_eq!(r.files, vec![json!({"name": "b.txt"})]);
            }
            other => panic!("Expected results, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_results_rebase_without_response() {
        let f = fixture();
        let sub = Subscription::new(
            Arc::clone(&f.root),
            Arc::downgrade(&f.client),
            "rs-only",
            Query::parse(&json!({"expression": ["suffix", "rs"]})).unwrap(),
            StatePolicies::new(),
            true,
        );
        let position = f.view.write_file("notes.txt", 1);

        assert_eq!(DeliveryEngine::new().process(&sub), DeliveryOutcome::NoResults);
        assert!(f.client.try_recv().is_err());
        assert_eq!(sub.since(), Some(ClockSpec::Clock(position)));
        assert_eq!(sub.last_tick(), position.ticks);
    }

    #[test]
    fn test_drop_fast_forwards() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::from_lists(Vec::<String>::new(), ["rebase"]), true);
        let engine = DeliveryEngine::new();

        f.root.assert_state("rebase").unwrap();
        let position = f.view.write_file("a.txt", 1);

        assert_eq!(
            engine.process(&sub),
            DeliveryOutcome::Dropped {
                state: "rebase".into()
            }
        );
        assert_eq!(sub.last_tick(), position.ticks);
        assert_eq!(sub.since(), Some(ClockSpec::Clock(position)));
        assert!(f.client.try_recv().is_err());
    }

    #[test]
    fn test_defer_holds_then_delivers_accumulated() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::from_lists(["hg.update"], Vec::<String>::new()), true);
        let engine = DeliveryEngine::new();

        f.root.assert_state("hg.update").unwrap();
        f.view.write_file("a.txt", 1);
        f.view.write_file("b.txt", 1);

        let outcome = engine.process(&sub);
        assert_eq!(
            outcome,
            DeliveryOutcome::Deferred {
                reasons: vec![DeferReason::State("hg.update".into())]
            }
        );
        assert_eq!(sub.last_tick(), 0);
        assert!(sub.since().is_none());

        f.root.vacate_state("hg.update").unwrap();
        assert_eq!(engine.process(&sub), DeliveryOutcome::Delivered);
        assert_eq!(file_names(f.client.try_recv().unwrap()), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_vcs_defer() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::new(), true);
        f.view.write_file("a.txt", 1);
        f.view.set_vcs_operation_in_progress(true);

        assert_eq!(
            DeliveryEngine::new().process(&sub),
            DeliveryOutcome::Deferred {
                reasons: vec![DeferReason::VcsOperation]
            }
        );
        assert_eq!(sub.last_tick(), 0);
    }

    #[test]
    fn test_vcs_ignored_when_not_deferring() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::new(), false);
        f.view.write_file("a.txt", 1);
        f.view.set_vcs_operation_in_progress(true);

        assert_eq!(DeliveryEngine::new().process(&sub), DeliveryOutcome::Delivered);
    }

    #[test]
    fn test_drop_wins_over_vcs_defer() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::from_lists(Vec::<String>::new(), ["rebase"]), true);
        f.root.assert_state("rebase").unwrap();
        f.view.set_vcs_operation_in_progress(true);
        let position = f.view.write_file("a.txt", 1);

        assert_eq!(
            DeliveryEngine::new().process(&sub),
            DeliveryOutcome::Dropped {
                state: "rebase".into()
            }
        );
        assert_eq!(sub.last_tick(), position.ticks);
    }

    #[test]
    fn test_lock_timeout_advances_tick() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::new(), true);
        let position = f.view.write_file("a.txt", 1);

        let outcome = {
            let _held = f.view.lock();
            DeliveryEngine::new().process(&sub)
        };
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(sub.last_tick(), position.ticks);
        assert!(sub.since().is_none());
        assert!(f.client.try_recv().is_err());
    }

    #[test]
    fn test_query_timeouts_are_overridden() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::new(), true);
        f.view.write_file("a.txt", 1);
        DeliveryEngine::new().process(&sub);

        let query = sub.query();
        assert_eq!(query.sync_timeout, Duration::ZERO);
        assert_eq!(query.lock_timeout, Duration::from_millis(10));
    }

    #[test]
    fn test_warning_merged_into_results() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::new(), true);
        f.view.write_file("a.txt", 1);
        f.root.set_warning(Some("recrawled".into()));

        DeliveryEngine::new().process(&sub);
        match f.client.try_recv().unwrap() {
            Response::Results(r) => assert_eq!(r.warning.as_deref(), Some("recrawled")),
            other => panic!("Expected results, got {:?}", other),
        }
    }

    #[test]
    fn test_client_gone() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::new(), true);
        f.view.write_file("a.txt", 1);
        let Fixture { client, .. } = f;
        drop(client);

        assert_eq!(DeliveryEngine::new().process(&sub), DeliveryOutcome::ClientGone);
        assert_eq!(sub.last_tick(), 0);
    }

    #[test]
    fn test_closed_root_fails_query() {
        let f = fixture();
        let sub = subscribe(&f, StatePolicies::new(), true);
        f.view.write_file("a.txt", 1);
        f.root.close();

        assert_eq!(DeliveryEngine::new().process(&sub), DeliveryOutcome::Failed);
    }

    #[test]
    fn test_named_since_not_echoed() {
        let f = fixture();
        f.view.write_file("a.txt", 1);
        let sub = Subscription::new(
            Arc::clone(&f.root),
            Arc::downgrade(&f.client),
            "named",
            Query::parse(&json!({"since": "n:cursor"})).unwrap(),
            StatePolicies::new(),
            true,
        );
        let mut initial = None;
        DeliveryEngine::new()
            .start(&sub, || Ok(()), |results, clock| initial = Some((results, clock)))
            .unwrap();
        let (results, clock) = initial.unwrap();
        let results = results.unwrap();
        assert!(results.since.is_none());
        assert!(results.is_fresh_instance);
        assert_eq!(sub.last_tick(), clock.ticks);
        assert_eq!(sub.since(), Some(ClockSpec::Clock(clock)));
    }

    #[test]
    fn test_start_publish_failure_skips_query() {
        let f = fixture();
        f.view.write_file("a.txt", 1);
        let sub = subscribe(&f, StatePolicies::new(), true);

        let mut replied = false;
        let result = DeliveryEngine::new().start(
            &sub,
            || Err(WatchError::RootClosed("/src/project".into())),
            |_, _| replied = true,
        );
        assert!(matches!(result, Err(WatchError::RootClosed(_))));
        assert!(!replied);
        assert_eq!(sub.last_tick(), 0);
        assert!(sub.since().is_none());
    }

    #[test]
    fn test_stale_tick_ahead_of_new_view_never_regresses() {
        // A view restarted under a new root number counts ticks from 1 again
        let view = Arc::new(InMemoryView::new(2));
        let root = Root::new(
            "/src/project",
            RootConfig::default(),
            Arc::clone(&view) as Arc<dyn crate::root::RootView>,
        );
        let client = Client::new();
        let sub = Subscription::new(
            root,
            client.weak(),
            "sub",
            Query::parse(&json!({"since": "c:1:50", "fields": ["name"]})).unwrap(),
            StatePolicies::new(),
            true,
        );
        sub.lock_state().last_tick = 50;

        let position = view.write_file("a.txt", 1);
        assert!(position.ticks < 50);

        assert_eq!(DeliveryEngine::new().process(&sub), DeliveryOutcome::Delivered);
        match client.try_recv().unwrap() {
            Response::Results(r) => {
                // The old-lifetime baseline yields a fresh instance
                assert!(r.is_fresh_instance);
                assert_eq!(r.since.as_deref(), Some("c:1:50"));
                assert_eq!(r.files, vec![json!({"name": "a.txt"})]);
            }
            other => panic!("Expected results, got {:?}", other),
        }
        assert_eq!(sub.last_tick(), 50);
        assert_eq!(sub.since(), Some(ClockSpec::Clock(position)));
    }
}
