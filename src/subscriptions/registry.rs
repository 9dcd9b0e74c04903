//! Per-client subscription registry.

use crate::root::BusRegistration;
use std::collections::HashMap;
use std::sync::Arc;

use super::subscription::Subscription;

/// A subscription together with its notification-bus registration.
///
/// Keeping both in one entry means there is never a registration without a
/// live subscription, or the other way around.
pub struct RegistryEntry {
    subscription: Arc<Subscription>,
    registration: BusRegistration,
}

impl RegistryEntry {
    pub fn new(subscription: Arc<Subscription>, registration: BusRegistration) -> Self {
        Self {
            subscription,
            registration,
        }
    }

    pub fn subscription(&self) -> &Arc<Subscription> {
        &self.subscription
    }

    /// Close the subscription and release its bus registration.
    ///
    /// Must not be called while the owning client's registry lock is held.
    pub fn close(self) {
        self.subscription.close();
        self.registration.release();
    }
}

/// Subscriptions of one client connection, keyed by name.
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_name: HashMap<String, RegistryEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the subscription's name, returning any entry it
    /// replaced. The caller closes the replaced entry.
    pub fn insert(
        &mut self,
        subscription: Arc<Subscription>,
        registration: BusRegistration,
    ) -> Option<RegistryEntry> {
        let name = subscription.name().to_string();
        self.by_name
            .insert(name, RegistryEntry::new(subscription, registration))
    }

    /// Remove an entry and its registration together.
    pub fn remove_by_name(&mut self, name: &str) -> Option<RegistryEntry> {
        self.by_name.remove(name)
    }

    /// Remove `name` only if it still maps to `subscription`, so a replaced
    /// subscription tearing itself down cannot evict its successor.
    pub fn remove_if_current(
        &mut self,
        name: &str,
        subscription: &Subscription,
    ) -> Option<RegistryEntry> {
        let current = self.by_name.get(name)?;
        if !std::ptr::eq(Arc::as_ptr(&current.subscription), subscription) {
            return None;
        }
        self.by_name.remove(name)
    }

    /// Remove every entry.
    pub fn clear(&mut self) -> Vec<RegistryEntry> {
        self.by_name.drain().map(|(_, entry)| entry).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Subscription>> {
        self.by_name.get(name).map(|e| &e.subscription)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Snapshot of the subscriptions for a delivery pass.
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.by_name
            .values()
            .map(|e| Arc::clone(&e.subscription))
            .collect()
    }

    /// Sorted subscription names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootConfig;
    use crate::query::Query;
    use crate::root::{InMemoryView, Root};
    use crate::subscriptions::StatePolicies;
    use std::sync::Weak;

    fn test_root() -> Arc<Root> {
        Root::new("/src/project", RootConfig::default(), Arc::new(InMemoryView::new(1)))
    }

    fn make_sub(root: &Arc<Root>, name: &str) -> (Arc<Subscription>, BusRegistration) {
        let sub = Subscription::new(
            Arc::clone(root),
            Weak::new(),
            name,
            Query::default(),
            StatePolicies::new(),
            true,
        );
        let registration = root.subscribe_notifications(|_| {});
        (sub, registration)
    }

    #[test]
    fn test_insert_and_remove() {
        let root = test_root();
        let mut registry = SubscriptionRegistry::new();

        let (sub, reg) = make_sub(&root, "one");
        assert!(registry.insert(sub, reg).is_none());
        assert!(registry.contains("one"));
        assert_eq!(root.notification_count(), 1);

        assert!(registry.remove_by_name("missing").is_none());
        assert_eq!(registry.len(), 1);

        let entry = registry.remove_by_name("one").unwrap();
        entry.close();
        assert!(registry.is_empty());
        assert_eq!(root.notification_count(), 0);
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let root = test_root();
        let mut registry = SubscriptionRegistry::new();

        let (first, reg) = make_sub(&root, "dup");
        registry.insert(Arc::clone(&first), reg);
        let (second, reg) = make_sub(&root, "dup");
        let replaced = registry.insert(Arc::clone(&second), reg).unwrap();

        assert!(Arc::ptr_eq(replaced.subscription(), &first));
        replaced.close();
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.len(), 1);
        assert_eq!(root.notification_count(), 1);
    }

    #[test]
    fn test_remove_if_current_checks_identity() {
        let root = test_root();
        let mut registry = SubscriptionRegistry::new();

        let (old, _old_reg) = make_sub(&root, "name");
        let (current, reg) = make_sub(&root, "name");
        registry.insert(Arc::clone(&current), reg);

        assert!(registry.remove_if_current("name", &old).is_none());
        assert!(registry.contains("name"));
        assert!(registry.remove_if_current("name", &current).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_releases_registrations() {
        let root = test_root();
        let mut registry = SubscriptionRegistry::new();
        for name in ["a", "b", "c"] {
            let (sub, reg) = make_sub(&root, name);
            registry.insert(sub, reg);
        }
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        assert_eq!(root.notification_count(), 3);

        let entries = registry.clear();
        assert_eq!(entries.len(), 3);
        drop(entries);
        assert!(registry.is_empty());
        assert_eq!(root.notification_count(), 0);
    }
}
