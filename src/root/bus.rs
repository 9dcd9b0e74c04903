//! Root notification bus.
//!
//! Subscribers register a callback and receive a [`BusRegistration`]. The
//! callback is invoked on every settle and once more when the bus is closed.
//! Dropping the registration deregisters the callback; once the bus is
//! closed, all registrations are inert.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Event delivered to bus callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusEvent {
    /// The root's view settled; pending subscriptions should be processed.
    Settled,
    /// The root was torn down. No further events follow.
    Closed,
}

type Callback = Arc<dyn Fn(BusEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback>,
    closed: bool,
}

/// Broadcasts settle notifications to registered callbacks.
#[derive(Default)]
pub struct NotificationBus {
    inner: Arc<Mutex<BusInner>>,
}

/// Token for a bus callback. Releasing it (or dropping it) deregisters the
/// callback.
pub struct BusRegistration {
    id: u64,
    bus: Weak<Mutex<BusInner>>,
}

impl BusRegistration {
    /// Deregister now.
    pub fn release(self) {}

    /// True while the callback is still registered on a live bus.
    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .map(|bus| bus.lock().callbacks.contains_key(&self.id))
            .unwrap_or(false)
    }
}

impl Drop for BusRegistration {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().callbacks.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for BusRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BusRegistration({})", self.id)
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. On a closed bus the registration is inert.
    pub fn subscribe<F>(&self, callback: F) -> BusRegistration
    where
        F: Fn(BusEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        if inner.closed {
            debug!(id, "bus closed, returning inert registration");
            return BusRegistration {
                id,
                bus: Weak::new(),
            };
        }

        inner.callbacks.insert(id, Arc::new(callback));
        BusRegistration {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every callback with [`BusEvent::Settled`]. Returns the number
    /// of callbacks notified.
    pub fn notify(&self) -> usize {
        // Callbacks run without the bus lock so they may release registrations
        let callbacks: Vec<Callback> = self.inner.lock().callbacks.values().cloned().collect();
        for callback in &callbacks {
            callback(BusEvent::Settled);
        }
        callbacks.len()
    }

    /// Close the bus: deliver [`BusEvent::Closed`] to every callback and
    /// drop them. Idempotent.
    pub fn close(&self) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.callbacks)
        };
        debug!(count = callbacks.len(), "closing notification bus");
        for callback in callbacks.values() {
            callback(BusEvent::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(BusEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |event| {
            if event == BusEvent::Settled {
                c.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[test]
    fn test_notify_and_release() {
        let bus = NotificationBus::new();
        let (count, callback) = counter();
        let registration = bus.subscribe(callback);
        assert!(registration.is_active());

        assert_eq!(bus.notify(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        registration.release();
        assert!(bus.is_empty());
        assert_eq!(bus.notify(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_delivers_closed_once() {
        let bus = NotificationBus::new();
        let closed = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&closed);
        let registration = bus.subscribe(move |event| {
            if event == BusEvent::Closed {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.close();
        bus.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!registration.is_active());
        assert_eq!(bus.notify(), 0);
    }

    #[test]
    fn test_subscribe_after_close_is_inert() {
        let bus = NotificationBus::new();
        bus.close();
        let (count, callback) = counter();
        let registration = bus.subscribe(callback);
        assert!(!registration.is_active());
        bus.notify();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_release_registration() {
        let bus = Arc::new(NotificationBus::new());
        let slot: Arc<Mutex<Option<BusRegistration>>> = Arc::new(Mutex::new(None));
        let s = Arc::clone(&slot);
        let registration = bus.subscribe(move |_| {
            s.lock().take();
        });
        *slot.lock() = Some(registration);

        bus.notify();
        assert!(bus.is_empty());
    }
}
