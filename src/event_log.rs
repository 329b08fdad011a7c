//! A record of every event a bus delivered, for consumers that want to look
//! back over a session instead of reacting inline.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event_bus::{Event, EventBus, SubscriptionToken};

struct Entries<E> {
    events: Mutex<Vec<E>>,
    appended: Notify,
}

/// Appends every delivered event in delivery order. The bus handler is the
/// only writer; readers get copies.
pub struct EventLog<E: Event> {
    bus: EventBus<E>,
    token: SubscriptionToken,
    entries: Arc<Entries<E>>,
}

impl<E: Event> EventLog<E> {
    pub fn attach(bus: &EventBus<E>) -> Self {
        let entries = Arc::new(Entries {
            events: Mutex::new(Vec::new()),
            appended: Notify::new(),
        });
        let writer = entries.clone();
        let token = bus.subscribe_all(move |event: &E| {
            writer.events.lock().push(event.clone());
            writer.appended.notify_waiters();
        });
        Self {
            bus: bus.clone(),
            token,
            entries,
        }
    }

    pub fn snapshot(&self) -> Vec<E> {
        self.entries.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<E::Kind> {
        self.entries.events.lock().iter().map(Event::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fold<A, F>(&self, init: A, f: F) -> A
    where
        F: FnMut(A, &E) -> A,
    {
        self.entries.events.lock().iter().fold(init, f)
    }

    /// Waits until `done` holds for the recorded events. Returns `false` on
    /// timeout.
    pub async fn wait_until<F>(&self, timeout: Duration, done: F) -> bool
    where
        F: Fn(&[E]) -> bool,
    {
        let wait = async {
            loop {
                let appended = self.entries.appended.notified();
                if done(&self.entries.events.lock()) {
                    return;
                }
                appended.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Waits until at least `count` events were recorded.
    pub async fn wait_for_len(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |events| events.len() >= count).await
    }
}

impl<E: Event> Drop for EventLog<E> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.token);
    }
}
