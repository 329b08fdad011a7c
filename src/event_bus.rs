//! Typed publish/subscribe used by every session to deliver notifications.
//!
//! Handlers run synchronously, in subscription order, on whatever context
//! called [`EventBus::publish`]. A slow handler stalls delivery to every
//! handler after it and stalls the producer; handlers that need to do real
//! work should hand it off (see [`EventBus::channel`]).
//!
//! Unsubscribing from outside a handler waits for an in-flight call of the
//! removed handler. From inside a handler it never waits on another thread.

use std::cell::Cell;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use speech_session_types::{BotEvent, BotEventKind, RecognitionEvent, RecognitionEventKind};
use tokio::sync::mpsc;

pub trait Event: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

impl Event for RecognitionEvent {
    type Kind = RecognitionEventKind;

    fn kind(&self) -> RecognitionEventKind {
        RecognitionEvent::kind(self)
    }
}

impl Event for BotEvent {
    type Kind = BotEventKind;

    fn kind(&self) -> BotEventKind {
        BotEvent::kind(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

struct Subscription<E: Event> {
    id: u64,
    /// `None` matches every kind.
    kind: Option<E::Kind>,
    handler: Handler<E>,
    enabled: AtomicBool,
    // Held for the duration of each invocation. Reentrant so a handler may
    // unsubscribe itself from inside its own call.
    active: ReentrantMutex<()>,
}

thread_local! {
    // Handler invocations in progress on this thread.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

struct Delivering;

impl Delivering {
    fn enter() -> Self {
        DELIVERING.with(|depth| depth.set(depth.get() + 1));
        Delivering
    }

    fn active() -> bool {
        DELIVERING.with(|depth| depth.get() > 0)
    }
}

impl Drop for Delivering {
    fn drop(&mut self) {
        DELIVERING.with(|depth| depth.set(depth.get() - 1));
    }
}

impl<E: Event> Subscription<E> {
    fn matches(&self, kind: E::Kind) -> bool {
        self.kind.map_or(true, |k| k == kind)
    }
}

struct Registry<E: Event> {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Arc<Subscription<E>>>>,
}

pub struct EventBus<E: Event> {
    registry: Arc<Registry<E>>,
}

impl<E: Event> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                subscriptions: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registers `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> SubscriptionToken
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(Some(kind), Box::new(handler))
    }

    /// Registers `handler` for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(None, Box::new(handler))
    }

    /// Forwards events of the given kinds (all kinds when empty) into a
    /// channel, so consumers can process them off the producer's context.
    pub fn channel(&self, kinds: &[E::Kind]) -> (SubscriptionToken, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let kinds = kinds.to_vec();
        let token = self.subscribe_all(move |event: &E| {
            if kinds.is_empty() || kinds.contains(&event.kind()) {
                // A dropped receiver only means nobody is listening anymore.
                let _ = tx.send(event.clone());
            }
        });
        (token, rx)
    }

    /// Removes a subscription. Returns `false` for an unknown token.
    ///
    /// Once this returns the handler is not invoked again. If the handler is
    /// running on another thread, this waits for that invocation to finish,
    /// unless it is called from inside a handler: then the other invocation
    /// is left to finish on its own.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let removed = {
            let mut subscriptions = self.registry.subscriptions.write();
            match subscriptions.iter().position(|s| s.id == token.0) {
                Some(index) => subscriptions.remove(index),
                None => return false,
            }
        };
        removed.enabled.store(false, Ordering::SeqCst);
        if Delivering::active() {
            drop(removed.active.try_lock());
        } else {
            drop(removed.active.lock());
        }
        true
    }

    /// Delivers `event` to every matching handler. Having no subscribers is
    /// not an error.
    pub fn publish(&self, event: E) {
        let kind = event.kind();
        let snapshot: Vec<Arc<Subscription<E>>> = self
            .registry
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.matches(kind))
            .cloned()
            .collect();

        tracing::trace!("publishing {:?} to {} handler(s)", kind, snapshot.len());
        for subscription in snapshot {
            let _active = subscription.active.lock();
            if subscription.enabled.load(Ordering::SeqCst) {
                let _delivering = Delivering::enter();
                (subscription.handler)(&event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriptions.read().len()
    }

    fn insert(&self, kind: Option<E::Kind>, handler: Handler<E>) -> SubscriptionToken {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            id,
            kind,
            handler,
            enabled: AtomicBool::new(true),
            active: ReentrantMutex::new(()),
        });
        self.registry.subscriptions.write().push(subscription);
        SubscriptionToken(id)
    }
}
