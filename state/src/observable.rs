//! Observable values with ordered change delivery
//!
//! An [`Observable`] is owned by exactly one writer. Everyone else holds a
//! [`Readable`] view that can read, subscribe and watch, but never write.
//!
//! Delivery is serialized: transitions are queued in the order they are
//! applied and a single deliverer drains the queue, calling observers outside
//! the lock. A transition applied from inside an observer callback (or from
//! another thread while a delivery round is running) is queued behind the
//! current one instead of re-entering the observers.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{error, trace};

type Observer<S> = Arc<dyn Fn(&S) + Send + Sync>;

struct Delivery<S> {
    value: S,
    /// Observers registered when the transition was applied
    recipients: Vec<(u64, Observer<S>)>,
}

struct Inner<S> {
    current: S,
    version: u64,
    observers: Vec<(u64, Observer<S>)>,
    queue: VecDeque<Delivery<S>>,
    delivering: bool,
    next_id: u64,
}

struct Shared<S> {
    inner: Mutex<Inner<S>>,
    sender: watch::Sender<S>,
}

impl<S: Clone + Send + Sync + 'static> Shared<S> {
    fn new(initial: S) -> Self {
        let (sender, _) = watch::channel(initial.clone());
        Self {
            inner: Mutex::new(Inner {
                current: initial,
                version: 0,
                observers: Vec::new(),
                queue: VecDeque::new(),
                delivering: false,
                next_id: 0,
            }),
            sender,
        }
    }

    /// Apply a transition under the lock and queue it for delivery.
    fn apply(&self, inner: &mut Inner<S>, value: S) {
        inner.current = value.clone();
        inner.version += 1;
        self.sender.send_replace(value.clone());
        let recipients = inner.observers.clone();
        inner.queue.push_back(Delivery { value, recipients });
    }

    fn subscribe(self: &Arc<Self>, observer: Observer<S>) -> Subscription {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push((id, observer.clone()));
            let value = inner.current.clone();
            inner.queue.push_back(Delivery {
                value,
                recipients: vec![(id, observer)],
            });
            id
        };
        self.drain();

        let owner: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;
        Subscription {
            id,
            owner: Some(owner),
        }
    }

    fn is_registered(&self, id: u64) -> bool {
        self.inner.lock().observers.iter().any(|(oid, _)| *oid == id)
    }

    /// Deliver queued transitions unless another caller is already doing so.
    fn drain(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.delivering {
                return;
            }
            inner.delivering = true;
        }
        let _guard = DeliveryGuard { shared: self };

        loop {
            let delivery = {
                let mut inner = self.inner.lock();
                match inner.queue.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        inner.delivering = false;
                        return;
                    }
                }
            };

            for (id, observer) in delivery.recipients {
                if self.is_registered(id) {
                    observer(&delivery.value);
                }
            }
        }
    }
}

/// Releases the delivery slot if an observer panics mid-round.
struct DeliveryGuard<'a, S> {
    shared: &'a Shared<S>,
}

impl<S> Drop for DeliveryGuard<'_, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("Observer panicked during delivery");
            self.shared.inner.lock().delivering = false;
        }
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<S: Send + Sync> Detach for Shared<S> {
    fn detach(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.observers.retain(|(oid, _)| *oid != id);
        trace!("Observer {} detached, {} remaining", id, inner.observers.len());
    }
}

/// Handle keeping an observer registered
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the observer"]
pub struct Subscription {
    id: u64,
    owner: Option<Weak<dyn Detach>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(owner) = self.owner.take().and_then(|weak| weak.upgrade()) {
            owner.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Writable observable value, held by its single owner
pub struct Observable<S> {
    shared: Arc<Shared<S>>,
}

impl<S: Clone + Send + Sync + 'static> Observable<S> {
    pub fn new(initial: S) -> Self {
        Self {
            shared: Arc::new(Shared::new(initial)),
        }
    }

    /// Replace the current value and notify observers
    pub fn set(&self, value: S) {
        {
            let mut inner = self.shared.inner.lock();
            self.shared.apply(&mut inner, value);
        }
        self.shared.drain();
    }

    /// Atomically transition when `f` returns a new value
    ///
    /// Returns whether a transition was applied.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&S) -> Option<S>,
    {
        let applied = {
            let mut inner = self.shared.inner.lock();
            match f(&inner.current) {
                Some(next) => {
                    self.shared.apply(&mut inner, next);
                    true
                }
                None => false,
            }
        };
        if applied {
            self.shared.drain();
        }
        applied
    }

    pub fn get(&self) -> S {
        self.shared.inner.lock().current.clone()
    }

    /// Read-only view for observers
    pub fn reader(&self) -> Readable<S> {
        Readable {
            shared: self.shared.clone(),
        }
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.shared.subscribe(Arc::new(observer))
    }
}

impl<S: Clone + Send + Sync + Default + 'static> Default for Observable<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: fmt::Debug> fmt::Debug for Observable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("current", &self.shared.inner.lock().current)
            .finish()
    }
}

/// Read-only view of an [`Observable`]
pub struct Readable<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Readable<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: Clone + Send + Sync + 'static> Readable<S> {
    pub fn get(&self) -> S {
        self.shared.inner.lock().current.clone()
    }

    /// Number of transitions applied since creation
    pub fn version(&self) -> u64 {
        self.shared.inner.lock().version
    }

    /// Register `observer`; it is called with the current value right away
    /// and then with every transition, in order.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.shared.subscribe(Arc::new(observer))
    }

    /// Async view that only guarantees the latest value
    pub fn watch(&self) -> watch::Receiver<S> {
        self.shared.sender.subscribe()
    }
}

impl<S: fmt::Debug> fmt::Debug for Readable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readable")
            .field("current", &self.shared.inner.lock().current)
            .finish()
    }
}
