//! Observable snapshot cells.
//!
//! A [`StateCell`] holds an immutable snapshot behind an `Arc`. Mutations
//! build a new snapshot and swap it in, then call every subscriber
//! synchronously with the new value. Readers holding an older `Arc` keep a
//! consistent view.
//!
//! Snapshots are versioned. Subscribers see versions in increasing order even
//! when mutations race; a snapshot overtaken by a newer one before it could be
//! delivered is skipped. Callbacks may read the cell but must not mutate it or
//! subscribe to it.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: RwLock<Versioned<T>>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
    /// Version last handed to subscribers. Held while callbacks run.
    delivered: Mutex<u64>,
}

struct Versioned<T> {
    version: u64,
    snapshot: Arc<T>,
}

impl<T> Versioned<T> {
    fn replace(&mut self, snapshot: Arc<T>) -> u64 {
        self.version += 1;
        self.snapshot = snapshot;
        self.version
    }
}

pub struct StateCell<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default + Send + Sync + 'static> Default for StateCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Send + Sync + 'static> StateCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(Versioned {
                    version: 0,
                    snapshot: Arc::new(initial),
                }),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                delivered: Mutex::new(0),
            }),
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.inner.value.read().snapshot)
    }

    pub fn set(&self, value: T) {
        let snapshot = Arc::new(value);
        let version = self.inner.value.write().replace(Arc::clone(&snapshot));
        self.notify(version, &snapshot);
    }

    /// Replace the snapshot with `f(current)`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.update_if(|current| (Some(f(current)), ()));
    }

    /// Run `f` against the current snapshot while holding the write lock.
    /// When it returns a new value that value is swapped in and subscribers
    /// are notified; either way its second result is passed back.
    ///
    /// `f` must not touch this cell.
    pub fn update_if<R>(&self, f: impl FnOnce(&T) -> (Option<T>, R)) -> R {
        let mut guard = self.inner.value.write();
        let (next, result) = f(&guard.snapshot);
        let Some(next) = next else {
            return result;
        };
        let snapshot = Arc::new(next);
        let version = guard.replace(Arc::clone(&snapshot));
        drop(guard);

        self.notify(version, &snapshot);
        result
    }

    /// Call `callback` now with the current value and after every mutation.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Unsubscribe<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback<T> = Arc::new(callback);

        let _delivering = self.inner.delivered.lock();
        self.inner
            .subscribers
            .lock()
            .push((id, Arc::clone(&callback)));
        let current = self.get();
        callback(&current);

        Unsubscribe {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn notify(&self, version: u64, snapshot: &Arc<T>) {
        let mut delivered = self.inner.delivered.lock();
        if *delivered >= version {
            return;
        }
        *delivered = version;

        let callbacks: Vec<Callback<T>> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(snapshot);
        }
    }
}

/// Handle returned by [`StateCell::subscribe`].
#[must_use = "dropping the handle keeps the subscription alive; call unsubscribe() to stop it"]
pub struct Unsubscribe<T> {
    inner: Weak<Inner<T>>,
    id: u64,
}

impl<T> Unsubscribe<T> {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
