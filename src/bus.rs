//! Typed publish/subscribe used by every component that emits events.
//!
//! Handlers run synchronously on the emitting task, in subscription order.
//! Each handler is guarded by an `active` flag that is cleared before the
//! handler leaves the table, so a handler that has been unsubscribed is never
//! called for an event emitted afterwards, even if the emitter already took a
//! snapshot of the table.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    active: Arc<AtomicBool>,
    handler: Handler<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            handler: Arc::clone(&self.handler),
        }
    }
}

struct Table<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T> Table<T> {
    fn remove(&self, id: u64) {
        self.entries.lock().retain(|e| e.id != id);
    }
}

/// A multi-subscriber event channel for events of type `T`.
pub struct EventBus<T> {
    table: Arc<Table<T>>,
}

impl<T: 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Table {
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers a handler and returns the handle that removes it.
    ///
    /// Dropping the returned [`Subscription`] also unsubscribes; call
    /// [`Subscription::detach`] to keep the handler for the bus's lifetime.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.table.entries.lock().push(Entry {
            id,
            active: Arc::clone(&active),
            handler: Arc::new(handler),
        });

        let table: Weak<Table<T>> = Arc::downgrade(&self.table);
        Subscription {
            active,
            remove: Some(Box::new(move || {
                if let Some(table) = table.upgrade() {
                    table.remove(id);
                }
            })),
        }
    }

    /// Delivers `event` to every active handler.
    pub fn emit(&self, event: &T) {
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let entries: Vec<Entry<T>> = self.table.entries.lock().clone();
        for entry in entries {
            if entry.active.load(Ordering::Acquire) {
                (entry.handler)(event);
            }
        }
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.table.entries.lock().len()
    }
}

impl<T: 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    active: Arc<AtomicBool>,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes the handler. It will not see any event emitted after this returns.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    /// Keeps the handler registered for as long as the bus lives.
    pub fn detach(mut self) {
        self.remove = None;
    }

    /// Whether the handler is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn cancel(&mut self) {
        if let Some(remove) = self.remove.take() {
            self.active.store(false, Ordering::Release);
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
