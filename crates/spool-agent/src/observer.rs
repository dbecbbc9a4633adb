//! Session notifications for external listeners
//!
//! Listeners run synchronously on the session's task, in registration order.
//! A panicking listener is logged and skipped.

use parking_lot::Mutex;
use spool_ai::{Message, Usage};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use crate::session::SessionStatus;

/// Payload of a completion notification
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCompleted {
    pub task_id: String,
    pub usage: Usage,
}

/// Payload of an abort notification
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAborted {
    pub task_id: String,
    pub reason: String,
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerList<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

impl<T> Default for ListenerList<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

/// Listeners of one notification kind
struct Channel<T> {
    name: &'static str,
    listeners: Arc<Mutex<ListenerList<T>>>,
}

impl<T: 'static> Channel<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Arc::new(Mutex::new(ListenerList::default())),
        }
    }

    fn subscribe(&self, listener: Listener<T>) -> Subscription {
        let id = {
            let mut list = self.listeners.lock();
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, listener));
            id
        };

        let weak: Weak<Mutex<ListenerList<T>>> = Arc::downgrade(&self.listeners);
        Subscription {
            remove: Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    list.lock().entries.retain(|(entry, _)| *entry != id);
                }
            }),
        }
    }

    fn notify(&self, event: &T) {
        // Snapshot so listeners may subscribe or unsubscribe while being called
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(channel = self.name, "session listener panicked");
            }
        }
    }

    fn len(&self) -> usize {
        self.listeners.lock().entries.len()
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            listeners: Arc::clone(&self.listeners),
        }
    }
}

/// Removes a listener when consumed. Dropping it keeps the listener registered.
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    remove: Box<dyn FnOnce() + Send + Sync>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        (self.remove)()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Fan-out of session notifications
#[derive(Clone)]
pub struct ObserverBus {
    message_added: Channel<Message>,
    status_changed: Channel<SessionStatus>,
    task_completed: Channel<TaskCompleted>,
    task_aborted: Channel<TaskAborted>,
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverBus {
    pub fn new() -> Self {
        Self {
            message_added: Channel::new("message_added"),
            status_changed: Channel::new("status_changed"),
            task_completed: Channel::new("task_completed"),
            task_aborted: Channel::new("task_aborted"),
        }
    }

    /// Called for every message appended to the history
    pub fn on_message_added(&self, f: impl Fn(&Message) + Send + Sync + 'static) -> Subscription {
        self.message_added.subscribe(Arc::new(f))
    }

    pub fn on_status_changed(&self, f: impl Fn(&SessionStatus) + Send + Sync + 'static) -> Subscription {
        self.status_changed.subscribe(Arc::new(f))
    }

    pub fn on_task_completed(&self, f: impl Fn(&TaskCompleted) + Send + Sync + 'static) -> Subscription {
        self.task_completed.subscribe(Arc::new(f))
    }

    pub fn on_task_aborted(&self, f: impl Fn(&TaskAborted) + Send + Sync + 'static) -> Subscription {
        self.task_aborted.subscribe(Arc::new(f))
    }

    pub(crate) fn message_added(&self, message: &Message) {
        self.message_added.notify(message);
    }

    pub(crate) fn status_changed(&self, status: SessionStatus) {
        self.status_changed.notify(&status);
    }

    pub(crate) fn task_completed(&self, event: TaskCompleted) {
        self.task_completed.notify(&event);
    }

    pub(crate) fn task_aborted(&self, event: TaskAborted) {
        self.task_aborted.notify(&event);
    }

    /// Total number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.message_added.len()
            + self.status_changed.len()
            + self.task_completed.len()
            + self.task_aborted.len()
    }
}
