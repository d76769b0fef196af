//! Category-keyed event bus.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, trace};

use crate::dispatcher::{Dispatcher, EventListener};
use crate::envelope::EventEnvelope;
use crate::event::{DirectoryEvent, EventCategory};

/// One listener bound to one category through a dispatcher.
#[derive(Clone)]
struct Subscription {
    listener: Arc<dyn EventListener>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Subscription {
    fn is_for(&self, listener: &Arc<dyn EventListener>) -> bool {
        same_listener(&self.listener, listener)
    }
}

/// Listener identity is the allocation, not the value.
fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Registry of listener/dispatcher bindings per [`EventCategory`], with
/// per-thread suppression of deliveries.
///
/// The bus is an ordinary value. Share it with `Arc<EventBus>`; a process
/// needing a single bus constructs one at startup and calls
/// [`EventBus::clear`] at teardown.
///
/// Hand-off to dispatchers happens under one bus-wide delivery lock, so two
/// concurrent fires never interleave their deliveries to the same listener.
/// The lock is reentrant: an inline listener may fire further events from
/// its callback.
pub struct EventBus {
    subscriptions: RwLock<HashMap<EventCategory, Vec<Subscription>>>,
    suspended_threads: RwLock<HashSet<ThreadId>>,
    delivery: ReentrantMutex<()>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            suspended_threads: RwLock::new(HashSet::new()),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Bind `listener` to `category` through `dispatcher`.
    ///
    /// Idempotent per (category, listener): if the listener is already
    /// registered for the category the existing binding is kept and `false`
    /// is returned.
    pub fn register(
        &self,
        category: EventCategory,
        listener: Arc<dyn EventListener>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let bindings = subscriptions.entry(category).or_default();
        if bindings.iter().any(|s| s.is_for(&listener)) {
            trace!(%category, "Listener already registered");
            return false;
        }
        debug!(%category, dispatcher = dispatcher.kind(), "Registering listener");
        bindings.push(Subscription {
            listener,
            dispatcher,
        });
        true
    }

    /// Register one listener for several categories with the same dispatcher.
    /// Returns how many new bindings were created.
    pub fn register_all(
        &self,
        categories: &[EventCategory],
        listener: Arc<dyn EventListener>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> usize {
        categories
            .iter()
            .filter(|category| self.register(**category, listener.clone(), dispatcher.clone()))
            .count()
    }

    /// Remove the (category, listener) binding. No-op if absent.
    pub fn unregister(&self, category: EventCategory, listener: &Arc<dyn EventListener>) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let Some(bindings) = subscriptions.get_mut(&category) else {
            return false;
        };
        let before = bindings.len();
        bindings.retain(|s| !s.is_for(listener));
        let removed = bindings.len() != before;
        if bindings.is_empty() {
            subscriptions.remove(&category);
        }
        if removed {
            debug!(%category, "Unregistered listener");
        }
        removed
    }

    /// Remove every binding of `listener`. Returns how many were removed.
    pub fn unregister_all(&self, listener: &Arc<dyn EventListener>) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let mut removed = 0;
        subscriptions.retain(|_, bindings| {
            let before = bindings.len();
            bindings.retain(|s| !s.is_for(listener));
            removed += before - bindings.len();
            !bindings.is_empty()
        });
        removed
    }

    /// Number of listeners bound to `category`.
    #[must_use]
    pub fn listener_count(&self, category: EventCategory) -> usize {
        self.subscriptions
            .read()
            .get(&category)
            .map_or(0, Vec::len)
    }

    /// Fire an event to every listener registered under its category.
    ///
    /// Does nothing when the calling thread is suppressed. Returns the number
    /// of listeners the event was handed to.
    pub fn fire(&self, event: DirectoryEvent) -> usize {
        let category = event.category();
        if self.is_suspended_in_current_thread() {
            trace!(%category, "Event suppressed in current thread");
            return 0;
        }

        let _delivery = self.delivery.lock();
        let targets: Vec<Subscription> = match self.subscriptions.read().get(&category) {
            Some(bindings) => bindings.clone(),
            None => return 0,
        };

        let envelope = Arc::new(EventEnvelope::new(event));
        trace!(
            %category,
            event_id = %envelope.event_id,
            listeners = targets.len(),
            "Firing event"
        );
        for subscription in &targets {
            subscription
                .dispatcher
                .dispatch(subscription.listener.clone(), envelope.clone());
        }
        targets.len()
    }

    /// Suppress every `fire` issued from the calling thread until
    /// [`EventBus::resume_in_current_thread`]. Other threads are unaffected.
    ///
    /// This is a toggle, not a counter. The entry is keyed by thread id and
    /// outlives the thread: a thread that exits while suppressed stays in the
    /// set until [`EventBus::clear`]. Prefer [`EventBus::suspended`], whose
    /// guard always removes the entry it added.
    pub fn suspend_in_current_thread(&self) {
        self.suspended_threads.write().insert(thread::current().id());
    }

    /// Lift suppression for the calling thread.
    pub fn resume_in_current_thread(&self) {
        self.suspended_threads.write().remove(&thread::current().id());
    }

    #[must_use]
    pub fn is_suspended_in_current_thread(&self) -> bool {
        self.suspended_threads
            .read()
            .contains(&thread::current().id())
    }

    /// Number of threads currently suppressed.
    #[must_use]
    pub fn suspended_thread_count(&self) -> usize {
        self.suspended_threads.read().len()
    }

    /// Suppress the calling thread until the returned guard is dropped.
    ///
    /// The guard restores the state found on entry, so nested scopes leave
    /// an outer suppression in place. It must be dropped on the thread that
    /// created it.
    #[must_use = "suppression ends when the guard is dropped"]
    pub fn suspended(&self) -> SuspendGuard<'_> {
        let was_suspended = !self
            .suspended_threads
            .write()
            .insert(thread::current().id());
        SuspendGuard {
            bus: self,
            was_suspended,
        }
    }

    /// Drop every binding and suppression. Used at teardown; affinity loops
    /// whose dispatchers were only held by the bus then run to completion.
    pub fn clear(&self) {
        let _delivery = self.delivery.lock();
        self.subscriptions.write().clear();
        self.suspended_threads.write().clear();
        debug!("Event bus cleared");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscriptions = self.subscriptions.read();
        let counts: HashMap<EventCategory, usize> = subscriptions
            .iter()
            .map(|(category, bindings)| (*category, bindings.len()))
            .collect();
        f.debug_struct("EventBus")
            .field("subscriptions", &counts)
            .field("suspended_threads", &self.suspended_thread_count())
            .finish()
    }
}

/// Scoped suppression returned by [`EventBus::suspended`].
pub struct SuspendGuard<'a> {
    bus: &'a EventBus,
    was_suspended: bool,
}

impl fmt::Debug for SuspendGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendGuard")
            .field("was_suspended", &self.was_suspended)
            .finish()
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if !self.was_suspended {
            self.bus.resume_in_current_thread();
        }
    }
}
