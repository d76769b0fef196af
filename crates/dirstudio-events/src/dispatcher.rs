//! Listener callbacks and the dispatchers that run them.
//!
//! A [`Dispatcher`] decides the execution context of a listener callback:
//!
//! - [`InlineDispatcher`] runs it synchronously on the firing thread.
//! - [`AffinityDispatcher`] queues it for one designated thread (for example
//!   a UI thread) without blocking the firing thread. The designated thread
//!   drives the paired [`AffinityLoop`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::envelope::EventEnvelope;

/// Receives directory events.
pub trait EventListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, envelope: &EventEnvelope);
}

impl<F> EventListener for F
where
    F: Fn(&EventEnvelope) + Send + Sync,
{
    fn on_event(&self, envelope: &EventEnvelope) {
        self(envelope);
    }
}

/// Executes a listener callback in a chosen execution context.
pub trait Dispatcher: Send + Sync {
    /// Hand the event to the listener. Must not block on the listener.
    fn dispatch(&self, listener: Arc<dyn EventListener>, envelope: Arc<EventEnvelope>);

    /// Short name used in logs.
    fn kind(&self) -> &'static str;
}

/// Run a callback, containing a panicking listener so it cannot take down
/// the firing thread or the affinity loop.
fn deliver(listener: &dyn EventListener, envelope: &EventEnvelope) {
    if catch_unwind(AssertUnwindSafe(|| listener.on_event(envelope))).is_err() {
        error!(
            event_id = %envelope.event_id,
            category = %envelope.category,
            "Event listener panicked"
        );
    }
}

/// Runs callbacks synchronously on the firing thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl InlineDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// A shareable handle, ready for [`crate::EventBus::register`].
    #[must_use]
    pub fn shared() -> Arc<dyn Dispatcher> {
        Arc::new(Self)
    }
}

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, listener: Arc<dyn EventListener>, envelope: Arc<EventEnvelope>) {
        deliver(listener.as_ref(), &envelope);
    }

    fn kind(&self) -> &'static str {
        "inline"
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Marshals callbacks onto one designated thread.
///
/// Callbacks are queued in FIFO order, so successive dispatches to the same
/// listener run in dispatch order.
#[derive(Debug, Clone)]
pub struct AffinityDispatcher {
    sender: mpsc::UnboundedSender<Job>,
}

impl AffinityDispatcher {
    /// Create a dispatcher and the loop the designated thread must drive.
    #[must_use]
    pub fn new() -> (Self, AffinityLoop) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, AffinityLoop { receiver })
    }

    /// Create a dispatcher whose loop runs on a dedicated, named OS thread.
    ///
    /// The thread exits once every clone of the dispatcher has been dropped
    /// and the queue is empty; the join handle yields the number of callbacks
    /// it ran.
    pub fn spawn_thread(
        name: impl Into<String>,
    ) -> std::io::Result<(Self, thread::JoinHandle<usize>)> {
        let (dispatcher, event_loop) = Self::new();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || event_loop.run())?;
        Ok((dispatcher, handle))
    }

    /// Whether the paired loop has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl Dispatcher for AffinityDispatcher {
    fn dispatch(&self, listener: Arc<dyn EventListener>, envelope: Arc<EventEnvelope>) {
        let event_id = envelope.event_id;
        let job: Job = Box::new(move || deliver(listener.as_ref(), &envelope));
        if self.sender.send(job).is_err() {
            warn!(event_id = %event_id, "Affinity loop has shut down, dropping event");
        }
    }

    fn kind(&self) -> &'static str {
        "affinity"
    }
}

/// The receiving end of an [`AffinityDispatcher`].
#[derive(Debug)]
pub struct AffinityLoop {
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl AffinityLoop {
    /// Block the current thread, running callbacks until all dispatcher
    /// handles are dropped. Returns the number of callbacks run.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`AffinityLoop::run_async`] there.
    pub fn run(mut self) -> usize {
        let mut executed = 0;
        while let Some(job) = self.receiver.blocking_recv() {
            job();
            executed += 1;
        }
        debug!(executed, "Affinity loop finished");
        executed
    }

    /// Async variant of [`AffinityLoop::run`] for a designated task.
    pub async fn run_async(mut self) -> usize {
        let mut executed = 0;
        while let Some(job) = self.receiver.recv().await {
            job();
            executed += 1;
        }
        debug!(executed, "Affinity loop finished");
        executed
    }

    /// Run every callback queued so far without waiting for more, the way
    /// a host event loop pumps its work queue.
    pub fn run_pending(&mut self) -> usize {
        let mut executed = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            executed += 1;
        }
        executed
    }
}
