//! The in-process message bus.
//!
//! `emit` dispatches to every handler registered for the message's topic.
//! Handlers run asynchronously; per-topic delivery is FIFO with respect
//! to the emitting producer because each
//! topic's handlers are invoked from behind that topic's own
//! `tokio::sync::Mutex`-guarded queue rather than a single global lock —
//! unrelated topics are never serialized against each other.
//!
//! A handler that returns an error is logged and does not block or
//! cancel delivery to the other handlers on the same topic.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::envelope::Message;

/// A boxed async handler invoked with the raw [`Message`] it was
/// delivered for.
pub type Handler = Arc<
    dyn Fn(Message) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync,
>;

/// An opaque id returned by [`MessageBus::subscribe`], used to
/// unsubscribe a specific handler later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct TopicState {
    handlers: Vec<(SubscriptionId, Handler)>,
    /// Serializes delivery for this topic so handlers invoked by the
    /// same producer observe FIFO order without a global lock.
    delivery_lock: Arc<Mutex<()>>,
}

impl Default for TopicState {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            delivery_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// In-process pub/sub bus.
#[derive(Clone, Default)]
pub struct MessageBus {
    topics: Arc<std::sync::Mutex<HashMap<String, TopicState>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `topic`. Returns an id usable with
    /// [`MessageBus::unsubscribe`].
    pub fn subscribe(&self, topic: impl Into<String>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        self.topics
            .lock()
            .unwrap()
            .entry(topic.into())
            .or_default()
            .handlers
            .push((id, handler));
        id
    }

    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        if let Some(state) = self.topics.lock().unwrap().get_mut(topic) {
            state.handlers.retain(|(h, _)| *h != id);
        }
    }

    /// Dispatch `message` to every handler registered for its topic, in
    /// registration order. Errors from individual handlers are logged and
    /// do not stop delivery to the rest.
    pub async fn emit(&self, message: impl Into<Message>) {
        let message = message.into();
        let topic = message.topic().to_string();
        let (handlers, delivery_lock) = {
            let topics = self.topics.lock().unwrap();
            match topics.get(&topic) {
                Some(state) => (state.handlers.clone(), Arc::clone(&state.delivery_lock)),
                None => {
                    debug!(%topic, "no subscribers for topic");
                    return;
                }
            }
        };

        // Serialize delivery for this topic only: unrelated topics run
        // concurrently, this topic's messages are delivered in emission
        // order.
        let _guard = delivery_lock.lock().await;
        for (_, handler) in handlers {
            if let Err(err) = handler(message.clone()).await {
                warn!(%topic, error = %err, "message bus handler failed");
            }
        }
    }

    /// Wait for the next message on `topic` matching `predicate`, then
    /// automatically unsubscribe — used by callers awaiting one specific
    /// `ActionDone` rather than driving the general subscriber list.
    ///
    /// Modeled as a single-use channel rather than a flag-checking
    /// handler (see the "Event-bus handler lifecycles" design note):
    /// the handler sends at most once, and unsubscribes itself in the
    /// same call that sends, so a second matching message arriving
    /// concurrently can never be delivered to a handler that already
    /// fired.
    pub async fn wait_for<F>(&self, topic: impl Into<String>, predicate: F) -> Message
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let topic = topic.into();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        let bus = self.clone();
        let topic_for_handler = topic.clone();
        let id_cell: Arc<std::sync::Mutex<Option<SubscriptionId>>> = Arc::new(std::sync::Mutex::new(None));
        let id_cell_for_handler = Arc::clone(&id_cell);
        let handler: Handler = Arc::new(move |msg| {
            let matched = predicate(&msg);
            let tx = Arc::clone(&tx);
            let bus = bus.clone();
            let topic = topic_for_handler.clone();
            let id_cell = Arc::clone(&id_cell_for_handler);
            Box::pin(async move {
                if matched {
                    if let Some(sender) = tx.lock().unwrap().take() {
                        let _ = sender.send(msg);
                        if let Some(id) = *id_cell.lock().unwrap() {
                            bus.unsubscribe(&topic, id);
                        }
                    }
                }
                Ok(())
            })
        });
        let id = self.subscribe(topic, handler);
        *id_cell.lock().unwrap() = Some(id);
        rx.await.expect("wait_for sender dropped without sending")
    }

    /// Number of handlers currently registered for `topic`.
    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|s| s.handlers.len())
            .unwrap_or(0)
    }
}

impl Clone for TopicState {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            delivery_lock: Arc::clone(&self.delivery_lock),
        }
    }
}
