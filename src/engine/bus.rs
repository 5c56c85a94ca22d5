// Fan-out broadcaster for session events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::events::Event;
use crate::config::OBSERVER_QUEUE_CAPACITY;

pub type ObserverId = u64;

/// A live observer channel returned by [`EventBus::subscribe`].
///
/// Dropping it closes the channel; the bus notices on its next publish.
pub struct Subscription {
    id: ObserverId,
    rx: mpsc::Receiver<Arc<Event>>,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next event. `None` once the bus has dropped this observer.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }

    pub fn into_receiver(self) -> mpsc::Receiver<Arc<Event>> {
        self.rx
    }
}

/// Set of connected observers. Cheap to clone; clones share the set.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<Mutex<HashMap<ObserverId, mpsc::Sender<Arc<Event>>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OBSERVER_QUEUE_CAPACITY);
        self.observers.lock().insert(id, tx);
        debug!("observer {} subscribed", id);
        Subscription { id, rx }
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.observers.lock().remove(&id).is_some();
        if removed {
            debug!("observer {} unsubscribed", id);
        }
        removed
    }

    /// Deliver `event` to every open observer and prune the closed ones.
    ///
    /// Sends happen under the observer lock, so two publishes never interleave
    /// at a single observer. Never blocks: an observer whose queue is full
    /// misses this event but stays subscribed. Returns the number of observers
    /// still connected.
    pub fn publish(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let mut observers = self.observers.lock();
        observers.retain(|id, tx| match tx.try_send(Arc::clone(&event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("observer {} is not keeping up, dropping event", id);
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("observer {} closed, pruning", id);
                false
            }
        });
        observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::{EventKind, SessionId};

    #[test]
    fn test_publish_reaches_all_observers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let reached = bus.publish(Event::completed(SessionId::from("s"), "done"));
        assert_eq!(reached, 2);
        assert_eq!(a.try_recv().unwrap().kind(), EventKind::Completed);
        assert_eq!(b.try_recv().unwrap().kind(), EventKind::Completed);
    }

    #[test]
    fn test_dropped_observer_is_pruned_on_publish() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);
        assert_eq!(bus.observer_count(), 2);

        let reached = bus.publish(Event::cancelled(SessionId::from("s"), "stop"));
        assert_eq!(reached, 1);
        assert_eq!(bus.observer_count(), 1);
        drop(keep);
    }

    #[test]
    fn test_full_observer_drops_events_but_stays() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        let overflow = OBSERVER_QUEUE_CAPACITY + 10;
        for i in 0..overflow {
            assert_eq!(bus.publish(Event::completed(SessionId::from("s"), i.to_string())), 2);
            // The fast observer keeps its queue empty.
            assert!(fast.try_recv().is_some());
        }
        assert_eq!(bus.observer_count(), 2);

        let mut backlog = Vec::new();
        while let Some(event) = slow.try_recv() {
            backlog.push(event.summary().unwrap().to_string());
        }
        assert_eq!(backlog.len(), OBSERVER_QUEUE_CAPACITY);
        assert_eq!(backlog.first().map(String::as_str), Some("0"));

        // Once drained it receives again.
        bus.publish(Event::completed(SessionId::from("s"), "after"));
        assert_eq!(slow.try_recv().unwrap().summary(), Some("after"));
    }

    #[test]
    fn test_unsubscribe_twice() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));
    }

    #[test]
    fn test_publish_without_observers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Event::failed(SessionId::from("s"), "x")), 0);
    }
}
