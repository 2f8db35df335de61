//! Typed in-process pub/sub used to fan engine events out to any number of
//! listeners (renderers, status indicators, toasts).

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus<E>: Send + Sync {
    fn subscribe(&self, topic: &'static str) -> Subscription<E>;
    /// Returns how many subscribers received the event; zero is not an error.
    fn publish(&self, topic: &'static str, event: E) -> usize;
}

/// Receiving half of a topic. Lagging listeners skip ahead to the newest
/// events instead of failing.
pub struct Subscription<E> {
    topic: &'static str,
    rx: broadcast::Receiver<E>,
}

impl<E: Clone> Subscription<E> {
    pub fn topic(&self) -> &'static str {
        self.topic
    }

    pub async fn recv(&mut self) -> BusResult<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Ok(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "sync.bus", topic = self.topic, skipped, "listener lagged; dropping stale events");
                }
                Err(RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drains everything currently buffered.
    pub fn drain(&mut self) -> Vec<E> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self)(event)
    }
}

/// Runs `listener` for every event on the subscription until the bus closes.
pub fn spawn_listener<E, L>(mut subscription: Subscription<E>, listener: L) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
    L: Listener<E> + 'static,
{
    tokio::spawn(async move {
        while let Ok(event) = subscription.recv().await {
            listener.on_event(&event);
        }
    })
}

/// Broadcast-backed bus with one channel per topic.
pub struct LocalBus<E> {
    topics: RwLock<HashMap<&'static str, broadcast::Sender<E>>>,
    capacity: usize,
}

impl<E: Clone> LocalBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender_for(&self, topic: &'static str) -> broadcast::Sender<E> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        self.topics
            .write()
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl<E: Clone> Default for LocalBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Bus<E> for LocalBus<E>
where
    E: Clone + Send + 'static,
{
    fn subscribe(&self, topic: &'static str) -> Subscription<E> {
        Subscription {
            topic,
            rx: self.sender_for(topic).subscribe(),
        }
    }

    fn publish(&self, topic: &'static str, event: E) -> usize {
        self.sender_for(topic).send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Duration;

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus: LocalBus<u32> = LocalBus::new();
        let mut sub = bus.subscribe("aeri.state");
        assert_eq!(bus.publish("aeri.state", 7), 1);
        assert_eq!(sub.recv().await, Ok(7));
        assert_eq!(sub.topic(), "aeri.state");
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus: LocalBus<&'static str> = LocalBus::new();
        assert_eq!(bus.publish("aeri.notice", "nobody listening"), 0);
    }

    #[test]
    fn topics_are_isolated() {
        let bus: LocalBus<u32> = LocalBus::new();
        let mut state = bus.subscribe("aeri.state");
        let mut link = bus.subscribe("aeri.connectivity");
        bus.publish("aeri.connectivity", 1);
        assert_eq!(state.try_recv(), None);
        assert_eq!(link.try_recv(), Some(1));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newest() {
        let bus: LocalBus<u32> = LocalBus::with_capacity(2);
        let mut sub = bus.subscribe("aeri.state");
        for value in 1..=5 {
            bus.publish("aeri.state", value);
        }
        assert_eq!(sub.recv().await, Ok(4));
        assert_eq!(sub.drain(), vec![5]);
    }

    #[tokio::test]
    async fn spawned_listener_sees_events() {
        let bus: Arc<LocalBus<u32>> = Arc::new(LocalBus::new());
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let _task = {
            let seen = seen.clone();
            spawn_listener(bus.subscribe("aeri.state"), move |value: &u32| {
                seen.lock().unwrap().push(*value);
            })
        };

        bus.publish("aeri.state", 10);
        bus.publish("aeri.state", 11);

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener timeout");
        assert_eq!(seen.lock().unwrap().as_slice(), [10, 11]);
    }
}
