use futures::Stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::event::Event;
use crate::cores::host::Target;
use crate::models::Finding;

pub const DEFAULT_BACKLOG: usize = 4096;

/// Ordered, multi-producer multi-consumer event channel.
///
/// Every published event lands in a bounded backlog (oldest dropped first) and
/// is broadcast to live subscribers. A new subscriber first receives the
/// backlog, then live events, so nothing published before a consumer attached
/// is lost unless the backlog overflowed.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    capacity: usize,
    state: Mutex<BusState>,
}

struct BusState {
    backlog: VecDeque<Event>,
    live: Option<broadcast::Sender<Event>>,
    next_seq: u64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                capacity,
                state: Mutex::new(BusState {
                    backlog: VecDeque::with_capacity(capacity.min(1024)),
                    live: Some(tx),
                    next_seq: 0,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event. Events published after `close` are discarded.
    pub fn publish(&self, mut event: Event) {
        let mut state = self.lock();
        let Some(live) = state.live.clone() else {
            debug!(message = %event.message, "event bus closed; dropping event");
            return;
        };
        event.seq = state.next_seq;
        state.next_seq += 1;
        if state.backlog.len() == self.inner.capacity {
            state.backlog.pop_front();
        }
        state.backlog.push_back(event.clone());
        debug!(
            seq = event.seq,
            kind = ?event.kind,
            target = event.target.as_deref().unwrap_or("-"),
            "{}",
            event.message
        );
        // No receivers is fine: the backlog still holds the event.
        let _ = live.send(event);
    }

    pub fn log(&self, target: Option<&Target>, message: impl Into<String>) {
        let event = Event::log(message);
        match target {
            Some(t) => self.publish(event.for_target(t)),
            None => self.publish(event),
        }
    }

    pub fn finding(&self, finding: &Finding) {
        self.publish(Event::finding(finding));
    }

    /// Attach a consumer. Backlog snapshot and live subscription are taken under
    /// the same lock so no event is seen twice or skipped.
    pub fn subscribe(&self) -> EventStream {
        let state = self.lock();
        EventStream {
            pending: state.backlog.clone(),
            live: state.live.as_ref().map(|tx| tx.subscribe()),
        }
    }

    /// Stop accepting events. Subscribers drain what they have and then end.
    pub fn close(&self) {
        self.lock().live.take();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().live.is_none()
    }

    pub fn published(&self) -> u64 {
        self.lock().next_seq
    }
}

pub struct EventStream {
    pending: VecDeque<Event>,
    live: Option<broadcast::Receiver<Event>>,
}

impl EventStream {
    /// Next event, or `None` once the bus is closed and drained.
    pub async fn next(&mut self) -> Option<Event> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        let rx = self.live.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged; oldest events dropped");
                }
                Err(RecvError::Closed) => {
                    self.live = None;
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self, |mut events| async move {
            events.next().await.map(|event| (event, events))
        })
    }
}
