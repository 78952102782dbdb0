//! Bounded single-producer single-consumer queue carrying carriage events
//! from a front-end thread into the simulation step.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use thiserror::Error;

/// Maximum number of pending events.
pub const EVENT_QUEUE_CAPACITY: usize = 16;

/// Kind of external event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Move the carriage one encoder step towards needle 0.
    MoveLeft,
    /// Move the carriage one encoder step towards the last needle.
    MoveRight,
    /// Reset the microcontroller.
    Reset,
    /// Toggle protocol tracing.
    ToggleTrace,
}

/// One external event; `value` is carried but not interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Opaque payload.
    pub value: i32,
}

impl Event {
    /// Creates an event with a zero payload.
    #[must_use]
    pub const fn new(kind: EventKind) -> Self {
        Self { kind, value: 0 }
    }
}

impl From<EventKind> for Event {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}

/// Returned when pushing into a full queue; the event is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event queue full, dropped {0:?}")]
pub struct QueueFull(pub Event);

/// Producer half; owned by the front-end thread.
pub struct EventProducer {
    inner: HeapProd<Event>,
}

/// Consumer half; owned by the simulator.
pub struct EventConsumer {
    inner: HeapCons<Event>,
}

/// Creates a queue holding up to [`EVENT_QUEUE_CAPACITY`] events.
#[must_use]
pub fn event_queue() -> (EventProducer, EventConsumer) {
    let (inner_prod, inner_cons) = HeapRb::<Event>::new(EVENT_QUEUE_CAPACITY).split();
    (
        EventProducer { inner: inner_prod },
        EventConsumer { inner: inner_cons },
    )
}

impl EventProducer {
    /// Enqueues `event` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when the queue has no free slot.
    pub fn push(&mut self, event: impl Into<Event>) -> Result<(), QueueFull> {
        self.inner.try_push(event.into()).map_err(QueueFull)
    }

    /// Returns `true` when no further event fits.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

impl EventConsumer {
    /// Dequeues the oldest event, if any.
    pub fn pop(&mut self) -> Option<Event> {
        self.inner.try_pop()
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Returns `true` when no event is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for EventProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProducer")
            .field("occupied", &self.inner.occupied_len())
            .finish()
    }
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("occupied", &self.inner.occupied_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_come_out_in_order() {
        let (mut tx, mut rx) = event_queue();
        tx.push(EventKind::MoveRight).expect("space");
        tx.push(Event {
            kind: EventKind::Reset,
            value: 7,
        })
        .expect("space");
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.pop(), Some(Event::new(EventKind::MoveRight)));
        assert_eq!(
            rx.pop(),
            Some(Event {
                kind: EventKind::Reset,
                value: 7
            })
        );
        assert_eq!(rx.pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn seventeenth_push_is_rejected() {
        let (mut tx, mut rx) = event_queue();
        for _ in 0..EVENT_QUEUE_CAPACITY {
            tx.push(EventKind::MoveLeft).expect("space");
        }
        assert!(tx.is_full());
        assert_eq!(
            tx.push(EventKind::ToggleTrace),
            Err(QueueFull(Event::new(EventKind::ToggleTrace)))
        );
        let drained = std::iter::from_fn(|| rx.pop()).count();
        assert_eq!(drained, EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn halves_work_across_threads() {
        let (mut tx, mut rx) = event_queue();
        let producer = std::thread::spawn(move || {
            let mut sent = 0;
            while sent < 100 {
                if tx.push(EventKind::MoveRight).is_ok() {
                    sent += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });
        let mut received = 0;
        while received < 100 {
            if rx.pop().is_some() {
                received += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().expect("producer thread");
        assert!(rx.is_empty());
    }
}
