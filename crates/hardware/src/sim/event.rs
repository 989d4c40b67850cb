//! Stand-in for the discrete-event simulation kernel.
//!
//! Everything above this module — the memory interface, the core
//! scheduler — only ever sees [`SimTransport`](crate::sim::event::SimTransport):
//! schedule a value to be delivered at a future cycle, then ask what's
//! due. [`EventQueue`](crate::sim::event::EventQueue) is the one
//! implementation, a single-threaded min-heap keyed by cycle;
//! swapping in a real multi-component DES kernel later means
//! implementing this trait again, not touching C8/C9.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::memory::request::OpKind;

/// A value due to be delivered to a hart at some future cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// The hart this event resolves an in-flight op for.
    pub hart: u32,
    /// The value to deliver (a memory response, a completed `ToNative`
    /// byte count, ...).
    pub value: u64,
    /// Which op this event completes; the scheduler checks this against
    /// the hart's in-flight op before delivering.
    pub kind: OpKind,
}

/// Schedules events to fire at a given absolute cycle and drains those
/// whose time has come.
pub trait SimTransport {
    /// Schedules `event` to become due at `at_cycle`.
    fn schedule(&mut self, at_cycle: u64, event: Event);

    /// Removes and returns every event due at or before `now`.
    fn drain_due(&mut self, now: u64) -> Vec<Event>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    at_cycle: Reverse<u64>,
    seq: Reverse<u64>,
    event: OrdEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrdEvent {
    hart: u32,
    value: u64,
    kind: OpKind,
}

/// A single-threaded deterministic event queue: a min-heap over
/// `(at_cycle, insertion order)`, the latter breaking ties so same-cycle
/// events drain in the order they were scheduled.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl EventQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimTransport for EventQueue {
    fn schedule(&mut self, at_cycle: u64, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled {
            at_cycle: Reverse(at_cycle),
            seq: Reverse(seq),
            event: OrdEvent { hart: event.hart, value: event.value, kind: event.kind },
        });
    }

    fn drain_due(&mut self, now: u64) -> Vec<Event> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.at_cycle.0 > now {
                break;
            }
            let Scheduled { event, .. } = self.heap.pop().expect("just peeked");
            due.push(Event { hart: event.hart, value: event.value, kind: event.kind });
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(hart: u32, value: u64) -> Event {
        Event { hart, value, kind: OpKind::Load }
    }

    #[test]
    fn fires_only_once_due_cycle_is_reached() {
        let mut q = EventQueue::new();
        q.schedule(5, load(0, 42));
        assert!(q.drain_due(4).is_empty());
        assert_eq!(q.drain_due(5), vec![load(0, 42)]);
        assert!(q.drain_due(5).is_empty());
    }

    #[test]
    fn same_cycle_events_drain_in_schedule_order() {
        let mut q = EventQueue::new();
        q.schedule(10, load(1, 1));
        q.schedule(10, load(2, 2));
        q.schedule(3, load(3, 3));
        let due = q.drain_due(10);
        assert_eq!(due, vec![load(3, 3), load(1, 1), load(2, 2)]);
    }

    #[test]
    fn drain_is_cumulative_across_calls() {
        let mut q = EventQueue::new();
        q.schedule(1, load(0, 10));
        q.schedule(2, load(0, 20));
        assert_eq!(q.drain_due(1), vec![load(0, 10)]);
        assert_eq!(q.drain_due(2), vec![load(0, 20)]);
    }
}
