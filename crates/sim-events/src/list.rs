//! The pending-event priority queue.
//!
//! A binary heap of `(time, priority, insertion_seq)` keys over a slab of
//! event slots. Removal marks the event invalid and leaves the heap entry in
//! place; rescheduling pushes a fresh entry and bumps the slot's sequence so
//! the superseded entry is recognized as stale and dropped when it surfaces.
//! Both are O(1)/O(log n) without disturbing the heap invariant.
//!
//! Ordering contract: strict weak order on `(time, priority, insertion_seq)`
//! with smaller values first, so ties at one timestamp break by priority and
//! then FIFO insertion order. A reschedule re-enters the FIFO order at the
//! tail of its new timestamp.

use crate::event::{Event, SimTime};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Stable handle to a scheduled event, valid until the event is popped.
/// Handles to popped events are recognized as dead (slot generation moved
/// on) and all operations on them are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    time: SimTime,
    priority: u32,
    seq: u64,
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    /// Sequence of the newest heap entry for this slot; older entries are
    /// reschedule residue and get dropped on contact.
    seq: u64,
    event: Option<Event>,
}

#[derive(Debug, Default)]
pub struct EventList {
    heap: BinaryHeap<Reverse<HeapKey>>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_seq: u64,
    live: usize,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled events not yet popped. Invalidated events still
    /// count until they surface and are discarded.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn push(&mut self, event: Event) -> EventId {
        let seq = self.bump_seq();
        let (index, generation) = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.seq = seq;
                slot.event = Some(event);
                (index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    seq,
                    event: Some(event),
                });
                (index, 0)
            }
        };
        let slot = &self.slots[index as usize];
        let event = slot.event.as_ref().expect("just stored");
        self.heap.push(Reverse(HeapKey {
            time: event.time,
            priority: event.priority,
            seq,
            index,
            generation,
        }));
        self.live += 1;
        EventId { index, generation }
    }

    /// The event that `pop` would return next, without removing it. Stale
    /// reschedule residue encountered on the way is discarded, hence the
    /// mutable receiver.
    pub fn peek(&mut self) -> Option<&Event> {
        self.drop_stale_top();
        let key = self.heap.peek()?.0;
        self.slots[key.index as usize].event.as_ref()
    }

    /// Timestamp of the next event, if any.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.peek().map(|event| event.time)
    }

    /// Remove and return the minimum event. Invalidated events are returned
    /// as-is (callers skip them); only reschedule residue is silently
    /// dropped.
    pub fn pop(&mut self) -> Option<(EventId, Event)> {
        self.drop_stale_top();
        let key = self.heap.pop()?.0;
        let slot = &mut self.slots[key.index as usize];
        let event = slot.event.take().expect("fresh heap entry has an event");
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.live -= 1;
        Some((
            EventId {
                index: key.index,
                generation: key.generation,
            },
            event,
        ))
    }

    /// Mark an event invalid so it is discarded when popped. O(1); no-op on
    /// dead handles; idempotent.
    pub fn remove(&mut self, id: EventId) {
        if let Some(event) = self.get_mut(id) {
            event.valid = false;
        }
    }

    /// Reschedule a pending event to a new timestamp. Returns `false` for
    /// dead handles. The caller enforces any lower bound against the current
    /// simulation time.
    pub fn update_time(&mut self, id: EventId, time: SimTime) -> bool {
        let seq = self.bump_seq();
        let Some(slot) = self.slot_mut(id) else {
            return false;
        };
        let Some(event) = slot.event.as_mut() else {
            return false;
        };
        event.time = time;
        slot.seq = seq;
        let priority = event.priority;
        self.heap.push(Reverse(HeapKey {
            time,
            priority,
            seq,
            index: id.index,
            generation: id.generation,
        }));
        true
    }

    /// Look up a pending event by handle.
    pub fn get(&self, id: EventId) -> Option<&Event> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.event.as_ref()
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.get(id).is_some()
    }

    fn get_mut(&mut self, id: EventId) -> Option<&mut Event> {
        self.slot_mut(id)?.event.as_mut()
    }

    fn slot_mut(&mut self, id: EventId) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        Some(slot)
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Discard heap entries superseded by a reschedule or orphaned by a pop.
    fn drop_stale_top(&mut self) {
        while let Some(Reverse(key)) = self.heap.peek() {
            let slot = &self.slots[key.index as usize];
            let fresh =
                slot.generation == key.generation && slot.seq == key.seq && slot.event.is_some();
            if fresh {
                return;
            }
            self.heap.pop();
        }
    }
}
