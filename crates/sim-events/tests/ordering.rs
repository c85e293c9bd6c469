//! Ordering properties of the event list under arbitrary workloads.

use proptest::prelude::*;
use sim_events::{Event, EventList, Owner, Process};

fn drain(list: &mut EventList) -> Vec<(u64, u32)> {
    std::iter::from_fn(|| list.pop())
        .map(|(_, e)| (e.time, e.priority))
        .collect()
}

proptest! {
    /// Popped events come out sorted by (time, priority); equal keys keep
    /// insertion order.
    #[test]
    fn pop_order_is_sorted(entries in prop::collection::vec((0u64..1000, 0u32..4), 0..200)) {
        let mut list = EventList::new();
        for &(time, priority) in &entries {
            list.push(Event::with_priority(
                time,
                priority,
                Process::new(Owner::Named("e".into()), "m", vec![]),
            ));
        }
        let popped = drain(&mut list);

        let mut expected = entries.clone();
        expected.sort_by_key(|&(time, priority)| (time, priority));
        // Stable sort preserves insertion order among ties, which is exactly
        // the FIFO tiebreak the queue promises.
        prop_assert_eq!(popped, expected);
    }

    /// Rescheduling an arbitrary subset leaves the queue sorted and sized
    /// correctly, and every reschedule target time is honored.
    #[test]
    fn reschedule_keeps_heap_consistent(
        times in prop::collection::vec(0u64..1000, 1..100),
        moves in prop::collection::vec((0usize..100, 0u64..1000), 0..50),
    ) {
        let mut list = EventList::new();
        let ids: Vec<_> = times
            .iter()
            .map(|&t| {
                list.push(Event::new(
                    t,
                    Process::new(Owner::Named("e".into()), "m", vec![]),
                ))
            })
            .collect();
        let mut final_times = times.clone();
        for &(slot, target) in &moves {
            let slot = slot % ids.len();
            prop_assert!(list.update_time(ids[slot], target));
            final_times[slot] = target;
        }

        prop_assert_eq!(list.len(), times.len());
        let popped: Vec<_> = drain(&mut list).into_iter().map(|(t, _)| t).collect();
        let mut expected = final_times;
        expected.sort_unstable();
        prop_assert_eq!(popped, expected);
    }
}
