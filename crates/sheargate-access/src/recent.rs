//! Bounded log of recent card events and their decisions.

use serde::{Deserialize, Serialize};
use sheargate_core::{AccessDecision, CardEvent};
use std::collections::VecDeque;

/// A card event together with the decision it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentEvent {
    pub event: CardEvent,
    pub decision: AccessDecision,
}

/// Order in which recent events are returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// FIFO log with a fixed capacity; the oldest entry is evicted first.
///
/// # Examples
///
/// ```
/// use sheargate_access::{EventOrder, RecentEventsLog};
/// use sheargate_core::{AccessDecision, CardEvent, CardId};
///
/// let mut log = RecentEventsLog::new(2);
/// for (seq, id) in ["A1", "B2", "C3"].into_iter().enumerate() {
///     let card = CardId::new(id).unwrap();
///     let decision = AccessDecision::denied(seq as u64, card.clone(), "card not in allow-list");
///     log.push(CardEvent::new(card, Vec::<u8>::new()), decision);
/// }
///
/// let newest = log.snapshot(EventOrder::NewestFirst);
/// assert_eq!(newest[0].event.card_id.as_str(), "C3");
/// assert_eq!(log.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct RecentEventsLog {
    capacity: usize,
    entries: VecDeque<RecentEvent>,
}

impl RecentEventsLog {
    /// Create an empty log. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an entry, returning the evicted one if the log was full.
    pub fn push(&mut self, event: CardEvent, decision: AccessDecision) -> Option<RecentEvent> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(RecentEvent { event, decision });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&RecentEvent> {
        self.entries.back()
    }

    /// Copy of the entries in the requested order.
    pub fn snapshot(&self, order: EventOrder) -> Vec<RecentEvent> {
        match order {
            EventOrder::OldestFirst => self.entries.iter().cloned().collect(),
            EventOrder::NewestFirst => self.entries.iter().rev().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sheargate_core::CardId;

    fn entry(seq: u64) -> (CardEvent, AccessDecision) {
        let card = CardId::new(&format!("C{seq}")).unwrap();
        let decision = AccessDecision::granted(seq, card.clone(), "access granted");
        (CardEvent::new(card, vec![0x01u8]), decision)
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut log = RecentEventsLog::new(3);
        for seq in 0..3 {
            let (event, decision) = entry(seq);
            assert!(log.push(event, decision).is_none());
        }

        let (event, decision) = entry(3);
        let evicted = log.push(event, decision).unwrap();
        assert_eq!(evicted.decision.sequence, 0);

        let oldest: Vec<u64> = log
            .snapshot(EventOrder::OldestFirst)
            .iter()
            .map(|e| e.decision.sequence)
            .collect();
        assert_eq!(oldest, vec![1, 2, 3]);
        assert_eq!(log.latest().unwrap().decision.sequence, 3);
    }

    #[test]
    fn test_default_order_is_newest_first() {
        assert_eq!(EventOrder::default(), EventOrder::NewestFirst);
        assert_eq!(
            serde_json::to_string(&EventOrder::OldestFirst).unwrap(),
            "\"oldest_first\""
        );
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let log = RecentEventsLog::new(0);
        assert_eq!(log.capacity(), 1);
        assert!(log.is_empty());
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(capacity in 1usize..50, pushes in 0u64..200) {
            let mut log = RecentEventsLog::new(capacity);
            for seq in 0..pushes {
                let (event, decision) = entry(seq);
                log.push(event, decision);
                prop_assert!(log.len() <= capacity);
            }

            let kept = log.snapshot(EventOrder::OldestFirst);
            let expected_first = pushes.saturating_sub(capacity as u64);
            prop_assert_eq!(kept.len() as u64, pushes.min(capacity as u64));
            for (offset, item) in kept.iter().enumerate() {
                prop_assert_eq!(item.decision.sequence, expected_first + offset as u64);
            }
        }
    }
}
