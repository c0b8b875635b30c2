//! Bounded, recency-ordered message store

use std::collections::VecDeque;

use cord_core::{Message, Snowflake};

/// Most recent messages, oldest first.
///
/// A capacity of `None` or `0` disables storage entirely.
#[derive(Debug, Clone)]
pub struct MessageRing {
    capacity: Option<usize>,
    messages: VecDeque<Message>,
}

impl MessageRing {
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        let capacity = capacity.filter(|&c| c > 0);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity.unwrap_or(0).min(1024)),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity.is_some()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append as most recent, evicting the oldest past capacity.
    ///
    /// Returns the evicted message.
    pub fn push(&mut self, message: Message) -> Option<Message> {
        let capacity = self.capacity?;
        self.messages.push_back(message);
        if self.messages.len() > capacity {
            self.messages.pop_front()
        } else {
            None
        }
    }

    pub fn get(&self, id: Snowflake) -> Option<&Message> {
        // Recent messages are the likely targets
        self.messages.iter().rev().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: Snowflake) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    pub fn remove(&mut self, id: Snowflake) -> Option<Message> {
        let index = self.messages.iter().rposition(|m| m.id == id)?;
        self.messages.remove(index)
    }

    /// Drop every message matching `predicate`, returning them oldest first
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&Message) -> bool) -> Vec<Message> {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.messages.len());
        for message in self.messages.drain(..) {
            if predicate(&message) {
                removed.push(message);
            } else {
                kept.push_back(message);
            }
        }
        self.messages = kept;
        removed
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cord_core::User;

    fn message(id: u64) -> Message {
        let author = User::new(Snowflake::new(7), "author");
        Message::new(Snowflake::new(id), Snowflake::new(100), author, format!("msg {id}"))
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut ring = MessageRing::new(Some(3));
        for id in 1..=3 {
            assert!(ring.push(message(id)).is_none());
        }

        let evicted = ring.push(message(4)).unwrap();
        assert_eq!(evicted.id, Snowflake::new(1));
        assert_eq!(ring.len(), 3);

        let ids: Vec<u64> = ring.iter().map(|m| m.id.get()).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_disabled_ring_stores_nothing() {
        for capacity in [None, Some(0)] {
            let mut ring = MessageRing::new(capacity);
            assert!(!ring.is_enabled());
            assert!(ring.push(message(1)).is_none());
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn test_get_and_remove() {
        let mut ring = MessageRing::new(Some(10));
        ring.push(message(1));
        ring.push(message(2));

        assert_eq!(ring.get(Snowflake::new(2)).map(|m| m.content.as_str()), Some("msg 2"));
        assert!(ring.remove(Snowflake::new(1)).is_some());
        assert!(ring.remove(Snowflake::new(1)).is_none());
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_remove_where_keeps_order() {
        let mut ring = MessageRing::new(Some(10));
        for id in 1..=5 {
            ring.push(message(id));
        }

        let removed = ring.remove_where(|m| m.id.get() % 2 == 0);
        assert_eq!(removed.len(), 2);
        let ids: Vec<u64> = ring.iter().map(|m| m.id.get()).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }
}
