//! Bounded in-memory history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{HistoryError, Item, Sequence, window};

/// A ring buffer of recent items for one channel or client.
///
/// The buffer has its own lock; it is never held while acquiring another.
#[derive(Debug)]
pub struct Buffer {
    inner: Mutex<Ring>,
}

#[derive(Debug)]
struct Ring {
    items: VecDeque<Item>,
    capacity: usize,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                items: VecDeque::with_capacity(capacity.min(64)),
                capacity,
            }),
        }
    }

    /// Append an item, evicting the oldest when full. A zero capacity
    /// buffer records nothing.
    pub fn add(&self, item: Item) {
        let mut ring = self.inner.lock();
        if ring.capacity == 0 {
            return;
        }
        while ring.items.len() >= ring.capacity {
            ring.items.pop_front();
        }
        ring.items.push_back(item);
    }

    /// Change the capacity, dropping the oldest items if it shrank.
    pub fn resize(&self, capacity: usize) {
        let mut ring = self.inner.lock();
        ring.capacity = capacity;
        while ring.items.len() > capacity {
            ring.items.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every item matching `predicate`, returning how many went.
    pub fn delete<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Item) -> bool,
    {
        let mut ring = self.inner.lock();
        let before = ring.items.len();
        ring.items.retain(|item| !predicate(item));
        before - ring.items.len()
    }

    pub fn select(
        &self,
        correspondent: &str,
        cutoff: Option<DateTime<Utc>>,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<Item> {
        let matching: Vec<Item> = {
            let ring = self.inner.lock();
            ring.items
                .iter()
                .filter(|item| correspondent.is_empty() || item.correspondent == correspondent)
                .cloned()
                .collect()
        };
        window(matching, cutoff, after, before, limit)
    }

    /// A sequence over this buffer. An empty correspondent selects every
    /// item.
    pub fn make_sequence(
        self: &Arc<Self>,
        correspondent: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Box<dyn Sequence> {
        Box::new(BufferSequence {
            buffer: Arc::clone(self),
            correspondent: correspondent.to_string(),
            cutoff,
        })
    }
}

struct BufferSequence {
    buffer: Arc<Buffer>,
    correspondent: String,
    cutoff: Option<DateTime<Utc>>,
}

#[async_trait]
impl Sequence for BufferSequence {
    async fn between(
        &self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Item>, HistoryError> {
        Ok(self
            .buffer
            .select(&self.correspondent, self.cutoff, after, before, limit))
    }

    fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::test_item;

    #[test]
    fn evicts_oldest() {
        let buffer = Buffer::new(2);
        buffer.add(test_item("a", 1, "alice", ""));
        buffer.add(test_item("b", 2, "alice", ""));
        buffer.add(test_item("c", 3, "alice", ""));
        let ids: Vec<_> = buffer
            .select("", None, None, None, 10)
            .into_iter()
            .map(|i| i.msgid)
            .collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn resize_shrinks_and_grows() {
        let buffer = Buffer::new(4);
        for i in 0..4 {
            buffer.add(test_item(&format!("m{i}"), i, "alice", ""));
        }
        buffer.resize(1);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.capacity(), 1);
        buffer.resize(3);
        buffer.add(test_item("n", 10, "alice", ""));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let buffer = Buffer::new(0);
        buffer.add(test_item("a", 1, "alice", ""));
        assert!(buffer.is_empty());
    }

    #[test]
    fn delete_counts_matches() {
        let buffer = Buffer::new(8);
        buffer.add(test_item("a", 1, "alice", ""));
        buffer.add(test_item("b", 2, "bob", ""));
        buffer.add(test_item("c", 3, "alice", ""));
        assert_eq!(buffer.delete(|i| i.account_name == "alice"), 2);
        assert_eq!(buffer.delete(|i| i.account_name == "alice"), 0);
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn sequence_filters_correspondent_and_cutoff() {
        let buffer = Arc::new(Buffer::new(8));
        buffer.add(test_item("a", 10, "alice", "bob"));
        buffer.add(test_item("b", 20, "alice", "carol"));
        buffer.add(test_item("c", 30, "alice", "bob"));

        let seq = buffer.make_sequence("bob", DateTime::from_timestamp(15, 0));
        let items = seq.latest(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].msgid, "c");

        let everything = buffer.make_sequence("", None);
        assert_eq!(everything.latest(10).await.unwrap().len(), 3);
        assert!(everything.cutoff().is_none());
    }
}
