use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// How an operation behaves when the queue can't immediately satisfy it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Block until the operation can proceed.
    Wait,
    /// Return immediately. `enqueue` with `NoWait` on a full queue drops
    /// the oldest item rather than rejecting the new one.
    NoWait,
}

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
}

/// A bounded, thread-safe FIFO. `NoWait` enqueue into a full queue drops
/// the oldest element so the most recent message always survives.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        BoundedQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueue `item`. Under `Wait`, blocks until there is room. Under
    /// `NoWait`, never blocks: a full queue drops its oldest item and the
    /// call returns `false` to signal that a drop occurred (the item
    /// itself is still accepted).
    pub fn enqueue(&self, item: T, mode: Mode) -> bool {
        let mut guard = self.inner.lock();
        let mut dropped = false;

        match mode {
            Mode::Wait => {
                while guard.items.len() == guard.capacity {
                    self.not_full.wait(&mut guard);
                }
            }
            Mode::NoWait => {
                if guard.items.len() == guard.capacity {
                    guard.items.pop_front();
                    dropped = true;
                }
            }
        }

        guard.items.push_back(item);
        drop(guard);
        self.not_empty.notify_one();
        !dropped
    }

    /// Dequeue the oldest item. Under `Wait`, blocks until one is
    /// available. Under `NoWait`, returns `None` immediately if empty.
    pub fn dequeue(&self, mode: Mode) -> Option<T> {
        let mut guard = self.inner.lock();

        match mode {
            Mode::Wait => {
                while guard.items.is_empty() {
                    self.not_empty.wait(&mut guard);
                }
            }
            Mode::NoWait => {
                if guard.items.is_empty() {
                    return None;
                }
            }
        }

        let item = guard.items.pop_front();
        drop(guard);
        self.not_full.notify_one();
        item
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let guard = self.inner.lock();
        guard.items.len() == guard.capacity
    }

    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.items.clear();
        drop(guard);
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn enqueue_dequeue_fifo_order() {
        let q = BoundedQueue::new(4);
        for i in 0..4 {
            assert!(q.enqueue(i, Mode::NoWait));
        }
        assert!(q.is_full());
        for i in 0..4 {
            assert_eq!(q.dequeue(Mode::NoWait), Some(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn nowait_enqueue_drops_oldest_when_full() {
        let q = BoundedQueue::new(2);
        assert!(q.enqueue(1, Mode::NoWait));
        assert!(q.enqueue(2, Mode::NoWait));
        assert!(!q.enqueue(3, Mode::NoWait));
        assert_eq!(q.dequeue(Mode::NoWait), Some(2));
        assert_eq!(q.dequeue(Mode::NoWait), Some(3));
        assert_eq!(q.dequeue(Mode::NoWait), None);
    }

    #[test]
    fn nowait_dequeue_on_empty_returns_none() {
        let q: BoundedQueue<u8> = BoundedQueue::new(2);
        assert_eq!(q.dequeue(Mode::NoWait), None);
    }

    #[test]
    fn wait_dequeue_blocks_until_item_arrives() {
        let q = Arc::new(BoundedQueue::new(2));
        let q2 = q.clone();

        let handle = thread::spawn(move || q2.dequeue(Mode::Wait));

        thread::sleep(Duration::from_millis(50));
        q.enqueue(42, Mode::NoWait);

        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn wait_enqueue_blocks_until_room_frees_up() {
        let q = Arc::new(BoundedQueue::new(1));
        assert!(q.enqueue(1, Mode::NoWait));

        let q2 = q.clone();
        let handle = thread::spawn(move || q2.enqueue(2, Mode::Wait));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.dequeue(Mode::NoWait), Some(1));

        handle.join().unwrap();
        assert_eq!(q.dequeue(Mode::NoWait), Some(2));
    }
}
