use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::cancel::StopFlag;

/// Reorders items completed out of sequence.
///
/// `pop_timeout` only ever releases the entry keyed by `next_expected`, so
/// consumers observe strictly increasing keys with no gaps. Pushes wait while
/// `capacity` entries are pending unless the pushed key is the one the
/// consumer is waiting on.
pub struct OrderedQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
    space: Condvar,
    capacity: usize,
}

struct QueueState<T> {
    pending: BTreeMap<u64, T>,
    next_expected: u64,
    closed: bool,
}

impl<T> OrderedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: BTreeMap::new(),
                next_expected: 0,
                closed: false,
            }),
            ready: Condvar::new(),
            space: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when the item was dropped because the queue closed or
    /// `stop` was raised while waiting for space.
    pub fn push(&self, sequence: u64, item: T, stop: &StopFlag, poll: Duration) -> bool {
        let mut state = self.lock();
        loop {
            if state.closed || stop.is_stopped() {
                return false;
            }
            if sequence < state.next_expected {
                // already delivered
                return true;
            }
            if sequence == state.next_expected || state.pending.len() < self.capacity {
                state.pending.entry(sequence).or_insert(item);
                if sequence == state.next_expected {
                    self.ready.notify_all();
                }
                return true;
            }
            state = self
                .space
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<(u64, T)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let key = state.next_expected;
            if let Some(item) = state.pending.remove(&key) {
                state.next_expected = key + 1;
                self.space.notify_all();
                return Some((key, item));
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn next_expected(&self) -> u64 {
        self.lock().next_expected
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Wakes every waiter and drops whatever is still pending.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.pending.clear();
        self.ready.notify_all();
        self.space.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn releases_in_key_order() {
        let queue = OrderedQueue::new(8);
        let stop = StopFlag::new();
        for key in [2u64, 0, 3, 1] {
            assert!(queue.push(key, key * 10, &stop, POLL));
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.pop_timeout(POLL)).collect();
        assert_eq!(drained, vec![(0, 0), (1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    fn holds_back_until_gap_is_filled() {
        let queue = OrderedQueue::new(8);
        let stop = StopFlag::new();
        queue.push(1, "b", &stop, POLL);
        assert!(queue.pop_timeout(POLL).is_none());
        queue.push(0, "a", &stop, POLL);
        assert_eq!(queue.pop_timeout(POLL), Some((0, "a")));
        assert_eq!(queue.pop_timeout(POLL), Some((1, "b")));
        assert_eq!(queue.next_expected(), 2);
    }

    #[test]
    fn full_queue_still_admits_next_expected() {
        let queue = OrderedQueue::new(2);
        let stop = StopFlag::new();
        queue.push(1, 1, &stop, POLL);
        queue.push(2, 2, &stop, POLL);
        assert_eq!(queue.pending(), 2);
        assert!(queue.push(0, 0, &stop, POLL));
        assert_eq!(queue.pop_timeout(POLL), Some((0, 0)));
    }

    #[test]
    fn full_queue_blocks_until_space() {
        let queue = Arc::new(OrderedQueue::new(1));
        let stop = StopFlag::new();
        queue.push(1, 1, &stop, POLL);

        let producer = {
            let queue = Arc::clone(&queue);
            let stop = stop.clone();
            thread::spawn(move || queue.push(2, 2, &stop, POLL))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.pending(), 1);

        queue.push(0, 0, &stop, POLL);
        assert_eq!(queue.pop_timeout(POLL), Some((0, 0)));
        assert_eq!(queue.pop_timeout(POLL), Some((1, 1)));
        assert!(producer.join().unwrap());
        assert_eq!(queue.pop_timeout(Duration::from_secs(1)), Some((2, 2)));
    }

    #[test]
    fn stop_releases_blocked_producer() {
        let queue = Arc::new(OrderedQueue::new(1));
        let stop = StopFlag::new();
        queue.push(1, 1, &stop, POLL);
        let producer = {
            let queue = Arc::clone(&queue);
            let stop = stop.clone();
            thread::spawn(move || queue.push(2, 2, &stop, POLL))
        };
        stop.stop();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn close_drops_pending() {
        let queue = OrderedQueue::new(4);
        let stop = StopFlag::new();
        queue.push(0, 0, &stop, POLL);
        queue.close();
        assert!(queue.pop_timeout(POLL).is_none());
        assert!(!queue.push(1, 1, &stop, POLL));
    }
}
