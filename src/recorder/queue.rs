// Bounded byte queue between the real-time producer and the writer task
//
// Pushes are all-or-nothing: either the whole slice fits within the timeout
// or nothing is enqueued. Pops return whatever is available, up to a limit.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct ByteQueue {
    capacity: usize,
    buffer: Mutex<VecDeque<u8>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl ByteQueue {
    /// Allocate a queue holding at most `capacity` bytes.
    ///
    /// Returns `None` if the backing storage cannot be reserved.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        let mut buffer = VecDeque::new();
        buffer.try_reserve_exact(capacity).ok()?;

        Some(Self {
            capacity,
            buffer: Mutex::new(buffer),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Enqueue all of `bytes`, waiting up to `timeout` for room.
    ///
    /// Returns `false` if the bytes were not enqueued.
    pub fn push(&self, bytes: &[u8], timeout: Duration) -> bool {
        if bytes.is_empty() {
            return true;
        }
        if bytes.len() > self.capacity {
            return false;
        }

        let deadline = Instant::now() + timeout;
        let mut buffer = self.buffer.lock();

        while self.capacity - buffer.len() < bytes.len() {
            if self.not_full.wait_until(&mut buffer, deadline).timed_out() {
                if self.capacity - buffer.len() < bytes.len() {
                    return false;
                }
                break;
            }
        }

        buffer.extend(bytes);
        drop(buffer);
        self.not_empty.notify_one();
        true
    }

    /// Dequeue up to `max_bytes`, waiting up to `timeout` for anything to arrive.
    ///
    /// May return fewer bytes than requested, or none at all.
    pub fn pop_up_to(&self, max_bytes: usize, timeout: Duration) -> Vec<u8> {
        if max_bytes == 0 {
            return Vec::new();
        }

        let deadline = Instant::now() + timeout;
        let mut buffer = self.buffer.lock();

        while buffer.is_empty() {
            if self.not_empty.wait_until(&mut buffer, deadline).timed_out() {
                break;
            }
        }

        let count = max_bytes.min(buffer.len());
        let bytes: Vec<u8> = buffer.drain(..count).collect();
        drop(buffer);

        if !bytes.is_empty() {
            self.not_full.notify_all();
        }
        bytes
    }

    /// Take everything currently queued without waiting
    pub fn drain_all(&self) -> Vec<u8> {
        let mut buffer = self.buffer.lock();
        let bytes: Vec<u8> = buffer.drain(..).collect();
        drop(buffer);

        if !bytes.is_empty() {
            self.not_full.notify_all();
        }
        bytes
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const NO_WAIT: Duration = Duration::from_millis(0);

    #[test]
    fn test_push_pop_preserves_order() {
        let queue = ByteQueue::with_capacity(16).unwrap();

        assert!(queue.push(&[1, 2, 3], NO_WAIT));
        assert!(queue.push(&[4, 5], NO_WAIT));
        assert_eq!(queue.len(), 5);

        assert_eq!(queue.pop_up_to(4, NO_WAIT), vec![1, 2, 3, 4]);
        assert_eq!(queue.pop_up_to(4, NO_WAIT), vec![5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_fails_when_full() {
        let queue = ByteQueue::with_capacity(4).unwrap();

        assert!(queue.push(&[1, 2, 3], NO_WAIT));
        let start = Instant::now();
        assert!(!queue.push(&[4, 5], Duration::from_millis(20)));
        assert!(start.elapsed() < Duration::from_secs(1));

        // Failed push leaves the queue untouched
        assert_eq!(queue.drain_all(), vec![1, 2, 3]);
    }

    #[test]
    fn test_push_larger_than_capacity_fails_immediately() {
        let queue = ByteQueue::with_capacity(4).unwrap();
        let start = Instant::now();
        assert!(!queue.push(&[0; 5], Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_times_out_empty() {
        let queue = ByteQueue::with_capacity(4).unwrap();
        let start = Instant::now();
        assert!(queue.pop_up_to(4, Duration::from_millis(10)).is_empty());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_blocked_push_completes_after_pop() {
        let queue = Arc::new(ByteQueue::with_capacity(4).unwrap());
        assert!(queue.push(&[1, 2, 3, 4], NO_WAIT));

        let consumer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            consumer.pop_up_to(2, NO_WAIT)
        });

        assert!(queue.push(&[5, 6], Duration::from_secs(2)));
        assert_eq!(handle.join().unwrap(), vec![1, 2]);
        assert_eq!(queue.drain_all(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = Arc::new(ByteQueue::with_capacity(8).unwrap());

        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(&[9, 9], NO_WAIT)
        });

        assert_eq!(queue.pop_up_to(8, Duration::from_secs(2)), vec![9, 9]);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_clear_empties_queue() {
        let queue = ByteQueue::with_capacity(8).unwrap();
        queue.push(&[1, 2, 3], NO_WAIT);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 8);
    }
}
