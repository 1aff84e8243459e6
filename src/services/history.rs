//! Bounded FIFO history of position estimates
//!
//! The only shared mutable state of the pipeline. Eviction of the oldest
//! entry and insertion of the new one happen inside one critical section, and
//! snapshots are copied under the same lock, so readers never observe a torn
//! sequence.

use crate::domain::types::PositionEstimate;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

/// Default number of estimates kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Point-in-time copy of the history, oldest first
#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    pub history: Vec<PositionEstimate>,
    pub count: usize,
}

pub struct HistoryBuffer {
    entries: Mutex<VecDeque<PositionEstimate>>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create a buffer holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    /// Append an estimate, evicting the oldest entry when full.
    /// Returns the size after the append.
    pub fn append(&self, estimate: PositionEstimate) -> usize {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(estimate);
        entries.len()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        let entries = self.entries.lock();
        let history: Vec<PositionEstimate> = entries.iter().cloned().collect();
        let count = history.len();
        HistorySnapshot { history, count }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::thread;

    fn estimate(seq: usize) -> PositionEstimate {
        PositionEstimate { lat: seq as f64, lon: 0.0, timestamp: Utc::now(), aps_count: 1 }
    }

    #[test]
    fn test_append_returns_size() {
        let buffer = HistoryBuffer::new(3);
        assert_eq!(buffer.append(estimate(0)), 1);
        assert_eq!(buffer.append(estimate(1)), 2);
        assert_eq!(buffer.append(estimate(2)), 3);
        assert_eq!(buffer.append(estimate(3)), 3);
    }

    #[test]
    fn test_fifo_eviction_keeps_last_hundred_in_order() {
        let buffer = HistoryBuffer::default();
        for seq in 0..150 {
            buffer.append(estimate(seq));
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.count, 100);
        let seqs: Vec<usize> = snapshot.history.iter().map(|e| e.lat as usize).collect();
        assert_eq!(seqs, (50..150).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let buffer = HistoryBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.append(estimate(1));
        buffer.append(estimate(2));
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.history[0].lat, 2.0);
    }

    #[test]
    fn test_concurrent_appends_not_lost() {
        let buffer = Arc::new(HistoryBuffer::new(1000));
        let mut handles = vec![];

        for t in 0..8 {
            let b = buffer.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    b.append(estimate(t * 100 + i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.count, 800);
        let mut seqs: Vec<usize> = snapshot.history.iter().map(|e| e.lat as usize).collect();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 800);
    }

    #[test]
    fn test_snapshot_during_appends_is_consistent() {
        let buffer = Arc::new(HistoryBuffer::new(10));
        let writer = {
            let b = buffer.clone();
            thread::spawn(move || {
                for seq in 0..5000 {
                    b.append(estimate(seq));
                }
            })
        };

        for _ in 0..500 {
            let snapshot = buffer.snapshot();
            assert_eq!(snapshot.count, snapshot.history.len());
            assert!(snapshot.count <= 10);
            // Single writer: entries must be consecutive sequence numbers
            for pair in snapshot.history.windows(2) {
                assert_eq!(pair[1].lat as usize, pair[0].lat as usize + 1);
            }
        }

        writer.join().unwrap();
        assert_eq!(buffer.len(), 10);
    }
}
