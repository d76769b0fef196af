//! Ordered, suspendable buffer of pending change records.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::warn;

use crate::record::ChangeRecord;

/// Nesting depth of suspend calls. Commit proceeds only at zero.
#[derive(Debug, Default)]
pub struct SuspendCounter(AtomicUsize);

impl SuspendCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new depth.
    pub fn suspend(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement and return the new depth. Saturates at zero.
    pub fn resume(&self) -> usize {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(n) => n - 1,
            Err(_) => {
                warn!("resume called without matching suspend");
                0
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        self.depth() > 0
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// FIFO of change records owned by one session's pipeline.
///
/// Mutated only by [`ModificationQueue::push`] and the atomic take-all
/// [`ModificationQueue::drain`], so records pushed during a commit pass wait
/// for the next one.
///
/// Suspending and draining serialize on the record lock: once `suspend`
/// returns, no drain can take a record pushed after it.
#[derive(Debug, Default)]
pub struct ModificationQueue {
    records: Mutex<VecDeque<ChangeRecord>>,
    next_sequence: AtomicU64,
    suspend: SuspendCounter,
}

impl ModificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, stamping it with the next sequence number.
    pub fn push(&self, mut record: ChangeRecord) -> u64 {
        let mut records = self.records.lock();
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        record.assign_sequence(sequence);
        records.push_back(record);
        sequence
    }

    /// Take every queued record, leaving the queue empty. Takes nothing
    /// while suspended.
    pub fn drain(&self) -> Vec<ChangeRecord> {
        let mut records = self.records.lock();
        if self.suspend.is_suspended() {
            return Vec::new();
        }
        std::mem::take(&mut *records).into()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Discard every queued record. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut records = self.records.lock();
        let dropped = records.len();
        records.clear();
        dropped
    }

    pub fn suspend(&self) -> usize {
        let _records = self.records.lock();
        self.suspend.suspend()
    }

    pub fn resume(&self) -> usize {
        let _records = self.records.lock();
        self.suspend.resume()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend.is_suspended()
    }

    pub fn suspend_depth(&self) -> usize {
        self.suspend.depth()
    }

    /// Clear records and the suspend counter.
    pub fn reset(&self) -> usize {
        let mut records = self.records.lock();
        self.suspend.reset();
        let dropped = records.len();
        records.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_assigns_increasing_sequence() {
        let queue = ModificationQueue::new();
        let a = queue.push(ChangeRecord::delete("cn=a,dc=test"));
        let b = queue.push(ChangeRecord::delete("cn=b,dc=test"));
        assert!(b > a);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].sequence(), Some(a));
        assert_eq!(drained[1].dn(), "cn=b,dc=test");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_suspend_nesting() {
        let counter = SuspendCounter::new();
        assert_eq!(counter.suspend(), 1);
        assert_eq!(counter.suspend(), 2);
        assert_eq!(counter.resume(), 1);
        assert!(counter.is_suspended());
        assert_eq!(counter.resume(), 0);
        assert!(!counter.is_suspended());
    }

    #[test]
    fn test_unbalanced_resume_saturates() {
        let counter = SuspendCounter::new();
        assert_eq!(counter.resume(), 0);
        assert_eq!(counter.depth(), 0);
    }

    #[test]
    fn test_drain_takes_nothing_while_suspended() {
        let queue = ModificationQueue::new();
        queue.push(ChangeRecord::delete("cn=a,dc=test"));
        queue.suspend();
        queue.push(ChangeRecord::delete("cn=b,dc=test"));

        assert!(queue.drain().is_empty());
        assert_eq!(queue.len(), 2);

        queue.resume();
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].dn(), "cn=b,dc=test");
    }

    #[test]
    fn test_reset_clears_records_and_depth() {
        let queue = ModificationQueue::new();
        queue.suspend();
        queue.push(ChangeRecord::delete("cn=a,dc=test"));
        assert_eq!(queue.reset(), 1);
        assert!(!queue.is_suspended());
        assert!(queue.is_empty());
    }
}
