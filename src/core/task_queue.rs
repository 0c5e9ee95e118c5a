//! Priority queue of pending task records.
//!
//! Ordering is priority first (Critical > High > Medium > Low), then
//! insertion sequence within a priority. Extraction is readiness aware:
//! [`TaskQueue::pop`] skips records whose dependencies are unmet, so blocked
//! work never holds back ready work behind it.
//!
//! The heap is paired with an id index. Removal by id drops the index entry
//! and leaves a tombstone in the heap; small heaps are rebuilt right away,
//! large ones are compacted once tombstones outnumber live entries.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use parking_lot::Mutex;

use crate::core::task::{DependencyResolver, Priority, TaskId, TaskRecord};
use crate::core::SchedulerError;

/// Heaps at or below this size are rebuilt on removal instead of tombstoned.
pub const REBUILD_THRESHOLD: usize = 64;

/// Heap entry; the record itself lives in the index.
#[derive(Debug, Clone)]
struct HeapEntry {
    priority: Priority,
    seq: u64,
    id: TaskId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; earlier sequence wins within a priority
        // (reversed for max-heap).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    record: TaskRecord,
}

#[derive(Debug)]
struct QueueInner {
    heap: BinaryHeap<HeapEntry>,
    index: HashMap<TaskId, Slot>,
    next_seq: u64,
    tombstones: usize,
    max_size: usize,
}

impl QueueInner {
    fn is_live(&self, entry: &HeapEntry) -> bool {
        self.index.get(&entry.id).is_some_and(|slot| slot.seq == entry.seq)
    }

    fn drop_tombstone(&mut self) {
        self.tombstones = self.tombstones.saturating_sub(1);
    }

    fn after_removal(&mut self) {
        if self.heap.len() <= REBUILD_THRESHOLD {
            self.compact();
        } else {
            self.tombstones += 1;
            if self.tombstones > self.heap.len() / 2 {
                self.compact();
            }
        }
    }

    fn compact(&mut self) {
        let index = &self.index;
        self.heap
            .retain(|e| index.get(&e.id).is_some_and(|slot| slot.seq == e.seq));
        self.tombstones = 0;
    }

    fn remove_slot(&mut self, id: &str) -> Option<TaskRecord> {
        let slot = self.index.remove(id)?;
        self.after_removal();
        Some(slot.record)
    }

    /// Live records sorted in extraction order.
    fn ordered(&self) -> Vec<&Slot> {
        let mut slots: Vec<&Slot> = self.index.values().collect();
        slots.sort_by(|a, b| {
            b.record
                .priority()
                .cmp(&a.record.priority())
                .then_with(|| a.seq.cmp(&b.seq))
        });
        slots
    }
}

/// Concurrency-safe priority queue of pending [`TaskRecord`]s.
///
/// All operations take a single `parking_lot::Mutex`; none of them call out
/// to user code while holding it except the dependency resolver.
#[derive(Debug)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    /// Create a queue holding at most `max_size` records.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::with_capacity(max_size.min(1024)),
                index: HashMap::with_capacity(max_size.min(1024)),
                next_seq: 0,
                tombstones: 0,
                max_size,
            }),
        }
    }

    /// Insert a record.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::QueueFull` when the queue is at its maximum size
    /// - `SchedulerError::Duplicate` when the id is already queued
    pub fn push(&self, record: TaskRecord) -> Result<(), SchedulerError> {
        self.insert(record, true)
    }

    /// Put back a record that already passed admission (a retry or a
    /// deferred dispatch). Ignores the maximum size.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Duplicate` when the id is already queued.
    pub fn requeue(&self, record: TaskRecord) -> Result<(), SchedulerError> {
        self.insert(record, false)
    }

    fn insert(&self, record: TaskRecord, enforce_capacity: bool) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        if enforce_capacity && inner.index.len() >= inner.max_size {
            return Err(SchedulerError::QueueFull(format!(
                "max queue size {} reached",
                inner.max_size
            )));
        }
        if inner.index.contains_key(record.id()) {
            return Err(SchedulerError::Duplicate(record.id().to_string()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let id = record.id().to_string();
        inner.heap.push(HeapEntry {
            priority: record.priority(),
            seq,
            id: id.clone(),
        });
        inner.index.insert(id, Slot { seq, record });
        Ok(())
    }

    /// Extract the highest-priority record that is ready according to
    /// `resolver`. Blocked records stay queued in their original position.
    pub fn pop(&self, resolver: &(impl DependencyResolver + ?Sized)) -> Option<TaskRecord> {
        let mut inner = self.inner.lock();
        let mut skipped = Vec::new();
        let found = loop {
            let Some(entry) = inner.heap.pop() else {
                break None;
            };
            if !inner.is_live(&entry) {
                inner.drop_tombstone();
                continue;
            }
            let ready = inner
                .index
                .get(&entry.id)
                .is_some_and(|slot| slot.record.is_ready(resolver));
            if ready {
                break inner.index.remove(&entry.id).map(|slot| slot.record);
            }
            skipped.push(entry);
        };
        inner.heap.extend(skipped);
        found
    }

    /// Remove a record by id, wherever it sits. Returns the record.
    pub fn take(&self, id: &str) -> Option<TaskRecord> {
        self.inner.lock().remove_slot(id)
    }

    /// Remove a record by id. Returns whether it was queued.
    pub fn remove(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    /// Highest-priority queued record, ready or not, without removing it.
    #[must_use]
    pub fn peek_highest_pending(&self) -> Option<TaskRecord> {
        let mut inner = self.inner.lock();
        while let Some(top) = inner.heap.peek() {
            if inner.is_live(top) {
                let id = top.id.clone();
                return inner.index.get(&id).map(|slot| slot.record.clone());
            }
            inner.heap.pop();
            inner.drop_tombstone();
        }
        None
    }

    /// Up to `limit` ready records in extraction order, left in place.
    #[must_use]
    pub fn ready_in_order(
        &self,
        resolver: &(impl DependencyResolver + ?Sized),
        limit: usize,
    ) -> Vec<TaskRecord> {
        self.ready_in_order_where(resolver, limit, |_| true)
    }

    /// Up to `limit` ready records accepted by `accept`, in extraction
    /// order, left in place.
    ///
    /// Walks the heap the way [`TaskQueue::pop`] does and stops as soon as
    /// `limit` records are found, so the cost is `O(k log n)` in the number
    /// of entries visited rather than a sort of the whole queue.
    pub fn ready_in_order_where(
        &self,
        resolver: &(impl DependencyResolver + ?Sized),
        limit: usize,
        accept: impl Fn(&TaskRecord) -> bool,
    ) -> Vec<TaskRecord> {
        let mut ready = Vec::new();
        if limit == 0 {
            return ready;
        }
        let mut inner = self.inner.lock();
        let mut visited = Vec::new();
        while ready.len() < limit {
            let Some(entry) = inner.heap.pop() else {
                break;
            };
            if !inner.is_live(&entry) {
                inner.drop_tombstone();
                continue;
            }
            if let Some(slot) = inner.index.get(&entry.id) {
                if slot.record.is_ready(resolver) && accept(&slot.record) {
                    ready.push(slot.record.clone());
                }
            }
            visited.push(entry);
        }
        inner.heap.extend(visited);
        ready
    }

    /// Every queued record in extraction order.
    #[must_use]
    pub fn pending_in_order(&self) -> Vec<TaskRecord> {
        let inner = self.inner.lock();
        inner
            .ordered()
            .into_iter()
            .map(|slot| slot.record.clone())
            .collect()
    }

    /// Queued records whose dependencies are not met.
    #[must_use]
    pub fn blocked(&self, resolver: &(impl DependencyResolver + ?Sized)) -> Vec<TaskRecord> {
        let inner = self.inner.lock();
        inner
            .ordered()
            .into_iter()
            .filter(|slot| !slot.record.dependencies_met(resolver))
            .map(|slot| slot.record.clone())
            .collect()
    }

    /// Whether `id` is queued.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().index.contains_key(id)
    }

    /// Number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().index.is_empty()
    }

    /// Configured maximum size.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    /// Change the maximum size. Records already queued are kept.
    pub fn set_max_size(&self, max_size: usize) {
        self.inner.lock().max_size = max_size;
    }

    /// Heap slots held by removed records awaiting compaction.
    #[must_use]
    pub fn tombstones(&self) -> usize {
        self.inner.lock().tombstones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{TaskConfig, TaskStatus, TaskType};

    type Statuses = HashMap<TaskId, TaskStatus>;

    fn record(id: &str, priority: Priority) -> TaskRecord {
        TaskRecord::new(TaskConfig::new(id, id, TaskType::Development).with_priority(priority))
    }

    fn pop_id(q: &TaskQueue, statuses: &Statuses) -> Option<String> {
        q.pop(statuses).map(|r| r.id().to_string())
    }

    #[test]
    fn test_priority_ordering() {
        let q = TaskQueue::new(100);
        let none = Statuses::new();
        q.push(record("low", Priority::Low)).unwrap();
        q.push(record("crit", Priority::Critical)).unwrap();
        q.push(record("med", Priority::Medium)).unwrap();

        assert_eq!(pop_id(&q, &none).as_deref(), Some("crit"));
        assert_eq!(pop_id(&q, &none).as_deref(), Some("med"));
        assert_eq!(pop_id(&q, &none).as_deref(), Some("low"));
        assert!(q.pop(&none).is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let q = TaskQueue::new(100);
        let none = Statuses::new();
        q.push(record("a", Priority::Critical)).unwrap();
        q.push(record("b", Priority::Critical)).unwrap();
        assert_eq!(pop_id(&q, &none).as_deref(), Some("a"));
        assert_eq!(pop_id(&q, &none).as_deref(), Some("b"));
    }

    #[test]
    fn test_capacity_and_duplicates() {
        let q = TaskQueue::new(2);
        q.push(record("a", Priority::Low)).unwrap();
        assert!(matches!(
            q.push(record("a", Priority::High)),
            Err(SchedulerError::Duplicate(_))
        ));
        q.push(record("b", Priority::Low)).unwrap();
        assert!(matches!(
            q.push(record("c", Priority::Low)),
            Err(SchedulerError::QueueFull(_))
        ));
        assert_eq!(q.len(), 2);

        q.requeue(record("c", Priority::Low)).unwrap();
        assert_eq!(q.len(), 3);
        assert!(q.requeue(record("c", Priority::Low)).is_err());
    }

    #[test]
    fn test_blocked_record_does_not_block_ready_ones() {
        let q = TaskQueue::new(10);
        let blocked = TaskRecord::new(
            TaskConfig::new("child", "child", TaskType::Testing)
                .with_priority(Priority::Critical)
                .with_dependency("parent"),
        );
        q.push(blocked).unwrap();
        q.push(record("other", Priority::Low)).unwrap();

        let mut statuses = Statuses::new();
        assert_eq!(pop_id(&q, &statuses).as_deref(), Some("other"));
        assert!(q.pop(&statuses).is_none());
        assert_eq!(q.blocked(&statuses).len(), 1);
        assert_eq!(
            q.peek_highest_pending().map(|r| r.id().to_string()).as_deref(),
            Some("child")
        );

        statuses.insert("parent".into(), TaskStatus::Completed);
        assert_eq!(pop_id(&q, &statuses).as_deref(), Some("child"));
    }

    #[test]
    fn test_remove_small_queue_rebuilds() {
        let q = TaskQueue::new(10);
        let none = Statuses::new();
        q.push(record("a", Priority::High)).unwrap();
        q.push(record("b", Priority::Low)).unwrap();
        assert!(q.remove("a"));
        assert!(!q.remove("a"));
        assert!(!q.contains("a"));
        assert_eq!(q.tombstones(), 0);
        assert_eq!(pop_id(&q, &none).as_deref(), Some("b"));
    }

    #[test]
    fn test_remove_large_queue_uses_tombstones() {
        let total = REBUILD_THRESHOLD * 3;
        let q = TaskQueue::new(total);
        let none = Statuses::new();
        for i in 0..total {
            q.push(record(&format!("t{i:04}"), Priority::Medium)).unwrap();
        }
        assert!(q.remove("t0000"));
        assert!(q.remove("t0001"));
        assert_eq!(q.tombstones(), 2);
        assert_eq!(q.len(), total - 2);

        assert_eq!(pop_id(&q, &none).as_deref(), Some("t0002"));

        for i in 3..total {
            q.remove(&format!("t{i:04}"));
        }
        assert!(q.is_empty());
        assert!(q.pop(&none).is_none());
    }

    #[test]
    fn test_ready_in_order_respects_limit() {
        let q = TaskQueue::new(10);
        let none = Statuses::new();
        q.push(record("a", Priority::Low)).unwrap();
        q.push(record("b", Priority::High)).unwrap();
        q.push(record("c", Priority::Medium)).unwrap();

        let ids: Vec<String> = q
            .ready_in_order(&none, 2)
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pending_in_order().len(), 3);
    }

    #[test]
    fn test_ready_scan_leaves_heap_intact() {
        let total = REBUILD_THRESHOLD * 2;
        let q = TaskQueue::new(total);
        let none = Statuses::new();
        for i in 0..total {
            let priority = if i % 2 == 0 { Priority::Low } else { Priority::High };
            q.push(record(&format!("t{i:04}"), priority)).unwrap();
        }
        q.remove("t0001");
        assert_eq!(q.tombstones(), 1);

        let ids: Vec<String> = q
            .ready_in_order_where(&none, 2, |r| r.id() != "t0003")
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["t0005".to_string(), "t0007".to_string()]);
        assert_eq!(q.tombstones(), 0);
        assert!(q.ready_in_order(&none, 0).is_empty());

        // Every visited entry went back into the heap.
        assert_eq!(pop_id(&q, &none).as_deref(), Some("t0003"));
        assert_eq!(q.len(), total - 2);
    }
}
