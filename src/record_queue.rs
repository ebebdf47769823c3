use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::value::Value;

/// Ordered, unbounded buffer of records waiting to be written.
///
/// Enqueue and drain both run under one short lock, so an enqueue is either
/// entirely part of a drain or entirely deferred to the next one. An enqueue
/// that races with a drain is effectively ordered after it.
///
/// The queue also carries the "closed" flag of its logger. Closing happens
/// under the same lock, so after [`RecordQueue::close`] returns, a final
/// [`RecordQueue::drain`] is guaranteed to see every accepted record.
#[derive(Debug, Default)]
pub struct RecordQueue {
    inner: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    records: VecDeque<Value>,
    closed: bool,
}

/// Returned by [`RecordQueue::enqueue`] once the queue is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closed(pub Value);

impl RecordQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. Never blocks on I/O.
    pub fn enqueue(&self, record: Value) -> Result<(), Closed> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(Closed(record));
        }
        state.records.push_back(record);
        Ok(())
    }

    /// Removes and returns every queued record, oldest first.
    pub fn drain(&self) -> Vec<Value> {
        let mut state = self.inner.lock();
        state.records.drain(..).collect()
    }

    /// Rejects all further enqueues. Already queued records stay drainable.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }
}
