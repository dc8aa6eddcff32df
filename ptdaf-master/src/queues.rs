//! Work queue set and round-robin cursor

use ptdaf_common::{Error, QueueName, Result};

/// Fixed, ordered list of work queues with a rotating cursor
#[derive(Debug, Clone)]
pub struct QueueSet {
    names: Vec<QueueName>,
    /// Index of the queue that received the last round-robin message
    last_queue_index: usize,
}

impl QueueSet {
    /// `WorkQueue1..=WorkQueueN`; the first round-robin message goes to `WorkQueue1`
    pub fn new(count: usize) -> Result<Self> {
        let last = count
            .checked_sub(1)
            .ok_or_else(|| Error::Config("At least one work queue is required".to_string()))?;
        Self::with_cursor(count, last)
    }

    /// Queue set whose cursor starts at `last_queue_index`
    pub fn with_cursor(count: usize, last_queue_index: usize) -> Result<Self> {
        if last_queue_index >= count {
            return Err(Error::Config(format!(
                "Cursor {} out of range for {} queues",
                last_queue_index, count
            )));
        }

        Ok(Self {
            names: (0..count).map(QueueName::work_queue).collect(),
            last_queue_index,
        })
    }

    pub fn names(&self) -> &[QueueName] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&QueueName> {
        self.names.get(index)
    }

    pub fn position(&self, name: &QueueName) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Advance the cursor and return the queue it now points at
    pub fn next_round_robin(&mut self) -> QueueName {
        self.next_round_robin_within(self.names.len())
    }

    /// Round-robin restricted to the first `limit` queues.
    ///
    /// The cursor is shared with the unrestricted rotation; once it moves
    /// past the last queue in range, the next message wraps to the first.
    pub fn next_round_robin_within(&mut self, limit: usize) -> QueueName {
        let limit = limit.clamp(1, self.names.len());
        self.last_queue_index = if self.last_queue_index + 1 >= limit {
            0
        } else {
            self.last_queue_index + 1
        };
        self.names[self.last_queue_index].clone()
    }

    /// The first `count` queues
    pub fn leading(&self, count: usize) -> &[QueueName] {
        &self.names[..count.min(self.names.len())]
    }
}
