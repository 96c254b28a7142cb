//! Byte-budgeted FIFO of lines waiting for a connection.

use std::mem;

/// Ordered buffer of undelivered lines with a running byte counter.
///
/// Each queued line is charged its UTF-8 length plus one byte for the record
/// separator.
#[derive(Debug)]
pub struct MessageQueue {
    lines: Vec<String>,
    size: usize,
    overflow_limit: usize,
}

/// Outcome of a single [`MessageQueue::enqueue`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// The line is waiting in the queue.
    Held,
    /// The byte budget was reached; the returned snapshot (ending with the
    /// line just pushed) must be handed to the overflow sink. The queue is
    /// empty afterwards.
    Overflowed(Vec<String>),
}

impl MessageQueue {
    pub fn new(overflow_limit: usize) -> Self {
        Self {
            lines: Vec::new(),
            size: 0,
            overflow_limit,
        }
    }

    /// Byte cost charged for `line`.
    pub fn cost(line: &str) -> usize {
        line.len() + 1
    }

    /// Append `line`, spilling the whole queue when the budget is reached.
    pub fn enqueue(&mut self, line: String) -> Enqueued {
        self.size += Self::cost(&line);
        self.lines.push(line);
        if self.size >= self.overflow_limit {
            Enqueued::Overflowed(self.take())
        } else {
            Enqueued::Held
        }
    }

    /// Remove and return every queued line in FIFO order.
    pub fn take(&mut self) -> Vec<String> {
        self.size = 0;
        mem::take(&mut self.lines)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Current byte counter.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}
