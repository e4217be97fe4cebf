// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded execution queue.

use alloc::collections::VecDeque;
use core::fmt;

use crate::flow_state::FlowStateId;

/// One unit of scheduler work.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueEntry {
    /// Instance to run in.
    pub flow_state: FlowStateId,
    /// Component to run.
    pub component_index: usize,
    /// Re-submission of a waiting component. The debugger neither reports nor gates these.
    pub continuous: bool,
    /// The debugger was told about this entry and expects its removal.
    pub announced: bool,
}

/// Queue errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The queue already holds its capacity.
    Full,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "Execution queue is full"),
        }
    }
}

impl core::error::Error for QueueError {}

/// FIFO of [`QueueEntry`] with a fixed capacity.
#[derive(Clone, Debug)]
pub struct ExecutionQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
}

impl ExecutionQueue {
    /// Creates an empty queue holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of entries.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pending entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry.
    pub fn push(&mut self, entry: QueueEntry) -> Result<(), QueueError> {
        if self.entries.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Oldest entry, without removing it.
    #[inline]
    #[must_use]
    pub fn peek(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Removes and returns the oldest entry.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Drops every entry of `flow_state`, returning how many were removed.
    pub fn remove_flow_state(&mut self, flow_state: FlowStateId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.flow_state != flow_state);
        before - self.entries.len()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Pending entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}
