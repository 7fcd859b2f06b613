// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Deterministic single-task queue backend
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! [`InlineQueue`] never suspends the caller. A wait that cannot complete immediately fails on
//! the spot: bounded waits report what they would have reported at the deadline
//! ([`PostError::Full`], [`PendError::Timeout`]) and indefinite or non-blocking waits report
//! `WouldBlock`. Every such failure is counted in [`InlineQueue::stalls`], so tests can assert
//! exactly how often the protocol would have parked a task.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use parking_lot::Mutex;

use crate::queue::{BlockingQueue, PendError, PostError, Wait};

/// Bounded FIFO whose waits resolve immediately.
pub struct InlineQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    items: VecDeque<T>,
    stalls: u64,
}

impl<T> InlineQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: capacity.get(),
            inner: Mutex::new(Inner { items: VecDeque::with_capacity(capacity.get()), stalls: 0 }),
        }
    }

    /// Number of posts and pends that would have suspended the caller.
    pub fn stalls(&self) -> u64 {
        self.inner.lock().stalls
    }
}

impl<T: Send> BlockingQueue<T> for InlineQueue<T> {
    fn create(capacity: NonZeroUsize) -> Self {
        Self::new(capacity)
    }

    fn post(&self, item: T, wait: Wait) -> Result<(), PostError<T>> {
        let mut inner = self.inner.lock();
        if inner.items.len() >= self.capacity {
            inner.stalls = inner.stalls.saturating_add(1);
            return Err(match wait {
                Wait::Timeout(_) => PostError::Full(item),
                Wait::Blocking | Wait::NonBlocking => PostError::WouldBlock(item),
            });
        }
        inner.items.push_back(item);
        Ok(())
    }

    fn pend(&self, wait: Wait) -> Result<T, PendError> {
        let mut inner = self.inner.lock();
        match inner.items.pop_front() {
            Some(item) => Ok(item),
            None => {
                inner.stalls = inner.stalls.saturating_add(1);
                Err(match wait {
                    Wait::Timeout(_) => PendError::Timeout,
                    Wait::Blocking | Wait::NonBlocking => PendError::WouldBlock,
                })
            }
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
