// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Thread-backed blocking queue for host builds
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - struct HostQueue: bounded FIFO parking real threads on full/empty
//!
//! SECURITY INVARIANTS:
//!   - No unsafe code
//!   - Items are moved in and out; never cloned
//!   - Length never exceeds the capacity fixed at creation
//!
//! ERROR CONDITIONS:
//!   - PostError::Full / PendError::Timeout: bounded wait expired
//!   - PostError::WouldBlock / PendError::WouldBlock: non-blocking attempt made no progress
//!
//! DEPENDENCIES:
//!   - parking_lot::{Mutex, Condvar}: queue state and wakeups

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::queue::{BlockingQueue, PendError, PostError, Wait};

/// Longest single bounded wait; larger timeouts are clamped to it.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Bounded FIFO that parks the calling thread while it cannot make progress.
pub struct HostQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> HostQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: capacity.get(),
            items: Mutex::new(VecDeque::with_capacity(capacity.get())),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }
}

/// Deadline `timeout` from now, clamped to [`MAX_WAIT`] so it always exists.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_WAIT)).unwrap_or(now)
}

/// Parks on `condvar` while `blocked` holds. Returns `false` if the wait budget ran out first.
fn park_while<T>(
    guard: &mut MutexGuard<'_, VecDeque<T>>,
    condvar: &Condvar,
    wait: Wait,
    blocked: impl Fn(&VecDeque<T>) -> bool,
) -> bool {
    match wait {
        Wait::NonBlocking => !blocked(&**guard),
        Wait::Blocking => {
            while blocked(&**guard) {
                condvar.wait(guard);
            }
            true
        }
        Wait::Timeout(timeout) => {
            let deadline = deadline_after(timeout);
            while blocked(&**guard) {
                if condvar.wait_until(guard, deadline).timed_out() {
                    return !blocked(&**guard);
                }
            }
            true
        }
    }
}

impl<T: Send> BlockingQueue<T> for HostQueue<T> {
    fn create(capacity: NonZeroUsize) -> Self {
        Self::new(capacity)
    }

    fn post(&self, item: T, wait: Wait) -> Result<(), PostError<T>> {
        let capacity = self.capacity;
        let mut items = self.items.lock();
        if !park_while(&mut items, &self.not_full, wait, |q| q.len() >= capacity) {
            return Err(if wait.is_non_blocking() {
                PostError::WouldBlock(item)
            } else {
                PostError::Full(item)
            });
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    fn pend(&self, wait: Wait) -> Result<T, PendError> {
        let mut items = self.items.lock();
        if !park_while(&mut items, &self.not_empty, wait, |q| q.is_empty()) {
            return Err(if wait.is_non_blocking() {
                PendError::WouldBlock
            } else {
                PendError::Timeout
            });
        }
        let Some(item) = items.pop_front() else {
            return Err(PendError::WouldBlock);
        };
        drop(items);
        self.not_full.notify_one();
        Ok(item)
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
