// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed-capacity blocking queue contract consumed by the mailbox
//! OWNERS: @runtime
//!
//! The protocol never synchronizes on its own: every cross-task hand-off goes through a
//! [`BlockingQueue`]. Implementations must make `post` and `pend` individually atomic and safe
//! for many producers with a single consumer.

use core::fmt;
use core::num::NonZeroUsize;
use core::time::Duration;

use crate::MailboxError;

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

/// A post that did not reach the queue. The rejected item travels back to the caller.
#[derive(PartialEq, Eq)]
pub enum PostError<T> {
    /// The queue stayed full until the wait budget ran out.
    Full(T),
    /// The queue was full and the caller (or backend) could not suspend.
    WouldBlock(T),
}

impl<T> PostError<T> {
    /// Returns the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::WouldBlock(item) => item,
        }
    }

    /// Mailbox-level classification of the failure.
    pub fn reason(&self) -> MailboxError {
        match self {
            Self::Full(_) => MailboxError::QueueFull,
            Self::WouldBlock(_) => MailboxError::WouldBlock,
        }
    }

    /// Splits the error into its classification and the rejected item.
    pub fn into_parts(self) -> (MailboxError, T) {
        let reason = self.reason();
        (reason, self.into_inner())
    }
}

impl<T> fmt::Debug for PostError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::WouldBlock(_) => f.write_str("WouldBlock(..)"),
        }
    }
}

impl<T> fmt::Display for PostError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "queue full"),
            Self::WouldBlock(_) => write!(f, "post would block"),
        }
    }
}

impl<T> std::error::Error for PostError<T> {}

/// A pend that returned without an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendError {
    /// Nothing arrived before the wait budget ran out.
    Timeout,
    /// The queue was empty and the caller (or backend) could not suspend.
    WouldBlock,
}

impl fmt::Display for PendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "pend timed out"),
            Self::WouldBlock => write!(f, "pend would block"),
        }
    }
}

impl std::error::Error for PendError {}

/// Fixed-capacity FIFO with bounded or indefinite waits on both ends.
pub trait BlockingQueue<T>: Send + Sync {
    /// Allocates an empty queue holding at most `capacity` items.
    fn create(capacity: NonZeroUsize) -> Self
    where
        Self: Sized;

    /// Appends `item`, waiting for space according to `wait`.
    fn post(&self, item: T, wait: Wait) -> Result<(), PostError<T>>;

    /// Removes the oldest item, waiting for one according to `wait`.
    fn pend(&self, wait: Wait) -> Result<T, PendError>;

    /// Number of queued items.
    fn len(&self) -> usize;

    /// Maximum number of queued items.
    fn capacity(&self) -> usize;

    /// Returns `true` when nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when a post would have to wait.
    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}
