// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bidirectional client/server mailbox for in-process tasks
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + threaded integration tests (tests/)
//!
//! One server task drains a shared request queue; every registered client owns a reply queue
//! the server routes responses into by [`ClientId`]. Messages move through the queues by value
//! inside an [`Envelope`]; a failed send always hands the message back to the caller.
//!
//! PUBLIC API:
//!   - Mailbox: registry + request/respond protocol
//!   - BlockingQueue trait: queue primitive the protocol runs on
//!   - HostQueue / InlineQueue: threaded and deterministic queue backends
//!   - ClientHandle, send_msg_wait_response, send_msg_no_wait: client conveniences
//!   - MailboxConfig: TOML-backed construction parameters
//!   - MailboxError: protocol error taxonomy
//!
//! DEPENDENCIES:
//!   - parking_lot: registry lock, queue mutex/condvar
//!   - thiserror: error derives
//!   - log: protocol tracing
//!   - serde + toml: configuration

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod cli;
mod client;
mod config;
mod envelope;
mod host;
mod inline;
mod mailbox;
mod queue;

pub use client::{send_msg_no_wait, send_msg_wait_response, ClientHandle};
pub use config::{ConfigError, MailboxConfig, CONFIG_ENV};
pub use envelope::{ClientId, Envelope, Origin};
pub use host::HostQueue;
pub use inline::InlineQueue;
pub use mailbox::{ClientState, ClientStats, Mailbox, RequestError, RequestTimeouts, Undelivered};
pub use queue::{BlockingQueue, PendError, PostError, Wait};

/// Result type returned by mailbox operations.
pub type Result<T> = core::result::Result<T, MailboxError>;

/// Errors produced by the mailbox protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    /// A bounded wait for a message expired.
    #[error("wait timed out")]
    Timeout,
    /// The target queue stayed full for the whole send budget.
    #[error("queue full")]
    QueueFull,
    /// The operation could not progress without suspending the caller.
    #[error("operation would block")]
    WouldBlock,
    /// No queue is registered for the identifier.
    #[error("unknown client id {0}")]
    UnknownClientId(ClientId),
    /// A queue is already registered for the identifier.
    #[error("client id {0} already registered")]
    DuplicateClientId(ClientId),
    /// The registry holds its maximum number of clients.
    #[error("client registry full ({max} clients)")]
    RegistryFull {
        /// Configured registry bound.
        max: usize,
    },
    /// The client already has a request awaiting its reply.
    #[error("client id {0} already has a request in flight")]
    RequestInFlight(ClientId),
    /// A queue or registry was configured with zero capacity.
    #[error("capacity must be at least 1")]
    InvalidCapacity,
}

impl From<PendError> for MailboxError {
    fn from(err: PendError) -> Self {
        match err {
            PendError::Timeout => Self::Timeout,
            PendError::WouldBlock => Self::WouldBlock,
        }
    }
}
