// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client identifiers and the envelope carrying a message through one queue transit.

use core::fmt;

/// Small integer naming one client task within a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u16);

impl ClientId {
    /// Wraps a raw identifier.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Exposes the raw numeric value.
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl From<u16> for ClientId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages that know which client produced them.
///
/// The convenience helpers ([`crate::send_msg_wait_response`], [`crate::send_msg_no_wait`])
/// route by this value; a server typically replies to `request.origin()`.
pub trait Origin {
    /// Identifier of the client owning this message.
    fn origin(&self) -> ClientId;
}

/// Carrier for exactly one message while it sits in a queue.
///
/// Sealing moves the message in; opening moves it back out. Nothing is copied.
#[derive(Debug)]
pub struct Envelope<M> {
    message: M,
}

impl<M> Envelope<M> {
    /// Moves `message` into a new envelope.
    pub fn seal(message: M) -> Self {
        Self { message }
    }

    /// Consumes the envelope and returns the carried message.
    pub fn open(self) -> M {
        self.message
    }
}
