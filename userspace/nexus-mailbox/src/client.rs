// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client-side conveniences over [`Mailbox`].

use std::time::Duration;

use crate::envelope::{ClientId, Envelope, Origin};
use crate::mailbox::{
    ClientState, ClientStats, Mailbox, RequestError, RequestTimeouts, Undelivered,
};
use crate::queue::BlockingQueue;
use crate::Result;

/// Sends `message` to the server and waits for the reply, routing by `message.origin()`.
pub fn send_msg_wait_response<M, Q>(
    mailbox: &Mailbox<M, Q>,
    message: M,
    timeouts: RequestTimeouts,
) -> core::result::Result<M, RequestError<M>>
where
    M: Origin + Send,
    Q: BlockingQueue<Envelope<M>>,
{
    let id = message.origin();
    mailbox.client_request(id, message, timeouts)
}

/// Sends `message` to the server without waiting for a reply, routing by `message.origin()`.
pub fn send_msg_no_wait<M, Q>(
    mailbox: &Mailbox<M, Q>,
    message: M,
) -> core::result::Result<(), Undelivered<M>>
where
    M: Origin + Send,
    Q: BlockingQueue<Envelope<M>>,
{
    let id = message.origin();
    mailbox.client_request_no_wait(id, message)
}

/// A registered client id bound to its mailbox.
///
/// Obtained from [`Mailbox::client`]; uses the mailbox's default timeouts.
pub struct ClientHandle<'a, M, Q> {
    mailbox: &'a Mailbox<M, Q>,
    id: ClientId,
}

impl<M, Q> Mailbox<M, Q>
where
    M: Send,
    Q: BlockingQueue<Envelope<M>>,
{
    /// Returns a handle for the registered client `id`.
    pub fn client(&self, id: ClientId) -> Result<ClientHandle<'_, M, Q>> {
        self.client_state(id)?;
        Ok(ClientHandle { mailbox: self, id })
    }
}

impl<M, Q> ClientHandle<'_, M, Q>
where
    M: Send,
    Q: BlockingQueue<Envelope<M>>,
{
    /// The bound client id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Request with the mailbox's default timeouts.
    pub fn request(&self, message: M) -> core::result::Result<M, RequestError<M>> {
        self.request_with(message, self.mailbox.default_timeouts())
    }

    /// Request with explicit timeouts.
    pub fn request_with(
        &self,
        message: M,
        timeouts: RequestTimeouts,
    ) -> core::result::Result<M, RequestError<M>> {
        self.mailbox.client_request(self.id, message, timeouts)
    }

    /// Fire-and-forget request.
    pub fn request_no_wait(&self, message: M) -> core::result::Result<(), Undelivered<M>> {
        self.mailbox.client_request_no_wait(self.id, message)
    }

    /// Waits for the next reply using the default reply timeout.
    pub fn await_response(&self) -> Result<M> {
        self.await_response_for(self.mailbox.default_timeouts().reply)
    }

    /// Waits up to `timeout` for the next reply.
    pub fn await_response_for(&self, timeout: Duration) -> Result<M> {
        self.mailbox.client_await_response(self.id, timeout)
    }

    /// Protocol state of the bound client.
    pub fn state(&self) -> Result<ClientState> {
        self.mailbox.client_state(self.id)
    }

    /// Counters of the bound client.
    pub fn stats(&self) -> Result<ClientStats> {
        self.mailbox.client_stats(self.id)
    }
}
