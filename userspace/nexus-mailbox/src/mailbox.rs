// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Request/respond protocol between one server task and registered clients
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (InlineQueue) + tests/protocol.rs (HostQueue, threads)
//!
//! Protocol:
//!   - server: `server_receive` → process → `server_respond(origin, reply)`
//!   - client: `client_request` (post, then await own queue) or `client_request_no_wait`
//!
//! Per-client state: Idle → Requested → (reply | timeout) → Idle. A request whose reply wait
//! expired stays delivered; the eventual reply lands in the client queue and is returned by the
//! next await unless the caller drains it with [`Mailbox::discard_stale`].
//!
//! INVARIANTS:
//!   - Client ids are unique; a registered queue lives as long as the mailbox
//!   - The registry lock is never held across a queue wait
//!   - A message that was not delivered is always handed back to the caller

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::MailboxConfig;
use crate::envelope::{ClientId, Envelope};
use crate::host::HostQueue;
use crate::queue::{BlockingQueue, PostError, Wait};
use crate::{MailboxError, Result};

/// Budgets for the two waits inside [`Mailbox::client_request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestTimeouts {
    /// Longest wait for space on the server queue.
    pub send: Duration,
    /// Longest wait for the reply once the request is delivered.
    pub reply: Duration,
}

impl RequestTimeouts {
    /// Builds budgets from explicit send and reply durations.
    pub const fn new(send: Duration, reply: Duration) -> Self {
        Self { send, reply }
    }

    /// Uses the same budget for both waits.
    pub const fn uniform(timeout: Duration) -> Self {
        Self { send: timeout, reply: timeout }
    }
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_millis(1000))
    }
}

/// Observable protocol state of one client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientState {
    /// No request is awaiting a reply.
    #[default]
    Idle,
    /// A delivered request is awaiting its reply.
    Requested,
}

/// Per-client protocol counters. All counters saturate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Requests delivered by `client_request`.
    pub requests: u64,
    /// Requests delivered by `client_request_no_wait`.
    pub fire_and_forget: u64,
    /// Replies handed to the client.
    pub responded: u64,
    /// Reply waits that expired.
    pub timed_out: u64,
    /// Unread replies dropped through `discard_stale`.
    pub stale_replies: u64,
}

/// A message the mailbox could not deliver, returned to its owner.
pub struct Undelivered<M> {
    reason: MailboxError,
    message: M,
}

impl<M> Undelivered<M> {
    pub(crate) fn new(reason: MailboxError, message: M) -> Self {
        Self { reason, message }
    }

    /// Why delivery failed.
    pub fn reason(&self) -> MailboxError {
        self.reason
    }

    /// Borrows the returned message.
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Takes back ownership of the message.
    pub fn into_message(self) -> M {
        self.message
    }

    /// Splits into the failure reason and the message.
    pub fn into_parts(self) -> (MailboxError, M) {
        (self.reason, self.message)
    }
}

impl<M> From<PostError<Envelope<M>>> for Undelivered<M> {
    fn from(err: PostError<Envelope<M>>) -> Self {
        let (reason, envelope) = err.into_parts();
        Self::new(reason, envelope.open())
    }
}

impl<M> fmt::Debug for Undelivered<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Undelivered").field("reason", &self.reason).finish_non_exhaustive()
    }
}

impl<M> fmt::Display for Undelivered<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message not delivered: {}", self.reason)
    }
}

impl<M> std::error::Error for Undelivered<M> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// Failure of a waited request.
pub enum RequestError<M> {
    /// The request never reached the server; the message is returned.
    NotSent(Undelivered<M>),
    /// The request was delivered but no reply arrived in time. A late reply may still land in
    /// the client queue.
    NoReply(MailboxError),
}

impl<M> RequestError<M> {
    /// Mailbox-level classification of the failure.
    pub fn reason(&self) -> MailboxError {
        match self {
            Self::NotSent(undelivered) => undelivered.reason(),
            Self::NoReply(reason) => *reason,
        }
    }

    /// Returns `true` when the server holds the request but the reply wait expired.
    pub fn is_no_reply(&self) -> bool {
        matches!(self, Self::NoReply(_))
    }

    /// Takes back the request message if it was never delivered.
    pub fn into_message(self) -> Option<M> {
        match self {
            Self::NotSent(undelivered) => Some(undelivered.into_message()),
            Self::NoReply(_) => None,
        }
    }
}

impl<M> From<Undelivered<M>> for RequestError<M> {
    fn from(undelivered: Undelivered<M>) -> Self {
        Self::NotSent(undelivered)
    }
}

impl<M> fmt::Debug for RequestError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSent(undelivered) => f.debug_tuple("NotSent").field(undelivered).finish(),
            Self::NoReply(reason) => f.debug_tuple("NoReply").field(reason).finish(),
        }
    }
}

impl<M> fmt::Display for RequestError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSent(undelivered) => write!(f, "request not sent: {}", undelivered.reason()),
            Self::NoReply(reason) => write!(f, "request delivered but no reply: {reason}"),
        }
    }
}

impl<M> std::error::Error for RequestError<M> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotSent(undelivered) => Some(&undelivered.reason),
            Self::NoReply(reason) => Some(reason),
        }
    }
}

struct ClientSlot<Q> {
    queue: Q,
    status: Mutex<SlotStatus>,
}

#[derive(Default)]
struct SlotStatus {
    state: ClientState,
    stats: ClientStats,
}

impl<Q> ClientSlot<Q> {
    fn new(queue: Q) -> Self {
        Self { queue, status: Mutex::new(SlotStatus::default()) }
    }

    /// Idle → Requested. Only one waited request per client at a time.
    fn claim(&self, id: ClientId) -> Result<()> {
        let mut status = self.status.lock();
        if status.state == ClientState::Requested {
            return Err(MailboxError::RequestInFlight(id));
        }
        status.state = ClientState::Requested;
        Ok(())
    }

    fn release(&self) {
        self.status.lock().state = ClientState::Idle;
    }

    fn record(&self, update: impl FnOnce(&mut ClientStats)) {
        update(&mut self.status.lock().stats);
    }

    fn state(&self) -> ClientState {
        self.status.lock().state
    }

    fn stats(&self) -> ClientStats {
        self.status.lock().stats
    }
}

/// Bidirectional mailbox: one shared server queue plus one reply queue per registered client.
///
/// `Q` is the queue backend; [`HostQueue`] parks real threads, [`crate::InlineQueue`] resolves
/// every wait immediately for deterministic tests.
pub struct Mailbox<M, Q = HostQueue<Envelope<M>>> {
    capacity: NonZeroUsize,
    max_clients: usize,
    timeouts: RequestTimeouts,
    server: Q,
    clients: RwLock<BTreeMap<ClientId, Arc<ClientSlot<Q>>>>,
    _message: PhantomData<fn(M) -> M>,
}

impl<M, Q> Mailbox<M, Q>
where
    M: Send,
    Q: BlockingQueue<Envelope<M>>,
{
    /// Creates a mailbox whose queues hold `capacity` envelopes, other settings default.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_config(&MailboxConfig { capacity, ..MailboxConfig::default() })
    }

    /// Creates a mailbox from a full configuration.
    pub fn with_config(config: &MailboxConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.capacity).ok_or(MailboxError::InvalidCapacity)?;
        if config.max_clients == 0 {
            return Err(MailboxError::InvalidCapacity);
        }
        debug!("mailbox: created (capacity={capacity}, max_clients={})", config.max_clients);
        Ok(Self {
            capacity,
            max_clients: config.max_clients,
            timeouts: config.timeouts(),
            server: Q::create(capacity),
            clients: RwLock::new(BTreeMap::new()),
            _message: PhantomData,
        })
    }

    /// Envelopes each queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Maximum number of registered clients.
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Budgets used by callers that do not pass their own.
    pub fn default_timeouts(&self) -> RequestTimeouts {
        self.timeouts
    }

    /// Allocates the reply queue for `id`.
    ///
    /// Registering an id twice is rejected and leaves the first queue untouched.
    pub fn register_client(&self, id: ClientId) -> Result<()> {
        let mut clients = self.clients.write();
        if clients.contains_key(&id) {
            debug!("mailbox: duplicate registration of client {id} rejected");
            return Err(MailboxError::DuplicateClientId(id));
        }
        if clients.len() >= self.max_clients {
            return Err(MailboxError::RegistryFull { max: self.max_clients });
        }
        clients.insert(id, Arc::new(ClientSlot::new(Q::create(self.capacity))));
        debug!("mailbox: registered client {id}");
        Ok(())
    }

    /// Returns `true` if `id` has a reply queue.
    pub fn is_registered(&self, id: ClientId) -> bool {
        self.clients.read().contains_key(&id)
    }

    /// Registered ids in ascending order.
    pub fn clients(&self) -> Vec<ClientId> {
        self.clients.read().keys().copied().collect()
    }

    fn slot(&self, id: ClientId) -> Result<Arc<ClientSlot<Q>>> {
        self.clients.read().get(&id).cloned().ok_or(MailboxError::UnknownClientId(id))
    }

    /// Blocks until a request is available and returns it. Requests arrive in the order they
    /// were posted, across all clients.
    pub fn server_receive(&self) -> Result<M> {
        self.server_receive_with(Wait::Blocking)
    }

    /// Like [`Mailbox::server_receive`] with an explicit wait policy.
    pub fn server_receive_with(&self, wait: Wait) -> Result<M> {
        let envelope = self.server.pend(wait)?;
        trace!("mailbox: server took a request");
        Ok(envelope.open())
    }

    /// Routes `message` to `id`'s reply queue, blocking while it is full.
    pub fn server_respond(
        &self,
        id: ClientId,
        message: M,
    ) -> core::result::Result<(), Undelivered<M>> {
        self.server_respond_with(id, message, Wait::Blocking)
    }

    /// Like [`Mailbox::server_respond`] with an explicit wait policy.
    pub fn server_respond_with(
        &self,
        id: ClientId,
        message: M,
        wait: Wait,
    ) -> core::result::Result<(), Undelivered<M>> {
        let slot = match self.slot(id) {
            Ok(slot) => slot,
            Err(reason) => {
                warn!("mailbox: reply for unknown client {id} returned to server");
                return Err(Undelivered::new(reason, message));
            }
        };
        slot.queue.post(Envelope::seal(message), wait)?;
        trace!("mailbox: reply queued for client {id}");
        Ok(())
    }

    /// Waits up to `timeout` for a reply on `id`'s queue.
    ///
    /// The wait is always bounded: [`HostQueue`] clamps timeouts longer than one year.
    pub fn client_await_response(&self, id: ClientId, timeout: Duration) -> Result<M> {
        let slot = self.slot(id)?;
        self.await_reply(id, &slot, timeout)
    }

    fn await_reply(&self, id: ClientId, slot: &ClientSlot<Q>, timeout: Duration) -> Result<M> {
        match slot.queue.pend(Wait::Timeout(timeout)) {
            Ok(envelope) => {
                slot.record(|stats| stats.responded = stats.responded.saturating_add(1));
                trace!("mailbox: client {id} took a reply");
                Ok(envelope.open())
            }
            Err(err) => {
                slot.record(|stats| stats.timed_out = stats.timed_out.saturating_add(1));
                Err(err.into())
            }
        }
    }

    /// Posts `message` to the server within `timeouts.send`, then waits up to
    /// `timeouts.reply` for the reply.
    ///
    /// [`RequestError::NotSent`] returns the message; nothing reached the server.
    /// [`RequestError::NoReply`] means the server holds the request and may still reply later;
    /// that reply stays queued for `id` (see [`Mailbox::pending_replies`]).
    pub fn client_request(
        &self,
        id: ClientId,
        message: M,
        timeouts: RequestTimeouts,
    ) -> core::result::Result<M, RequestError<M>> {
        let slot = match self.slot(id).and_then(|slot| slot.claim(id).map(|()| slot)) {
            Ok(slot) => slot,
            Err(reason) => return Err(Undelivered::new(reason, message).into()),
        };
        if let Err(err) = self.server.post(Envelope::seal(message), Wait::Timeout(timeouts.send)) {
            slot.release();
            let undelivered = Undelivered::from(err);
            debug!("mailbox: client {id} request not sent: {}", undelivered.reason());
            return Err(undelivered.into());
        }
        slot.record(|stats| stats.requests = stats.requests.saturating_add(1));
        trace!("mailbox: client {id} request delivered");

        let reply = self.await_reply(id, &slot, timeouts.reply);
        slot.release();
        reply.map_err(|reason| {
            warn!("mailbox: client {id} stopped waiting ({reason}); a late reply stays queued");
            RequestError::NoReply(reason)
        })
    }

    /// Posts `message` to the server, blocking while the server queue is full, and returns
    /// without waiting for a reply.
    pub fn client_request_no_wait(
        &self,
        id: ClientId,
        message: M,
    ) -> core::result::Result<(), Undelivered<M>> {
        let slot = match self.slot(id) {
            Ok(slot) => slot,
            Err(reason) => return Err(Undelivered::new(reason, message)),
        };
        self.server.post(Envelope::seal(message), Wait::Blocking)?;
        slot.record(|stats| stats.fire_and_forget = stats.fire_and_forget.saturating_add(1));
        trace!("mailbox: client {id} request posted without wait");
        Ok(())
    }

    /// Protocol state of `id`.
    pub fn client_state(&self, id: ClientId) -> Result<ClientState> {
        Ok(self.slot(id)?.state())
    }

    /// Counters for `id`.
    pub fn client_stats(&self, id: ClientId) -> Result<ClientStats> {
        Ok(self.slot(id)?.stats())
    }

    /// Replies queued for `id` that nobody has read yet.
    pub fn pending_replies(&self, id: ClientId) -> Result<usize> {
        Ok(self.slot(id)?.queue.len())
    }

    /// Requests queued for the server.
    pub fn pending_requests(&self) -> usize {
        self.server.len()
    }

    /// Drains every reply currently queued for `id` without waiting.
    ///
    /// Use after a [`RequestError::NoReply`] so the next request does not pick up the late reply
    /// to the previous one. Fails with [`MailboxError::RequestInFlight`] while a waited request
    /// is outstanding, since its reply is not stale.
    pub fn discard_stale(&self, id: ClientId) -> Result<Vec<M>> {
        let slot = self.slot(id)?;
        // Status stays locked for the drain; only non-blocking pends run under it.
        let mut status = slot.status.lock();
        if status.state == ClientState::Requested {
            return Err(MailboxError::RequestInFlight(id));
        }
        let queued = slot.queue.len();
        let mut stale = Vec::with_capacity(queued);
        for _ in 0..queued {
            match slot.queue.pend(Wait::NonBlocking) {
                Ok(envelope) => stale.push(envelope.open()),
                Err(_) => break,
            }
        }
        if !stale.is_empty() {
            let count = stale.len() as u64;
            status.stats.stale_replies = status.stats.stale_replies.saturating_add(count);
            warn!("mailbox: discarded {count} stale replies for client {id}");
        }
        Ok(stale)
    }
}
