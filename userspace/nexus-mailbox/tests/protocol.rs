//! CONTEXT: Threaded protocol tests for the bidirectional mailbox
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//!
//! TEST_SCOPE:
//!   - Request/reply round trips across real threads (HostQueue)
//!   - Global FIFO across clients
//!   - Bounded waits and the late-reply hazard
//!   - Backpressure on full queues
//!   - Registry uniqueness
//!
//! DEPENDENCIES:
//!   - nexus_mailbox::Mailbox with the default HostQueue backend
//!   - proptest: ordering and registry properties

use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use nexus_mailbox::{
    send_msg_wait_response, ClientId, ClientState, Mailbox, MailboxError, Origin, RequestError,
    RequestTimeouts,
};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Message {
    origin: ClientId,
    value: u32,
}

impl Origin for Message {
    fn origin(&self) -> ClientId {
        self.origin
    }
}

fn msg(origin: ClientId, value: u32) -> Message {
    Message { origin, value }
}

fn mailbox_with(capacity: usize, clients: &[ClientId]) -> Mailbox<Message> {
    let mailbox = Mailbox::new(capacity).expect("valid capacity");
    for &id in clients {
        mailbox.register_client(id).expect("fresh id");
    }
    mailbox
}

/// Polls `cond` for up to one second.
fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn request_reply_scenario() {
    let c7 = ClientId::new(7);
    let mailbox = mailbox_with(4, &[c7]);

    thread::scope(|scope| {
        let server = scope.spawn(|| {
            let request = mailbox.server_receive().unwrap();
            assert_eq!(request, msg(c7, 42));
            mailbox.server_respond(request.origin, msg(c7, 43)).unwrap();
        });

        let start = Instant::now();
        let reply = mailbox
            .client_request(c7, msg(c7, 42), RequestTimeouts::uniform(Duration::from_millis(1000)))
            .unwrap();
        assert_eq!(reply, msg(c7, 43));
        assert!(start.elapsed() < Duration::from_millis(1000));
        server.join().unwrap();
    });

    assert_eq!(mailbox.client_state(c7), Ok(ClientState::Idle));
    assert_eq!(mailbox.pending_replies(c7), Ok(0));
}

#[test]
fn reply_reaches_blocked_waiter_unchanged() {
    let c = ClientId::new(3);
    let mailbox = mailbox_with(2, &[c]);

    thread::scope(|scope| {
        let client = scope.spawn(|| {
            mailbox.client_request_no_wait(c, msg(c, 10)).unwrap();
            mailbox.client_await_response(c, Duration::from_secs(2))
        });
        let request = mailbox.server_receive().unwrap();
        mailbox.server_respond(c, msg(c, request.value * 10)).unwrap();
        assert_eq!(client.join().unwrap(), Ok(msg(c, 100)));
    });
}

#[test]
fn timeout_scenario_leaves_late_reply_queued() {
    let c9 = ClientId::new(9);
    let mailbox = mailbox_with(4, &[c9]);

    let start = Instant::now();
    let timeouts = RequestTimeouts::new(Duration::from_millis(1000), Duration::from_millis(50));
    let err = mailbox.client_request(c9, msg(c9, 1), timeouts).unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(matches!(err, RequestError::NoReply(MailboxError::Timeout)));
    assert_eq!(mailbox.pending_replies(c9), Ok(0));

    // The request was delivered; the server answers after the client gave up.
    let request = mailbox.server_receive().unwrap();
    mailbox.server_respond(c9, msg(c9, request.value + 1)).unwrap();

    // Known hazard: the next wait on id 9 sees the reply to the abandoned request.
    assert_eq!(mailbox.pending_replies(c9), Ok(1));
    assert_eq!(mailbox.client_await_response(c9, Duration::from_millis(10)), Ok(msg(c9, 2)));

    let stats = mailbox.client_stats(c9).unwrap();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.responded, 1);
}

#[test]
fn discard_stale_reconciles_before_next_request() {
    let c = ClientId::new(4);
    let mailbox = mailbox_with(4, &[c]);
    let short = RequestTimeouts::new(Duration::from_millis(500), Duration::from_millis(20));

    assert!(mailbox.client_request(c, msg(c, 1), short).unwrap_err().is_no_reply());
    let late = mailbox.server_receive().unwrap();
    mailbox.server_respond(c, msg(c, late.value + 100)).unwrap();

    assert_eq!(mailbox.discard_stale(c).unwrap(), vec![msg(c, 101)]);
    assert_eq!(mailbox.pending_replies(c), Ok(0));

    thread::scope(|scope| {
        scope.spawn(|| {
            let request = mailbox.server_receive().unwrap();
            mailbox.server_respond(c, msg(c, request.value + 100)).unwrap();
        });
        let reply = mailbox
            .client_request(c, msg(c, 2), RequestTimeouts::uniform(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(reply.value, 102);
    });
    assert_eq!(mailbox.client_stats(c).unwrap().stale_replies, 1);
}

#[test]
fn concurrent_clients_each_served_once() {
    let ids: Vec<ClientId> = (1..=6).map(ClientId::new).collect();
    let mailbox = mailbox_with(ids.len(), &ids);

    thread::scope(|scope| {
        let server = scope.spawn(|| {
            let mut seen = BTreeSet::new();
            for _ in 0..ids.len() {
                let request = mailbox.server_receive().unwrap();
                assert!(seen.insert(request.origin), "duplicate delivery");
                let reply = msg(request.origin, request.value + 1);
                mailbox.server_respond(request.origin, reply).unwrap();
            }
            seen
        });

        let clients: Vec<_> = ids
            .iter()
            .map(|&id| {
                let mailbox = &mailbox;
                scope.spawn(move || {
                    let timeouts = RequestTimeouts::uniform(Duration::from_secs(2));
                    send_msg_wait_response(mailbox, msg(id, u32::from(id.raw())), timeouts)
                })
            })
            .collect();

        for (client, &id) in clients.into_iter().zip(&ids) {
            let reply = client.join().unwrap().unwrap();
            assert_eq!(reply, msg(id, u32::from(id.raw()) + 1));
        }
        let seen = server.join().unwrap();
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), ids);
    });
}

#[test]
fn full_server_queue_blocks_no_wait_sender() {
    let c = ClientId::new(1);
    let mailbox = mailbox_with(1, &[c]);
    mailbox.client_request_no_wait(c, msg(c, 1)).unwrap();

    thread::scope(|scope| {
        let blocked = scope.spawn(|| mailbox.client_request_no_wait(c, msg(c, 2)));
        thread::sleep(Duration::from_millis(30));
        assert!(!blocked.is_finished(), "sender must wait for space");
        assert_eq!(mailbox.pending_requests(), 1);

        assert_eq!(mailbox.server_receive().unwrap().value, 1);
        blocked.join().unwrap().unwrap();
    });
    assert_eq!(mailbox.server_receive().unwrap().value, 2);
    assert_eq!(mailbox.client_stats(c).unwrap().fire_and_forget, 2);
}

#[test]
fn full_client_queue_blocks_server_respond() {
    let c = ClientId::new(2);
    let mailbox = mailbox_with(1, &[c]);
    mailbox.server_respond(c, msg(c, 1)).unwrap();

    thread::scope(|scope| {
        let blocked = scope.spawn(|| mailbox.server_respond(c, msg(c, 2)));
        thread::sleep(Duration::from_millis(30));
        assert!(!blocked.is_finished(), "server must wait for the client to drain");

        assert_eq!(mailbox.client_await_response(c, Duration::from_secs(1)), Ok(msg(c, 1)));
        blocked.join().unwrap().unwrap();
    });
    assert_eq!(mailbox.client_await_response(c, Duration::from_secs(1)), Ok(msg(c, 2)));
}

#[test]
fn bounded_request_send_gives_message_back() {
    let c = ClientId::new(5);
    let mailbox = mailbox_with(1, &[c]);
    mailbox.client_request_no_wait(c, msg(c, 1)).unwrap();

    let timeouts = RequestTimeouts::new(Duration::from_millis(20), Duration::from_secs(5));
    let err = mailbox.client_request(c, msg(c, 2), timeouts).unwrap_err();
    assert_eq!(err.reason(), MailboxError::QueueFull);
    assert_eq!(err.into_message(), Some(msg(c, 2)));
    assert_eq!(mailbox.client_state(c), Ok(ClientState::Idle));
}

#[test]
fn reply_posted_before_deadline_is_received() {
    let c = ClientId::new(8);
    let mailbox = mailbox_with(2, &[c]);

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(20));
            mailbox.server_respond(c, msg(c, 5)).unwrap();
        });
        assert_eq!(mailbox.client_await_response(c, Duration::from_secs(2)), Ok(msg(c, 5)));
    });
    assert_eq!(
        mailbox.client_await_response(c, Duration::from_millis(20)),
        Err(MailboxError::Timeout)
    );
}

#[test]
fn second_request_on_same_client_rejected_while_waiting() {
    let c7 = ClientId::new(7);
    let mailbox = mailbox_with(4, &[c7]);

    thread::scope(|scope| {
        let first = scope.spawn(|| {
            mailbox.client_request(c7, msg(c7, 1), RequestTimeouts::uniform(Duration::from_secs(2)))
        });
        assert!(eventually(|| mailbox.client_state(c7) == Ok(ClientState::Requested)));

        let err = mailbox
            .client_request(c7, msg(c7, 2), RequestTimeouts::uniform(Duration::from_millis(10)))
            .unwrap_err();
        assert_eq!(err.reason(), MailboxError::RequestInFlight(c7));
        assert_eq!(err.into_message(), Some(msg(c7, 2)));
        assert_eq!(mailbox.discard_stale(c7), Err(MailboxError::RequestInFlight(c7)));

        let request = mailbox.server_receive().unwrap();
        mailbox.server_respond(c7, msg(c7, request.value + 1)).unwrap();
        assert_eq!(first.join().unwrap().unwrap(), msg(c7, 2));
    });
    assert_eq!(mailbox.pending_requests(), 0);
}

proptest! {
    #[test]
    fn server_sees_posts_in_order(values in proptest::collection::vec(any::<u32>(), 1..16)) {
        let ids: Vec<ClientId> = (0..4).map(ClientId::new).collect();
        let mailbox = mailbox_with(values.len(), &ids);
        for (i, value) in values.iter().enumerate() {
            let id = ids[i % ids.len()];
            mailbox.client_request_no_wait(id, msg(id, *value)).unwrap();
        }
        for (i, value) in values.iter().enumerate() {
            let request = mailbox.server_receive().unwrap();
            prop_assert_eq!(request.origin, ids[i % ids.len()]);
            prop_assert_eq!(request.value, *value);
        }
        prop_assert_eq!(mailbox.pending_requests(), 0);
    }

    #[test]
    fn registration_is_unique(raw in proptest::collection::vec(0u16..32, 0..48)) {
        let mailbox: Mailbox<Message> = Mailbox::new(1).unwrap();
        let mut expected = BTreeSet::new();
        for value in raw {
            let id = ClientId::new(value);
            let result = mailbox.register_client(id);
            if expected.insert(id) {
                prop_assert_eq!(result, Ok(()));
            } else {
                prop_assert_eq!(result, Err(MailboxError::DuplicateClientId(id)));
            }
        }
        prop_assert_eq!(mailbox.clients(), expected.into_iter().collect::<Vec<_>>());
    }
}
