// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User-facing CLI for the `mailbox-demo` binary.
//!
//! Spawns one server thread and `--clients` client threads on a [`Mailbox`] backed by
//! [`crate::HostQueue`]. Every client sends `42`; the server replies `request + 1` to the
//! request's origin. With `--drop-replies` the server swallows requests so the reply-timeout
//! path can be observed.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::info;

use crate::client::send_msg_wait_response;
use crate::config::{ConfigError, MailboxConfig, CONFIG_ENV};
use crate::envelope::{ClientId, Origin};
use crate::mailbox::{Mailbox, RequestError};
use crate::queue::Wait;
use crate::MailboxError;

const REQUEST_VALUE: u32 = 42;

/// Payload exchanged by the demo tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoMessage {
    /// Client that produced the message.
    pub origin: ClientId,
    /// Application value.
    pub value: u32,
}

impl Origin for DemoMessage {
    fn origin(&self) -> ClientId {
        self.origin
    }
}

/// Failures surfaced by the CLI.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad command line.
    #[error("{0}")]
    Usage(String),
    /// Config file could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Mailbox construction or server loop failed.
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    /// A demo thread panicked.
    #[error("a demo task panicked")]
    TaskPanicked,
}

/// Returns the CLI usage string.
pub fn help() -> &'static str {
    "mailbox-demo runs a client/server mailbox round. \
     Usage: mailbox-demo [--clients <n>] [--config <path>] [--drop-replies] [--help]"
}

#[derive(Debug, Default)]
struct Options {
    help: bool,
    clients: Option<u16>,
    config: Option<PathBuf>,
    drop_replies: bool,
}

impl Options {
    fn parse(args: &[&str]) -> Result<Self, CliError> {
        let mut options = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match *arg {
                "--help" | "-h" => options.help = true,
                "--drop-replies" => options.drop_replies = true,
                "--clients" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| CliError::Usage("--clients needs a value".into()))?;
                    let clients = value
                        .parse::<u16>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| CliError::Usage(format!("invalid client count: {value}")))?;
                    options.clients = Some(clients);
                }
                "--config" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| CliError::Usage("--config needs a path".into()))?;
                    options.config = Some(PathBuf::from(value));
                }
                other => return Err(CliError::Usage(format!("unknown argument: {other}"))),
            }
        }
        Ok(options)
    }

    fn load_config(&self) -> Result<MailboxConfig, CliError> {
        let path = self.config.clone().or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => Ok(MailboxConfig::from_path(path)?),
            None => Ok(MailboxConfig::default()),
        }
    }
}

/// Executes the CLI and returns the report, or the error the run failed with.
pub fn try_execute(args: &[&str]) -> Result<String, CliError> {
    let options = Options::parse(args)?;
    if options.help {
        return Ok(help().to_string());
    }
    let config = options.load_config()?;
    let mailbox: Mailbox<DemoMessage> = Mailbox::with_config(&config)?;
    let ids: Vec<ClientId> = (1..=options.clients.unwrap_or(3)).map(ClientId::new).collect();
    for &id in &ids {
        mailbox.register_client(id)?;
    }
    let timeouts = mailbox.default_timeouts();
    let idle = timeouts.send.saturating_add(timeouts.reply);

    let (served, outcomes) = thread::scope(|scope| {
        let server = scope.spawn(|| serve(&mailbox, ids.len(), idle, options.drop_replies));
        let clients: Vec<_> = ids
            .iter()
            .map(|&id| {
                let mailbox = &mailbox;
                scope.spawn(move || {
                    let request = DemoMessage { origin: id, value: REQUEST_VALUE };
                    (id, send_msg_wait_response(mailbox, request, timeouts))
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(clients.len());
        for client in clients {
            outcomes.push(client.join().map_err(|_| CliError::TaskPanicked)?);
        }
        let served = server.join().map_err(|_| CliError::TaskPanicked)??;
        Ok::<_, CliError>((served, outcomes))
    })?;

    let mut lines = vec![format!(
        "mailbox-demo: capacity={} clients={}/{}",
        mailbox.capacity(),
        ids.len(),
        mailbox.max_clients()
    )];
    for (id, outcome) in outcomes {
        lines.push(match outcome {
            Ok(reply) => format!("client {id}: sent {REQUEST_VALUE}, got {}", reply.value),
            Err(RequestError::NoReply(reason)) => format!("client {id}: no reply ({reason})"),
            Err(err) => format!("client {id}: {err}"),
        });
    }
    lines.push(format!("served {served} requests"));
    Ok(lines.join("\n"))
}

/// Server loop: handles up to `requests` requests, stopping early once the queue stays idle
/// for `idle`.
fn serve(
    mailbox: &Mailbox<DemoMessage>,
    requests: usize,
    idle: Duration,
    drop_replies: bool,
) -> Result<usize, CliError> {
    let mut served = 0;
    while served < requests {
        let request = match mailbox.server_receive_with(Wait::Timeout(idle)) {
            Ok(request) => request,
            Err(MailboxError::Timeout) => break,
            Err(err) => return Err(err.into()),
        };
        served += 1;
        if drop_replies {
            info!("mailbox-demo: dropping request from client {}", request.origin);
            continue;
        }
        let reply = DemoMessage { origin: request.origin, value: request.value.wrapping_add(1) };
        mailbox.server_respond(request.origin, reply).map_err(|err| err.reason())?;
    }
    Ok(served)
}

/// Executes the CLI using provided arguments.
pub fn execute(args: &[&str]) -> String {
    try_execute(args).unwrap_or_else(|err| format!("error: {err}"))
}

/// Parses `std::env::args` and prints the execution result.
pub fn run() {
    let owned: Vec<String> = std::env::args().skip(1).collect();
    let refs: Vec<&str> = owned.iter().map(|s| s.as_str()).collect();
    match try_execute(&refs) {
        Ok(report) => println!("{report}"),
        Err(err) => {
            eprintln!("mailbox-demo: {err}");
            std::process::exit(2);
        }
    }
}
