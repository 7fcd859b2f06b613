// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Mailbox construction parameters loaded from TOML
//! OWNERS: @runtime
//!
//! ```toml
//! capacity = 4
//! max_clients = 64
//! send_timeout_ms = 1000
//! reply_timeout_ms = 1000
//! ```
//!
//! Missing keys fall back to [`MailboxConfig::default`]; unknown keys are rejected.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mailbox::RequestTimeouts;

/// Environment variable naming a config file for the demo binary.
pub const CONFIG_ENV: &str = "NEXUS_MAILBOX_CONFIG";

/// Errors raised while loading or validating a [`MailboxConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The TOML document is malformed or has unknown keys.
    #[error("invalid mailbox config: {0}")]
    Parse(#[from] toml::de::Error),
    /// `capacity` was zero.
    #[error("capacity must be at least 1")]
    ZeroCapacity,
    /// `max_clients` was zero.
    #[error("max_clients must be at least 1")]
    ZeroClients,
}

/// Parameters fixed for the lifetime of one mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailboxConfig {
    /// Envelopes each queue (server and per client) can hold.
    pub capacity: usize,
    /// Upper bound on registered clients.
    pub max_clients: usize,
    /// Default budget for posting a request onto the server queue.
    pub send_timeout_ms: u64,
    /// Default budget for awaiting a reply.
    pub reply_timeout_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self { capacity: 4, max_clients: 64, send_timeout_ms: 1000, reply_timeout_ms: 1000 }
    }
}

impl MailboxConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    /// Rejects values no mailbox can be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroClients);
        }
        Ok(())
    }

    /// Default per-request budgets derived from this config.
    pub fn timeouts(&self) -> RequestTimeouts {
        RequestTimeouts {
            send: Duration::from_millis(self.send_timeout_ms),
            reply: Duration::from_millis(self.reply_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_document_uses_defaults() {
        let config = MailboxConfig::from_toml_str("capacity = 8\nreply_timeout_ms = 50\n").unwrap();
        assert_eq!(config.capacity, 8);
        assert_eq!(config.max_clients, 64);
        assert_eq!(config.timeouts().send, Duration::from_millis(1000));
        assert_eq!(config.timeouts().reply, Duration::from_millis(50));
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = MailboxConfig::from_toml_str("capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity));
        let err = MailboxConfig::from_toml_str("max_clients = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroClients));
    }

    #[test]
    fn unknown_key_rejected() {
        let err = MailboxConfig::from_toml_str("capacity = 2\nprio = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "capacity = 16\nmax_clients = 3").unwrap();
        let config = MailboxConfig::from_path(file.path()).unwrap();
        assert_eq!(config.capacity, 16);
        assert_eq!(config.max_clients, 3);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = MailboxConfig::from_path("/nonexistent/mailbox.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mailbox.toml"));
    }
}
