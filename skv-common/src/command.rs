//! # Command and Response Records
//!
//! Typed forms of the wire protocol. A `Command` is what the codec produces
//! from an inbound line; a `Response` is what the server renders back.
//! REPL_* variants carry the same payload as their client counterparts and
//! differ only by tag: they mark internal replication traffic that must
//! never be forwarded again.

use crate::error::KvError;

/// Maximum key size in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// Maximum value size in bytes.
pub const MAX_VALUE_LEN: usize = 256;

/// Maximum ttl in seconds (fits a signed 32-bit integer).
pub const MAX_TTL_SECS: u32 = 2_147_483_647;

/// One parsed client or replication command.
///
/// `ttl_secs == 0` means no expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: String, ttl_secs: u32 },
    Get { key: String },
    Delete { key: String },
    Exists { key: String },
    ReplPut { key: String, value: String, ttl_secs: u32 },
    ReplDelete { key: String },
    Quit,
}

impl Command {
    /// Returns the key this command addresses, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Put { key, .. }
            | Command::Get { key }
            | Command::Delete { key }
            | Command::Exists { key }
            | Command::ReplPut { key, .. }
            | Command::ReplDelete { key } => Some(key),
            Command::Quit => None,
        }
    }

    /// Returns true for REPL_* commands.
    pub fn is_internal(&self) -> bool {
        matches!(self, Command::ReplPut { .. } | Command::ReplDelete { .. })
    }

    /// Returns the internal replication form of a client write.
    ///
    /// `None` for reads, QUIT, and commands that are already internal;
    /// replication traffic must not cascade.
    pub fn as_replication(&self) -> Option<Command> {
        match self {
            Command::Put { key, value, ttl_secs } => Some(Command::ReplPut {
                key: key.clone(),
                value: value.clone(),
                ttl_secs: *ttl_secs,
            }),
            Command::Delete { key } => Some(Command::ReplDelete { key: key.clone() }),
            _ => None,
        }
    }
}

/// One response line: `OK` with an optional payload, or `ERROR` with a
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Option<String>),
    Error(String),
}

impl Response {
    pub fn stored() -> Self {
        Response::Ok(Some("stored".to_string()))
    }

    pub fn deleted() -> Self {
        Response::Ok(Some("deleted".to_string()))
    }

    pub fn bye() -> Self {
        Response::Ok(Some("bye".to_string()))
    }

    pub fn value(value: impl Into<String>) -> Self {
        Response::Ok(Some(value.into()))
    }

    /// `OK 1` / `OK 0` for existence checks.
    pub fn flag(present: bool) -> Self {
        Response::Ok(Some(if present { "1" } else { "0" }.to_string()))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }
}

impl From<KvError> for Response {
    fn from(err: KvError) -> Self {
        Response::Error(err.to_string())
    }
}
