//! Protocol-level errors.
//!
//! The `Display` string of each variant is the exact message that goes on
//! the wire after `ERROR `, so the error type doubles as the message table.

use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("empty command")]
    EmptyCommand,
    #[error("invalid command")]
    InvalidCommand,
    #[error("key too long")]
    KeyTooLong,
    #[error("value too long")]
    ValueTooLong,
    #[error("invalid ttl")]
    InvalidTtl,
    #[error("key not found")]
    KeyNotFound,
    #[error("not a replica for this key")]
    NotReplica,
    #[error("upstream unavailable")]
    UpstreamUnavailable,
    #[error("line too long")]
    LineTooLong,
    #[error("invalid utf-8")]
    InvalidUtf8,
    #[error("invalid response")]
    InvalidResponse,
}
