//! # ShardKV Wire Types
//!
//! Shared definitions for every crate in the workspace: the command and
//! response records, the line codec that maps them to and from the text
//! protocol, and the framing helper that splits raw socket bytes into lines.

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;

pub use command::{Command, Response, MAX_KEY_LEN, MAX_TTL_SECS, MAX_VALUE_LEN};
pub use error::KvError;
pub use frame::MAX_LINE_LEN;
