//! Internal error hierarchy.
//!
//! `rredis` represented every canned error as a pre-formatted RESP string
//! constant (`WRONG_TYPE_ERR`, `SYNTAX_ERR`, ... in `src/obj.rs`). This module
//! keeps the same fixed wording but carries it as a typed `thiserror` enum so
//! command implementations can `?`-propagate instead of hand-formatting
//! reply strings at every call site; [`RedisError::into_reply`] is the single
//! place that renders one onto the wire.

use crate::resp::Reply;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedisError {
    #[error("ERR Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    StreamIdTooSmall,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdNotMonotonic,

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("ERR Can't execute '{0}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context")]
    SubscribedContextOnly(String),

    #[error("READONLY You can't write against a read only replica.")]
    ReadOnlyReplica,

    #[error("{0}")]
    Custom(String),
}

impl RedisError {
    pub fn into_reply(self) -> Reply {
        Reply::Error(self.to_string())
    }
}

impl From<RedisError> for Reply {
    fn from(e: RedisError) -> Self {
        e.into_reply()
    }
}
