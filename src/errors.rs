//! Error types for isolation channels

use crate::channel::Status;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("Call is already cancelled: {message}")]
    AlreadyCancelled { message: String },

    #[error("Call was already started")]
    AlreadyStarted,

    #[error("RPC failed: {0}")]
    Rpc(#[from] Status),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation was cancelled")]
    Cancelled,
}

pub type ChannelResult<T> = Result<T, ChannelError>;
