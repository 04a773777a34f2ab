//! Error types for the endpoint runtime.

use thiserror::Error;

/// Errors surfaced by endpoint operations.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Transport failure while sending or receiving channel bytes.
    /// Fatal; the endpoint tears down.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel delivered EOF (or the endpoint was already shut
    /// down) while the state machine still needed bytes.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Framing violation: the byte stream can no longer be trusted.
    #[error("framing violation: {0}")]
    Wire(#[from] tether_wire::WireError),

    /// The peer returned an exception. The message is already
    /// formatted: timeout errors pass through verbatim, everything else
    /// carries the RPC-error banner.
    #[error("{0}")]
    Remote(String),

    /// The peer violated the protocol state machine (e.g. a `Return`
    /// arriving on a server loop).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A caller-supplied argument cannot travel through the channel.
    /// Fatal to the call, not to the endpoint.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for endpoint operations.
pub type RpcResult<T> = Result<T, RpcError>;

impl RpcError {
    /// Format a peer exception message for local surfacing: timeout
    /// errors pass through verbatim, everything else gets the banner.
    pub fn from_remote_message(msg: &str) -> Self {
        if msg.starts_with(tether_wire::TIMEOUT_ERROR_PREFIX) {
            RpcError::Remote(msg.to_string())
        } else {
            RpcError::Remote(format!("{}{}", tether_wire::RPC_ERROR_BANNER, msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_wire::{RPC_ERROR_BANNER, TIMEOUT_ERROR_PREFIX};

    #[test]
    fn timeout_messages_pass_through_verbatim() {
        let msg = format!("{TIMEOUT_ERROR_PREFIX}took too long");
        let err = RpcError::from_remote_message(&msg);
        assert_eq!(err.to_string(), msg);
    }

    #[test]
    fn other_messages_get_the_banner() {
        let err = RpcError::from_remote_message("boom");
        let text = err.to_string();
        assert!(text.starts_with(RPC_ERROR_BANNER));
        assert!(text.contains("boom"));
        assert!(!text.contains(TIMEOUT_ERROR_PREFIX));
    }
}
