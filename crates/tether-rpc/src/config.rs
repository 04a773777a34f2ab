//! Endpoint configuration.

use tether_wire::{DEFAULT_MAX_TRANSFER_BYTES, TO_INIT_KEY};

/// Environment variable that caps the packet body of a single transfer.
pub const CHUNK_MAX_SIZE_ENV: &str = "TETHER_CHUNK_MAX_SIZE_BYTES";

/// Configuration for an endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Name used to identify this endpoint in log messages.
    pub name: String,

    /// Remote key reported during protocol initialization, or
    /// `"%toinit"` to let the endpoint read the client-supplied key
    /// from the channel before packet dispatch.
    pub remote_key: String,

    /// Maximum packet body for a single transfer. Reported to peers via
    /// the `server.max_transfer_size` built-in and used as the local
    /// chunking cap when the peer does not expose that function.
    pub max_transfer_bytes: u64,
}

impl EndpointConfig {
    /// Configuration with the given name and remote key.
    ///
    /// `TETHER_CHUNK_MAX_SIZE_BYTES` overrides the transfer cap when it
    /// parses as a positive integer; anything else is ignored.
    pub fn new(name: impl Into<String>, remote_key: impl Into<String>) -> Self {
        let max_transfer_bytes = std::env::var(CHUNK_MAX_SIZE_ENV)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_TRANSFER_BYTES);

        Self {
            name: name.into(),
            remote_key: remote_key.into(),
            max_transfer_bytes,
        }
    }

    /// Server-side configuration that reads the remote key from the
    /// channel during the init handshake.
    pub fn server(name: impl Into<String>) -> Self {
        Self::new(name, TO_INIT_KEY)
    }

    /// Override the transfer cap.
    pub fn with_max_transfer_bytes(mut self, nbytes: u64) -> Self {
        self.max_transfer_bytes = nbytes;
        self
    }
}
