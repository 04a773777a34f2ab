//! tether-rpc: a bidirectional RPC endpoint that lets one process drive
//! another's functions and tensor memory over a single full-duplex byte
//! channel.
//!
//! # Core invariants
//!
//! 1. **One packet, one unit**: the facade mutex makes every request
//!    hit the wire contiguously, and replies return in issue order.
//! 2. **The reader never blocks the machine**: the state machine
//!    advances whenever bytes are buffered and otherwise reports how
//!    many more it needs; blocking lives only in the [`Channel`].
//! 3. **One reply per server operation**: no further input packet is
//!    processed until the reply of an in-flight operation is written.
//! 4. **At-most-once frees**: every remote handle is released by
//!    exactly one `FreeHandle`, issued by the owning ref's drop.
//!
//! # Architecture
//!
//! ```text
//! caller ──> Endpoint (mutex, drive loop) ──> Channel ──> peer
//!                 │                ▲
//!                 ▼                │
//!            EventHandler ── RingBuffers
//!                 │
//!                 ▼
//!            RpcSession (LocalSession | ClientSession proxy)
//! ```
//!
//! A client wraps the endpoint in a [`ClientSession`] for the typed
//! session + device API with chunked transfers; a server hands the
//! endpoint to [`Endpoint::server_loop`] and lets `InitServer` install
//! the serving session.

pub mod arena;
pub mod channel;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
mod event_handler;
pub mod local_session;
pub mod ring_buffer;
pub mod session;

#[cfg(test)]
mod tests;

pub use channel::{pipe, Channel, PipeChannel, StreamChannel};
pub use client::{ClientSession, RemoteBuffer, RemoteFunction, RemoteStream};
pub use config::{EndpointConfig, CHUNK_MAX_SIZE_ENV};
pub use endpoint::Endpoint;
pub use error::{RpcError, RpcResult};
pub use local_session::{LocalSession, RpcFunction};
pub use ring_buffer::RingBuffer;
pub use session::{RpcSession, SessionError, SessionResult, DEV_ATTR_EXISTS};

// Wire-level names most embedders need alongside the endpoint.
pub use tether_wire::{
    DataType, Device, Opcode, RpcValue, TensorMeta, DEFAULT_MAX_TRANSFER_BYTES,
    MAX_TRANSFER_SIZE_FUNC, PROTOCOL_VERSION, TIMEOUT_ERROR_PREFIX,
};
