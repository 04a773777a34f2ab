//! The serving-session capability.
//!
//! A session is the executor behind an endpoint's server side: it looks
//! up and runs functions, owns device memory and streams, and moves
//! bytes between tensors and host buffers. The event handler treats it
//! as opaque; every failure it reports is marshaled into an `Exception`
//! reply so the peer's blocked call surfaces it as a local error.
//!
//! Two implementations ship here: [`LocalSession`] executes against
//! host memory, and [`ClientSession`] proxies every operation to yet
//! another endpoint, which is what makes multi-hop setups work.
//!
//! [`LocalSession`]: crate::local_session::LocalSession
//! [`ClientSession`]: crate::client::ClientSession

use thiserror::Error;

use tether_wire::{DataType, Device, RpcValue, TensorMeta};

/// Device attribute kind probed by `DevGetAttr`. `Exists` is special:
/// a missing device API answers `0` instead of failing.
pub const DEV_ATTR_EXISTS: i64 = 0;

/// Failure inside a serving session. Carried to the peer as the message
/// of an `Exception` packet.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct SessionError {
    pub message: String,
}

impl SessionError {
    pub fn new(message: impl Into<String>) -> Self {
        SessionError {
            message: message.into(),
        }
    }
}

impl From<crate::error::RpcError> for SessionError {
    fn from(err: crate::error::RpcError) -> Self {
        SessionError::new(err.to_string())
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// The capability an endpoint serves requests against.
///
/// Handles (`u64`) identify functions, device buffers and streams; they
/// are minted by the session and meaningful only to it. Each handle is
/// freed at most once.
pub trait RpcSession: Send {
    /// Whether this session executes directly against local resources.
    /// Local host-resident tensors take the direct copy path without
    /// staging.
    fn is_local(&self) -> bool {
        false
    }

    /// Look up a function by name. `None` when absent; errors are
    /// reserved for lookup machinery failures.
    fn get_function(&mut self, name: &str) -> SessionResult<Option<u64>>;

    /// Invoke a function handle with packed arguments.
    fn call(&mut self, func: u64, args: Vec<RpcValue>) -> SessionResult<Vec<RpcValue>>;

    /// Release any handle minted by this session.
    fn free_handle(&mut self, handle: u64) -> SessionResult<()>;

    /// Copy `out.len()` bytes out of `tensor` starting at its byte
    /// offset.
    fn read_tensor(&mut self, tensor: &TensorMeta, out: &mut [u8]) -> SessionResult<()>;

    /// Copy `data` into `tensor` starting at its byte offset.
    fn write_tensor(&mut self, tensor: &TensorMeta, data: &[u8]) -> SessionResult<()>;

    // Device API.

    fn set_device(&mut self, dev: Device) -> SessionResult<()>;

    /// Query a device attribute. `DEV_ATTR_EXISTS` must answer
    /// `Int(0)` for devices the session has no API for.
    fn get_attr(&mut self, dev: Device, kind: i64) -> SessionResult<RpcValue>;

    fn alloc_data(
        &mut self,
        dev: Device,
        nbytes: u64,
        alignment: u64,
        dtype_hint: DataType,
    ) -> SessionResult<u64>;

    fn alloc_data_with_scope(
        &mut self,
        tensor: &TensorMeta,
        scope: Option<&str>,
    ) -> SessionResult<u64>;

    fn free_data(&mut self, dev: Device, ptr: u64) -> SessionResult<()>;

    /// Copy between two tensors the session owns. The source device
    /// governs the copy unless it is host memory.
    fn copy_among(&mut self, from: &TensorMeta, to: &TensorMeta, stream: u64) -> SessionResult<()>;

    fn create_stream(&mut self, dev: Device) -> SessionResult<u64>;

    fn free_stream(&mut self, dev: Device, stream: u64) -> SessionResult<()>;

    fn stream_sync(&mut self, dev: Device, stream: u64) -> SessionResult<()>;

    fn set_stream(&mut self, dev: Device, stream: u64) -> SessionResult<()>;

    fn current_stream(&mut self, dev: Device) -> SessionResult<u64>;
}

/// Constructor for serving sessions installed by `InitServer`.
pub type SessionConstructor =
    Box<dyn FnMut(&[RpcValue]) -> SessionResult<Box<dyn RpcSession>> + Send>;
