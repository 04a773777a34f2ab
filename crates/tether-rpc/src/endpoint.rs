//! The thread-safe front door of a connection.
//!
//! An endpoint owns one channel, the reader/writer ring buffers and the
//! event handler. Client-facing methods frame a request, then enter the
//! drive loop: flush the writer, pull the bytes the handler still
//! needs, advance the state machine, repeat until a terminal event.
//! One mutex serializes every caller, so each packet hits the wire as
//! one contiguous unit and replies come back in issue order.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use tether_wire::{
    codec::{write_u32, write_u64},
    copy_packet_overhead, packed_len, write_packed_seq, write_tensor, Opcode, RpcValue, TensorMeta,
    PROTOCOL_VERSION,
};

use crate::channel::Channel;
use crate::config::EndpointConfig;
use crate::error::{RpcError, RpcResult};
use crate::event_handler::{validate_values, Event, EventHandler, HandlerIo};
use crate::ring_buffer::RingBuffer;
use crate::session::{RpcSession, SessionConstructor, SessionResult};

/// Lifecycle hook invoked by [`Endpoint::server_loop`].
pub type ServerHook = Box<dyn FnMut() + Send>;

struct Inner {
    channel: Option<Box<dyn Channel>>,
    reader: RingBuffer,
    writer: RingBuffer,
    handler: EventHandler,
    on_server_start: Option<ServerHook>,
    on_server_shutdown: Option<ServerHook>,
}

/// A bidirectional RPC endpoint over one byte channel.
pub struct Endpoint {
    name: String,
    inner: Mutex<Inner>,
}

impl Endpoint {
    /// Create an endpoint driving `channel`.
    pub fn new(channel: Box<dyn Channel>, config: EndpointConfig) -> Arc<Self> {
        let handler = EventHandler::new(&config);
        Arc::new(Endpoint {
            name: config.name,
            inner: Mutex::new(Inner {
                channel: Some(channel),
                reader: RingBuffer::new(),
                writer: RingBuffer::new(),
                handler,
                on_server_start: None,
                on_server_shutdown: None,
            }),
        })
    }

    /// Endpoint name, used in log messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The remote key: configured, or read from the channel during the
    /// init handshake.
    pub fn remote_key(&self) -> String {
        self.lock().handler.remote_key().to_string()
    }

    /// Whether the handler sits at a packet boundary.
    pub fn can_clean_shutdown(&self) -> bool {
        self.lock().handler.can_clean_shutdown()
    }

    /// Replace the session installed when `InitServer` arrives with no
    /// constructor arguments.
    pub fn set_default_session<F>(&self, f: F)
    where
        F: FnMut() -> Box<dyn RpcSession> + Send + 'static,
    {
        self.lock().handler.set_default_session(Box::new(f));
    }

    /// Register a named serving-session constructor for `InitServer`.
    pub fn register_session_constructor<F>(&self, name: &str, ctor: F)
    where
        F: FnMut(&[RpcValue]) -> SessionResult<Box<dyn RpcSession>> + Send + 'static,
    {
        self.lock()
            .handler
            .register_session_constructor(name, Box::new(ctor) as SessionConstructor);
    }

    /// Hook run by [`server_loop`] before serving starts.
    ///
    /// [`server_loop`]: Endpoint::server_loop
    pub fn on_server_start<F: FnMut() + Send + 'static>(&self, f: F) {
        self.lock().on_server_start = Some(Box::new(f));
    }

    /// Hook run by [`server_loop`] after shutdown.
    ///
    /// [`server_loop`]: Endpoint::server_loop
    pub fn on_server_shutdown<F: FnMut() + Send + 'static>(&self, f: F) {
        self.lock().on_server_shutdown = Some(Box::new(f));
    }

    /// Send the framed remote key a `"%toinit"` server is waiting for:
    /// `i32 key_len` followed by the key bytes.
    pub fn send_init_key(&self) -> RpcResult<()> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        let key = inner.handler.remote_key().to_string();
        write_u32(&mut inner.writer, key.len() as u32).map_err(RpcError::Io)?;
        inner.writer.write_all(key.as_bytes()).map_err(RpcError::Io)?;
        inner.flush_writer()
    }

    /// Initialize the peer's serving session.
    ///
    /// Sends `InitServer` with the compiled protocol version and the
    /// given constructor arguments (empty args install the peer's
    /// default session) and waits for the acknowledgement.
    pub fn init_remote_session(&self, args: &[RpcValue]) -> RpcResult<()> {
        validate_outgoing(args)?;
        let mut inner = self.lock();
        inner.ensure_open()?;

        let ver = PROTOCOL_VERSION.as_bytes();
        let body = 4 + 8 + ver.len() as u64 + packed_len(args);
        write_u64(&mut inner.writer, body).map_err(RpcError::Io)?;
        write_u32(&mut inner.writer, Opcode::InitServer.as_u32()).map_err(RpcError::Io)?;
        write_u64(&mut inner.writer, ver.len() as u64).map_err(RpcError::Io)?;
        inner.writer.write_all(ver).map_err(RpcError::Io)?;
        write_packed_seq(&mut inner.writer, args).map_err(RpcError::Io)?;

        inner.drive_to_return(true).map(|_| ())
    }

    /// Invoke a remote function handle and return its packed results.
    pub fn call_func(&self, func: u64, args: &[RpcValue]) -> RpcResult<Vec<RpcValue>> {
        validate_outgoing(args)?;
        let mut inner = self.lock();
        inner.ensure_open()?;

        let body = 4 + 8 + packed_len(args);
        write_u64(&mut inner.writer, body).map_err(RpcError::Io)?;
        write_u32(&mut inner.writer, Opcode::CallFunc.as_u32()).map_err(RpcError::Io)?;
        write_u64(&mut inner.writer, func).map_err(RpcError::Io)?;
        write_packed_seq(&mut inner.writer, args).map_err(RpcError::Io)?;

        inner.drive_to_return(true)
    }

    /// Run a built-in syscall on the peer and return its single result
    /// value.
    pub fn syscall_remote(&self, code: Opcode, args: &[RpcValue]) -> RpcResult<RpcValue> {
        if !code.is_syscall() {
            return Err(RpcError::InvalidArgument(format!(
                "{code:?} is not a syscall opcode"
            )));
        }
        validate_outgoing(args)?;
        let mut inner = self.lock();
        inner.ensure_open()?;

        let body = 4 + packed_len(args);
        write_u64(&mut inner.writer, body).map_err(RpcError::Io)?;
        write_u32(&mut inner.writer, code.as_u32()).map_err(RpcError::Io)?;
        write_packed_seq(&mut inner.writer, args).map_err(RpcError::Io)?;

        let mut vals = inner.drive_to_return(true)?;
        if vals.len() != 1 {
            return Err(RpcError::Protocol(format!(
                "syscall {code:?} returned {} values, expected 1",
                vals.len()
            )));
        }
        Ok(vals.remove(0))
    }

    /// Copy `from.len()` bytes into the remote tensor `to`, starting at
    /// its byte offset. Single packet; see
    /// [`ClientSession`](crate::client::ClientSession) for chunking.
    pub fn copy_to_remote(&self, from: &[u8], to: &TensorMeta) -> RpcResult<()> {
        let nbytes = from.len() as u64;
        check_copy_bounds("copy_to_remote", to, nbytes)?;
        let mut inner = self.lock();
        inner.ensure_open()?;

        let body = copy_packet_overhead(to) + nbytes;
        write_u64(&mut inner.writer, body).map_err(RpcError::Io)?;
        write_u32(&mut inner.writer, Opcode::CopyToRemote.as_u32()).map_err(RpcError::Io)?;
        write_tensor(&mut inner.writer, to).map_err(RpcError::Io)?;
        write_u64(&mut inner.writer, nbytes).map_err(RpcError::Io)?;
        inner.writer.write_all(from).map_err(RpcError::Io)?;

        inner.drive_to_return(true).map(|_| ())
    }

    /// Copy `to.len()` bytes out of the remote tensor `from`, starting
    /// at its byte offset.
    pub fn copy_from_remote(&self, from: &TensorMeta, to: &mut [u8]) -> RpcResult<()> {
        let nbytes = to.len() as u64;
        check_copy_bounds("copy_from_remote", from, nbytes)?;
        let mut inner = self.lock();
        inner.ensure_open()?;

        let body = copy_packet_overhead(from);
        write_u64(&mut inner.writer, body).map_err(RpcError::Io)?;
        write_u32(&mut inner.writer, Opcode::CopyFromRemote.as_u32()).map_err(RpcError::Io)?;
        write_tensor(&mut inner.writer, from).map_err(RpcError::Io)?;
        write_u64(&mut inner.writer, nbytes).map_err(RpcError::Io)?;

        match inner.drive(true, &mut |_| {})? {
            Event::CopyAck => {}
            ev => return Err(unexpected_event("copy acknowledgement", ev)),
        }
        inner.read_copy_ack(to)
    }

    /// Serve the peer until it shuts the connection down.
    pub fn server_loop(&self) -> RpcResult<()> {
        let mut inner = self.lock();
        if let Some(hook) = inner.on_server_start.as_mut() {
            hook();
        }
        info!(endpoint = %self.name, "server loop started");

        let result = match inner.drive(false, &mut |_| {}) {
            Ok(Event::Shutdown) => Ok(()),
            Ok(ev) => Err(unexpected_event("shutdown", ev)),
            Err(e) => Err(e),
        };

        if let Some(hook) = inner.on_server_shutdown.as_mut() {
            hook();
        }
        inner.channel = None;
        info!(endpoint = %self.name, ok = result.is_ok(), "server loop exited");
        result
    }

    /// Non-blocking server step for event-loop embeddings.
    ///
    /// Feeds `in_bytes` to the state machine and, when bit 1 of
    /// `event_flag` is set, flushes pending output. Returns `0` when
    /// the peer shut down, `2` when output is still pending (call again
    /// to write), and `1` when the server should read more input.
    pub fn server_async_io_event_handler(
        &self,
        in_bytes: &[u8],
        event_flag: i32,
    ) -> RpcResult<i32> {
        let mut inner = self.lock();
        let mut event = Event::Pending;
        if !in_bytes.is_empty() {
            inner.reader.write(in_bytes);
            event = inner.advance(false, true, &mut |_| {})?;
        }
        if event_flag & 2 != 0 && inner.writer.bytes_available() > 0 {
            inner.flush_writer()?;
        }
        match event {
            Event::Return | Event::CopyAck => Err(unexpected_event("server-side event", event)),
            Event::Shutdown => Ok(0),
            Event::Pending => {
                if inner.writer.bytes_available() > 0 {
                    Ok(2)
                } else {
                    Ok(1)
                }
            }
        }
    }

    /// Release a handle owned by the peer. Used by remote-object refs
    /// on drop; a shut-down endpoint reports `Closed`.
    pub(crate) fn free_remote_handle(&self, handle: u64) -> RpcResult<()> {
        self.syscall_remote(Opcode::FreeHandle, &[RpcValue::Object(handle)])
            .map(|_| ())
    }

    /// Best-effort shutdown: emit a `Shutdown` packet, flush what the
    /// channel will take, release the channel. Safe to call twice.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.channel.is_none() {
            return;
        }
        debug!(endpoint = %self.name, "shutting down");
        let _ = write_u64(&mut inner.writer, 4);
        let _ = write_u32(&mut inner.writer, Opcode::Shutdown.as_u32());
        if let Err(e) = inner.flush_writer() {
            debug!(endpoint = %self.name, error = %e, "flush during shutdown failed");
        }
        inner.channel = None;
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn ensure_open(&self) -> RpcResult<()> {
        if self.channel.is_none() {
            return Err(RpcError::Closed("endpoint has been shut down".into()));
        }
        Ok(())
    }

    /// Push everything buffered in the writer to the channel.
    fn flush_writer(&mut self) -> RpcResult<()> {
        let channel = match self.channel.as_mut() {
            Some(c) => c,
            None => return Err(RpcError::Closed("endpoint has been shut down".into())),
        };
        flush_ring(channel.as_mut(), &mut self.writer).map_err(RpcError::Io)
    }

    /// One handler advance over the current buffers.
    fn advance(
        &mut self,
        client_mode: bool,
        async_server_mode: bool,
        set_return: &mut dyn FnMut(Vec<RpcValue>),
    ) -> RpcResult<Event> {
        let Inner {
            channel,
            reader,
            writer,
            handler,
            ..
        } = self;
        let mut flush = |w: &mut RingBuffer| -> std::io::Result<()> {
            match channel.as_mut() {
                Some(c) => flush_ring(c.as_mut(), w),
                None => Ok(()),
            }
        };
        let mut io = HandlerIo {
            reader,
            writer,
            flush: &mut flush,
        };
        handler.handle_next_event(&mut io, client_mode, async_server_mode, set_return)
    }

    /// The drive loop: flush, fill, advance, until a terminal event.
    fn drive(
        &mut self,
        client_mode: bool,
        set_return: &mut dyn FnMut(Vec<RpcValue>),
    ) -> RpcResult<Event> {
        loop {
            self.flush_writer()?;
            let needed = self.handler.bytes_needed(&self.reader);
            if needed > 0 {
                let channel = match self.channel.as_mut() {
                    Some(c) => c,
                    None => return Err(RpcError::Closed("endpoint has been shut down".into())),
                };
                let n = self
                    .reader
                    .write_with_callback(needed, |buf| channel.recv(buf))
                    .map_err(RpcError::Io)?;
                if n == 0 {
                    if self.handler.can_clean_shutdown() {
                        return Ok(Event::Shutdown);
                    }
                    return Err(RpcError::Closed(format!(
                        "channel closed before {needed} needed bytes arrived"
                    )));
                }
            }
            match self.advance(client_mode, false, set_return)? {
                Event::Pending => continue,
                terminal => return Ok(terminal),
            }
        }
    }

    /// Drive until the peer's `Return`, yielding the packed results.
    fn drive_to_return(&mut self, client_mode: bool) -> RpcResult<Vec<RpcValue>> {
        let mut ret: Option<Vec<RpcValue>> = None;
        match self.drive(client_mode, &mut |vals| ret = Some(vals))? {
            Event::Return => Ok(ret.take().unwrap_or_default()),
            ev => Err(unexpected_event("return", ev)),
        }
    }

    /// Consume a buffered `CopyAck` payload and return to idle.
    fn read_copy_ack(&mut self, out: &mut [u8]) -> RpcResult<()> {
        let Inner {
            channel,
            reader,
            writer,
            handler,
            ..
        } = self;
        let mut flush = |w: &mut RingBuffer| -> std::io::Result<()> {
            match channel.as_mut() {
                Some(c) => flush_ring(c.as_mut(), w),
                None => Ok(()),
            }
        };
        let mut io = HandlerIo {
            reader,
            writer,
            flush: &mut flush,
        };
        handler.read_copy_ack_payload(&mut io, out)?;
        handler.finish_copy_ack(&mut io)
    }
}

fn flush_ring(channel: &mut dyn Channel, writer: &mut RingBuffer) -> std::io::Result<()> {
    while writer.bytes_available() > 0 {
        let n = writer.read_with_callback(writer.bytes_available(), |bytes| channel.send(bytes))?;
        if n == 0 {
            // Peer stopped accepting; the reader side will surface it.
            warn!("channel accepted no bytes while flushing");
            break;
        }
    }
    Ok(())
}

fn unexpected_event(wanted: &str, got: Event) -> RpcError {
    RpcError::Protocol(format!("expected {wanted}, got {got:?} event"))
}

fn check_copy_bounds(op: &str, tensor: &TensorMeta, nbytes: u64) -> RpcResult<()> {
    let total = tensor.total_bytes();
    let end = tensor.byte_offset.checked_add(nbytes);
    if end.is_none() || end.is_some_and(|e| e > total) {
        return Err(RpcError::InvalidArgument(format!(
            "{op}: region overflows tensor (byte_offset={}, nbytes={nbytes}, total={total})",
            tensor.byte_offset
        )));
    }
    Ok(())
}

/// Client-side argument validation: nothing carrying a session-masked
/// device may hit the wire.
fn validate_outgoing(args: &[RpcValue]) -> RpcResult<()> {
    validate_values(args).map_err(|e| RpcError::InvalidArgument(e.message))
}
