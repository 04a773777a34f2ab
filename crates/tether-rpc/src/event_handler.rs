//! The protocol state machine.
//!
//! One handler drives both directions of a connection: it consumes the
//! reader buffer, emits replies into the writer buffer, and never
//! blocks. The drive loop in [`crate::endpoint`] feeds it channel bytes
//! and acts on the terminal events it reports.
//!
//! # States
//!
//! ```text
//! InitHeader ──> RecvPacketNumBytes <──────────────┐
//!                    │        ▲                    │
//!                    ▼        │ (reply written)    │
//!               ProcessPacket ┼──> WaitForAsyncCallback
//!                    │        │
//!                    ├──> ReturnReceived ──> (Return event)
//!                    ├──> CopyAckReceived ─> (CopyAck event, finish_copy_ack)
//!                    └──> ShutdownReceived ─> (Shutdown event)
//! ```
//!
//! # Invariants
//!
//! - `pending_request_bytes` always equals the bytes the machine still
//!   needs before it can advance; every transition except into
//!   `CopyAckReceived` requires it to be zero.
//! - Entering `RecvPacketNumBytes` requests 8 bytes (the next length
//!   prefix) and recycles the arena, exactly once per packet.
//! - Crossing `WaitForAsyncCallback` in either direction flushes the
//!   writer so the peer is never starved around a long server-side
//!   operation, and no further input packet is processed until the
//!   operation's reply has been written.

use std::collections::HashMap;
use std::io::{Read, Write};

use tracing::{debug, trace, warn};

use tether_wire::{
    codec::{read_u32, read_u64, write_u32, write_u64},
    packed_len, read_packed_seq, read_tensor, write_packed_seq, Opcode, RpcValue, TensorMeta,
    WireError, PROTOCOL_VERSION, TO_INIT_KEY,
};

use crate::arena::Arena;
use crate::config::EndpointConfig;
use crate::error::{RpcError, RpcResult};
use crate::local_session::LocalSession;
use crate::ring_buffer::RingBuffer;
use crate::session::{RpcSession, SessionConstructor, SessionResult};

/// Handler state; see the module docs for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    InitHeader,
    RecvPacketNumBytes,
    ProcessPacket,
    WaitForAsyncCallback,
    ReturnReceived,
    CopyAckReceived,
    ShutdownReceived,
}

/// What a round of event handling produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    /// Need more bytes (or waiting on an async completion).
    Pending,
    /// A packed return value arrived; `set_return` has been invoked.
    Return,
    /// A copy acknowledgement arrived; its payload is still buffered
    /// for [`EventHandler::read_copy_ack_payload`].
    CopyAck,
    /// The peer shut the connection down.
    Shutdown,
}

/// Buffer and flush access the handler borrows for one advance.
pub(crate) struct HandlerIo<'a> {
    pub reader: &'a mut RingBuffer,
    pub writer: &'a mut RingBuffer,
    pub flush: &'a mut dyn FnMut(&mut RingBuffer) -> std::io::Result<()>,
}

/// Reader over the incoming ring buffer that debits
/// `pending_request_bytes` for every byte consumed, so a packet body
/// can never be over-read.
struct TrackedReader<'a> {
    rb: &'a mut RingBuffer,
    pending: &'a mut usize,
}

impl Read for TrackedReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let cap = out.len().min(*self.pending);
        let n = Read::read(&mut *self.rb, &mut out[..cap])?;
        *self.pending -= n;
        Ok(n)
    }
}

/// Event-driven handler for one endpoint.
pub(crate) struct EventHandler {
    state: State,
    pending_request_bytes: usize,
    init_header_step: u8,
    init_key_len: usize,
    client_mode: bool,
    async_server_mode: bool,
    arena: Arena,
    serving: Option<Box<dyn RpcSession>>,
    constructors: HashMap<String, SessionConstructor>,
    default_session: Box<dyn FnMut() -> Box<dyn RpcSession> + Send>,
    name: String,
    remote_key: String,
}

impl EventHandler {
    pub fn new(config: &EndpointConfig) -> Self {
        let max_transfer = config.max_transfer_bytes;
        let to_init = config.remote_key == TO_INIT_KEY;
        EventHandler {
            state: if to_init {
                State::InitHeader
            } else {
                State::RecvPacketNumBytes
            },
            // InitHeader first reads an i32 key length; idle reads the
            // next u64 packet length.
            pending_request_bytes: if to_init { 4 } else { 8 },
            init_header_step: 0,
            init_key_len: 0,
            client_mode: false,
            async_server_mode: false,
            arena: Arena::new(),
            serving: None,
            constructors: HashMap::new(),
            default_session: Box::new(move || Box::new(LocalSession::new(max_transfer))),
            name: config.name.clone(),
            remote_key: if to_init {
                String::new()
            } else {
                config.remote_key.clone()
            },
        }
    }

    /// Bytes the channel must still deliver before the next advance.
    pub fn bytes_needed(&self, reader: &RingBuffer) -> usize {
        self.pending_request_bytes
            .saturating_sub(reader.bytes_available())
    }

    fn ready(&self, reader: &RingBuffer) -> bool {
        reader.bytes_available() >= self.pending_request_bytes
    }

    /// True only at a packet boundary, where peer EOF is a clean
    /// shutdown rather than a transport failure.
    pub fn can_clean_shutdown(&self) -> bool {
        self.state == State::RecvPacketNumBytes
    }

    /// The remote key: configured, or read from the channel when
    /// constructed with the init sentinel.
    pub fn remote_key(&self) -> &str {
        &self.remote_key
    }

    pub fn set_default_session(&mut self, f: Box<dyn FnMut() -> Box<dyn RpcSession> + Send>) {
        self.default_session = f;
    }

    pub fn register_session_constructor(&mut self, name: &str, ctor: SessionConstructor) {
        self.constructors.insert(name.to_string(), ctor);
    }

    fn request_bytes(&mut self, reader: &mut RingBuffer, nbytes: usize) {
        self.pending_request_bytes += nbytes;
        reader.reserve(self.pending_request_bytes);
    }

    /// Drive the state machine as far as the buffered bytes allow.
    ///
    /// `set_return` fires exactly once when a packed return value
    /// arrives. Terminal events hand control back to the drive loop.
    pub fn handle_next_event(
        &mut self,
        io: &mut HandlerIo<'_>,
        client_mode: bool,
        async_server_mode: bool,
        set_return: &mut dyn FnMut(Vec<RpcValue>),
    ) -> RpcResult<Event> {
        self.client_mode = client_mode;
        self.async_server_mode = async_server_mode;

        loop {
            if !self.ready(io.reader) {
                return Ok(Event::Pending);
            }
            match self.state {
                State::InitHeader => self.handle_init_header(io)?,
                State::RecvPacketNumBytes => {
                    let packet_nbytes = self.read_u64(io)?;
                    if packet_nbytes != 0 {
                        self.switch_to(io, State::ProcessPacket)?;
                        self.request_bytes(io.reader, packet_nbytes as usize);
                    } else {
                        // Zero-length packets are keepalive no-ops.
                        self.switch_to(io, State::RecvPacketNumBytes)?;
                    }
                }
                State::ProcessPacket => self.handle_process_packet(io, set_return)?,
                State::WaitForAsyncCallback => return Ok(Event::Pending),
                State::ReturnReceived => {
                    self.switch_to(io, State::RecvPacketNumBytes)?;
                    return Ok(Event::Return);
                }
                State::CopyAckReceived => return Ok(Event::CopyAck),
                State::ShutdownReceived => return Ok(Event::Shutdown),
            }
        }
    }

    /// Copy a received `CopyAck` payload straight into the caller's
    /// destination buffer.
    pub fn read_copy_ack_payload(
        &mut self,
        io: &mut HandlerIo<'_>,
        out: &mut [u8],
    ) -> RpcResult<()> {
        if self.state != State::CopyAckReceived {
            return Err(RpcError::Protocol(
                "no copy acknowledgement is pending".into(),
            ));
        }
        let mut r = TrackedReader {
            rb: io.reader,
            pending: &mut self.pending_request_bytes,
        };
        r.read_exact(out).map_err(WireError::Io)?;
        Ok(())
    }

    /// Leave `CopyAckReceived` once the payload has been consumed.
    pub fn finish_copy_ack(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<()> {
        self.switch_to(io, State::RecvPacketNumBytes)
    }

    // -- state transitions --------------------------------------------------

    fn switch_to(&mut self, io: &mut HandlerIo<'_>, next: State) -> RpcResult<()> {
        if next != State::CopyAckReceived && self.pending_request_bytes != 0 {
            return Err(RpcError::Protocol(format!(
                "transition to {next:?} with {} unread body bytes",
                self.pending_request_bytes
            )));
        }
        // Keep the peer fed while a server-side operation is in flight,
        // and push its reply out as soon as the operation completes.
        if self.state == State::WaitForAsyncCallback || next == State::WaitForAsyncCallback {
            (io.flush)(io.writer)?;
        }
        trace!(endpoint = %self.name, from = ?self.state, to = ?next, "state transition");
        self.state = next;
        if next == State::RecvPacketNumBytes {
            self.request_bytes(io.reader, 8);
            self.arena.recycle_all();
        }
        Ok(())
    }

    fn enter_wait(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<()> {
        self.switch_to(io, State::WaitForAsyncCallback)
    }

    // -- tracked reads ------------------------------------------------------

    fn tracked<'a>(&'a mut self, io: &'a mut HandlerIo<'_>) -> TrackedReader<'a> {
        TrackedReader {
            rb: io.reader,
            pending: &mut self.pending_request_bytes,
        }
    }

    fn read_u32(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<u32> {
        let mut r = self.tracked(io);
        Ok(read_u32(&mut r)?)
    }

    fn read_u64(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<u64> {
        let mut r = self.tracked(io);
        Ok(read_u64(&mut r)?)
    }

    fn read_bytes(&mut self, io: &mut HandlerIo<'_>, len: u64) -> RpcResult<Vec<u8>> {
        let mut r = self.tracked(io);
        let mut buf = Vec::new();
        let got = (&mut r).take(len).read_to_end(&mut buf).map_err(WireError::Io)? as u64;
        if got != len {
            return Err(RpcError::Wire(WireError::Truncated {
                what: "packet field",
                expected: len,
                got,
            }));
        }
        Ok(buf)
    }

    fn recv_packed_seq(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<Vec<RpcValue>> {
        let mut r = self.tracked(io);
        Ok(read_packed_seq(&mut r)?)
    }

    fn recv_tensor(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<TensorMeta> {
        let mut r = self.tracked(io);
        Ok(read_tensor(&mut r)?)
    }

    // -- replies ------------------------------------------------------------

    fn return_packed(&mut self, io: &mut HandlerIo<'_>, vals: &[RpcValue]) -> RpcResult<()> {
        let body = 4 + packed_len(vals);
        write_u64(io.writer, body).map_err(RpcError::Io)?;
        write_u32(io.writer, Opcode::Return.as_u32()).map_err(RpcError::Io)?;
        write_packed_seq(io.writer, vals).map_err(RpcError::Io)?;
        Ok(())
    }

    fn return_void(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<()> {
        self.return_packed(io, &[RpcValue::Null])
    }

    fn return_exception(&mut self, io: &mut HandlerIo<'_>, msg: &str) -> RpcResult<()> {
        debug!(endpoint = %self.name, error = %msg, "returning exception to peer");
        let vals = [RpcValue::Str(msg.to_string())];
        let body = 4 + packed_len(&vals);
        write_u64(io.writer, body).map_err(RpcError::Io)?;
        write_u32(io.writer, Opcode::Exception.as_u32()).map_err(RpcError::Io)?;
        write_packed_seq(io.writer, &vals).map_err(RpcError::Io)?;
        Ok(())
    }

    // -- packet handlers ----------------------------------------------------

    fn handle_init_header(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<()> {
        if self.init_header_step == 0 {
            let len = self.read_u32(io)? as i32;
            if len < 0 {
                return Err(RpcError::Protocol(format!(
                    "negative init key length {len}"
                )));
            }
            self.init_key_len = len as usize;
            self.init_header_step = 1;
            self.request_bytes(io.reader, self.init_key_len);
            return Ok(());
        }
        let key = self.read_bytes(io, self.init_key_len as u64)?;
        self.remote_key = String::from_utf8(key).map_err(WireError::from)?;
        debug!(endpoint = %self.name, remote_key = %self.remote_key, "init handshake complete");
        self.switch_to(io, State::RecvPacketNumBytes)
    }

    fn handle_process_packet(
        &mut self,
        io: &mut HandlerIo<'_>,
        set_return: &mut dyn FnMut(Vec<RpcValue>),
    ) -> RpcResult<()> {
        let code = Opcode::from_u32(self.read_u32(io)?)?;
        trace!(
            endpoint = %self.name,
            ?code,
            client_mode = self.client_mode,
            async_server = self.async_server_mode,
            "packet"
        );
        if code.is_syscall() {
            return self.handle_syscall(io, code);
        }
        match code {
            Opcode::InitServer => self.handle_init_server(io),
            Opcode::CallFunc => self.handle_call_func(io),
            Opcode::CopyFromRemote => self.handle_copy_from_remote(io),
            Opcode::CopyToRemote => self.handle_copy_to_remote(io),
            Opcode::Return | Opcode::Exception => self.handle_return(io, code, set_return),
            Opcode::CopyAck => self.switch_to(io, State::CopyAckReceived),
            Opcode::Shutdown => self.switch_to(io, State::ShutdownReceived),
            other => Err(RpcError::Protocol(format!(
                "unexpected packet opcode {other:?}"
            ))),
        }
    }

    fn handle_return(
        &mut self,
        io: &mut HandlerIo<'_>,
        code: Opcode,
        set_return: &mut dyn FnMut(Vec<RpcValue>),
    ) -> RpcResult<()> {
        let args = self.recv_packed_seq(io)?;
        if code == Opcode::Exception {
            // Reset to idle before surfacing, so the connection stays
            // usable for the next request.
            self.switch_to(io, State::RecvPacketNumBytes)?;
            let msg = args
                .first()
                .ok_or_else(|| RpcError::Protocol("exception packet without message".into()))?
                .expect_str()?;
            return Err(RpcError::from_remote_message(msg));
        }
        set_return(args);
        self.switch_to(io, State::ReturnReceived)
    }

    fn serving_mut(&mut self) -> RpcResult<&mut dyn RpcSession> {
        match self.serving.as_deref_mut() {
            Some(sess) => Ok(sess),
            None => Err(RpcError::Protocol(
                "serving session not initialized; the peer must send InitServer first".into(),
            )),
        }
    }

    fn serving_is_local(&self) -> bool {
        self.serving.as_deref().is_some_and(|s| s.is_local())
    }

    fn handle_call_func(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<()> {
        let handle = self.read_u64(io)?;
        let args = self.recv_packed_seq(io)?;

        self.enter_wait(io)?;
        let result = self
            .serving_mut()?
            .call(handle, args)
            .and_then(|vals| validate_values(&vals).map(|()| vals));
        match result {
            Ok(vals) => self.return_packed(io, &vals)?,
            Err(e) => self.return_exception(io, &e.message)?,
        }
        self.switch_to(io, State::RecvPacketNumBytes)
    }

    fn handle_copy_from_remote(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<()> {
        let tensor = self.recv_tensor(io)?;
        let nbytes = self.read_u64(io)? as usize;
        let elem_bytes = tensor.dtype.elem_bytes().max(1);

        // Host-resident tensors of a local session answer inline;
        // everything else (and every sub-byte element width) stages
        // behind the async state.
        let direct = tensor.device.is_host()
            && self.serving_is_local()
            && tensor.dtype.has_whole_byte_elems()
            && cfg!(target_endian = "little");
        if !direct {
            self.enter_wait(io)?;
        }

        let mut buf = self.arena.staging(nbytes);
        let result = self.serving_mut()?.read_tensor(&tensor, &mut buf);
        let write_result = match result {
            Ok(()) => {
                swap_if_big_endian(&mut buf, elem_bytes);
                write_u64(io.writer, 4 + nbytes as u64)
                    .and_then(|()| write_u32(io.writer, Opcode::CopyAck.as_u32()))
                    .and_then(|()| io.writer.write_all(&buf))
                    .map_err(RpcError::Io)
            }
            Err(e) => self.return_exception(io, &e.message),
        };
        self.arena.restore(buf);
        write_result?;
        self.switch_to(io, State::RecvPacketNumBytes)
    }

    fn handle_copy_to_remote(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<()> {
        let tensor = self.recv_tensor(io)?;
        let nbytes = self.read_u64(io)? as usize;
        let elem_bytes = tensor.dtype.elem_bytes().max(1);

        let mut buf = self.arena.staging(nbytes);
        {
            let mut r = TrackedReader {
                rb: io.reader,
                pending: &mut self.pending_request_bytes,
            };
            r.read_exact(&mut buf).map_err(WireError::Io)?;
        }
        swap_if_big_endian(&mut buf, elem_bytes);

        let direct = tensor.device.is_host()
            && self.serving_is_local()
            && tensor.dtype.has_whole_byte_elems()
            && cfg!(target_endian = "little");
        if !direct {
            self.enter_wait(io)?;
        }

        let result = self.serving_mut()?.write_tensor(&tensor, &buf);
        self.arena.restore(buf);
        match result {
            Ok(()) => self.return_void(io)?,
            Err(e) => self.return_exception(io, &e.message)?,
        }
        self.switch_to(io, State::RecvPacketNumBytes)
    }

    fn handle_init_server(&mut self, io: &mut HandlerIo<'_>) -> RpcResult<()> {
        let ver_len = self.read_u64(io)?;
        let ver_bytes = self.read_bytes(io, ver_len)?;
        let client_ver = String::from_utf8(ver_bytes).map_err(WireError::from)?;
        let args = self.recv_packed_seq(io)?;

        let failure: Option<String> = if self.serving.is_some() {
            Some("server has already been initialized".to_string())
        } else if client_ver != PROTOCOL_VERSION {
            Some(format!(
                "server {:?}: client protocol version mismatch, server protocol={} client protocol={}",
                self.name, PROTOCOL_VERSION, client_ver
            ))
        } else {
            let constructed: Result<Box<dyn RpcSession>, String> = if args.is_empty() {
                Ok((self.default_session)())
            } else {
                let ctor_name = args[0].expect_str()?.to_string();
                match self.constructors.get_mut(&ctor_name) {
                    Some(ctor) => ctor(&args[1..]).map_err(|e| e.message),
                    None => Err(format!("cannot find session constructor {ctor_name:?}")),
                }
            };
            match constructed {
                Ok(sess) => {
                    debug!(endpoint = %self.name, "serving session installed");
                    self.serving = Some(sess);
                    None
                }
                Err(msg) => Some(msg),
            }
        };

        match failure {
            None => self.return_void(io)?,
            Some(msg) => {
                warn!(endpoint = %self.name, error = %msg, "InitServer rejected");
                self.return_exception(io, &msg)?;
            }
        }
        self.switch_to(io, State::RecvPacketNumBytes)
    }

    fn handle_syscall(&mut self, io: &mut HandlerIo<'_>, code: Opcode) -> RpcResult<()> {
        let args = self.recv_packed_seq(io)?;

        // Stream synchronization is the one asynchronous syscall.
        if code == Opcode::DevStreamSync {
            let dev = arg(&args, code, 0)?.expect_device()?;
            let stream = opt_handle(arg(&args, code, 1)?)?;
            self.enter_wait(io)?;
            let result = self.serving_mut()?.stream_sync(dev, stream);
            match result {
                Ok(()) => self.return_void(io)?,
                Err(e) => self.return_exception(io, &e.message)?,
            }
            return self.switch_to(io, State::RecvPacketNumBytes);
        }

        let result = self.dispatch_syscall(code, &args)?;
        match result {
            Ok(value) => self.return_packed(io, &[value])?,
            Err(e) => self.return_exception(io, &e.message)?,
        }
        self.switch_to(io, State::RecvPacketNumBytes)
    }

    /// Run one synchronous syscall. The outer error is fatal (missing or
    /// type-mismatched arguments); the inner error travels back to the
    /// peer as an exception.
    fn dispatch_syscall(
        &mut self,
        code: Opcode,
        args: &[RpcValue],
    ) -> RpcResult<SessionResult<RpcValue>> {
        let sess = match self.serving.as_deref_mut() {
            Some(sess) => sess,
            None => {
                return Err(RpcError::Protocol(
                    "serving session not initialized; the peer must send InitServer first".into(),
                ))
            }
        };
        Ok(match code {
            Opcode::GetGlobalFunc => {
                let name = arg(args, code, 0)?.expect_str()?;
                sess.get_function(name).map(|opt| match opt {
                    Some(handle) => RpcValue::Object(handle),
                    None => RpcValue::Null,
                })
            }
            Opcode::FreeHandle => {
                let handle = arg(args, code, 0)?.expect_handle()?;
                sess.free_handle(handle).map(|()| RpcValue::Null)
            }
            Opcode::DevSetDevice => {
                let dev = arg(args, code, 0)?.expect_device()?;
                sess.set_device(dev).map(|()| RpcValue::Null)
            }
            Opcode::DevGetAttr => {
                let dev = arg(args, code, 0)?.expect_device()?;
                let kind = arg(args, code, 1)?.expect_int()?;
                sess.get_attr(dev, kind)
            }
            Opcode::DevAllocData => {
                let dev = arg(args, code, 0)?.expect_device()?;
                let nbytes = arg(args, code, 1)?.expect_u64()?;
                let alignment = arg(args, code, 2)?.expect_u64()?;
                let dtype_hint = arg(args, code, 3)?.expect_dtype()?;
                sess.alloc_data(dev, nbytes, alignment, dtype_hint)
                    .map(RpcValue::Object)
            }
            Opcode::DevAllocDataWithScope => {
                let tensor = arg(args, code, 0)?.expect_tensor()?;
                let scope = arg(args, code, 1)?.expect_opt_str()?;
                sess.alloc_data_with_scope(tensor, scope)
                    .map(RpcValue::Object)
            }
            Opcode::DevFreeData => {
                let dev = arg(args, code, 0)?.expect_device()?;
                let ptr = arg(args, code, 1)?.expect_handle()?;
                sess.free_data(dev, ptr).map(|()| RpcValue::Null)
            }
            Opcode::CopyAmongRemote => {
                let from = arg(args, code, 0)?.expect_tensor()?;
                let to = arg(args, code, 1)?.expect_tensor()?;
                let stream = opt_handle(arg(args, code, 2)?)?;
                sess.copy_among(from, to, stream).map(|()| RpcValue::Null)
            }
            Opcode::DevCreateStream => {
                let dev = arg(args, code, 0)?.expect_device()?;
                sess.create_stream(dev).map(RpcValue::Object)
            }
            Opcode::DevFreeStream => {
                let dev = arg(args, code, 0)?.expect_device()?;
                let stream = opt_handle(arg(args, code, 1)?)?;
                sess.free_stream(dev, stream).map(|()| RpcValue::Null)
            }
            Opcode::DevSetStream => {
                let dev = arg(args, code, 0)?.expect_device()?;
                let stream = opt_handle(arg(args, code, 1)?)?;
                sess.set_stream(dev, stream).map(|()| RpcValue::Null)
            }
            Opcode::DevGetCurrentStream => {
                let dev = arg(args, code, 0)?.expect_device()?;
                sess.current_stream(dev).map(RpcValue::Object)
            }
            other => {
                return Err(RpcError::Protocol(format!(
                    "opcode {other:?} is not a synchronous syscall"
                )))
            }
        })
    }
}

fn arg<'a>(args: &'a [RpcValue], code: Opcode, index: usize) -> RpcResult<&'a RpcValue> {
    args.get(index).ok_or_else(|| {
        RpcError::Protocol(format!("syscall {code:?} is missing argument {index}"))
    })
}

/// Stream arguments may travel as a handle, a plain integer, or null
/// (the default stream).
fn opt_handle(value: &RpcValue) -> RpcResult<u64> {
    match value {
        RpcValue::Null => Ok(0),
        other => Ok(other.expect_handle()?),
    }
}

/// Reject values that cannot travel through the channel. Applied to
/// client-side arguments and to server-side return values alike.
pub(crate) fn validate_values(vals: &[RpcValue]) -> SessionResult<()> {
    for (i, v) in vals.iter().enumerate() {
        let masked = match v {
            RpcValue::Device(dev) => dev.is_session_device(),
            RpcValue::Tensor(t) => t.device.is_session_device(),
            _ => false,
        };
        if masked {
            return Err(crate::session::SessionError::new(format!(
                "cannot pass an RPC-session device through the channel (argument {i})"
            )));
        }
    }
    Ok(())
}

fn swap_if_big_endian(buf: &mut [u8], elem_bytes: usize) {
    if cfg!(target_endian = "big") {
        tether_wire::byte_swap_elems(buf, elem_bytes);
    }
}
