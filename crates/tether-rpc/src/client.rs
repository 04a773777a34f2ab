//! Client session adapter.
//!
//! Presents an endpoint as a uniform session + device API. Two things
//! live here beyond delegation: the owning remote-resource wrappers
//! (whose drops release the peer-side handle), and the chunked copy
//! path that splits transfers against the peer's negotiated maximum
//! packet size. This is the only place that loops over the wire.
//!
//! The adapter also implements [`RpcSession`], so an endpoint can serve
//! one connection by proxying into another; that is what carries
//! multi-hop setups, where a handle minted two hops away is forwarded
//! verbatim and freed by its true owner.

use std::sync::{Arc, Mutex};

use tracing::debug;

use tether_wire::{
    DataType, Device, Opcode, RpcValue, TensorMeta, copy_packet_overhead,
    DEFAULT_MAX_TRANSFER_BYTES, MAX_TRANSFER_SIZE_FUNC,
};

use crate::endpoint::Endpoint;
use crate::error::{RpcError, RpcResult};
use crate::session::{RpcSession, SessionResult, DEV_ATTR_EXISTS};

/// A remote function handle, released on drop.
pub struct RemoteFunction {
    handle: u64,
    endpoint: Arc<Endpoint>,
}

impl RemoteFunction {
    /// The raw peer-owned handle.
    pub fn handle(&self) -> u64 {
        self.handle
    }
}

impl Drop for RemoteFunction {
    fn drop(&mut self) {
        free_on_drop(&self.endpoint, self.handle, "function");
    }
}

/// A remote device allocation, released on drop via `DevFreeData`.
pub struct RemoteBuffer {
    handle: u64,
    device: Device,
    endpoint: Arc<Endpoint>,
}

impl RemoteBuffer {
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Tensor metadata describing this allocation.
    pub fn tensor(&self, shape: Vec<i64>, dtype: DataType) -> TensorMeta {
        TensorMeta {
            device: self.device,
            data: self.handle,
            shape,
            dtype,
            byte_offset: 0,
        }
    }
}

impl Drop for RemoteBuffer {
    fn drop(&mut self) {
        let result = self.endpoint.syscall_remote(
            Opcode::DevFreeData,
            &[
                RpcValue::Device(self.device),
                RpcValue::Object(self.handle),
            ],
        );
        if let Err(e) = result {
            debug!(handle = self.handle, error = %e, "dropping remote buffer without peer free");
        }
    }
}

/// A remote device stream, released on drop via `DevFreeStream`.
pub struct RemoteStream {
    handle: u64,
    device: Device,
    endpoint: Arc<Endpoint>,
}

impl RemoteStream {
    pub fn handle(&self) -> u64 {
        self.handle
    }
}

impl Drop for RemoteStream {
    fn drop(&mut self) {
        let result = self.endpoint.syscall_remote(
            Opcode::DevFreeStream,
            &[
                RpcValue::Device(self.device),
                RpcValue::Object(self.handle),
            ],
        );
        if let Err(e) = result {
            debug!(handle = self.handle, error = %e, "dropping remote stream without peer free");
        }
    }
}

fn free_on_drop(endpoint: &Endpoint, handle: u64, what: &str) {
    if let Err(e) = endpoint.free_remote_handle(handle) {
        // A ref outliving the connection is fine; the peer's resources
        // died with it.
        debug!(handle, what, error = %e, "dropping remote ref without peer free");
    }
}

/// Session + device API over a client endpoint.
pub struct ClientSession {
    endpoint: Arc<Endpoint>,
    /// Peer's maximum transfer packet size, negotiated on first use.
    max_transfer: Mutex<Option<u64>>,
}

impl ClientSession {
    pub fn new(endpoint: Arc<Endpoint>) -> Self {
        ClientSession {
            endpoint,
            max_transfer: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Look up a remote function by name.
    pub fn find_function(&self, name: &str) -> RpcResult<Option<RemoteFunction>> {
        match self
            .endpoint
            .syscall_remote(Opcode::GetGlobalFunc, &[RpcValue::Str(name.to_string())])?
        {
            RpcValue::Null => Ok(None),
            value => Ok(Some(RemoteFunction {
                handle: value.expect_handle()?,
                endpoint: self.endpoint.clone(),
            })),
        }
    }

    /// Invoke a remote function.
    pub fn call_remote(&self, func: &RemoteFunction, args: &[RpcValue]) -> RpcResult<Vec<RpcValue>> {
        self.endpoint.call_func(func.handle, args)
    }

    /// Allocate device memory on the peer.
    pub fn alloc_buffer(
        &self,
        dev: Device,
        nbytes: u64,
        alignment: u64,
        dtype_hint: DataType,
    ) -> RpcResult<RemoteBuffer> {
        let value = self.endpoint.syscall_remote(
            Opcode::DevAllocData,
            &[
                RpcValue::Device(dev),
                RpcValue::Int(nbytes as i64),
                RpcValue::Int(alignment as i64),
                RpcValue::DataType(dtype_hint),
            ],
        )?;
        Ok(RemoteBuffer {
            handle: value.expect_handle()?,
            device: dev,
            endpoint: self.endpoint.clone(),
        })
    }

    /// Create a device stream on the peer.
    pub fn open_stream(&self, dev: Device) -> RpcResult<RemoteStream> {
        let value = self
            .endpoint
            .syscall_remote(Opcode::DevCreateStream, &[RpcValue::Device(dev)])?;
        Ok(RemoteStream {
            handle: value.expect_handle()?,
            device: dev,
            endpoint: self.endpoint.clone(),
        })
    }

    /// Whether a device exists on the peer. Host devices always exist;
    /// no round trip is spent on them.
    pub fn device_exists(&self, dev: Device) -> RpcResult<bool> {
        if dev.is_host() {
            return Ok(true);
        }
        let value = self.endpoint.syscall_remote(
            Opcode::DevGetAttr,
            &[RpcValue::Device(dev), RpcValue::Int(DEV_ATTR_EXISTS)],
        )?;
        Ok(value.expect_int()? != 0)
    }

    /// The peer's maximum transfer packet size. Queried once via
    /// `server.max_transfer_size`; a peer without that function gets
    /// the built-in default.
    pub fn max_transfer_size(&self) -> RpcResult<u64> {
        let mut cached = self
            .max_transfer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(n) = *cached {
            return Ok(n);
        }
        let negotiated = match self.find_function(MAX_TRANSFER_SIZE_FUNC)? {
            None => DEFAULT_MAX_TRANSFER_BYTES,
            Some(func) => {
                let vals = self.call_remote(&func, &[])?;
                let n = vals
                    .first()
                    .ok_or_else(|| {
                        RpcError::Protocol("empty reply to max transfer size query".into())
                    })?
                    .expect_int()?;
                if n <= 0 {
                    return Err(RpcError::Protocol(format!(
                        "peer reported non-positive max transfer size {n}"
                    )));
                }
                n as u64
            }
        };
        debug!(max_transfer = negotiated, "negotiated transfer packet cap");
        *cached = Some(negotiated);
        Ok(negotiated)
    }

    /// Copy local bytes into a remote tensor region, split into packets
    /// that respect the negotiated maximum size.
    pub fn copy_to(&self, data: &[u8], dst: &TensorMeta) -> RpcResult<()> {
        let block = self.transfer_block_size(dst)?;
        let mut chunk = dst.clone();
        let mut off = 0u64;
        while off < data.len() as u64 {
            let take = block.min(data.len() as u64 - off);
            chunk.byte_offset = dst.byte_offset + off;
            self.endpoint
                .copy_to_remote(&data[off as usize..(off + take) as usize], &chunk)?;
            off += take;
        }
        Ok(())
    }

    /// Copy a remote tensor region into local bytes, split into packets
    /// that respect the negotiated maximum size.
    pub fn copy_from(&self, src: &TensorMeta, out: &mut [u8]) -> RpcResult<()> {
        let block = self.transfer_block_size(src)?;
        let mut chunk = src.clone();
        let mut off = 0u64;
        while off < out.len() as u64 {
            let take = block.min(out.len() as u64 - off);
            chunk.byte_offset = src.byte_offset + off;
            self.endpoint
                .copy_from_remote(&chunk, &mut out[off as usize..(off + take) as usize])?;
            off += take;
        }
        Ok(())
    }

    fn transfer_block_size(&self, tensor: &TensorMeta) -> RpcResult<u64> {
        let overhead = copy_packet_overhead(tensor);
        let max = self.max_transfer_size()?;
        if max <= overhead {
            return Err(RpcError::InvalidArgument(format!(
                "negotiated max packet size {max} cannot fit the {overhead}-byte copy overhead"
            )));
        }
        Ok(max - overhead)
    }

    /// Shut the underlying endpoint down.
    pub fn shutdown(&self) {
        self.endpoint.shutdown();
    }
}

impl RpcSession for ClientSession {
    fn get_function(&mut self, name: &str) -> SessionResult<Option<u64>> {
        // Forwarding returns the raw handle: a proxy must not own what
        // it merely relays.
        match self
            .endpoint
            .syscall_remote(Opcode::GetGlobalFunc, &[RpcValue::Str(name.to_string())])?
        {
            RpcValue::Null => Ok(None),
            value => Ok(Some(value.expect_handle().map_err(RpcError::from)?)),
        }
    }

    fn call(&mut self, func: u64, args: Vec<RpcValue>) -> SessionResult<Vec<RpcValue>> {
        Ok(self.endpoint.call_func(func, &args)?)
    }

    fn free_handle(&mut self, handle: u64) -> SessionResult<()> {
        Ok(self.endpoint.free_remote_handle(handle)?)
    }

    fn read_tensor(&mut self, tensor: &TensorMeta, out: &mut [u8]) -> SessionResult<()> {
        Ok(self.copy_from(tensor, out)?)
    }

    fn write_tensor(&mut self, tensor: &TensorMeta, data: &[u8]) -> SessionResult<()> {
        Ok(self.copy_to(data, tensor)?)
    }

    fn set_device(&mut self, dev: Device) -> SessionResult<()> {
        self.endpoint
            .syscall_remote(Opcode::DevSetDevice, &[RpcValue::Device(dev)])?;
        Ok(())
    }

    fn get_attr(&mut self, dev: Device, kind: i64) -> SessionResult<RpcValue> {
        if dev.is_host() && kind == DEV_ATTR_EXISTS {
            return Ok(RpcValue::Int(1));
        }
        Ok(self.endpoint.syscall_remote(
            Opcode::DevGetAttr,
            &[RpcValue::Device(dev), RpcValue::Int(kind)],
        )?)
    }

    fn alloc_data(
        &mut self,
        dev: Device,
        nbytes: u64,
        alignment: u64,
        dtype_hint: DataType,
    ) -> SessionResult<u64> {
        let value = self.endpoint.syscall_remote(
            Opcode::DevAllocData,
            &[
                RpcValue::Device(dev),
                RpcValue::Int(nbytes as i64),
                RpcValue::Int(alignment as i64),
                RpcValue::DataType(dtype_hint),
            ],
        )?;
        Ok(value.expect_handle().map_err(RpcError::from)?)
    }

    fn alloc_data_with_scope(
        &mut self,
        tensor: &TensorMeta,
        scope: Option<&str>,
    ) -> SessionResult<u64> {
        let scope_val = match scope {
            Some(s) => RpcValue::Str(s.to_string()),
            None => RpcValue::Null,
        };
        let value = self.endpoint.syscall_remote(
            Opcode::DevAllocDataWithScope,
            &[RpcValue::Tensor(tensor.clone()), scope_val],
        )?;
        Ok(value.expect_handle().map_err(RpcError::from)?)
    }

    fn free_data(&mut self, dev: Device, ptr: u64) -> SessionResult<()> {
        self.endpoint.syscall_remote(
            Opcode::DevFreeData,
            &[RpcValue::Device(dev), RpcValue::Object(ptr)],
        )?;
        Ok(())
    }

    fn copy_among(&mut self, from: &TensorMeta, to: &TensorMeta, stream: u64) -> SessionResult<()> {
        self.endpoint.syscall_remote(
            Opcode::CopyAmongRemote,
            &[
                RpcValue::Tensor(from.clone()),
                RpcValue::Tensor(to.clone()),
                RpcValue::Object(stream),
            ],
        )?;
        Ok(())
    }

    fn create_stream(&mut self, dev: Device) -> SessionResult<u64> {
        let value = self
            .endpoint
            .syscall_remote(Opcode::DevCreateStream, &[RpcValue::Device(dev)])?;
        Ok(value.expect_handle().map_err(RpcError::from)?)
    }

    fn free_stream(&mut self, dev: Device, stream: u64) -> SessionResult<()> {
        self.endpoint.syscall_remote(
            Opcode::DevFreeStream,
            &[RpcValue::Device(dev), RpcValue::Object(stream)],
        )?;
        Ok(())
    }

    fn stream_sync(&mut self, dev: Device, stream: u64) -> SessionResult<()> {
        self.endpoint.syscall_remote(
            Opcode::DevStreamSync,
            &[RpcValue::Device(dev), RpcValue::Object(stream)],
        )?;
        Ok(())
    }

    fn set_stream(&mut self, dev: Device, stream: u64) -> SessionResult<()> {
        self.endpoint.syscall_remote(
            Opcode::DevSetStream,
            &[RpcValue::Device(dev), RpcValue::Object(stream)],
        )?;
        Ok(())
    }

    fn current_stream(&mut self, dev: Device) -> SessionResult<u64> {
        let value = self
            .endpoint
            .syscall_remote(Opcode::DevGetCurrentStream, &[RpcValue::Device(dev)])?;
        Ok(value.expect_handle().map_err(RpcError::from)?)
    }
}
