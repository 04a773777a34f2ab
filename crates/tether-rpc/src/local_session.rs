//! The default serving session: host memory, named functions.

use std::collections::HashMap;

use tracing::debug;

use tether_wire::{DataType, Device, RpcValue, TensorMeta, MAX_TRANSFER_SIZE_FUNC};

use crate::session::{RpcSession, SessionError, SessionResult, DEV_ATTR_EXISTS};

/// A function registered with a [`LocalSession`].
pub type RpcFunction = Box<dyn FnMut(&[RpcValue]) -> SessionResult<Vec<RpcValue>> + Send>;

/// Serving session that executes against local host memory.
///
/// Functions are looked up by name; every lookup mints a fresh handle
/// so a peer can hold and free them independently. Device buffers and
/// streams share the same handle namespace.
pub struct LocalSession {
    funcs: HashMap<String, RpcFunction>,
    fn_handles: HashMap<u64, String>,
    allocs: HashMap<u64, Vec<u8>>,
    streams: HashMap<u64, Device>,
    next_handle: u64,
    current_device: Device,
}

impl LocalSession {
    /// A session advertising `max_transfer_bytes` through the
    /// `server.max_transfer_size` built-in.
    pub fn new(max_transfer_bytes: u64) -> Self {
        let mut sess = LocalSession {
            funcs: HashMap::new(),
            fn_handles: HashMap::new(),
            allocs: HashMap::new(),
            streams: HashMap::new(),
            next_handle: 1,
            current_device: Device::host(),
        };
        sess.register(MAX_TRANSFER_SIZE_FUNC, move |_args| {
            Ok(vec![RpcValue::Int(max_transfer_bytes as i64)])
        });
        sess
    }

    /// Register a named function.
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: FnMut(&[RpcValue]) -> SessionResult<Vec<RpcValue>> + Send + 'static,
    {
        self.funcs.insert(name.to_string(), Box::new(f));
    }

    /// The device selected by the last `DevSetDevice`.
    pub fn current_device(&self) -> Device {
        self.current_device
    }

    fn mint_handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn require_host(dev: Device) -> SessionResult<()> {
        if dev.is_host() {
            Ok(())
        } else {
            Err(SessionError::new(format!(
                "no device API for device kind {}",
                dev.kind
            )))
        }
    }

    fn alloc_region(
        &self,
        tensor: &TensorMeta,
        nbytes: usize,
    ) -> SessionResult<(u64, std::ops::Range<usize>)> {
        let buf = self.allocs.get(&tensor.data).ok_or_else(|| {
            SessionError::new(format!("unknown data handle {}", tensor.data))
        })?;
        let start = tensor.byte_offset as usize;
        let end = start
            .checked_add(nbytes)
            .ok_or_else(|| SessionError::new("tensor region overflows"))?;
        if end > buf.len() {
            return Err(SessionError::new(format!(
                "tensor region {}..{} exceeds allocation of {} bytes",
                start,
                end,
                buf.len()
            )));
        }
        Ok((tensor.data, start..end))
    }
}

impl RpcSession for LocalSession {
    fn is_local(&self) -> bool {
        true
    }

    fn get_function(&mut self, name: &str) -> SessionResult<Option<u64>> {
        if !self.funcs.contains_key(name) {
            return Ok(None);
        }
        let handle = self.mint_handle();
        self.fn_handles.insert(handle, name.to_string());
        Ok(Some(handle))
    }

    fn call(&mut self, func: u64, args: Vec<RpcValue>) -> SessionResult<Vec<RpcValue>> {
        let name = self
            .fn_handles
            .get(&func)
            .ok_or_else(|| SessionError::new(format!("unknown function handle {func}")))?
            .clone();
        let f = self
            .funcs
            .get_mut(&name)
            .ok_or_else(|| SessionError::new(format!("function {name:?} was unregistered")))?;
        f(&args)
    }

    fn free_handle(&mut self, handle: u64) -> SessionResult<()> {
        if self.fn_handles.remove(&handle).is_some()
            || self.allocs.remove(&handle).is_some()
            || self.streams.remove(&handle).is_some()
        {
            debug!(handle, "freed handle");
            Ok(())
        } else {
            Err(SessionError::new(format!(
                "unknown or already freed handle {handle}"
            )))
        }
    }

    fn read_tensor(&mut self, tensor: &TensorMeta, out: &mut [u8]) -> SessionResult<()> {
        let (handle, range) = self.alloc_region(tensor, out.len())?;
        out.copy_from_slice(&self.allocs[&handle][range]);
        Ok(())
    }

    fn write_tensor(&mut self, tensor: &TensorMeta, data: &[u8]) -> SessionResult<()> {
        let (handle, range) = self.alloc_region(tensor, data.len())?;
        self.allocs
            .get_mut(&handle)
            .ok_or_else(|| SessionError::new("allocation vanished"))?[range]
            .copy_from_slice(data);
        Ok(())
    }

    fn set_device(&mut self, dev: Device) -> SessionResult<()> {
        Self::require_host(dev)?;
        self.current_device = dev;
        Ok(())
    }

    fn get_attr(&mut self, dev: Device, kind: i64) -> SessionResult<RpcValue> {
        if kind == DEV_ATTR_EXISTS {
            return Ok(RpcValue::Int(if dev.is_host() { 1 } else { 0 }));
        }
        Self::require_host(dev)?;
        Err(SessionError::new(format!(
            "unsupported device attribute kind {kind}"
        )))
    }

    fn alloc_data(
        &mut self,
        dev: Device,
        nbytes: u64,
        _alignment: u64,
        _dtype_hint: DataType,
    ) -> SessionResult<u64> {
        Self::require_host(dev)?;
        let handle = self.mint_handle();
        self.allocs.insert(handle, vec![0u8; nbytes as usize]);
        debug!(handle, nbytes, "allocated data space");
        Ok(handle)
    }

    fn alloc_data_with_scope(
        &mut self,
        tensor: &TensorMeta,
        scope: Option<&str>,
    ) -> SessionResult<u64> {
        match scope {
            None | Some("global") => {
                self.alloc_data(tensor.device, tensor.total_bytes(), 0, tensor.dtype)
            }
            Some(other) => Err(SessionError::new(format!(
                "unsupported memory scope {other:?}"
            ))),
        }
    }

    fn free_data(&mut self, dev: Device, ptr: u64) -> SessionResult<()> {
        Self::require_host(dev)?;
        self.allocs
            .remove(&ptr)
            .map(|_| ())
            .ok_or_else(|| SessionError::new(format!("unknown or already freed data handle {ptr}")))
    }

    fn copy_among(&mut self, from: &TensorMeta, to: &TensorMeta, _stream: u64) -> SessionResult<()> {
        // Source device governs unless it is host.
        let governing = if from.device.is_host() {
            to.device
        } else {
            from.device
        };
        Self::require_host(governing)?;

        let nbytes = from.total_bytes().min(to.total_bytes()) as usize;
        let (src_handle, src_range) = self.alloc_region(from, nbytes)?;
        let (dst_handle, dst_range) = self.alloc_region(to, nbytes)?;

        if src_handle == dst_handle {
            let buf = self
                .allocs
                .get_mut(&src_handle)
                .ok_or_else(|| SessionError::new("allocation vanished"))?;
            buf.copy_within(src_range, dst_range.start);
        } else {
            let src = self.allocs[&src_handle][src_range].to_vec();
            self.allocs
                .get_mut(&dst_handle)
                .ok_or_else(|| SessionError::new("allocation vanished"))?[dst_range]
                .copy_from_slice(&src);
        }
        Ok(())
    }

    fn create_stream(&mut self, dev: Device) -> SessionResult<u64> {
        Self::require_host(dev)?;
        let handle = self.mint_handle();
        self.streams.insert(handle, dev);
        Ok(handle)
    }

    fn free_stream(&mut self, dev: Device, stream: u64) -> SessionResult<()> {
        Self::require_host(dev)?;
        self.streams
            .remove(&stream)
            .map(|_| ())
            .ok_or_else(|| SessionError::new(format!("unknown stream handle {stream}")))
    }

    fn stream_sync(&mut self, dev: Device, stream: u64) -> SessionResult<()> {
        Self::require_host(dev)?;
        // Host execution is synchronous; the default stream (0) is
        // always in sync and named streams only need to exist.
        if stream == 0 || self.streams.contains_key(&stream) {
            Ok(())
        } else {
            Err(SessionError::new(format!("unknown stream handle {stream}")))
        }
    }

    fn set_stream(&mut self, dev: Device, stream: u64) -> SessionResult<()> {
        Self::require_host(dev)?;
        if stream == 0 || self.streams.contains_key(&stream) {
            Ok(())
        } else {
            Err(SessionError::new(format!("unknown stream handle {stream}")))
        }
    }

    fn current_stream(&mut self, dev: Device) -> SessionResult<u64> {
        Self::require_host(dev)?;
        // Host work runs on the default stream.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_tensor(data: u64, nbytes: u64, byte_offset: u64) -> TensorMeta {
        TensorMeta {
            device: Device::host(),
            data,
            shape: vec![nbytes as i64],
            dtype: DataType::u8(),
            byte_offset,
        }
    }

    #[test]
    fn function_lookup_mints_independent_handles() {
        let mut sess = LocalSession::new(1024);
        sess.register("echo", |args| Ok(args.to_vec()));

        let h1 = sess.get_function("echo").unwrap().unwrap();
        let h2 = sess.get_function("echo").unwrap().unwrap();
        assert_ne!(h1, h2);

        let out = sess.call(h1, vec![RpcValue::Int(3)]).unwrap();
        assert_eq!(out, vec![RpcValue::Int(3)]);

        sess.free_handle(h1).unwrap();
        assert!(sess.call(h1, vec![]).is_err());
        // h2 survives h1's release.
        sess.call(h2, vec![]).unwrap();
    }

    #[test]
    fn missing_function_is_none_not_error() {
        let mut sess = LocalSession::new(1024);
        assert!(sess.get_function("nope").unwrap().is_none());
    }

    #[test]
    fn double_free_is_rejected() {
        let mut sess = LocalSession::new(1024);
        let h = sess
            .alloc_data(Device::host(), 16, 64, DataType::u8())
            .unwrap();
        sess.free_handle(h).unwrap();
        assert!(sess.free_handle(h).is_err());
    }

    #[test]
    fn tensor_io_respects_byte_offset() {
        let mut sess = LocalSession::new(1024);
        let h = sess
            .alloc_data(Device::host(), 8, 64, DataType::u8())
            .unwrap();

        sess.write_tensor(&host_tensor(h, 4, 4), &[9, 9, 9, 9]).unwrap();
        let mut out = [0u8; 8];
        sess.read_tensor(&host_tensor(h, 8, 0), &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 9, 9, 9, 9]);

        // Out-of-range regions fail cleanly.
        assert!(sess.read_tensor(&host_tensor(h, 4, 6), &mut [0u8; 4]).is_err());
    }

    #[test]
    fn copy_among_host_allocations() {
        let mut sess = LocalSession::new(1024);
        let a = sess
            .alloc_data(Device::host(), 4, 64, DataType::u8())
            .unwrap();
        let b = sess
            .alloc_data(Device::host(), 4, 64, DataType::u8())
            .unwrap();
        sess.write_tensor(&host_tensor(a, 4, 0), &[1, 2, 3, 4]).unwrap();
        sess.copy_among(&host_tensor(a, 4, 0), &host_tensor(b, 4, 0), 0)
            .unwrap();

        let mut out = [0u8; 4];
        sess.read_tensor(&host_tensor(b, 4, 0), &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn builtin_reports_max_transfer_size() {
        let mut sess = LocalSession::new(4096);
        let h = sess
            .get_function(MAX_TRANSFER_SIZE_FUNC)
            .unwrap()
            .unwrap();
        assert_eq!(sess.call(h, vec![]).unwrap(), vec![RpcValue::Int(4096)]);
    }

    #[test]
    fn exists_attr_is_zero_for_unknown_devices() {
        let mut sess = LocalSession::new(1024);
        let gpu = Device { kind: 2, id: 0 };
        assert_eq!(
            sess.get_attr(gpu, DEV_ATTR_EXISTS).unwrap(),
            RpcValue::Int(0)
        );
        assert_eq!(
            sess.get_attr(Device::host(), DEV_ATTR_EXISTS).unwrap(),
            RpcValue::Int(1)
        );
        assert!(sess.get_attr(gpu, 5).is_err());
    }

    #[test]
    fn streams_are_minted_and_freed() {
        let mut sess = LocalSession::new(1024);
        let s = sess.create_stream(Device::host()).unwrap();
        sess.set_stream(Device::host(), s).unwrap();
        sess.stream_sync(Device::host(), s).unwrap();
        sess.stream_sync(Device::host(), 0).unwrap();
        assert_eq!(sess.current_stream(Device::host()).unwrap(), 0);
        sess.free_stream(Device::host(), s).unwrap();
        assert!(sess.stream_sync(Device::host(), s).is_err());
    }
}
