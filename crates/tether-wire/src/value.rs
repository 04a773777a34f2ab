//! The packed heterogeneous value type.
//!
//! Call arguments and return values travel as a packed sequence of
//! [`RpcValue`]s. Each value is written as a u32 type-code word in the
//! sequence header followed by its payload in the value section; the
//! exact byte layouts live in [`crate::codec`].

use crate::error::WireError;
use crate::tensor::{DataType, Device, TensorMeta};

/// Fixed object tag carried inside a remote-object value payload.
///
/// The payload of an `Object` value is this u32 tag followed by the
/// 64-bit handle; an unrecognized tag is a framing violation. The tag
/// exists so the object encoding can grow more kinds without changing
/// the sequence header.
pub const REMOTE_REF_TAG: u32 = 0x5252_4546; // "RREF"

/// Type-code words for the packed sequence header.
pub mod type_code {
    pub const NULL: u32 = 0;
    pub const BOOL: u32 = 1;
    pub const INT: u32 = 2;
    pub const FLOAT32: u32 = 3;
    pub const FLOAT64: u32 = 4;
    pub const STR: u32 = 5;
    pub const BYTES: u32 = 6;
    pub const DATA_TYPE: u32 = 7;
    pub const DEVICE: u32 = 8;
    pub const TENSOR: u32 = 9;
    pub const OBJECT: u32 = 10;
}

/// One value in a packed sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Null,
    Bool(bool),
    Int(i64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Bytes(Vec<u8>),
    DataType(DataType),
    Device(Device),
    Tensor(TensorMeta),
    /// A 64-bit handle to an object owned by the peer. Decoded handles
    /// are materialized uniformly as this variant so that a received
    /// handle can be forwarded another hop without special cases.
    Object(u64),
}

impl RpcValue {
    /// The type-code word written to the sequence header.
    pub fn type_code(&self) -> u32 {
        use type_code::*;
        match self {
            RpcValue::Null => NULL,
            RpcValue::Bool(_) => BOOL,
            RpcValue::Int(_) => INT,
            RpcValue::Float32(_) => FLOAT32,
            RpcValue::Float64(_) => FLOAT64,
            RpcValue::Str(_) => STR,
            RpcValue::Bytes(_) => BYTES,
            RpcValue::DataType(_) => DATA_TYPE,
            RpcValue::Device(_) => DEVICE,
            RpcValue::Tensor(_) => TENSOR,
            RpcValue::Object(_) => OBJECT,
        }
    }

    /// Human-readable kind name, used in type-mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RpcValue::Null => "null",
            RpcValue::Bool(_) => "bool",
            RpcValue::Int(_) => "int",
            RpcValue::Float32(_) => "float32",
            RpcValue::Float64(_) => "float64",
            RpcValue::Str(_) => "str",
            RpcValue::Bytes(_) => "bytes",
            RpcValue::DataType(_) => "data-type",
            RpcValue::Device(_) => "device",
            RpcValue::Tensor(_) => "tensor",
            RpcValue::Object(_) => "object",
        }
    }

    fn mismatch(&self, expected: &'static str) -> WireError {
        WireError::TypeMismatch {
            expected,
            got: self.kind_name(),
        }
    }

    /// Expect a signed integer.
    pub fn expect_int(&self) -> Result<i64, WireError> {
        match self {
            RpcValue::Int(v) => Ok(*v),
            RpcValue::Bool(b) => Ok(*b as i64),
            other => Err(other.mismatch("int")),
        }
    }

    /// Expect a non-negative integer, e.g. a size or a handle.
    pub fn expect_u64(&self) -> Result<u64, WireError> {
        let v = self.expect_int()?;
        u64::try_from(v).map_err(|_| self.mismatch("non-negative int"))
    }

    /// Expect a string.
    pub fn expect_str(&self) -> Result<&str, WireError> {
        match self {
            RpcValue::Str(s) => Ok(s),
            other => Err(other.mismatch("str")),
        }
    }

    /// Expect a device descriptor.
    pub fn expect_device(&self) -> Result<Device, WireError> {
        match self {
            RpcValue::Device(d) => Ok(*d),
            other => Err(other.mismatch("device")),
        }
    }

    /// Expect a data-type descriptor.
    pub fn expect_dtype(&self) -> Result<DataType, WireError> {
        match self {
            RpcValue::DataType(d) => Ok(*d),
            other => Err(other.mismatch("data-type")),
        }
    }

    /// Expect a tensor descriptor.
    pub fn expect_tensor(&self) -> Result<&TensorMeta, WireError> {
        match self {
            RpcValue::Tensor(t) => Ok(t),
            other => Err(other.mismatch("tensor")),
        }
    }

    /// Expect a remote-object handle. `Int` is also accepted since
    /// handles returned from syscalls travel as plain integers.
    pub fn expect_handle(&self) -> Result<u64, WireError> {
        match self {
            RpcValue::Object(h) => Ok(*h),
            RpcValue::Int(v) => Ok(*v as u64),
            other => Err(other.mismatch("object handle")),
        }
    }

    /// Expect a string or null; null maps to `None`.
    pub fn expect_opt_str(&self) -> Result<Option<&str>, WireError> {
        match self {
            RpcValue::Null => Ok(None),
            RpcValue::Str(s) => Ok(Some(s)),
            other => Err(other.mismatch("str or null")),
        }
    }
}
