//! Device, data-type and tensor descriptors.
//!
//! A tensor descriptor travels on the wire as metadata only; the `data`
//! field is an opaque 64-bit handle that is meaningful solely to the
//! side that owns the allocation.

/// Device kind of plain host memory.
pub const HOST_DEVICE_KIND: u32 = 1;

/// Bit set on a device kind when the device lives behind an RPC
/// session. Masked devices are local fictions of a client session
/// adapter and must never appear on the wire.
pub const SESSION_MASK: u32 = 1 << 7;

/// A compute device: kind (host, accelerator, ...) plus an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: u32,
    pub id: u32,
}

impl Device {
    /// Plain host memory, device 0.
    pub fn host() -> Self {
        Device {
            kind: HOST_DEVICE_KIND,
            id: 0,
        }
    }

    /// Whether this is host-resident memory.
    pub fn is_host(&self) -> bool {
        self.kind == HOST_DEVICE_KIND
    }

    /// Whether the kind carries the RPC-session mask.
    pub fn is_session_device(&self) -> bool {
        self.kind & SESSION_MASK != 0
    }

    /// Tag this device as living behind an RPC session.
    pub fn with_session_mask(self) -> Self {
        Device {
            kind: self.kind | SESSION_MASK,
            id: self.id,
        }
    }

    /// Remove the RPC-session tag, yielding the device as the owning
    /// side knows it.
    pub fn without_session_mask(self) -> Self {
        Device {
            kind: self.kind & !SESSION_MASK,
            id: self.id,
        }
    }
}

/// Element data type: type code, bit width, vector lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub code: u8,
    pub bits: u8,
    pub lanes: u16,
}

/// Type code for signed integers.
pub const DTYPE_CODE_INT: u8 = 0;
/// Type code for unsigned integers.
pub const DTYPE_CODE_UINT: u8 = 1;
/// Type code for IEEE floats.
pub const DTYPE_CODE_FLOAT: u8 = 2;

impl DataType {
    /// 32-bit IEEE float, one lane.
    pub fn f32() -> Self {
        DataType {
            code: DTYPE_CODE_FLOAT,
            bits: 32,
            lanes: 1,
        }
    }

    /// 8-bit unsigned integer, one lane.
    pub fn u8() -> Self {
        DataType {
            code: DTYPE_CODE_UINT,
            bits: 8,
            lanes: 1,
        }
    }

    /// Bytes per element, rounded up.
    pub fn elem_bytes(&self) -> usize {
        (self.bits as usize * self.lanes as usize + 7) / 8
    }

    /// Whether one element occupies a whole number of bytes. Sub-byte
    /// element widths must always stage through scratch memory on the
    /// copy paths.
    pub fn has_whole_byte_elems(&self) -> bool {
        (self.bits as usize * self.lanes as usize) % 8 == 0
    }
}

/// Metadata describing a (possibly remote) tensor region.
///
/// `data` is valid only on the owning side. `byte_offset` addresses into
/// the allocation and is the knob the chunked-copy path increments.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorMeta {
    pub device: Device,
    pub data: u64,
    pub shape: Vec<i64>,
    pub dtype: DataType,
    pub byte_offset: u64,
}

impl TensorMeta {
    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements (1 for a zero-dim scalar).
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().map(|&d| d.max(0) as u64).product()
    }

    /// Total byte size of the described allocation.
    pub fn total_bytes(&self) -> u64 {
        self.num_elements() * self.dtype.elem_bytes() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_mask_roundtrip() {
        let dev = Device { kind: 2, id: 3 };
        let masked = dev.with_session_mask();
        assert!(masked.is_session_device());
        assert!(!dev.is_session_device());
        assert_eq!(masked.without_session_mask(), dev);
    }

    #[test]
    fn elem_bytes_rounds_up() {
        let four_bit = DataType {
            code: DTYPE_CODE_INT,
            bits: 4,
            lanes: 1,
        };
        assert_eq!(four_bit.elem_bytes(), 1);
        assert!(!four_bit.has_whole_byte_elems());

        assert_eq!(DataType::f32().elem_bytes(), 4);
        assert!(DataType::f32().has_whole_byte_elems());

        let vec3_u8 = DataType {
            code: DTYPE_CODE_UINT,
            bits: 8,
            lanes: 3,
        };
        assert_eq!(vec3_u8.elem_bytes(), 3);
        assert!(vec3_u8.has_whole_byte_elems());
    }

    #[test]
    fn tensor_total_bytes() {
        let t = TensorMeta {
            device: Device::host(),
            data: 0,
            shape: vec![16, 4],
            dtype: DataType::f32(),
            byte_offset: 0,
        };
        assert_eq!(t.num_elements(), 64);
        assert_eq!(t.total_bytes(), 256);

        let scalar = TensorMeta {
            device: Device::host(),
            data: 0,
            shape: vec![],
            dtype: DataType::u8(),
            byte_offset: 0,
        };
        assert_eq!(scalar.num_elements(), 1);
        assert_eq!(scalar.total_bytes(), 1);
    }
}
