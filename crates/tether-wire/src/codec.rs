//! Packed-sequence and tensor-descriptor codec.
//!
//! All layouts are little-endian. A packed sequence is:
//!
//! ```text
//! [4: num_args][4 x num_args: type codes][values in order]
//! ```
//!
//! Value payloads:
//!
//! ```text
//! null        -> (nothing)
//! bool, int   -> [8: two's complement]
//! float32     -> [4: IEEE 754]
//! float64     -> [8: IEEE 754]
//! str, bytes  -> [8: len][len: bytes]
//! data-type   -> [1: code][1: bits][2: lanes]
//! device      -> [4: kind][4: id]
//! tensor      -> [8: device][8: data][4: ndim][8 x ndim: shape][4: dtype][8: byte_offset]
//! object      -> [4: object tag][8: handle]
//! ```
//!
//! The encoder is paired with [`packed_len`], a dry-run traversal that
//! lets the framing layer write the exact `u64` length prefix before
//! streaming the body.

use std::io::{Read, Write};

use crate::error::{WireError, WireResult};
use crate::tensor::{DataType, Device, TensorMeta};
use crate::value::{type_code, RpcValue, REMOTE_REF_TAG};

// ---------------------------------------------------------------------------
// Primitive helpers
// ---------------------------------------------------------------------------

/// Write a little-endian u32 control field.
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Write a little-endian u64 control field.
pub fn write_u64<W: Write>(w: &mut W, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_u8<R: Read>(r: &mut R) -> WireResult<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(r: &mut R) -> WireResult<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Read a little-endian u32 control field.
pub fn read_u32<R: Read>(r: &mut R) -> WireResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian u64 control field.
pub fn read_u64<R: Read>(r: &mut R) -> WireResult<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_i64<R: Read>(r: &mut R) -> WireResult<i64> {
    Ok(read_u64(r)? as i64)
}

/// Read exactly `len` bytes without trusting `len` for a pre-allocation.
/// Hostile length prefixes fail with `Truncated` once the stream runs
/// dry instead of aborting on an oversized reservation.
fn read_exact_vec<R: Read>(r: &mut R, len: u64, what: &'static str) -> WireResult<Vec<u8>> {
    let mut buf = Vec::new();
    let got = r.take(len).read_to_end(&mut buf)? as u64;
    if got != len {
        return Err(WireError::Truncated {
            what,
            expected: len,
            got,
        });
    }
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tensor descriptors
// ---------------------------------------------------------------------------

/// Encoded size of a tensor descriptor.
pub fn tensor_wire_len(t: &TensorMeta) -> u64 {
    // device + data + ndim + shape + dtype + byte_offset
    8 + 8 + 4 + 8 * t.ndim() as u64 + 4 + 8
}

/// Fixed per-packet overhead of a copy transfer for `t`: opcode plus
/// tensor descriptor plus the `nbytes` field. The length prefix itself
/// is excluded, matching the framing rule that a packet length never
/// counts itself.
pub fn copy_packet_overhead(t: &TensorMeta) -> u64 {
    4 + tensor_wire_len(t) + 8
}

fn write_device<W: Write>(w: &mut W, dev: Device) -> std::io::Result<()> {
    write_u32(w, dev.kind)?;
    write_u32(w, dev.id)
}

fn read_device<R: Read>(r: &mut R) -> WireResult<Device> {
    let kind = read_u32(r)?;
    let id = read_u32(r)?;
    Ok(Device { kind, id })
}

fn write_dtype<W: Write>(w: &mut W, dt: DataType) -> std::io::Result<()> {
    w.write_all(&[dt.code, dt.bits])?;
    w.write_all(&dt.lanes.to_le_bytes())
}

fn read_dtype<R: Read>(r: &mut R) -> WireResult<DataType> {
    let code = read_u8(r)?;
    let bits = read_u8(r)?;
    let lanes = read_u16(r)?;
    Ok(DataType { code, bits, lanes })
}

/// Write a tensor descriptor.
pub fn write_tensor<W: Write>(w: &mut W, t: &TensorMeta) -> std::io::Result<()> {
    write_device(w, t.device)?;
    write_u64(w, t.data)?;
    write_u32(w, t.ndim() as u32)?;
    for &dim in &t.shape {
        write_u64(w, dim as u64)?;
    }
    write_dtype(w, t.dtype)?;
    write_u64(w, t.byte_offset)
}

/// Read a tensor descriptor. A negative dimension count is a framing
/// violation.
pub fn read_tensor<R: Read>(r: &mut R) -> WireResult<TensorMeta> {
    let device = read_device(r)?;
    let data = read_u64(r)?;
    let ndim = read_u32(r)? as i32;
    if ndim < 0 {
        return Err(WireError::NegativeNdim(ndim));
    }
    let mut shape = Vec::new();
    for _ in 0..ndim {
        shape.push(read_i64(r)?);
    }
    let dtype = read_dtype(r)?;
    let byte_offset = read_u64(r)?;
    Ok(TensorMeta {
        device,
        data,
        shape,
        dtype,
        byte_offset,
    })
}

// ---------------------------------------------------------------------------
// Packed sequences
// ---------------------------------------------------------------------------

fn value_payload_len(v: &RpcValue) -> u64 {
    match v {
        RpcValue::Null => 0,
        RpcValue::Bool(_) | RpcValue::Int(_) => 8,
        RpcValue::Float32(_) => 4,
        RpcValue::Float64(_) => 8,
        RpcValue::Str(s) => 8 + s.len() as u64,
        RpcValue::Bytes(b) => 8 + b.len() as u64,
        RpcValue::DataType(_) => 4,
        RpcValue::Device(_) => 8,
        RpcValue::Tensor(t) => tensor_wire_len(t),
        RpcValue::Object(_) => 4 + 8,
    }
}

/// Dry-run traversal: the exact number of bytes [`write_packed_seq`]
/// will produce for `vals`.
pub fn packed_len(vals: &[RpcValue]) -> u64 {
    let header = 4 + 4 * vals.len() as u64;
    header + vals.iter().map(value_payload_len).sum::<u64>()
}

/// Encode a packed sequence.
pub fn write_packed_seq<W: Write>(w: &mut W, vals: &[RpcValue]) -> std::io::Result<()> {
    write_u32(w, vals.len() as u32)?;
    for v in vals {
        write_u32(w, v.type_code())?;
    }
    for v in vals {
        match v {
            RpcValue::Null => {}
            RpcValue::Bool(b) => write_u64(w, *b as u64)?,
            RpcValue::Int(i) => write_u64(w, *i as u64)?,
            RpcValue::Float32(f) => w.write_all(&f.to_le_bytes())?,
            RpcValue::Float64(f) => w.write_all(&f.to_le_bytes())?,
            RpcValue::Str(s) => {
                write_u64(w, s.len() as u64)?;
                w.write_all(s.as_bytes())?;
            }
            RpcValue::Bytes(b) => {
                write_u64(w, b.len() as u64)?;
                w.write_all(b)?;
            }
            RpcValue::DataType(dt) => write_dtype(w, *dt)?,
            RpcValue::Device(dev) => write_device(w, *dev)?,
            RpcValue::Tensor(t) => write_tensor(w, t)?,
            RpcValue::Object(h) => {
                write_u32(w, REMOTE_REF_TAG)?;
                write_u64(w, *h)?;
            }
        }
    }
    Ok(())
}

fn read_value<R: Read>(r: &mut R, code: u32) -> WireResult<RpcValue> {
    Ok(match code {
        type_code::NULL => RpcValue::Null,
        type_code::BOOL => RpcValue::Bool(read_i64(r)? != 0),
        type_code::INT => RpcValue::Int(read_i64(r)?),
        type_code::FLOAT32 => {
            let mut buf = [0u8; 4];
            r.read_exact(&mut buf)?;
            RpcValue::Float32(f32::from_le_bytes(buf))
        }
        type_code::FLOAT64 => {
            let mut buf = [0u8; 8];
            r.read_exact(&mut buf)?;
            RpcValue::Float64(f64::from_le_bytes(buf))
        }
        type_code::STR => {
            let len = read_u64(r)?;
            let bytes = read_exact_vec(r, len, "string payload")?;
            RpcValue::Str(String::from_utf8(bytes)?)
        }
        type_code::BYTES => {
            let len = read_u64(r)?;
            RpcValue::Bytes(read_exact_vec(r, len, "bytes payload")?)
        }
        type_code::DATA_TYPE => RpcValue::DataType(read_dtype(r)?),
        type_code::DEVICE => RpcValue::Device(read_device(r)?),
        type_code::TENSOR => RpcValue::Tensor(read_tensor(r)?),
        type_code::OBJECT => {
            let tag = read_u32(r)?;
            if tag != REMOTE_REF_TAG {
                return Err(WireError::UnknownObjectTag(tag));
            }
            RpcValue::Object(read_u64(r)?)
        }
        other => return Err(WireError::UnknownTypeCode(other)),
    })
}

/// Decode a packed sequence.
pub fn read_packed_seq<R: Read>(r: &mut R) -> WireResult<Vec<RpcValue>> {
    let num_args = read_u32(r)?;
    let mut codes = Vec::new();
    for _ in 0..num_args {
        codes.push(read_u32(r)?);
    }
    let mut vals = Vec::with_capacity(codes.len());
    for code in codes {
        vals.push(read_value(r, code)?);
    }
    Ok(vals)
}

// ---------------------------------------------------------------------------
// Endianness
// ---------------------------------------------------------------------------

/// Reverse each `elem_bytes`-wide word of `buf` in place.
///
/// Only tensor payload elements are ever swapped; control fields stay
/// little-endian end to end. A trailing partial element (which cannot
/// occur for well-formed payloads) is left untouched.
pub fn byte_swap_elems(buf: &mut [u8], elem_bytes: usize) {
    if elem_bytes <= 1 {
        return;
    }
    for chunk in buf.chunks_exact_mut(elem_bytes) {
        chunk.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(vals: Vec<RpcValue>) -> Vec<RpcValue> {
        let mut buf = Vec::new();
        write_packed_seq(&mut buf, &vals).unwrap();
        assert_eq!(buf.len() as u64, packed_len(&vals), "dry-run length");
        read_packed_seq(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn roundtrip_every_kind() {
        let tensor = TensorMeta {
            device: Device { kind: 2, id: 1 },
            data: 0xdead_beef,
            shape: vec![3, -1, 7],
            dtype: DataType::f32(),
            byte_offset: 64,
        };
        let vals = vec![
            RpcValue::Null,
            RpcValue::Bool(true),
            RpcValue::Int(-5),
            RpcValue::Float32(1.5),
            RpcValue::Float64(-2.25),
            RpcValue::Str("abc".into()),
            RpcValue::Str(String::new()),
            RpcValue::Bytes(vec![0, 255, 7]),
            RpcValue::DataType(DataType::u8()),
            RpcValue::Device(Device::host()),
            RpcValue::Tensor(tensor),
            RpcValue::Object(0x1122_3344_5566_7788),
        ];
        assert_eq!(roundtrip(vals.clone()), vals);
    }

    #[test]
    fn empty_sequence() {
        assert_eq!(roundtrip(vec![]), vec![]);
        assert_eq!(packed_len(&[]), 4);
    }

    #[test]
    fn int_wire_layout_is_fixed() {
        let mut buf = Vec::new();
        write_packed_seq(&mut buf, &[RpcValue::Int(42)]).unwrap();
        // num_args=1, code=INT, payload 42 as little-endian i64
        assert_eq!(
            buf,
            [
                1, 0, 0, 0, //
                type_code::INT as u8, 0, 0, 0, //
                42, 0, 0, 0, 0, 0, 0, 0,
            ]
        );
    }

    #[test]
    fn string_lengths_on_wire() {
        let mut buf = Vec::new();
        write_packed_seq(&mut buf, &[RpcValue::Str("abc".into()), RpcValue::Str("".into())])
            .unwrap();
        // header 4 + 8, then (8 + 3) and (8 + 0)
        assert_eq!(buf.len(), 12 + 11 + 8);
        assert_eq!(&buf[20..23], b"abc");
    }

    #[test]
    fn unknown_type_code_is_fatal() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 1).unwrap();
        write_u32(&mut buf, 999).unwrap();
        assert!(matches!(
            read_packed_seq(&mut Cursor::new(buf)),
            Err(WireError::UnknownTypeCode(999))
        ));
    }

    #[test]
    fn unknown_object_tag_is_fatal() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 1).unwrap();
        write_u32(&mut buf, type_code::OBJECT).unwrap();
        write_u32(&mut buf, 0x1234).unwrap();
        write_u64(&mut buf, 9).unwrap();
        assert!(matches!(
            read_packed_seq(&mut Cursor::new(buf)),
            Err(WireError::UnknownObjectTag(0x1234))
        ));
    }

    #[test]
    fn truncated_string_reports_declared_length() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 1).unwrap();
        write_u32(&mut buf, type_code::STR).unwrap();
        write_u64(&mut buf, 100).unwrap();
        buf.extend_from_slice(b"short");
        match read_packed_seq(&mut Cursor::new(buf)) {
            Err(WireError::Truncated { expected: 100, got: 5, .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn tensor_negative_ndim_is_fatal() {
        let t = TensorMeta {
            device: Device::host(),
            data: 1,
            shape: vec![],
            dtype: DataType::u8(),
            byte_offset: 0,
        };
        let mut buf = Vec::new();
        write_tensor(&mut buf, &t).unwrap();
        // Patch ndim (offset 16) to -1.
        buf[16..20].copy_from_slice(&(-1i32 as u32).to_le_bytes());
        assert!(matches!(
            read_tensor(&mut Cursor::new(buf)),
            Err(WireError::NegativeNdim(-1))
        ));
    }

    #[test]
    fn byte_swap_is_an_involution() {
        let mut buf: Vec<u8> = (0..16).collect();
        let orig = buf.clone();
        byte_swap_elems(&mut buf, 4);
        assert_eq!(&buf[..4], &[3, 2, 1, 0]);
        byte_swap_elems(&mut buf, 4);
        assert_eq!(buf, orig);

        // Single-byte elements are untouched.
        byte_swap_elems(&mut buf, 1);
        assert_eq!(buf, orig);
    }
}
