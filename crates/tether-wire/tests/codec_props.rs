//! Property tests for the packed-sequence codec.
//!
//! Two families:
//! - structured inputs: decode(encode(seq)) == seq and the dry-run
//!   length always equals the encoded length;
//! - adversarial inputs: the decoder must reject, never panic.

use proptest::collection::vec;
use proptest::prelude::*;
use std::io::Cursor;

use tether_wire::{
    packed_len, read_packed_seq, write_packed_seq, DataType, Device, RpcValue, TensorMeta,
};

fn arb_dtype() -> impl Strategy<Value = DataType> {
    (0u8..4, prop_oneof![Just(1u8), Just(4), Just(8), Just(16), Just(32), Just(64)], 1u16..=4)
        .prop_map(|(code, bits, lanes)| DataType { code, bits, lanes })
}

fn arb_device() -> impl Strategy<Value = Device> {
    (0u32..16, 0u32..8).prop_map(|(kind, id)| Device { kind, id })
}

fn arb_tensor() -> impl Strategy<Value = TensorMeta> {
    (arb_device(), any::<u64>(), vec(0i64..1024, 0..5), arb_dtype(), any::<u64>()).prop_map(
        |(device, data, shape, dtype, byte_offset)| TensorMeta {
            device,
            data,
            shape,
            dtype,
            byte_offset,
        },
    )
}

fn arb_value() -> impl Strategy<Value = RpcValue> {
    prop_oneof![
        Just(RpcValue::Null),
        any::<bool>().prop_map(RpcValue::Bool),
        any::<i64>().prop_map(RpcValue::Int),
        any::<f32>().prop_map(RpcValue::Float32),
        any::<f64>().prop_map(RpcValue::Float64),
        ".{0,64}".prop_map(RpcValue::Str),
        vec(any::<u8>(), 0..256).prop_map(RpcValue::Bytes),
        arb_dtype().prop_map(RpcValue::DataType),
        arb_device().prop_map(RpcValue::Device),
        arb_tensor().prop_map(RpcValue::Tensor),
        any::<u64>().prop_map(RpcValue::Object),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn encode_decode_roundtrip(seq in vec(arb_value(), 0..12)) {
        let mut buf = Vec::new();
        write_packed_seq(&mut buf, &seq).unwrap();
        prop_assert_eq!(buf.len() as u64, packed_len(&seq));

        let decoded = read_packed_seq(&mut Cursor::new(buf)).unwrap();
        prop_assert_eq!(decoded.len(), seq.len());
        for (got, want) in decoded.iter().zip(seq.iter()) {
            match (got, want) {
                // NaN payloads compare bitwise, not by PartialEq.
                (RpcValue::Float32(a), RpcValue::Float32(b)) => {
                    prop_assert_eq!(a.to_bits(), b.to_bits())
                }
                (RpcValue::Float64(a), RpcValue::Float64(b)) => {
                    prop_assert_eq!(a.to_bits(), b.to_bits())
                }
                (g, w) => prop_assert_eq!(g, w),
            }
        }
    }

    #[test]
    fn decoder_never_panics_on_arbitrary_input(data in vec(any::<u8>(), 0..512)) {
        let _ = read_packed_seq(&mut Cursor::new(data));
    }

    #[test]
    fn truncated_encodings_are_rejected(seq in vec(arb_value(), 1..8)) {
        let mut buf = Vec::new();
        write_packed_seq(&mut buf, &seq).unwrap();
        // Chop at least one byte off the end; the decoder must error.
        buf.pop();
        prop_assert!(read_packed_seq(&mut Cursor::new(buf)).is_err());
    }
}
