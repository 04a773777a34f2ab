//! Wire protocol for the tether RPC endpoint.
//!
//! Everything that appears on the wire is defined here: the packet
//! opcodes, the packed heterogeneous argument encoding, and the tensor
//! descriptor layout. The endpoint runtime (`tether-rpc`) streams these
//! types through its ring buffers; this crate never does I/O of its own
//! beyond `std::io::{Read, Write}`.
//!
//! # Framing
//!
//! Every packet on the channel is:
//!
//! ```text
//! [8: body length][4: opcode][N: opcode-specific body]
//! ```
//!
//! All control integers are little-endian. The length prefix excludes
//! itself. Tensor payloads are raw bytes; on big-endian hosts the
//! *elements* are byte-swapped at the staging boundary, never the
//! control fields (see [`codec::byte_swap_elems`]).

pub mod codec;
pub mod error;
pub mod opcode;
pub mod tensor;
pub mod value;

pub use codec::{
    byte_swap_elems, copy_packet_overhead, packed_len, read_packed_seq, read_tensor,
    tensor_wire_len, write_packed_seq, write_tensor,
};
pub use error::{WireError, WireResult};
pub use opcode::{Opcode, SYSCALL_CODE_START};
pub use tensor::{DataType, Device, TensorMeta, HOST_DEVICE_KIND, SESSION_MASK};
pub use value::{RpcValue, REMOTE_REF_TAG};

/// Protocol version string exchanged in the `InitServer` packet.
///
/// The server compares this byte-for-byte against the client's version
/// and refuses to install a serving session on mismatch.
pub const PROTOCOL_VERSION: &str = "tether-1.0";

/// Prefix that marks a peer exception as a timeout.
///
/// Exception messages starting with this prefix are surfaced to the
/// caller verbatim; anything else is wrapped with [`RPC_ERROR_BANNER`].
pub const TIMEOUT_ERROR_PREFIX: &str = "RPCSessionTimeoutError: ";

/// Banner prepended to non-timeout exceptions raised by the peer.
pub const RPC_ERROR_BANNER: &str = "RPCError: Error caught from RPC call:\n";

/// Sentinel remote key that tells a server-side endpoint to read the
/// client-supplied key from the channel before packet dispatch.
pub const TO_INIT_KEY: &str = "%toinit";

/// Default cap on a single transfer packet body, used when the peer does
/// not expose `server.max_transfer_size`.
pub const DEFAULT_MAX_TRANSFER_BYTES: u64 = 256 * 1024;

/// Name of the built-in server function that reports the peer's
/// configured maximum transfer packet size.
pub const MAX_TRANSFER_SIZE_FUNC: &str = "server.max_transfer_size";
