//! Packet opcodes.
//!
//! The numeric assignments below are a stable wire contract: peers built
//! against different assignments will not interoperate. Control codes
//! occupy `0..SYSCALL_CODE_START`; everything at or above
//! [`SYSCALL_CODE_START`] is a syscall and is dispatched through the
//! uniform syscall path on the server.

use crate::error::WireError;

/// First opcode value reserved for syscalls.
pub const SYSCALL_CODE_START: u32 = 32;

/// A packet opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    // Control codes.
    None = 0,
    Shutdown = 1,
    InitServer = 2,
    CallFunc = 3,
    Return = 4,
    Exception = 5,
    CopyFromRemote = 6,
    CopyToRemote = 7,
    CopyAck = 8,

    // Syscall codes, starting at SYSCALL_CODE_START.
    GetGlobalFunc = 32,
    FreeHandle = 33,
    DevSetDevice = 34,
    DevGetAttr = 35,
    DevAllocData = 36,
    DevFreeData = 37,
    DevStreamSync = 38,
    CopyAmongRemote = 39,
    DevCreateStream = 40,
    DevFreeStream = 41,
    DevSetStream = 42,
    DevGetCurrentStream = 43,
    DevAllocDataWithScope = 44,
}

impl Opcode {
    /// Decode an opcode from its wire representation.
    ///
    /// An unrecognized value is a framing violation and fatal to the
    /// connection.
    pub fn from_u32(raw: u32) -> Result<Self, WireError> {
        use Opcode::*;
        Ok(match raw {
            0 => None,
            1 => Shutdown,
            2 => InitServer,
            3 => CallFunc,
            4 => Return,
            5 => Exception,
            6 => CopyFromRemote,
            7 => CopyToRemote,
            8 => CopyAck,
            32 => GetGlobalFunc,
            33 => FreeHandle,
            34 => DevSetDevice,
            35 => DevGetAttr,
            36 => DevAllocData,
            37 => DevFreeData,
            38 => DevStreamSync,
            39 => CopyAmongRemote,
            40 => DevCreateStream,
            41 => DevFreeStream,
            42 => DevSetStream,
            43 => DevGetCurrentStream,
            44 => DevAllocDataWithScope,
            other => return Err(WireError::UnknownOpcode(other)),
        })
    }

    /// Wire representation of this opcode.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether this opcode is dispatched through the syscall path.
    pub fn is_syscall(self) -> bool {
        self.as_u32() >= SYSCALL_CODE_START
    }
}
