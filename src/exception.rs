//! Architectural exception taxonomy.
//!
//! Exceptions are values, not control flow: every semantic helper returns
//! `Result<_, Trap>` and the surrounding CPU turns an `Err` into the
//! corresponding MIPS exception entry. A failed helper performs no register
//! updates beyond those the exception itself mandates (the capability cause
//! register and BadVAddr).

use thiserror::Error;

use crate::mem::MemFault;

/// Capability exception cause codes, as written to the capability cause
/// register. The discriminants are the architectural 5-bit encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CapEx {
    None = 0x00,
    Length = 0x01,
    Tag = 0x02,
    Seal = 0x03,
    Type = 0x04,
    Call = 0x05,
    Return = 0x06,
    UserDefined = 0x08,
    Inexact = 0x0a,
    Global = 0x10,
    PermExecute = 0x11,
    PermLoad = 0x12,
    PermStore = 0x13,
    PermLoadCap = 0x14,
    PermStoreCap = 0x15,
    PermStoreLocalCap = 0x16,
    PermSeal = 0x17,
    AccessSysRegs = 0x18,
    PermCCall = 0x19,
    PermUnseal = 0x1b,
}

impl CapEx {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Decode a cause code, e.g. from a debugger write. Unknown codes decode
    /// to nothing.
    pub fn from_code(code: u16) -> Option<CapEx> {
        Some(match code {
            0x00 => CapEx::None,
            0x01 => CapEx::Length,
            0x02 => CapEx::Tag,
            0x03 => CapEx::Seal,
            0x04 => CapEx::Type,
            0x05 => CapEx::Call,
            0x06 => CapEx::Return,
            0x08 => CapEx::UserDefined,
            0x0a => CapEx::Inexact,
            0x10 => CapEx::Global,
            0x11 => CapEx::PermExecute,
            0x12 => CapEx::PermLoad,
            0x13 => CapEx::PermStore,
            0x14 => CapEx::PermLoadCap,
            0x15 => CapEx::PermStoreCap,
            0x16 => CapEx::PermStoreLocalCap,
            0x17 => CapEx::PermSeal,
            0x18 => CapEx::AccessSysRegs,
            0x19 => CapEx::PermCCall,
            0x1b => CapEx::PermUnseal,
            _ => return None,
        })
    }
}

/// Cause-register index meaning "no register was at fault".
pub const CAUSE_REG_NONE: u8 = 0xff;

/// An exception deflecting control out of the current instruction.
///
/// Capability violations are coprocessor-2 exceptions; address errors and
/// reserved-instruction are coprocessor-0; TLB faults propagate from the
/// memory collaborator without completing the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("C2 exception {kind:?} (cause {code:#04x}) on register {reg}", code = .kind.code())]
    Capability { kind: CapEx, reg: u8 },

    /// AdEL: address error on load or instruction fetch.
    #[error("address error on load at {addr:#x}")]
    AddressErrorLoad { addr: u64 },

    /// AdES: address error on store.
    #[error("address error on store at {addr:#x}")]
    AddressErrorStore { addr: u64 },

    #[error("reserved instruction")]
    ReservedInstruction,

    #[error("debug breakpoint")]
    DebugBreak,

    #[error(transparent)]
    Memory(#[from] MemFault),
}
