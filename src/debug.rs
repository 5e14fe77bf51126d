//! Debugger register surface.
//!
//! A fixed index space shared by the remote-debugger stub and local state
//! dumps. Integer, CP0 and FPU state live in one space; when CHERI is
//! enabled a parallel space exposes the capability registers.

use crate::regs::{CAUSE_WRITE_MASK, FCR31_WRITE_MASK, STATUS_WRITE_MASK};
use crate::{CapCodec, Capability, Hart};

/// One entry of the capability index space: full capability registers, plus
/// two plain words (the cause register and the tag summary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapDebugValue {
    Cap(Capability),
    Word(u64),
}

/// Read one integer-side register. Undefined indices read as nothing (the
/// stub reports zero bytes).
pub fn read_register<C: CapCodec>(hart: &Hart<C>, index: usize) -> Option<u64> {
    Some(match index {
        0..=31 => hart.ints.read(index),
        32 => hart.cp0.status,
        33 => hart.ints.lo,
        34 => hart.ints.hi,
        35 => hart.cp0.bad_vaddr,
        36 => hart.cp0.cause,
        37 => hart.ints.pc | hart.ints.isa_mode as u64,
        38..=69 => {
            let fpr = hart.fpu.fprs[index - 38];
            if hart.cp0.fpr64() {
                fpr
            } else {
                fpr & 0xffff_ffff
            }
        }
        70 => hart.fpu.fcr31 & FCR31_WRITE_MASK,
        71 => hart.fpu.fcr0,
        _ => return None,
    })
}

/// Write one integer-side register. Read-only and undefined indices are
/// ignored.
pub fn write_register<C: CapCodec>(hart: &mut Hart<C>, index: usize, value: u64) {
    match index {
        0..=31 => hart.ints.write(index, value),
        32 => {
            hart.cp0.status =
                (hart.cp0.status & !STATUS_WRITE_MASK) | (value & STATUS_WRITE_MASK);
        }
        33 => hart.ints.lo = value,
        34 => hart.ints.hi = value,
        35 => hart.cp0.bad_vaddr = value,
        36 => {
            hart.cp0.cause = (hart.cp0.cause & !CAUSE_WRITE_MASK) | (value & CAUSE_WRITE_MASK);
        }
        37 => {
            hart.ints.pc = value & !1;
            hart.ints.isa_mode = value & 1 != 0;
        }
        38..=69 => {
            let slot = &mut hart.fpu.fprs[index - 38];
            if hart.cp0.fpr64() {
                *slot = value;
            } else {
                *slot = (*slot & !0xffff_ffff) | (value & 0xffff_ffff);
            }
        }
        70 => {
            hart.fpu.fcr31 =
                (hart.fpu.fcr31 & !FCR31_WRITE_MASK) | (value & FCR31_WRITE_MASK);
        }
        71 => log::warn!("debugger write to read-only FCR0 ignored"),
        _ => {}
    }
}

fn named_hwr<C: CapCodec>(hart: &Hart<C>, slot: usize) -> &Capability {
    match slot {
        0 => &hart.caps.ddc,
        1 => &hart.caps.pcc,
        2 => &hart.caps.user_tls,
        3 => &hart.caps.priv_tls,
        4 => &hart.caps.kr1c,
        5 => &hart.caps.kr2c,
        6 => &hart.caps.kcc,
        7 => &hart.caps.kdc,
        8 => &hart.caps.epcc,
        _ => &hart.caps.error_epcc,
    }
}

fn named_hwr_mut<C: CapCodec>(hart: &mut Hart<C>, slot: usize) -> &mut Capability {
    match slot {
        0 => &mut hart.caps.ddc,
        1 => &mut hart.caps.pcc,
        2 => &mut hart.caps.user_tls,
        3 => &mut hart.caps.priv_tls,
        4 => &mut hart.caps.kr1c,
        5 => &mut hart.caps.kr2c,
        6 => &mut hart.caps.kcc,
        7 => &mut hart.caps.kdc,
        8 => &mut hart.caps.epcc,
        _ => &mut hart.caps.error_epcc,
    }
}

/// Bitset of which capability registers hold a valid tag: bit 0 for DDC,
/// bits 1..31 for the general registers, bit 32 for PCC.
pub fn tag_summary<C: CapCodec>(hart: &Hart<C>) -> u64 {
    let mut bits = hart.caps.ddc.tag() as u64;
    for reg in 1..32 {
        bits |= (hart.caps.read(reg).tag() as u64) << reg;
    }
    bits | (hart.caps.pcc.tag() as u64) << 32
}

/// Read one capability-side register.
pub fn read_cap_register<C: CapCodec>(hart: &Hart<C>, index: usize) -> Option<CapDebugValue> {
    Some(match index {
        0..=31 => CapDebugValue::Cap(hart.caps.read(index)),
        32..=41 => CapDebugValue::Cap(*named_hwr(hart, index - 32)),
        42 => CapDebugValue::Word(hart.caps.cap_cause.to_bits()),
        43 => CapDebugValue::Word(tag_summary(hart)),
        _ => return None,
    })
}

/// Write one capability-side register. The cause and tag-summary words and
/// undefined indices are ignored.
pub fn write_cap_register<C: CapCodec>(hart: &mut Hart<C>, index: usize, cap: Capability) {
    match index {
        0..=31 => hart.caps.write(index, cap),
        32..=41 => *named_hwr_mut(hart, index - 32) = cap,
        _ => {}
    }
}
