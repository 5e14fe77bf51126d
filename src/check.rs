//! The priority-ordered capability access check.
//!
//! Shared by the instruction semantics and the memory access path. The
//! ordering is architectural: tag, then seal, then the specific missing
//! permission, then bounds; the first failing predicate names the exception.

use crate::{CapCodec, CapEx, Capability, Hart, Perms, Trap};

/// Permission bits in check order, with the exception each one raises when
/// required but absent.
const PERM_CHECK_ORDER: [(Perms, CapEx); 10] = [
    (Perms::EXECUTE, CapEx::PermExecute),
    (Perms::LOAD, CapEx::PermLoad),
    (Perms::STORE, CapEx::PermStore),
    (Perms::LOAD_CAP, CapEx::PermLoadCap),
    (Perms::STORE_CAP, CapEx::PermStoreCap),
    (Perms::STORE_LOCAL, CapEx::PermStoreLocalCap),
    (Perms::SEAL, CapEx::PermSeal),
    (Perms::UNSEAL, CapEx::PermUnseal),
    (Perms::CCALL, CapEx::PermCCall),
    (Perms::ACCESS_SYS_REGS, CapEx::AccessSysRegs),
];

/// Find the exception for the first permission in `required` that `cap`
/// lacks, if any.
pub(crate) fn missing_perm(cap: &Capability, required: Perms) -> Option<CapEx> {
    for &(perm, ex) in PERM_CHECK_ORDER.iter() {
        if required.contains(perm) && !cap.perms().contains(perm) {
            return Some(ex);
        }
    }
    None
}

/// Validate `cap` for an access of `nbytes` at `addr` needing `required`
/// permissions. On failure the capability cause register names `reg` and
/// BadVAddr records the address.
pub fn check_cap<C: CapCodec>(
    hart: &mut Hart<C>,
    cap: &Capability,
    required: Perms,
    addr: u64,
    nbytes: u64,
    reg: u8,
) -> Result<(), Trap> {
    let kind = if !cap.tag() {
        CapEx::Tag
    } else if cap.is_sealed() {
        CapEx::Seal
    } else if let Some(ex) = missing_perm(cap, required) {
        ex
    } else if !cap.in_bounds(addr, nbytes) {
        CapEx::Length
    } else {
        return Ok(());
    };
    hart.cp0.bad_vaddr = addr;
    Err(hart.raise_c2(kind, reg))
}
