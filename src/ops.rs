//! Instruction semantics.
//!
//! One helper per capability instruction, named after it. Every helper is a
//! total function from hart state and operands to new state; architectural
//! exceptions come back as `Err(Trap)` and leave no register updates behind
//! other than the capability cause. Register reads happen before writes, so
//! an instruction naming the same register twice behaves architecturally.
//!
//! Integer results go to the integer file (register 0 discards), capability
//! results to the capability file (register 0 discards). The handful of
//! operations for which capability operand 0 means DDC read through
//! `read_or_ddc`, visibly at the call site.

use crate::exception::CAUSE_REG_NONE;
use crate::regs::IDC_REG;
use crate::stats::HistOp;
use crate::{
    check_cap, CapCodec, CapEx, Capability, Hart, Perms, Trap, COMBINED_PERMS_MASK,
    MAX_SEALED_OTYPE, OTYPE_BITS, UPERMS_SHIFT,
};

/// Move a capability's cursor, applying the encoding's representability rule
/// and the configured unrepresentable-result policy. `op` selects the
/// deviation histogram, for the operations that keep one.
fn update_cursor<C: CapCodec>(
    hart: &mut Hart<C>,
    cap: Capability,
    new_cursor: u64,
    reg: u8,
    op: Option<HistOp>,
) -> Result<Capability, Trap> {
    let (base, top) = cap.bounds();
    let mut out = cap;
    if out.tag() && !C::representable(&out, new_cursor) {
        if hart.config.trap_on_unrepresentable {
            return Err(hart.raise_c2(CapEx::Inexact, reg));
        }
        log::trace!(
            "unrepresentable cursor {:#x} on {}; tag stripped",
            new_cursor,
            C::NAME
        );
        hart.stats.note_unrepresentable();
        C::mark_unrepresentable(&mut out, new_cursor);
    } else {
        out.set_cursor(new_cursor);
    }
    if let Some(op) = op {
        hart.stats.note_cursor_deviation(op, base, top, new_cursor);
    }
    Ok(out)
}

/* Inspection */

pub fn cgetaddr<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let v = hart.caps.read(cb).cursor();
    hart.ints.write(rd, v);
}

pub fn cgetbase<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let v = hart.caps.read(cb).base();
    hart.ints.write(rd, v);
}

pub fn cgetlen<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let v = hart.caps.read(cb).length_sat();
    hart.ints.write(rd, v);
}

pub fn cgetoffset<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let v = hart.caps.read(cb).offset();
    hart.ints.write(rd, v);
}

pub fn cgetperm<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let v = hart.caps.read(cb).combined_perms();
    hart.ints.write(rd, v);
}

pub fn cgettag<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let v = hart.caps.read(cb).tag() as u64;
    hart.ints.write(rd, v);
}

pub fn cgetsealed<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let v = hart.caps.read(cb).is_sealed() as u64;
    hart.ints.write(rd, v);
}

/// Object type as the ISA reports it: reserved types sign-extend, so an
/// unsealed capability reads as -1 and a sentry as -2.
pub fn cgettype<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let otype = hart.caps.read(cb).otype();
    let v = if otype > MAX_SEALED_OTYPE {
        (otype as u64).wrapping_sub(1 << OTYPE_BITS)
    } else {
        otype as u64
    };
    hart.ints.write(rd, v);
}

/// PCC with the current program counter as its cursor.
pub fn cgetpcc<C: CapCodec>(hart: &mut Hart<C>, cd: usize) {
    let mut pcc = hart.caps.pcc;
    pcc.set_cursor(hart.ints.pc);
    hart.caps.write(cd, pcc);
}

pub fn cgetpccsetoffset<C: CapCodec>(
    hart: &mut Hart<C>,
    cd: usize,
    offset: u64,
) -> Result<(), Trap> {
    let pcc = hart.caps.pcc;
    let new_cursor = pcc.base().wrapping_add(offset);
    let out = update_cursor(
        hart,
        pcc,
        new_cursor,
        CAUSE_REG_NONE,
        Some(HistOp::GetPccSetOffset),
    )?;
    hart.caps.write(cd, out);
    Ok(())
}

fn require_sys_regs<C: CapCodec>(hart: &mut Hart<C>) -> Result<(), Trap> {
    if !hart.caps.pcc.perms().contains(Perms::ACCESS_SYS_REGS) {
        return Err(hart.raise_c2(CapEx::AccessSysRegs, CAUSE_REG_NONE));
    }
    Ok(())
}

pub fn cgetcause<C: CapCodec>(hart: &mut Hart<C>, rd: usize) -> Result<(), Trap> {
    require_sys_regs(hart)?;
    let v = hart.caps.cap_cause.to_bits();
    hart.ints.write(rd, v);
    Ok(())
}

pub fn csetcause<C: CapCodec>(hart: &mut Hart<C>, value: u64) -> Result<(), Trap> {
    require_sys_regs(hart)?;
    hart.caps.cap_cause = crate::CapCause {
        kind: CapEx::from_code(((value >> 8) & 0xffff) as u16).unwrap_or(CapEx::None),
        reg: value as u8,
    };
    Ok(())
}

/* Mutation */

pub fn candperm<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    mask: u64,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    if !cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cb as u8));
    }
    if mask & !COMBINED_PERMS_MASK != 0 {
        return Err(hart.raise_c2(CapEx::UserDefined, cb as u8));
    }
    let masked = cap.combined_perms() & mask;
    if cap.is_sealed() && masked != cap.combined_perms() {
        return Err(hart.raise_c2(CapEx::Seal, cb as u8));
    }
    let mut out = cap;
    out.perms = Perms::from_bits_truncate((masked & 0xfff) as u32);
    out.uperms = ((masked >> UPERMS_SHIFT) & 0xf) as u8;
    hart.caps.write(rd, out);
    Ok(())
}

pub fn ccleartag<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize) {
    let mut out = hart.caps.read(cb);
    if out.tag() {
        C::sync_cache(&mut out);
        out.set_tag(false);
    }
    hart.caps.write(rd, out);
}

/// Sealed mutation rule shared by the cursor-moving operations: a sealed
/// tagged input traps unless the move is an identity.
fn seal_guard<C: CapCodec>(
    hart: &mut Hart<C>,
    cap: &Capability,
    new_cursor: u64,
    reg: u8,
) -> Result<(), Trap> {
    if cap.tag() && cap.is_sealed() && new_cursor != cap.cursor() {
        return Err(hart.raise_c2(CapEx::Seal, reg));
    }
    Ok(())
}

pub fn csetoffset<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    offset: u64,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    let new_cursor = cap.base().wrapping_add(offset);
    seal_guard(hart, &cap, new_cursor, cb as u8)?;
    let out = update_cursor(hart, cap, new_cursor, cb as u8, Some(HistOp::SetOffset))?;
    hart.caps.write(rd, out);
    Ok(())
}

pub fn csetaddr<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    addr: u64,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    seal_guard(hart, &cap, addr, cb as u8)?;
    let out = update_cursor(hart, cap, addr, cb as u8, None)?;
    hart.caps.write(rd, out);
    Ok(())
}

pub fn cincoffset<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    increment: u64,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    let new_cursor = cap.cursor().wrapping_add(increment);
    seal_guard(hart, &cap, new_cursor, cb as u8)?;
    let out = update_cursor(hart, cap, new_cursor, cb as u8, Some(HistOp::IncOffset))?;
    hart.caps.write(rd, out);
    Ok(())
}

pub fn candaddr<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    mask: u64,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    let new_cursor = cap.cursor() & mask;
    seal_guard(hart, &cap, new_cursor, cb as u8)?;
    let out = update_cursor(hart, cap, new_cursor, cb as u8, None)?;
    hart.caps.write(rd, out);
    Ok(())
}

fn setbounds_checks<C: CapCodec>(
    hart: &mut Hart<C>,
    cap: &Capability,
    length: u64,
    reg: u8,
) -> Result<(), Trap> {
    if !cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, reg));
    }
    if cap.is_sealed() {
        return Err(hart.raise_c2(CapEx::Seal, reg));
    }
    if cap.cursor() < cap.base()
        || cap.cursor() as u128 + length as u128 > cap.top()
    {
        hart.cp0.bad_vaddr = cap.cursor();
        return Err(hart.raise_c2(CapEx::Length, reg));
    }
    Ok(())
}

/// Narrow to `[cursor, cursor + length)`, rounding outward as the encoding
/// requires.
pub fn csetbounds<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    length: u64,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    setbounds_checks(hart, &cap, length, cb as u8)?;
    let mut out = cap;
    let exact = C::set_bounds(&mut out, cap.cursor(), cap.cursor() as u128 + length as u128);
    if !exact {
        hart.stats.note_imprecise_setbounds();
    }
    // Derivation may round, but never escapes the source bounds.
    debug_assert!(out.base() >= cap.base() && out.top() <= cap.top());
    hart.caps.write(rd, out);
    Ok(())
}

/// Like [csetbounds], but a rounded result is an Inexact trap instead.
pub fn csetboundsexact<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    length: u64,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    setbounds_checks(hart, &cap, length, cb as u8)?;
    let mut out = cap;
    let exact = C::set_bounds(&mut out, cap.cursor(), cap.cursor() as u128 + length as u128);
    if !exact {
        return Err(hart.raise_c2(CapEx::Inexact, cb as u8));
    }
    hart.caps.write(rd, out);
    Ok(())
}

/// Copy `ct`'s object type into `cb`'s cursor: the inverse lookup used by
/// type-management software. An unsealed `ct` yields offset -1.
pub fn ccopytype<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    ct: usize,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    let typed = hart.caps.read(ct);
    if !cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cb as u8));
    }
    if cap.is_sealed() {
        return Err(hart.raise_c2(CapEx::Seal, cb as u8));
    }
    let out = if typed.is_sealed_with_type() {
        let otype = typed.otype() as u64;
        if otype < cap.base() || otype as u128 >= cap.top() {
            hart.cp0.bad_vaddr = otype;
            return Err(hart.raise_c2(CapEx::Length, cb as u8));
        }
        update_cursor(hart, cap, otype, cb as u8, None)?
    } else {
        update_cursor(hart, cap, cap.base().wrapping_sub(1), cb as u8, None)?
    };
    hart.caps.write(rd, out);
    Ok(())
}

/// Re-derive a tagged capability from `ct`'s fields under the authority of
/// `cb` (DDC when the index is 0).
pub fn cbuildcap<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    ct: usize,
) -> Result<(), Trap> {
    let auth = hart.caps.read_or_ddc(cb);
    let pattern = hart.caps.read(ct);
    if !auth.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cb as u8));
    }
    if auth.is_sealed() {
        return Err(hart.raise_c2(CapEx::Seal, cb as u8));
    }
    if pattern.base() < auth.base()
        || pattern.top() > auth.top()
        || (pattern.base() as u128) > pattern.top()
    {
        return Err(hart.raise_c2(CapEx::Length, cb as u8));
    }
    if pattern.combined_perms() & !auth.combined_perms() != 0 {
        return Err(hart.raise_c2(CapEx::UserDefined, cb as u8));
    }
    let mut out = auth;
    let exact = C::set_bounds(&mut out, pattern.base(), pattern.top());
    if !exact {
        return Err(hart.raise_c2(CapEx::Inexact, ct as u8));
    }
    out.perms = pattern.perms();
    out.uperms = pattern.uperms();
    out.set_unsealed();
    let out = update_cursor(hart, out, pattern.cursor(), ct as u8, None)?;
    hart.caps.write(rd, out);
    Ok(())
}

/* Sealing */

fn seal_checks<C: CapCodec>(
    hart: &mut Hart<C>,
    cs_cap: &Capability,
    ct_cap: &Capability,
    cs: usize,
    ct: usize,
) -> Result<(), Trap> {
    if !cs_cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cs as u8));
    }
    if !ct_cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, ct as u8));
    }
    if cs_cap.is_sealed() {
        return Err(hart.raise_c2(CapEx::Seal, cs as u8));
    }
    if ct_cap.is_sealed() {
        return Err(hart.raise_c2(CapEx::Seal, ct as u8));
    }
    if !ct_cap.perms().contains(Perms::SEAL) {
        return Err(hart.raise_c2(CapEx::PermSeal, ct as u8));
    }
    if !ct_cap.in_bounds(ct_cap.cursor(), 1) {
        hart.cp0.bad_vaddr = ct_cap.cursor();
        return Err(hart.raise_c2(CapEx::Length, ct as u8));
    }
    if ct_cap.cursor() > MAX_SEALED_OTYPE as u64 {
        return Err(hart.raise_c2(CapEx::Length, ct as u8));
    }
    if !C::representable_when_sealed(cs_cap, cs_cap.cursor()) {
        return Err(hart.raise_c2(CapEx::Inexact, cs as u8));
    }
    Ok(())
}

pub fn cseal<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cs: usize, ct: usize) -> Result<(), Trap> {
    let cs_cap = hart.caps.read(cs);
    let ct_cap = hart.caps.read(ct);
    seal_checks(hart, &cs_cap, &ct_cap, cs, ct)?;
    let mut out = cs_cap;
    out.set_sealed(ct_cap.cursor() as u32);
    hart.caps.write(rd, out);
    Ok(())
}

/// Conditional seal: an untagged `ct` or a cursor of -1 passes `cs` through
/// unchanged.
pub fn ccseal<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cs: usize, ct: usize) -> Result<(), Trap> {
    let cs_cap = hart.caps.read(cs);
    let ct_cap = hart.caps.read(ct);
    if !cs_cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cs as u8));
    }
    if !ct_cap.tag() || ct_cap.cursor() == u64::MAX {
        hart.caps.write(rd, cs_cap);
        return Ok(());
    }
    seal_checks(hart, &cs_cap, &ct_cap, cs, ct)?;
    let mut out = cs_cap;
    out.set_sealed(ct_cap.cursor() as u32);
    hart.caps.write(rd, out);
    Ok(())
}

pub fn csealentry<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cs: usize) -> Result<(), Trap> {
    let cap = hart.caps.read(cs);
    if !cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cs as u8));
    }
    if cap.is_sealed() {
        return Err(hart.raise_c2(CapEx::Seal, cs as u8));
    }
    let mut out = cap;
    out.make_sealed_entry();
    hart.caps.write(rd, out);
    Ok(())
}

pub fn cunseal<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cs: usize,
    ct: usize,
) -> Result<(), Trap> {
    let cs_cap = hart.caps.read(cs);
    let ct_cap = hart.caps.read(ct);
    if !cs_cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cs as u8));
    }
    if !ct_cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, ct as u8));
    }
    if !cs_cap.is_sealed_with_type() {
        return Err(hart.raise_c2(CapEx::Seal, cs as u8));
    }
    if ct_cap.is_sealed() {
        return Err(hart.raise_c2(CapEx::Seal, ct as u8));
    }
    if !ct_cap.perms().contains(Perms::UNSEAL) {
        return Err(hart.raise_c2(CapEx::PermUnseal, ct as u8));
    }
    if !ct_cap.in_bounds(ct_cap.cursor(), 1) {
        hart.cp0.bad_vaddr = ct_cap.cursor();
        return Err(hart.raise_c2(CapEx::Length, ct as u8));
    }
    if ct_cap.cursor() != cs_cap.otype() as u64 {
        return Err(hart.raise_c2(CapEx::Type, ct as u8));
    }
    let mut out = cs_cap;
    out.set_unsealed();
    // GLOBAL survives only if both the sealed value and the unsealer carry it.
    if !ct_cap.perms().contains(Perms::GLOBAL) {
        out.perms.remove(Perms::GLOBAL);
    }
    hart.caps.write(rd, out);
    Ok(())
}

/* Control transfer */

/// Validation shared by the jump instructions. Sentries pass the seal check;
/// their sentry flag is cleared at install time.
fn jump_checks<C: CapCodec>(hart: &mut Hart<C>, cap: &Capability, reg: u8) -> Result<(), Trap> {
    if !cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, reg));
    }
    if cap.is_sealed() && !cap.is_sealed_entry() {
        return Err(hart.raise_c2(CapEx::Seal, reg));
    }
    if !cap.perms().contains(Perms::EXECUTE) {
        return Err(hart.raise_c2(CapEx::PermExecute, reg));
    }
    if !cap.perms().contains(Perms::GLOBAL) {
        return Err(hart.raise_c2(CapEx::Global, reg));
    }
    if !cap.in_bounds(cap.cursor(), 4) {
        hart.cp0.bad_vaddr = cap.cursor();
        return Err(hart.raise_c2(CapEx::Length, reg));
    }
    if cap.cursor() & 3 != 0 {
        return Err(hart.raise_address_error(cap.cursor(), false));
    }
    Ok(())
}

/// `CJR cb`: stage `cb` as the branch target. Returns the target PC for the
/// translator's delay-slot bookkeeping.
pub fn cjr<C: CapCodec>(hart: &mut Hart<C>, cb: usize) -> Result<u64, Trap> {
    let cap = hart.caps.read(cb);
    jump_checks(hart, &cap, cb as u8)?;
    let mut target = cap;
    if target.is_sealed_entry() {
        target.unseal_entry();
    }
    hart.caps.branch_target = Some(target);
    Ok(target.cursor())
}

/// `CJALR cd, cb`: stage `cb` as the branch target and leave the return
/// capability (PCC advanced past the delay slot) in `cd`. Jumping to a
/// sentry seals the link as a sentry in turn.
pub fn cjalr<C: CapCodec>(hart: &mut Hart<C>, cd: usize, cb: usize) -> Result<u64, Trap> {
    let cap = hart.caps.read(cb);
    jump_checks(hart, &cap, cb as u8)?;

    let mut link = hart.caps.pcc;
    link.set_cursor(hart.ints.pc.wrapping_add(8));
    let mut target = cap;
    if target.is_sealed_entry() {
        target.unseal_entry();
        link.make_sealed_entry();
    }
    hart.caps.write(cd, link);
    hart.caps.branch_target = Some(target);
    Ok(target.cursor())
}

/// Install a staged branch target as PCC. Called by the execution loop after
/// the delay slot retires; returns whether a branch was pending.
pub fn commit_branch<C: CapCodec>(hart: &mut Hart<C>) -> bool {
    match hart.caps.branch_target.take() {
        Some(target) => {
            hart.ints.pc = target.cursor();
            hart.caps.pcc = target;
            true
        }
        None => false,
    }
}

/// `CCall cs, cb` (both selectors). Selector 0 raises the Call trap for the
/// software domain-crossing handler; selector 1 performs the hardware
/// transition, leaving the unsealed data capability in IDC and staging the
/// unsealed code capability as the branch target.
pub fn ccall<C: CapCodec>(
    hart: &mut Hart<C>,
    cs: usize,
    cb: usize,
    selector: u32,
) -> Result<u64, Trap> {
    let code = hart.caps.read(cs);
    let data = hart.caps.read(cb);
    if !code.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cs as u8));
    }
    if !data.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cb as u8));
    }
    if !code.is_sealed_with_type() {
        return Err(hart.raise_c2(CapEx::Seal, cs as u8));
    }
    if !data.is_sealed_with_type() {
        return Err(hart.raise_c2(CapEx::Seal, cb as u8));
    }
    if code.otype() != data.otype() {
        return Err(hart.raise_c2(CapEx::Type, cs as u8));
    }
    if !code.perms().contains(Perms::CCALL) {
        return Err(hart.raise_c2(CapEx::PermCCall, cs as u8));
    }
    if !data.perms().contains(Perms::CCALL) {
        return Err(hart.raise_c2(CapEx::PermCCall, cb as u8));
    }
    if !code.perms().contains(Perms::EXECUTE) {
        return Err(hart.raise_c2(CapEx::PermExecute, cs as u8));
    }
    if data.perms().contains(Perms::EXECUTE) {
        return Err(hart.raise_c2(CapEx::PermExecute, cb as u8));
    }
    if !code.in_bounds(code.cursor(), 4) {
        hart.cp0.bad_vaddr = code.cursor();
        return Err(hart.raise_c2(CapEx::Length, cs as u8));
    }
    if selector == 0 {
        return Err(hart.raise_c2(CapEx::Call, cs as u8));
    }

    let mut idc = data;
    idc.set_unsealed();
    hart.caps.write(IDC_REG, idc);
    let mut target = code;
    target.set_unsealed();
    hart.caps.branch_target = Some(target);
    Ok(target.cursor())
}

/// `CReturn`: trap into the software domain-return handler.
pub fn creturn<C: CapCodec>(hart: &mut Hart<C>) -> Trap {
    hart.raise_c2_noreg(CapEx::Return)
}

/// Fetch-side validation of PCC, run before every instruction; also the
/// retirement point for the instruction counters.
pub fn check_pcc<C: CapCodec>(hart: &mut Hart<C>, next_pc: u64) -> Result<(), Trap> {
    let kernel = hart.kernel_mode();
    hart.stats.note_insn(kernel);
    let pcc = hart.caps.pcc;
    check_cap(hart, &pcc, Perms::EXECUTE, next_pc, 4, CAUSE_REG_NONE)
}

/// Validation of a branch or jump destination against PCC, run before the
/// transfer is committed.
pub fn check_branch<C: CapCodec>(hart: &mut Hart<C>, target_pc: u64) -> Result<(), Trap> {
    let pcc = hart.caps.pcc;
    check_cap(hart, &pcc, Perms::EXECUTE, target_pc, 4, CAUSE_REG_NONE)
}

/* Conversion */

/// `CFromPtr cd, cb, rt`: integer zero becomes the null capability, anything
/// else becomes `cb` (DDC when the index is 0) at offset `rt`.
pub fn cfromptr<C: CapCodec>(
    hart: &mut Hart<C>,
    cd: usize,
    cb: usize,
    rt: u64,
) -> Result<(), Trap> {
    if rt == 0 {
        hart.caps.write(cd, Capability::null());
        return Ok(());
    }
    let cap = hart.caps.read_or_ddc(cb);
    if !cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cb as u8));
    }
    if cap.is_sealed() {
        return Err(hart.raise_c2(CapEx::Seal, cb as u8));
    }
    let new_cursor = cap.base().wrapping_add(rt);
    let out = update_cursor(hart, cap, new_cursor, cb as u8, Some(HistOp::FromPtr))?;
    hart.caps.write(cd, out);
    Ok(())
}

/// `CToPtr rd, cb, ct`: `cb`'s cursor relative to `ct`'s base, or zero when
/// `cb` is untagged or out of `ct`'s bounds.
pub fn ctoptr<C: CapCodec>(
    hart: &mut Hart<C>,
    rd: usize,
    cb: usize,
    ct: usize,
) -> Result<(), Trap> {
    let cap = hart.caps.read(cb);
    let frame = hart.caps.read_or_ddc(ct);
    if !frame.tag() {
        return Err(hart.raise_c2(CapEx::Tag, ct as u8));
    }
    let v = if !cap.tag() {
        0
    } else if cap.cursor() >= frame.base() && (cap.cursor() as u128) < frame.top() {
        cap.cursor().wrapping_sub(frame.base())
    } else {
        0
    };
    hart.ints.write(rd, v);
    Ok(())
}

/* Comparison */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Ltu,
    Leu,
}

/// Pointer-ordered comparison. With differing tags the untagged operand
/// sorts below the tagged one.
pub fn cptrcmp<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize, ct: usize, op: CmpOp) {
    let a = hart.caps.read(cb);
    let b = hart.caps.read(ct);
    let (eq, lt, ltu) = if a.tag() != b.tag() {
        (false, b.tag(), b.tag())
    } else {
        (
            a.cursor() == b.cursor(),
            (a.cursor() as i64) < (b.cursor() as i64),
            a.cursor() < b.cursor(),
        )
    };
    let v = match op {
        CmpOp::Eq => eq,
        CmpOp::Ne => !eq,
        CmpOp::Lt => lt,
        CmpOp::Le => lt || eq,
        CmpOp::Ltu => ltu,
        CmpOp::Leu => ltu || eq,
    };
    hart.ints.write(rd, v as u64);
}

/// Exact equality across every architectural field.
pub fn cexeq<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize, ct: usize) {
    let v = hart.caps.read(cb) == hart.caps.read(ct);
    hart.ints.write(rd, v as u64);
}

pub fn cnexeq<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize, ct: usize) {
    let v = hart.caps.read(cb) != hart.caps.read(ct);
    hart.ints.write(rd, v as u64);
}

/// `CTestSubset rd, cb, ct`: is `ct` a bounds-and-permissions subset of `cb`
/// with the same tag?
pub fn ctestsubset<C: CapCodec>(hart: &mut Hart<C>, rd: usize, cb: usize, ct: usize) {
    let outer = hart.caps.read(cb);
    let inner = hart.caps.read(ct);
    let v = outer.tag() == inner.tag()
        && inner.base() >= outer.base()
        && inner.top() <= outer.top()
        && inner.combined_perms() & !outer.combined_perms() == 0;
    hart.ints.write(rd, v as u64);
}

/* Branch predicates */

/// `CBEZ`: branch when the register holds the null sentinel.
pub fn cbez<C: CapCodec>(hart: &Hart<C>, cb: usize) -> bool {
    hart.caps.read(cb).is_null_sentinel()
}

/// `CBNZ`: the complement of [cbez].
pub fn cbnz<C: CapCodec>(hart: &Hart<C>, cb: usize) -> bool {
    !cbez(hart, cb)
}

/// `CBTS`: branch on tag set.
pub fn cbts<C: CapCodec>(hart: &Hart<C>, cb: usize) -> bool {
    hart.caps.read(cb).tag()
}

/// `CBTU`: branch on tag unset.
pub fn cbtu<C: CapCodec>(hart: &Hart<C>, cb: usize) -> bool {
    !hart.caps.read(cb).tag()
}

/* Trap-on-check instructions */

pub fn ccheckperm<C: CapCodec>(hart: &mut Hart<C>, cs: usize, required: u64) -> Result<(), Trap> {
    let cap = hart.caps.read(cs);
    if !cap.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cs as u8));
    }
    if required & !COMBINED_PERMS_MASK != 0 {
        return Err(hart.raise_c2(CapEx::UserDefined, cs as u8));
    }
    let hw = Perms::from_bits_truncate((required & 0xfff) as u32);
    if let Some(kind) = crate::check::missing_perm(&cap, hw) {
        return Err(hart.raise_c2(kind, cs as u8));
    }
    let uperms = ((required >> UPERMS_SHIFT) & 0xf) as u8;
    if uperms & !cap.uperms() != 0 {
        return Err(hart.raise_c2(CapEx::UserDefined, cs as u8));
    }
    Ok(())
}

pub fn cchecktype<C: CapCodec>(hart: &mut Hart<C>, cs: usize, cb: usize) -> Result<(), Trap> {
    let a = hart.caps.read(cs);
    let b = hart.caps.read(cb);
    if !a.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cs as u8));
    }
    if !b.tag() {
        return Err(hart.raise_c2(CapEx::Tag, cb as u8));
    }
    if a.is_unsealed() {
        return Err(hart.raise_c2(CapEx::Seal, cs as u8));
    }
    if b.is_unsealed() {
        return Err(hart.raise_c2(CapEx::Seal, cb as u8));
    }
    if a.otype() != b.otype() {
        return Err(hart.raise_c2(CapEx::Type, cs as u8));
    }
    Ok(())
}

/* Bulk */

/// `CClearRegs`: null every selected register. Bit 0 selects DDC, bits 1..31
/// the general registers.
pub fn cclearregs<C: CapCodec>(hart: &mut Hart<C>, mask: u32) {
    if mask & 1 != 0 {
        hart.caps.ddc = Capability::null();
    }
    for reg in 1..32usize {
        if mask & (1 << reg) != 0 {
            hart.caps.write(reg, Capability::null());
        }
    }
}

/* Hardware register access */

/// Access requirements of one capability hardware register.
#[derive(Debug, Clone, Copy)]
struct HwrRule {
    needs_sys: bool,
    needs_kernel: bool,
}

/// The access table: DDC and the user TLS register are always reachable, the
/// privileged TLS register needs ACCESS_SYS_REGS, the kernel scratch
/// registers need kernel mode, and the exception-handling registers need
/// both.
fn hwr_rule(index: u32) -> Option<HwrRule> {
    match index {
        0 | 1 => Some(HwrRule {
            needs_sys: false,
            needs_kernel: false,
        }),
        8 => Some(HwrRule {
            needs_sys: true,
            needs_kernel: false,
        }),
        22 | 23 => Some(HwrRule {
            needs_sys: false,
            needs_kernel: true,
        }),
        28 | 29 | 30 | 31 => Some(HwrRule {
            needs_sys: true,
            needs_kernel: true,
        }),
        _ => None,
    }
}

fn hwr_access_check<C: CapCodec>(hart: &mut Hart<C>, index: u32) -> Result<(), Trap> {
    let rule = match hwr_rule(index) {
        Some(rule) => rule,
        None => {
            log::trace!("access to undefined capability hwr {}", index);
            return Err(Trap::ReservedInstruction);
        }
    };
    if (rule.needs_kernel && !hart.kernel_mode())
        || (rule.needs_sys && !hart.caps.pcc.perms().contains(Perms::ACCESS_SYS_REGS))
    {
        return Err(hart.raise_c2(CapEx::AccessSysRegs, index as u8));
    }
    Ok(())
}

pub fn creadhwr<C: CapCodec>(hart: &mut Hart<C>, cd: usize, index: u32) -> Result<(), Trap> {
    hwr_access_check(hart, index)?;
    let value = match hart.caps.hwr(index) {
        Some(value) => *value,
        None => return Err(Trap::ReservedInstruction),
    };
    hart.caps.write(cd, value);
    Ok(())
}

pub fn cwritehwr<C: CapCodec>(hart: &mut Hart<C>, cs: usize, index: u32) -> Result<(), Trap> {
    hwr_access_check(hart, index)?;
    let value = hart.caps.read(cs);
    match hart.caps.hwr_mut(index) {
        Some(slot) => *slot = value,
        None => return Err(Trap::ReservedInstruction),
    }
    Ok(())
}

/* Deprecated operations */

/// `CIncBase` was removed from the architecture; it decodes but traps.
pub fn cincbase<C: CapCodec>(
    _hart: &mut Hart<C>,
    _rd: usize,
    _cb: usize,
    _increment: u64,
) -> Result<(), Trap> {
    Err(Trap::ReservedInstruction)
}

/// `CSetLen` was removed from the architecture; it decodes but traps.
pub fn csetlen<C: CapCodec>(
    _hart: &mut Hart<C>,
    _rd: usize,
    _cb: usize,
    _length: u64,
) -> Result<(), Trap> {
    Err(Trap::ReservedInstruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoprocConfig, Compressed128, Uncompressed256, OTYPE_SENTRY, OTYPE_UNSEALED};

    type H = Hart<Uncompressed256>;

    fn hart() -> H {
        Hart::new(CoprocConfig::default())
    }

    fn bounded(base: u64, len: u64, cursor: u64) -> Capability {
        let mut c = Capability::max_perms(cursor);
        c.base = base;
        c.top = base as u128 + len as u128;
        c
    }

    fn cap_trap(r: Result<(), Trap>) -> (CapEx, u8) {
        match r.unwrap_err() {
            Trap::Capability { kind, reg } => (kind, reg),
            other => panic!("expected capability trap, got {:?}", other),
        }
    }

    #[test]
    fn inc_offset_identity_and_additivity() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x100, 0x1000));

        cincoffset(&mut h, 2, 1, 0).unwrap();
        assert_eq!(h.caps.read(2), h.caps.read(1));

        cincoffset(&mut h, 3, 1, 0x10).unwrap();
        cincoffset(&mut h, 3, 3, 0x20).unwrap();
        cincoffset(&mut h, 4, 1, 0x30).unwrap();
        assert_eq!(h.caps.read(3), h.caps.read(4));
        assert_eq!(h.caps.read(3).offset(), 0x30);
    }

    #[test]
    fn inc_offset_far_out_strips_the_tag_on_compressed() {
        let mut h: Hart<Compressed128> = Hart::new(CoprocConfig {
            stats_enabled: true,
            ..CoprocConfig::default()
        });
        h.caps.write(1, bounded(0, 0x100, 0));
        cincoffset(&mut h, 2, 1, 1u64 << 48).unwrap();
        let out = h.caps.read(2);
        assert!(!out.tag());
        assert_eq!(out.cursor(), 1u64 << 48);
        assert_eq!(h.stats.unrepresentable_caps, 1);
        assert_eq!(h.stats.inc_offset_deviation.total(), 1);
    }

    #[test]
    fn inc_offset_far_out_traps_under_the_policy_flag() {
        let mut h: Hart<Compressed128> = Hart::new(CoprocConfig {
            trap_on_unrepresentable: true,
            ..CoprocConfig::default()
        });
        h.caps.write(1, bounded(0, 0x100, 0));
        let (kind, reg) = cap_trap(cincoffset(&mut h, 2, 1, 1u64 << 48));
        assert_eq!((kind, reg), (CapEx::Inexact, 1));
    }

    #[test]
    fn sealed_mutation_allows_only_identity() {
        let mut h = hart();
        let mut sealed = bounded(0x1000, 0x100, 0x1010);
        sealed.set_sealed(5);
        h.caps.write(1, sealed);

        cincoffset(&mut h, 2, 1, 0).unwrap();
        assert_eq!(h.caps.read(2), sealed);
        assert_eq!(cap_trap(cincoffset(&mut h, 2, 1, 8)), (CapEx::Seal, 1));
        csetoffset(&mut h, 2, 1, 0x10).unwrap();
        assert_eq!(cap_trap(csetoffset(&mut h, 2, 1, 0x11)), (CapEx::Seal, 1));
    }

    #[test]
    fn seal_then_unseal_restores_the_capability() {
        let mut h = hart();
        h.caps.write(1, bounded(0x2000, 0x100, 0x2000));
        h.caps.write(2, bounded(0x40, 0x10, 0x42));

        cseal(&mut h, 3, 1, 2).unwrap();
        let sealed = h.caps.read(3);
        assert!(sealed.is_sealed_with_type());
        assert_eq!(sealed.otype(), 0x42);

        let mut unsealer = bounded(0x40, 0x10, 0x42);
        unsealer.perms = Perms::UNSEAL | Perms::GLOBAL;
        h.caps.write(4, unsealer);
        cunseal(&mut h, 5, 3, 4).unwrap();
        assert_eq!(h.caps.read(5), h.caps.read(1));
    }

    #[test]
    fn unseal_global_is_the_and_of_both_inputs() {
        let mut h = hart();
        h.caps.write(1, bounded(0x2000, 0x100, 0x2000));
        h.caps.write(2, bounded(0x40, 0x10, 0x42));
        cseal(&mut h, 3, 1, 2).unwrap();

        let mut unsealer = bounded(0x40, 0x10, 0x42);
        unsealer.perms = Perms::UNSEAL;
        h.caps.write(4, unsealer);
        cunseal(&mut h, 5, 3, 4).unwrap();
        assert!(!h.caps.read(5).perms().contains(Perms::GLOBAL));
    }

    #[test]
    fn seal_failures_blame_the_right_operand() {
        let mut h = hart();
        h.caps.write(1, bounded(0x2000, 0x100, 0x2000));

        // Sealer without the SEAL permission.
        let mut noseal = bounded(0x40, 0x10, 0x42);
        noseal.perms = Perms::GLOBAL;
        h.caps.write(2, noseal);
        assert_eq!(cap_trap(cseal(&mut h, 3, 1, 2)), (CapEx::PermSeal, 2));

        // Sealer cursor out of its bounds.
        h.caps.write(2, bounded(0x40, 0x10, 0x80));
        assert_eq!(cap_trap(cseal(&mut h, 3, 1, 2)), (CapEx::Length, 2));

        // Object type beyond the software range.
        h.caps.write(2, bounded(0, u64::MAX, OTYPE_UNSEALED as u64));
        assert_eq!(cap_trap(cseal(&mut h, 3, 1, 2)), (CapEx::Length, 2));

        // Untagged source.
        let mut untagged = bounded(0x2000, 0x100, 0x2000);
        untagged.set_tag(false);
        h.caps.write(1, untagged);
        h.caps.write(2, bounded(0x40, 0x10, 0x42));
        assert_eq!(cap_trap(cseal(&mut h, 3, 1, 2)), (CapEx::Tag, 1));
    }

    #[test]
    fn conditional_seal_passes_through_on_minus_one() {
        let mut h = hart();
        h.caps.write(1, bounded(0x2000, 0x100, 0x2000));
        h.caps.write(2, bounded(0, u64::MAX, u64::MAX));
        ccseal(&mut h, 3, 1, 2).unwrap();
        assert_eq!(h.caps.read(3), h.caps.read(1));

        let mut untagged = bounded(0x40, 0x10, 0x42);
        untagged.set_tag(false);
        h.caps.write(2, untagged);
        ccseal(&mut h, 3, 1, 2).unwrap();
        assert_eq!(h.caps.read(3), h.caps.read(1));

        h.caps.write(2, bounded(0x40, 0x10, 0x42));
        ccseal(&mut h, 3, 1, 2).unwrap();
        assert_eq!(h.caps.read(3).otype(), 0x42);
    }

    #[test]
    fn set_bounds_monotone_and_checked() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x1000, 0x1400));

        csetbounds(&mut h, 2, 1, 0x100).unwrap();
        let narrowed = h.caps.read(2);
        assert_eq!(narrowed.bounds(), (0x1400, 0x1500));
        assert!(narrowed.tag());

        // Requesting past the parent's top is a length violation.
        assert_eq!(cap_trap(csetbounds(&mut h, 3, 2, 0x200)), (CapEx::Length, 2));

        // Cursor below base likewise.
        let mut low = bounded(0x1000, 0x1000, 0xfff);
        low.cursor = 0xfff;
        h.caps.write(4, low);
        assert_eq!(cap_trap(csetbounds(&mut h, 5, 4, 0x10)), (CapEx::Length, 4));
    }

    #[test]
    fn set_bounds_exact_traps_where_rounding_would_occur() {
        let mut h: Hart<Compressed128> = Hart::default();
        h.caps.write(1, bounded(0, 1 << 40, 0x1001));
        // A megabyte at an odd cursor cannot be exact in the compressed form.
        assert_eq!(
            cap_trap(csetboundsexact(&mut h, 2, 1, 1 << 20)),
            (CapEx::Inexact, 1)
        );
        // The plain form rounds instead and counts it.
        h.stats = crate::Stats::new(true);
        csetbounds(&mut h, 2, 1, 1 << 20).unwrap();
        assert_eq!(h.stats.imprecise_setbounds, 1);
        let out = h.caps.read(2);
        assert!(out.base() <= 0x1001 && out.top() >= 0x1001 + (1u128 << 20));
    }

    #[test]
    fn jump_checks_in_order() {
        let mut h = hart();

        let mut sealed = bounded(0x4000, 0x100, 0x4000);
        sealed.set_sealed(3);
        h.caps.write(1, sealed);
        assert_eq!(
            cap_trap(cjr(&mut h, 1).map(|_| ())),
            (CapEx::Seal, 1)
        );

        let mut noexec = bounded(0x4000, 0x100, 0x4000);
        noexec.perms.remove(Perms::EXECUTE);
        h.caps.write(1, noexec);
        assert_eq!(cap_trap(cjr(&mut h, 1).map(|_| ())), (CapEx::PermExecute, 1));

        let mut local = bounded(0x4000, 0x100, 0x4000);
        local.perms.remove(Perms::GLOBAL);
        h.caps.write(1, local);
        assert_eq!(cap_trap(cjr(&mut h, 1).map(|_| ())), (CapEx::Global, 1));

        h.caps.write(1, bounded(0x4000, 0x100, 0x4100));
        assert_eq!(cap_trap(cjr(&mut h, 1).map(|_| ())), (CapEx::Length, 1));

        h.caps.write(1, bounded(0x4000, 0x100, 0x4002));
        assert_eq!(
            cjr(&mut h, 1).unwrap_err(),
            Trap::AddressErrorLoad { addr: 0x4002 }
        );

        h.caps.write(1, bounded(0x4000, 0x100, 0x4040));
        assert_eq!(cjr(&mut h, 1).unwrap(), 0x4040);
        assert!(h.caps.branch_target.is_some());
        assert!(commit_branch(&mut h));
        assert_eq!(h.ints.pc, 0x4040);
        assert_eq!(h.caps.pcc.cursor(), 0x4040);
        assert!(!commit_branch(&mut h));
    }

    #[test]
    fn sentry_call_and_link() {
        let mut h = hart();
        h.ints.pc = 0x9000;

        // Scenario: seal an executable capability as a sentry, jump-and-link
        // through it.
        h.caps.write(1, bounded(0x4000, 0x100, 0x4040));
        csealentry(&mut h, 1, 1).unwrap();
        assert!(h.caps.read(1).is_sealed_entry());

        let target_pc = cjalr(&mut h, 31, 1).unwrap();
        assert_eq!(target_pc, 0x4040);

        let link = h.caps.read(31);
        assert!(link.is_sealed_entry());
        assert_eq!(link.cursor(), 0x9008);

        assert!(commit_branch(&mut h));
        assert_eq!(h.caps.pcc.cursor(), 0x4040);
        assert_eq!(h.caps.pcc.otype(), OTYPE_UNSEALED);
    }

    #[test]
    fn jalr_without_sentry_leaves_a_plain_link() {
        let mut h = hart();
        h.ints.pc = 0x100;
        h.caps.write(1, bounded(0x4000, 0x100, 0x4000));
        cjalr(&mut h, 31, 1).unwrap();
        assert!(h.caps.read(31).is_unsealed());
        assert_eq!(h.caps.read(31).cursor(), 0x108);
    }

    fn ccall_pair(h: &mut H, otype_cs: u64, otype_cb: u64) {
        let mut code = bounded(0x4000, 0x100, 0x4040);
        code.perms = Perms::GLOBAL | Perms::EXECUTE | Perms::CCALL | Perms::LOAD;
        h.caps.write(1, code);
        let mut sealer = bounded(0, 1 << 32, otype_cs);
        sealer.perms = Perms::SEAL | Perms::GLOBAL;
        h.caps.write(3, sealer);
        cseal(h, 1, 1, 3).unwrap();

        let mut data = bounded(0x8000, 0x100, 0x8000);
        data.perms = Perms::GLOBAL | Perms::CCALL | Perms::LOAD | Perms::STORE;
        h.caps.write(2, data);
        let mut sealer2 = bounded(0, 1 << 32, otype_cb);
        sealer2.perms = Perms::SEAL | Perms::GLOBAL;
        h.caps.write(4, sealer2);
        cseal(h, 2, 2, 4).unwrap();
    }

    #[test]
    fn ccall_selector_zero_traps_call() {
        let mut h = hart();
        ccall_pair(&mut h, 7, 7);
        assert_eq!(
            cap_trap(ccall(&mut h, 1, 2, 0).map(|_| ())),
            (CapEx::Call, 1)
        );
    }

    #[test]
    fn ccall_selector_one_crosses_domains() {
        let mut h = hart();
        ccall_pair(&mut h, 7, 7);
        let target = ccall(&mut h, 1, 2, 1).unwrap();
        assert_eq!(target, 0x4040);

        let idc = h.caps.read(IDC_REG);
        assert!(idc.is_unsealed());
        assert_eq!(idc.base(), 0x8000);

        assert!(commit_branch(&mut h));
        assert_eq!(h.caps.pcc.cursor(), 0x4040);
        assert!(h.caps.pcc.is_unsealed());
    }

    #[test]
    fn ccall_type_mismatch() {
        let mut h = hart();
        ccall_pair(&mut h, 7, 8);
        assert_eq!(
            cap_trap(ccall(&mut h, 1, 2, 1).map(|_| ())),
            (CapEx::Type, 1)
        );
    }

    #[test]
    fn ccall_requires_execute_asymmetry() {
        let mut h = hart();
        ccall_pair(&mut h, 7, 7);
        // Swap the operands: the data capability has no EXECUTE.
        assert_eq!(
            cap_trap(ccall(&mut h, 2, 1, 1).map(|_| ())),
            (CapEx::PermExecute, 2)
        );
    }

    #[test]
    fn creturn_traps_return() {
        let mut h = hart();
        assert_eq!(
            creturn(&mut h),
            Trap::Capability {
                kind: CapEx::Return,
                reg: crate::exception::CAUSE_REG_NONE
            }
        );
    }

    #[test]
    fn pcc_fetch_check_counts_instructions() {
        let mut h = Hart::<Uncompressed256>::new(CoprocConfig {
            stats_enabled: true,
            ..CoprocConfig::default()
        });
        h.caps.pcc = bounded(0x1000, 0x100, 0x1000);
        check_pcc(&mut h, 0x1000).unwrap();
        check_pcc(&mut h, 0x10fc).unwrap();
        assert_eq!(
            cap_trap(check_pcc(&mut h, 0x1100)),
            (CapEx::Length, crate::exception::CAUSE_REG_NONE)
        );
        assert_eq!(h.stats.icount, 3);
        assert_eq!(h.stats.icount_kernel, 3);
        assert!(check_branch(&mut h, 0x1080).is_ok());
    }

    #[test]
    fn from_ptr_zero_is_null() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x100, 0x1000));
        cfromptr(&mut h, 2, 1, 0).unwrap();
        assert_eq!(h.caps.read(2), Capability::null());

        cfromptr(&mut h, 2, 1, 0x20).unwrap();
        let out = h.caps.read(2);
        assert_eq!(out.cursor(), 0x1020);
        assert!(out.tag());
    }

    #[test]
    fn from_ptr_uses_ddc_for_register_zero() {
        let mut h = hart();
        h.caps.ddc = bounded(0x7000, 0x100, 0x7000);
        cfromptr(&mut h, 2, 0, 0x10).unwrap();
        assert_eq!(h.caps.read(2).cursor(), 0x7010);
    }

    #[test]
    fn to_ptr_rules() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x100, 0x1040));
        h.caps.write(2, bounded(0x1000, 0x100, 0x1000));

        ctoptr(&mut h, 3, 1, 2).unwrap();
        assert_eq!(h.ints.read(3), 0x40);

        // Untagged pointer operand reads as zero.
        let mut untagged = bounded(0x1000, 0x100, 0x1040);
        untagged.set_tag(false);
        h.caps.write(1, untagged);
        ctoptr(&mut h, 3, 1, 2).unwrap();
        assert_eq!(h.ints.read(3), 0);

        // Out of the frame's bounds reads as zero.
        h.caps.write(1, bounded(0x9000, 0x10, 0x9000));
        ctoptr(&mut h, 3, 1, 2).unwrap();
        assert_eq!(h.ints.read(3), 0);

        // Untagged frame traps.
        let mut noframe = bounded(0x1000, 0x100, 0x1000);
        noframe.set_tag(false);
        h.caps.write(2, noframe);
        let (kind, reg) = cap_trap(ctoptr(&mut h, 3, 1, 2));
        assert_eq!((kind, reg), (CapEx::Tag, 2));
    }

    #[test]
    fn comparisons() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x100, 0x1010));
        h.caps.write(2, bounded(0x1000, 0x100, 0x1020));

        cptrcmp(&mut h, 3, 1, 2, CmpOp::Eq);
        assert_eq!(h.ints.read(3), 0);
        cptrcmp(&mut h, 3, 1, 2, CmpOp::Ne);
        assert_eq!(h.ints.read(3), 1);
        cptrcmp(&mut h, 3, 1, 2, CmpOp::Ltu);
        assert_eq!(h.ints.read(3), 1);
        cptrcmp(&mut h, 3, 2, 1, CmpOp::Leu);
        assert_eq!(h.ints.read(3), 0);

        // The untagged operand sorts below the tagged one.
        let mut untagged = bounded(0x1000, 0x100, 0x1030);
        untagged.set_tag(false);
        h.caps.write(4, untagged);
        cptrcmp(&mut h, 3, 4, 1, CmpOp::Lt);
        assert_eq!(h.ints.read(3), 1);
        cptrcmp(&mut h, 3, 1, 4, CmpOp::Lt);
        assert_eq!(h.ints.read(3), 0);
        cptrcmp(&mut h, 3, 4, 1, CmpOp::Eq);
        assert_eq!(h.ints.read(3), 0);

        // Signed comparison differs from unsigned at the sign boundary.
        h.caps.write(5, bounded(0, u64::MAX, u64::MAX));
        h.caps.write(6, bounded(0, u64::MAX, 1));
        cptrcmp(&mut h, 3, 5, 6, CmpOp::Lt);
        assert_eq!(h.ints.read(3), 1);
        cptrcmp(&mut h, 3, 5, 6, CmpOp::Ltu);
        assert_eq!(h.ints.read(3), 0);
    }

    #[test]
    fn exact_equality_and_subset() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x100, 0x1010));
        h.caps.write(2, bounded(0x1000, 0x100, 0x1010));
        cexeq(&mut h, 3, 1, 2);
        assert_eq!(h.ints.read(3), 1);
        cnexeq(&mut h, 3, 1, 2);
        assert_eq!(h.ints.read(3), 0);

        // Same cursor, different perms: not exactly equal.
        let mut other = bounded(0x1000, 0x100, 0x1010);
        other.perms.remove(Perms::SEAL);
        h.caps.write(2, other);
        cexeq(&mut h, 3, 1, 2);
        assert_eq!(h.ints.read(3), 0);

        ctestsubset(&mut h, 3, 1, 2);
        assert_eq!(h.ints.read(3), 1);
        h.caps.write(2, bounded(0xf00, 0x300, 0x1010));
        ctestsubset(&mut h, 3, 1, 2);
        assert_eq!(h.ints.read(3), 0);
    }

    #[test]
    fn branch_predicates() {
        let mut h = hart();
        assert!(cbez(&h, 1));
        assert!(!cbnz(&h, 1));
        assert!(cbtu(&h, 1));
        assert!(!cbts(&h, 1));

        h.caps.write(1, bounded(0x1000, 0x100, 0x1000));
        assert!(!cbez(&h, 1));
        assert!(cbnz(&h, 1));
        assert!(cbts(&h, 1));
        assert!(!cbtu(&h, 1));

        // Untagged but displaced: not the null sentinel, so BNZ takes it.
        let mut moved = Capability::null();
        moved.set_cursor(4);
        h.caps.write(1, moved);
        assert!(!cbez(&h, 1));
        assert!(cbnz(&h, 1));
    }

    #[test]
    fn clear_regs_mask() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x100, 0x1000));
        h.caps.write(2, bounded(0x2000, 0x100, 0x2000));
        cclearregs(&mut h, (1 << 1) | 1);
        assert_eq!(h.caps.read(1), Capability::null());
        assert_eq!(h.caps.ddc, Capability::null());
        assert_ne!(h.caps.read(2), Capability::null());
    }

    #[test]
    fn hwr_access_table() {
        let mut h = hart();
        // Kernel mode with ACCESS_SYS_REGS on PCC: everything works.
        creadhwr(&mut h, 1, 31).unwrap();
        assert_eq!(h.caps.read(1), h.caps.epcc);
        cwritehwr(&mut h, 1, 22).unwrap();

        // Undefined index decodes as a reserved instruction.
        assert_eq!(creadhwr(&mut h, 1, 9).unwrap_err(), Trap::ReservedInstruction);

        // User mode loses the kernel-only registers.
        h.cp0.status = 0b10 << 3;
        assert_eq!(
            cap_trap(creadhwr(&mut h, 1, 22)),
            (CapEx::AccessSysRegs, 22)
        );
        assert_eq!(
            cap_trap(creadhwr(&mut h, 1, 31)),
            (CapEx::AccessSysRegs, 31)
        );
        // DDC and the user TLS register stay reachable.
        creadhwr(&mut h, 1, 0).unwrap();
        creadhwr(&mut h, 1, 1).unwrap();

        // The privileged TLS register needs ACCESS_SYS_REGS, not kernel mode.
        creadhwr(&mut h, 1, 8).unwrap();
        h.caps.pcc.perms.remove(Perms::ACCESS_SYS_REGS);
        assert_eq!(cap_trap(creadhwr(&mut h, 1, 8)), (CapEx::AccessSysRegs, 8));
    }

    #[test]
    fn and_perm_rules() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x100, 0x1000));

        candperm(&mut h, 2, 1, (Perms::LOAD | Perms::GLOBAL).bits() as u64).unwrap();
        assert_eq!(h.caps.read(2).perms(), Perms::LOAD | Perms::GLOBAL);
        assert_eq!(h.caps.read(2).uperms(), 0);

        // Bits outside the defined permission word are a user-defined
        // violation.
        assert_eq!(
            cap_trap(candperm(&mut h, 2, 1, 1 << 20)),
            (CapEx::UserDefined, 1)
        );

        // Sealed: identity is allowed, masking is not.
        let mut sealed = bounded(0x1000, 0x100, 0x1000);
        sealed.set_sealed(4);
        h.caps.write(3, sealed);
        candperm(&mut h, 2, 3, COMBINED_PERMS_MASK).unwrap();
        assert_eq!(h.caps.read(2), sealed);
        assert_eq!(
            cap_trap(candperm(&mut h, 2, 3, Perms::LOAD.bits() as u64)),
            (CapEx::Seal, 3)
        );
    }

    #[test]
    fn get_type_sign_extends_reserved_types() {
        let mut h = hart();
        h.caps.write(1, bounded(0x1000, 0x100, 0x1000));
        cgettype(&mut h, 2, 1);
        assert_eq!(h.ints.read(2), u64::MAX); // unsealed: -1

        let mut sentry = bounded(0x1000, 0x100, 0x1000);
        sentry.otype = OTYPE_SENTRY;
        h.caps.write(1, sentry);
        cgettype(&mut h, 2, 1);
        assert_eq!(h.ints.read(2), u64::MAX - 1); // sentry: -2

        let mut sealed = bounded(0x1000, 0x100, 0x1000);
        sealed.set_sealed(0x42);
        h.caps.write(1, sealed);
        cgettype(&mut h, 2, 1);
        assert_eq!(h.ints.read(2), 0x42);
    }

    #[test]
    fn cause_register_is_gated() {
        let mut h = hart();
        csetcause(&mut h, (0x03 << 8) | 7).unwrap();
        cgetcause(&mut h, 1).unwrap();
        assert_eq!(h.ints.read(1), 0x0307);

        h.caps.pcc.perms.remove(Perms::ACCESS_SYS_REGS);
        assert_eq!(
            cap_trap(cgetcause(&mut h, 1)),
            (CapEx::AccessSysRegs, crate::exception::CAUSE_REG_NONE)
        );
    }

    #[test]
    fn check_perm_and_check_type() {
        let mut h = hart();
        let mut cap = bounded(0x1000, 0x100, 0x1000);
        cap.perms = Perms::LOAD | Perms::GLOBAL;
        cap.uperms = 0b0011;
        h.caps.write(1, cap);

        ccheckperm(&mut h, 1, Perms::LOAD.bits() as u64).unwrap();
        ccheckperm(&mut h, 1, (0b0001 << UPERMS_SHIFT) | Perms::LOAD.bits() as u64).unwrap();
        assert_eq!(
            cap_trap(ccheckperm(&mut h, 1, Perms::STORE.bits() as u64)),
            (CapEx::PermStore, 1)
        );
        assert_eq!(
            cap_trap(ccheckperm(&mut h, 1, 0b0100 << UPERMS_SHIFT)),
            (CapEx::UserDefined, 1)
        );

        let mut a = bounded(0x1000, 0x100, 0x1000);
        a.set_sealed(9);
        let mut b = bounded(0x2000, 0x100, 0x2000);
        b.set_sealed(9);
        h.caps.write(1, a);
        h.caps.write(2, b);
        cchecktype(&mut h, 1, 2).unwrap();
        b.otype = 10;
        h.caps.write(2, b);
        assert_eq!(cap_trap(cchecktype(&mut h, 1, 2)), (CapEx::Type, 1));
    }

    #[test]
    fn copy_type_and_build_cap() {
        let mut h = hart();
        h.caps.write(1, bounded(0, 1 << 32, 0x100));
        let mut sealed = bounded(0x5000, 0x100, 0x5000);
        sealed.set_sealed(0x77);
        h.caps.write(2, sealed);

        ccopytype(&mut h, 3, 1, 2).unwrap();
        assert_eq!(h.caps.read(3).cursor(), 0x77);

        // Unsealed ct: offset becomes -1.
        h.caps.write(2, bounded(0x5000, 0x100, 0x5000));
        ccopytype(&mut h, 3, 1, 2).unwrap();
        assert_eq!(h.caps.read(3).offset(), u64::MAX);

        // Rebuild a dropped tag under DDC's authority.
        let pattern = {
            let mut c = bounded(0x5000, 0x100, 0x5010);
            c.perms = Perms::LOAD | Perms::GLOBAL;
            c.set_tag(false);
            c
        };
        h.caps.write(4, pattern);
        cbuildcap(&mut h, 5, 0, 4).unwrap();
        let rebuilt = h.caps.read(5);
        assert!(rebuilt.tag());
        assert!(rebuilt.is_unsealed());
        assert_eq!(rebuilt.bounds(), (0x5000, 0x5100));
        assert_eq!(rebuilt.perms(), Perms::LOAD | Perms::GLOBAL);
        assert_eq!(rebuilt.cursor(), 0x5010);

        // Bounds escaping the authority are a length violation on it.
        let mut wide = pattern;
        wide.top = 1u128 << 33;
        h.caps.write(4, wide);
        let err = cbuildcap(&mut h, 6, 1, 4);
        assert_eq!(cap_trap(err), (CapEx::Length, 1));
    }

    #[test]
    fn deprecated_ops_are_reserved_instructions() {
        let mut h = hart();
        assert_eq!(
            cincbase(&mut h, 1, 2, 0x10).unwrap_err(),
            Trap::ReservedInstruction
        );
        assert_eq!(
            csetlen(&mut h, 1, 2, 0x10).unwrap_err(),
            Trap::ReservedInstruction
        );
    }
}
