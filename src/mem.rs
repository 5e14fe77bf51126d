//! The memory access path: integer and capability accesses through a
//! capability (or through DDC for legacy MIPS loads and stores), tag
//! propagation, and the collaborator trait the surrounding CPU implements.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::{check_cap, CapCodec, Hart, Perms, Trap};

/// A fault from the memory collaborator (TLB miss or similar). It returns
/// control to the caller without completing the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemFault {
    #[error("TLB fault on load at {addr:#x}")]
    TlbLoad { addr: u64 },
    #[error("TLB fault on store at {addr:#x}")]
    TlbStore { addr: u64 },
}

/// Memory and tag storage, owned by the surrounding CPU.
///
/// Data moves in eight-byte quanta; tags are one bit per capability-sized
/// granule. The `_m128` variants side-carry the magic128 encoding's
/// out-of-band words together with the tag.
pub trait MemoryBus {
    fn ldq(&mut self, vaddr: u64) -> Result<u64, MemFault>;
    fn stq(&mut self, vaddr: u64, value: u64) -> Result<(), MemFault>;

    fn tag_get(&mut self, vaddr: u64) -> Result<bool, MemFault>;
    fn tag_set(&mut self, vaddr: u64) -> Result<(), MemFault>;
    /// Clear the tag of every granule overlapping `[vaddr, vaddr + nbytes)`.
    fn tag_invalidate(&mut self, vaddr: u64, nbytes: u64) -> Result<(), MemFault>;

    fn tag_get_m128(&mut self, vaddr: u64) -> Result<(bool, u64, u64), MemFault>;
    fn tag_set_m128(&mut self, vaddr: u64, tag: bool, tps: u64, leng: u64)
        -> Result<(), MemFault>;

    /// Whether the translation entry for `vaddr` forbids loading tags
    /// (capability loads through it read their data with the tag cleared).
    fn tag_load_inhibited(&mut self, _vaddr: u64) -> Result<bool, MemFault> {
        Ok(false)
    }
}

fn align_check<C: CapCodec>(
    hart: &mut Hart<C>,
    ea: u64,
    size: u32,
    store: bool,
) -> Result<(), Trap> {
    if ea & (size as u64 - 1) != 0 && !hart.config.allow_unaligned {
        return Err(hart.raise_address_error(ea, store));
    }
    Ok(())
}

/// Diagnostic-only object-type cross-check between PCC and the authorizing
/// capability. Never traps; the architectural intent of the predicate is
/// unresolved, so it is surfaced as a warning behind a config flag.
fn warn_type_check<C: CapCodec>(hart: &Hart<C>, cb: &crate::Capability, what: &str) {
    if hart.config.warn_type_checks && hart.caps.pcc.otype() != cb.otype() {
        log::warn!(
            "{}: PCC otype {:#x} differs from authorizing otype {:#x}",
            what,
            hart.caps.pcc.otype(),
            cb.otype()
        );
    }
}

/// Check an integer load of `size` bytes at `cb.cursor + offset`.
/// Returns the effective address for the host load path.
pub fn cap_load_check<C: CapCodec>(
    hart: &mut Hart<C>,
    cb_index: usize,
    offset: i64,
    size: u32,
) -> Result<u64, Trap> {
    let cb = hart.caps.read_or_ddc(cb_index);
    let ea = cb.cursor().wrapping_add(offset as u64);
    check_cap(hart, &cb, Perms::LOAD, ea, size as u64, cb_index as u8)?;
    warn_type_check(hart, &cb, "load");
    align_check(hart, ea, size, false)?;
    Ok(ea)
}

/// Check an integer store of `size` bytes at `cb.cursor + offset`, clearing
/// the tag of the granule the store lands in. Returns the effective address.
pub fn cap_store_check<C: CapCodec>(
    hart: &mut Hart<C>,
    bus: &mut dyn MemoryBus,
    cb_index: usize,
    offset: i64,
    size: u32,
) -> Result<u64, Trap> {
    let cb = hart.caps.read_or_ddc(cb_index);
    let ea = cb.cursor().wrapping_add(offset as u64);
    check_cap(hart, &cb, Perms::STORE, ea, size as u64, cb_index as u8)?;
    warn_type_check(hart, &cb, "store");
    align_check(hart, ea, size, true)?;
    bus.tag_invalidate(ea, size as u64)?;
    Ok(ea)
}

/// Check a legacy MIPS load of `size` bytes at `DDC.base + offset`.
pub fn check_ddc_load<C: CapCodec>(
    hart: &mut Hart<C>,
    offset: u64,
    size: u32,
) -> Result<u64, Trap> {
    let ddc = hart.caps.ddc;
    let ea = ddc.base().wrapping_add(offset);
    check_cap(hart, &ddc, Perms::LOAD, ea, size as u64, 0)?;
    align_check(hart, ea, size, false)?;
    Ok(ea)
}

/// Check a legacy MIPS store of `size` bytes at `DDC.base + offset`,
/// clearing the tag of the granule the store lands in.
pub fn check_ddc_store<C: CapCodec>(
    hart: &mut Hart<C>,
    bus: &mut dyn MemoryBus,
    offset: u64,
    size: u32,
) -> Result<u64, Trap> {
    let ddc = hart.caps.ddc;
    let ea = ddc.base().wrapping_add(offset);
    check_cap(hart, &ddc, Perms::STORE, ea, size as u64, 0)?;
    align_check(hart, ea, size, true)?;
    bus.tag_invalidate(ea, size as u64)?;
    Ok(ea)
}

/// Byte span a load/store-left at `ea` touches: from `ea` to the end of its
/// naturally aligned word.
fn left_span(ea: u64, size: u32) -> (u64, u64) {
    let nbytes = size as u64 - (ea & (size as u64 - 1));
    (ea, nbytes)
}

/// Byte span a load/store-right at `ea` touches: from the start of its
/// naturally aligned word up to and including `ea`.
fn right_span(ea: u64, size: u32) -> (u64, u64) {
    let start = ea & !(size as u64 - 1);
    (start, (ea & (size as u64 - 1)) + 1)
}

/// `LWL`/`LDL` through DDC: no alignment constraint, partial-word bounds.
pub fn check_ddc_load_left<C: CapCodec>(
    hart: &mut Hart<C>,
    offset: u64,
    size: u32,
) -> Result<u64, Trap> {
    let ddc = hart.caps.ddc;
    let ea = ddc.base().wrapping_add(offset);
    let (start, nbytes) = left_span(ea, size);
    check_cap(hart, &ddc, Perms::LOAD, start, nbytes, 0)?;
    Ok(ea)
}

/// `LWR`/`LDR` through DDC.
pub fn check_ddc_load_right<C: CapCodec>(
    hart: &mut Hart<C>,
    offset: u64,
    size: u32,
) -> Result<u64, Trap> {
    let ddc = hart.caps.ddc;
    let ea = ddc.base().wrapping_add(offset);
    let (start, nbytes) = right_span(ea, size);
    check_cap(hart, &ddc, Perms::LOAD, start, nbytes, 0)?;
    Ok(ea)
}

/// `SWL`/`SDL` through DDC.
pub fn check_ddc_store_left<C: CapCodec>(
    hart: &mut Hart<C>,
    bus: &mut dyn MemoryBus,
    offset: u64,
    size: u32,
) -> Result<u64, Trap> {
    let ddc = hart.caps.ddc;
    let ea = ddc.base().wrapping_add(offset);
    let (start, nbytes) = left_span(ea, size);
    check_cap(hart, &ddc, Perms::STORE, start, nbytes, 0)?;
    bus.tag_invalidate(start, nbytes)?;
    Ok(ea)
}

/// `SWR`/`SDR` through DDC.
pub fn check_ddc_store_right<C: CapCodec>(
    hart: &mut Hart<C>,
    bus: &mut dyn MemoryBus,
    offset: u64,
    size: u32,
) -> Result<u64, Trap> {
    let ddc = hart.caps.ddc;
    let ea = ddc.base().wrapping_add(offset);
    let (start, nbytes) = right_span(ea, size);
    check_cap(hart, &ddc, Perms::STORE, start, nbytes, 0)?;
    bus.tag_invalidate(start, nbytes)?;
    Ok(ea)
}

/// `CLC cd, cb, offset`: load a capability through `cb` (DDC when the index
/// is 0). The tag is stripped when `cb` lacks LOAD_CAP or the translation
/// entry inhibits tag loads.
pub fn load_cap_via_cap<C: CapCodec>(
    hart: &mut Hart<C>,
    bus: &mut dyn MemoryBus,
    cd: usize,
    cb_index: usize,
    offset: i64,
) -> Result<(), Trap> {
    let cb = hart.caps.read_or_ddc(cb_index);
    let ea = cb.cursor().wrapping_add(offset as u64);
    check_cap(hart, &cb, Perms::LOAD, ea, C::CAP_SIZE, cb_index as u8)?;
    if ea & (C::CAP_SIZE - 1) != 0 {
        return Err(hart.raise_address_error(ea, false));
    }
    let mut cap = C::load_cap(bus, ea)?;
    if cap.tag() && (!cb.perms().contains(Perms::LOAD_CAP) || bus.tag_load_inhibited(ea)?) {
        cap.set_tag(false);
    }
    log::trace!("clc c{} <- [{:#x}] {}", cd, ea, cap);
    hart.stats.note_cap_read(cap.tag());
    hart.caps.write(cd, cap);
    Ok(())
}

/// `CSC cs, cb, offset`: store a capability through `cb` (DDC when the index
/// is 0). The granule's tag follows the stored value's tag.
pub fn store_cap_via_cap<C: CapCodec>(
    hart: &mut Hart<C>,
    bus: &mut dyn MemoryBus,
    cs: usize,
    cb_index: usize,
    offset: i64,
) -> Result<(), Trap> {
    let cb = hart.caps.read_or_ddc(cb_index);
    let value = hart.caps.read(cs);
    let ea = cb.cursor().wrapping_add(offset as u64);
    let mut required = Perms::STORE | Perms::STORE_CAP;
    if value.tag() && !value.perms().contains(Perms::GLOBAL) {
        required |= Perms::STORE_LOCAL;
    }
    check_cap(hart, &cb, required, ea, C::CAP_SIZE, cb_index as u8)?;
    if ea & (C::CAP_SIZE - 1) != 0 {
        return Err(hart.raise_address_error(ea, true));
    }
    C::store_cap(bus, ea, &value)?;
    log::trace!("csc c{} -> [{:#x}] {}", cs, ea, value);
    hart.stats.note_cap_write(value.tag());
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct TagLine {
    tag: bool,
    tps: u64,
    leng: u64,
}

/// Word-granular sparse memory with per-granule tag metadata: the reference
/// collaborator used by the test suites and handy for embedders that do not
/// model a TLB.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    granule: u64,
    words: HashMap<u64, u64>,
    lines: HashMap<u64, TagLine>,
    load_inhibited: HashSet<u64>,
}

impl SparseMemory {
    /// `granule` is the codec's `CAP_SIZE` (a power of two).
    pub fn new(granule: u64) -> Self {
        debug_assert!(granule.is_power_of_two());
        SparseMemory {
            granule,
            words: HashMap::new(),
            lines: HashMap::new(),
            load_inhibited: HashSet::new(),
        }
    }

    fn line(&self, vaddr: u64) -> u64 {
        vaddr / self.granule
    }

    /// Mark the granule containing `vaddr` as tag-load-inhibited.
    pub fn inhibit_tag_loads(&mut self, vaddr: u64) {
        let line = self.line(vaddr);
        self.load_inhibited.insert(line);
    }
}

impl MemoryBus for SparseMemory {
    fn ldq(&mut self, vaddr: u64) -> Result<u64, MemFault> {
        Ok(self.words.get(&(vaddr & !7)).copied().unwrap_or(0))
    }

    fn stq(&mut self, vaddr: u64, value: u64) -> Result<(), MemFault> {
        self.words.insert(vaddr & !7, value);
        Ok(())
    }

    fn tag_get(&mut self, vaddr: u64) -> Result<bool, MemFault> {
        let line = self.line(vaddr);
        Ok(self.lines.get(&line).map_or(false, |l| l.tag))
    }

    fn tag_set(&mut self, vaddr: u64) -> Result<(), MemFault> {
        let line = self.line(vaddr);
        self.lines.entry(line).or_default().tag = true;
        Ok(())
    }

    fn tag_invalidate(&mut self, vaddr: u64, nbytes: u64) -> Result<(), MemFault> {
        if nbytes == 0 {
            return Ok(());
        }
        let first = self.line(vaddr);
        let last = self.line(vaddr + nbytes - 1);
        for line in first..=last {
            if let Some(l) = self.lines.get_mut(&line) {
                l.tag = false;
            }
        }
        Ok(())
    }

    fn tag_get_m128(&mut self, vaddr: u64) -> Result<(bool, u64, u64), MemFault> {
        let line = self.line(vaddr);
        let l = self.lines.get(&line).copied().unwrap_or_default();
        Ok((l.tag, l.tps, l.leng))
    }

    fn tag_set_m128(
        &mut self,
        vaddr: u64,
        tag: bool,
        tps: u64,
        leng: u64,
    ) -> Result<(), MemFault> {
        let line = self.line(vaddr);
        self.lines.insert(line, TagLine { tag, tps, leng });
        Ok(())
    }

    fn tag_load_inhibited(&mut self, vaddr: u64) -> Result<bool, MemFault> {
        let line = self.line(vaddr);
        Ok(self.load_inhibited.contains(&line))
    }
}
