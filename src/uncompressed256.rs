//! The 256-bit uncompressed encoding.
//!
//! Four memory words carry the capability directly: the combined
//! type/permissions/seal word, the cursor, the base and the length. The
//! first and last words are stored inverted, so an all-zero memory region
//! decodes as an untagged unsealed capability with full permissions over the
//! whole address space, and integer zeros never masquerade as dangerous
//! patterns once the tag is clear.

use crate::mem::{MemFault, MemoryBus};
use crate::{
    CapCodec, Capability, Perms, COMBINED_PERMS_MASK, OTYPE_MASK, OTYPE_UNSEALED, UPERMS_SHIFT,
};

fn pack_tops(cap: &Capability) -> u64 {
    ((cap.otype as u64) << 32) | (cap.combined_perms() << 1) | cap.is_sealed() as u64
}

/// The uncompressed 256-bit capability profile. Uninhabited.
#[derive(Debug, Copy, Clone)]
pub enum Uncompressed256 {}

impl CapCodec for Uncompressed256 {
    /// `[type/perms/sealed, cursor, base, length]`, little-endian word order;
    /// words 0 and 3 are inverted in the memory form.
    type Wire = [u64; 4];

    const CAP_SIZE: u64 = 32;
    const NAME: &'static str = "uncompressed256";

    fn compress_raw(cap: &Capability) -> Self::Wire {
        let [w0, w1, w2, w3] = Self::compress_mem(cap);
        [!w0, w1, w2, !w3]
    }

    fn decompress_raw(wire: Self::Wire, tag: bool) -> Capability {
        Self::decompress_mem([!wire[0], wire[1], wire[2], !wire[3]], tag)
    }

    fn compress_mem(cap: &Capability) -> Self::Wire {
        let w0 = if cap.tag { !pack_tops(cap) } else { cap.pesbt };
        [w0, cap.cursor, cap.base, !cap.length_sat()]
    }

    fn decompress_mem(wire: Self::Wire, tag: bool) -> Capability {
        let tops = !wire[0];
        let sealed = tops & 1 != 0;
        let combined = (tops >> 1) & COMBINED_PERMS_MASK;
        let otype_field = ((tops >> 32) as u32) & OTYPE_MASK;
        let length = !wire[3];
        Capability {
            cursor: wire[1],
            base: wire[2],
            top: wire[2] as u128 + length as u128,
            perms: Perms::from_bits_truncate((combined & 0xfff) as u32),
            uperms: ((combined >> UPERMS_SHIFT) & 0xf) as u8,
            otype: if sealed { otype_field } else { OTYPE_UNSEALED },
            tag,
            pesbt: wire[0],
        }
    }

    fn representable(_cap: &Capability, _new_cursor: u64) -> bool {
        true
    }

    fn representable_when_sealed(_cap: &Capability, _new_cursor: u64) -> bool {
        true
    }

    fn set_bounds(cap: &mut Capability, base: u64, top: u128) -> bool {
        cap.base = base;
        cap.top = top;
        true
    }

    fn align_mask_for_length(_len: u64) -> u64 {
        u64::MAX
    }

    fn round_length_up(len: u64) -> u64 {
        len
    }

    fn mark_unrepresentable(cap: &mut Capability, new_cursor: u64) {
        Self::sync_cache(cap);
        cap.cursor = new_cursor;
        cap.tag = false;
    }

    fn sync_cache(cap: &mut Capability) {
        cap.pesbt = !pack_tops(cap);
    }

    fn load_cap(bus: &mut dyn MemoryBus, vaddr: u64) -> Result<Capability, MemFault> {
        let tag = bus.tag_get(vaddr)?;
        let mut wire = [0u64; 4];
        for (i, word) in wire.iter_mut().enumerate() {
            *word = bus.ldq(vaddr + 8 * i as u64)?;
        }
        Ok(Self::decompress_mem(wire, tag))
    }

    fn store_cap(bus: &mut dyn MemoryBus, vaddr: u64, cap: &Capability) -> Result<(), MemFault> {
        let wire = Self::compress_mem(cap);
        if cap.tag {
            bus.tag_set(vaddr)?;
        } else {
            bus.tag_invalidate(vaddr, Self::CAP_SIZE)?;
        }
        for (i, word) in wire.iter().enumerate() {
            bus.stq(vaddr + 8 * i as u64, *word)?;
        }
        Ok(())
    }
}
