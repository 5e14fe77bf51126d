//! The 128-bit "magic" encoding.
//!
//! Memory proper holds only base and cursor; the object type, permissions,
//! seal flag and length travel out of band as a pair of words attached to the
//! tag bit, through the `tag_*_m128` calls of the memory collaborator. Bounds
//! are therefore exact, at the cost of auxiliary storage per tag granule.
//!
//! The side pair is stored with the object type XORed against the unsealed
//! value and the length XORed against all-ones, so zeroed side storage
//! decodes as an untagged unsealed capability covering the address space.

use crate::mem::{MemFault, MemoryBus};
use crate::{
    CapCodec, Capability, Perms, COMBINED_PERMS_MASK, OTYPE_MASK, OTYPE_UNSEALED, UPERMS_SHIFT,
};

/// XOR applied to the otype field of the stored tps word.
const TPS_OTYPE_XOR: u64 = (OTYPE_UNSEALED as u64) << 32;

/// Full image of one magic128 capability: two memory words plus the
/// out-of-band (type, perms, sealed) word and length word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Magic128Wire {
    pub base: u64,
    pub cursor: u64,
    /// `otype << 32 | combined_perms << 1 | sealed`.
    pub tps: u64,
    pub leng: u64,
}

fn pack_tps(cap: &Capability) -> u64 {
    ((cap.otype as u64) << 32) | (cap.combined_perms() << 1) | cap.is_sealed() as u64
}

/// The magic 128-bit capability profile. Uninhabited, like the other
/// profiles.
#[derive(Debug, Copy, Clone)]
pub enum Magic128 {}

impl CapCodec for Magic128 {
    type Wire = Magic128Wire;

    const CAP_SIZE: u64 = 16;
    const NAME: &'static str = "magic128";

    fn compress_raw(cap: &Capability) -> Self::Wire {
        let mem = Self::compress_mem(cap);
        Magic128Wire {
            tps: mem.tps ^ TPS_OTYPE_XOR,
            leng: !mem.leng,
            ..mem
        }
    }

    fn decompress_raw(wire: Self::Wire, tag: bool) -> Capability {
        Self::decompress_mem(
            Magic128Wire {
                tps: wire.tps ^ TPS_OTYPE_XOR,
                leng: !wire.leng,
                ..wire
            },
            tag,
        )
    }

    fn compress_mem(cap: &Capability) -> Self::Wire {
        let tps = if cap.tag {
            pack_tps(cap) ^ TPS_OTYPE_XOR
        } else {
            cap.pesbt
        };
        Magic128Wire {
            base: cap.base,
            cursor: cap.cursor,
            tps,
            leng: !cap.length_sat(),
        }
    }

    fn decompress_mem(wire: Self::Wire, tag: bool) -> Capability {
        let tps = wire.tps ^ TPS_OTYPE_XOR;
        let combined = (tps >> 1) & COMBINED_PERMS_MASK;
        let length = !wire.leng;
        Capability {
            cursor: wire.cursor,
            base: wire.base,
            top: wire.base as u128 + length as u128,
            perms: Perms::from_bits_truncate((combined & 0xfff) as u32),
            uperms: ((combined >> UPERMS_SHIFT) & 0xf) as u8,
            otype: ((tps >> 32) as u32) & OTYPE_MASK,
            tag,
            pesbt: wire.tps,
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
        // Every cursor is representable here; mirror the compressed
        // behaviour anyway so policy code is format-independent.
        Self::sync_cache(cap);
        cap.cursor = new_cursor;
        cap.tag = false;
    }

    fn sync_cache(cap: &mut Capability) {
        cap.pesbt = pack_tps(cap) ^ TPS_OTYPE_XOR;
    }

    fn load_cap(bus: &mut dyn MemoryBus, vaddr: u64) -> Result<Capability, MemFault> {
        let (tag, tps, leng) = bus.tag_get_m128(vaddr)?;
        let base = bus.ldq(vaddr)?;
        let cursor = bus.ldq(vaddr + 8)?;
        Ok(Self::decompress_mem(
            Magic128Wire {
                base,
                cursor,
                tps,
                leng,
            },
            tag,
        ))
    }

    fn store_cap(bus: &mut dyn MemoryBus, vaddr: u64, cap: &Capability) -> Result<(), MemFault> {
        let wire = Self::compress_mem(cap);
        bus.tag_set_m128(vaddr, cap.tag, wire.tps, wire.leng)?;
        bus.stq(vaddr, wire.base)?;
        bus.stq(vaddr + 8, wire.cursor)?;
        Ok(())
    }
}
