//! Software model of the CHERI-MIPS capability coprocessor.
//!
//! The crate implements the architectural semantics of every capability
//! instruction (sealing, bounds manipulation, pointer arithmetic, jumps and
//! domain crossings), the tag/seal/permission/bounds check machinery shared by
//! those instructions and by memory accesses through a capability, the
//! marshalling of capabilities to and from tagged memory, and a debugger
//! register surface.
//!
//! One set of semantics runs against three interchangeable in-memory
//! encodings. A type implementing [CapCodec] describes one encoding; the hart
//! is generic over it, so the semantic helpers are never duplicated per
//! format. The provided profiles are [Compressed128], [Magic128] and
//! [Uncompressed256].

use std::fmt;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::mem::{MemFault, MemoryBus};

/// Width of the object-type field shared by all encodings.
pub const OTYPE_BITS: u32 = 18;
/// Largest encodable object type value.
pub const OTYPE_MASK: u32 = (1 << OTYPE_BITS) - 1;
/// Object type of an unsealed capability.
pub const OTYPE_UNSEALED: u32 = OTYPE_MASK;
/// Object type of a sealed-entry ("sentry") capability.
pub const OTYPE_SENTRY: u32 = OTYPE_MASK - 1;
pub const OTYPE_RESERVED2: u32 = OTYPE_MASK - 2;
pub const OTYPE_RESERVED3: u32 = OTYPE_MASK - 3;
/// Largest object type available to software sealing.
pub const MAX_SEALED_OTYPE: u32 = OTYPE_MASK - 4;

const_assert_eq!(OTYPE_MASK, 0x3ffff);

/// Exclusive upper limit of the address space; the largest legal `top`.
pub const CAP_MAX_TOP: u128 = 1u128 << 64;

/// Shift of the user permission nibble within the combined permission word
/// used by `CGetPerm`/`CAndPerm` and the uncompressed wire format.
pub const UPERMS_SHIFT: u32 = 12;
/// All architecturally defined bits of the combined permission word.
pub const COMBINED_PERMS_MASK: u64 = 0xffff;

bitflags! {
    /// The twelve architectural permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Perms: u32 {
        const GLOBAL          = 1 << 0;
        const EXECUTE         = 1 << 1;
        const LOAD            = 1 << 2;
        const STORE           = 1 << 3;
        const LOAD_CAP        = 1 << 4;
        const STORE_CAP       = 1 << 5;
        const STORE_LOCAL     = 1 << 6;
        const SEAL            = 1 << 7;
        const CCALL           = 1 << 8;
        const UNSEAL          = 1 << 9;
        const ACCESS_SYS_REGS = 1 << 10;
        const RESERVED        = 1 << 11;
    }
}

/// The architectural capability register value.
///
/// `base`, `top` and `cursor` are held decoded; `top` is 65-bit so a
/// capability may cover the entire address space. `pesbt` caches the exact
/// lossy word an untagged capability was decoded from, so that invalid bit
/// patterns round-trip through memory byte-for-byte.
#[derive(Debug, Copy, Clone)]
pub struct Capability {
    pub(crate) cursor: u64,
    pub(crate) base: u64,
    pub(crate) top: u128,
    pub(crate) perms: Perms,
    pub(crate) uperms: u8,
    pub(crate) otype: u32,
    pub(crate) tag: bool,
    pub(crate) pesbt: u64,
}

impl Capability {
    /// The null capability: untagged, zero bounds, no permissions.
    pub fn null() -> Self {
        Capability::default()
    }

    /// A tagged capability over the whole address space with every
    /// architectural and user permission, cursor at `addr`.
    pub fn max_perms(addr: u64) -> Self {
        Capability {
            cursor: addr,
            base: 0,
            top: CAP_MAX_TOP,
            perms: Perms::all(),
            uperms: 0xf,
            otype: OTYPE_UNSEALED,
            tag: true,
            pesbt: 0,
        }
    }

    pub fn tag(&self) -> bool {
        self.tag
    }
    pub fn set_tag(&mut self, tag: bool) {
        self.tag = tag;
    }

    pub fn base(&self) -> u64 {
        self.base
    }
    /// Exclusive upper bound, up to `2^64`.
    pub fn top(&self) -> u128 {
        self.top
    }
    pub fn bounds(&self) -> (u64, u128) {
        (self.base, self.top)
    }

    /// Current address.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
    pub fn set_cursor(&mut self, addr: u64) {
        self.cursor = addr;
    }

    /// Cursor relative to base, modulo `2^64`.
    pub fn offset(&self) -> u64 {
        self.cursor.wrapping_sub(self.base)
    }

    /// Exact length, up to `2^64`.
    pub fn length(&self) -> u128 {
        self.top.saturating_sub(self.base as u128)
    }
    /// Length saturated into 64 bits for integer-register consumers.
    pub fn length_sat(&self) -> u64 {
        let len = self.length();
        if len > u64::MAX as u128 {
            u64::MAX
        } else {
            len as u64
        }
    }

    pub fn perms(&self) -> Perms {
        self.perms
    }
    pub fn uperms(&self) -> u8 {
        self.uperms
    }
    /// Permissions and user permissions packed into one integer, the form the
    /// inspection and masking instructions operate on.
    pub fn combined_perms(&self) -> u64 {
        self.perms.bits() as u64 | ((self.uperms as u64) << UPERMS_SHIFT)
    }

    pub fn otype(&self) -> u32 {
        self.otype
    }

    /* Sealing taxonomy */

    pub fn is_unsealed(&self) -> bool {
        self.otype == OTYPE_UNSEALED
    }
    pub fn is_sealed(&self) -> bool {
        !self.is_unsealed()
    }
    pub fn is_sealed_entry(&self) -> bool {
        self.otype == OTYPE_SENTRY
    }
    pub fn is_sealed_with_type(&self) -> bool {
        self.otype <= MAX_SEALED_OTYPE
    }
    pub fn has_reserved_otype(&self) -> bool {
        self.otype > MAX_SEALED_OTYPE && self.otype != OTYPE_UNSEALED
    }

    /// Seal with a software object type. Caller has validated the type range.
    pub fn set_sealed(&mut self, otype: u32) {
        debug_assert!(otype <= MAX_SEALED_OTYPE);
        self.otype = otype;
    }
    pub fn set_unsealed(&mut self) {
        self.otype = OTYPE_UNSEALED;
    }
    pub fn make_sealed_entry(&mut self) {
        self.otype = OTYPE_SENTRY;
    }
    pub fn unseal_entry(&mut self) {
        debug_assert!(self.is_sealed_entry());
        self.otype = OTYPE_UNSEALED;
    }

    /// `base <= addr` and `addr + nbytes <= top`.
    pub fn in_bounds(&self, addr: u64, nbytes: u64) -> bool {
        addr >= self.base && (addr as u128 + nbytes as u128) <= self.top
    }

    /// The sentinel the capability-branch-on-null instructions test for.
    pub fn is_null_sentinel(&self) -> bool {
        !self.tag && self.base == 0 && self.offset() == 0
    }
}

/// Zero value, as produced by register-file reset.
impl Default for Capability {
    fn default() -> Self {
        Capability {
            cursor: 0,
            base: 0,
            top: 0,
            perms: Perms::empty(),
            uperms: 0,
            otype: OTYPE_UNSEALED,
            tag: false,
            pesbt: 0,
        }
    }
}

/// Exact (architectural) equality: every semantic field, and for untagged
/// values also the preserved memory pattern.
impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.cursor == other.cursor
            && self.base == other.base
            && self.top == other.top
            && self.perms == other.perms
            && self.uperms == other.uperms
            && self.otype == other.otype
            && (self.tag || self.pesbt == other.pesbt)
    }
}
impl Eq for Capability {}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#018x} (b:{:#018x} t:{:#019x} v:{} p:{:04x} ot:{:#x})",
            self.cursor,
            self.base,
            self.top,
            self.tag as u8,
            self.combined_perms(),
            self.otype,
        )
    }
}

/// One in-memory capability encoding.
///
/// A type implementing this trait is a profile selector, not a value;
/// instantiate it as an uninhabited enum. The semantic layer is generic over
/// the codec and never inspects wire formats itself.
///
/// `*_raw` functions convert between the architectural value and the logical
/// field encoding; `*_mem` additionally apply the format's null-pattern XOR so
/// that an all-zero memory region decodes to the canonical untagged
/// whole-address-space pattern.
pub trait CapCodec: Sized + Copy + Clone {
    /// The exact image of one capability in memory, including any words the
    /// format side-carries through tag storage.
    type Wire: Copy + Clone + PartialEq + fmt::Debug;

    /// Bytes one capability occupies; also the tag granule.
    const CAP_SIZE: u64;
    const NAME: &'static str;

    fn compress_raw(cap: &Capability) -> Self::Wire;
    fn decompress_raw(wire: Self::Wire, tag: bool) -> Capability;
    fn compress_mem(cap: &Capability) -> Self::Wire;
    fn decompress_mem(wire: Self::Wire, tag: bool) -> Capability;

    /// Would the capability keep its bounds if the cursor moved to
    /// `new_cursor`?
    fn representable(cap: &Capability, new_cursor: u64) -> bool;
    /// Same question for the sealed form of the capability.
    fn representable_when_sealed(cap: &Capability, new_cursor: u64) -> bool;

    /// Narrow `cap` to `[base, top)`, rounding outward to the nearest
    /// representable pair if the format requires it. Returns whether the
    /// requested bounds were hit exactly. The cursor is left untouched.
    fn set_bounds(cap: &mut Capability, base: u64, top: u128) -> bool;

    /// Alignment mask `base` must satisfy for a tagged capability of exactly
    /// `len` bytes. All-ones when any alignment will do.
    fn align_mask_for_length(len: u64) -> u64;
    /// Smallest representable length `>= len` (saturating at `u64::MAX`).
    fn round_length_up(len: u64) -> u64;

    /// Strip the tag after an operation produced a cursor the format cannot
    /// represent, freezing the bit pattern the value will show in memory.
    fn mark_unrepresentable(cap: &mut Capability, new_cursor: u64);

    /// Refresh the cached lossy word from the decoded fields. Called by
    /// operations that invalidate a register in place, so the value still
    /// writes back to memory faithfully.
    fn sync_cache(cap: &mut Capability);

    fn load_cap(bus: &mut dyn MemoryBus, vaddr: u64) -> Result<Capability, MemFault>;
    fn store_cap(bus: &mut dyn MemoryBus, vaddr: u64, cap: &Capability) -> Result<(), MemFault>;
}

mod exception;
pub use exception::{CapEx, Trap, CAUSE_REG_NONE};

mod stats;
pub use stats::{BoundsHistogram, HistOp, Stats};

mod regs;
pub use regs::{CapCause, CapRegFile, Cp0, Fpu, IntRegFile};

mod hart;
pub use hart::{CoprocConfig, Hart};

mod check;
pub use check::check_cap;

// The three encoding profiles.
mod compressed128;
pub use compressed128::Compressed128;
mod magic128;
pub use magic128::{Magic128, Magic128Wire};
mod uncompressed256;
pub use uncompressed256::Uncompressed256;

pub mod mem;
pub use mem::SparseMemory;

pub mod ops;

pub mod debug;
